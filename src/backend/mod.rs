// Backend module - Vulkan abstraction layer
//
// Thin RAII wrappers around ash. Every object holding GPU resources keeps an
// Arc<VulkanDevice> so the device always outlives what was created from it.

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod model;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
pub use device::VulkanDevice;
pub use model::Model;
pub use pipeline::{Pipeline, PipelineConfig};
pub use swapchain::{AcquireOutcome, Swapchain};
