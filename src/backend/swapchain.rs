// Swapchain - Window presentation
//
// Owns everything whose size or format follows the window surface:
// swapchain images + views, one depth buffer per image, the render pass,
// the framebuffers tying them together and the per-image semaphore that
// present waits on.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::sync::{create_all, create_semaphore};
use super::VulkanDevice;

/// Depth formats in order of preference
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` means the image is usable but the swapchain should be
    /// recreated after this frame
    Acquired { index: u32, suboptimal: bool },
    /// The surface changed and nothing can be presented until recreation
    OutOfDate,
}

/// Prefer 8-bit sRGB BGRA, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Configured mode if available, then MAILBOX, then FIFO (always supported)
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates the extent unless it reports the `u32::MAX` wildcard
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum so we never wait on the driver, capped by the
/// maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

struct DepthResource {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::extensions::khr::Swapchain,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_resources: Vec<DepthResource>,
    framebuffers: Vec<vk::Framebuffer>,
    render_finished: Vec<vk::Semaphore>,
    render_pass: vk::RenderPass,
    image_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Build a swapchain for the device's surface.
    ///
    /// Passing the `previous` swapchain lets the driver hand its resources
    /// over; it must still be dropped by the caller afterwards.
    pub fn new(
        device: Arc<VulkanDevice>,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        let support = device.swapchain_support()?;

        let surface_format =
            choose_surface_format(&support.formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let depth_format = device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let families = device.queue_families.unique();
        let (sharing_mode, family_indices): (vk::SharingMode, &[u32]) = if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain));

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // From here on Drop cleans up whatever has been created so far
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_resources: Vec::new(),
            framebuffers: Vec::new(),
            render_finished: Vec::new(),
            render_pass: vk::RenderPass::null(),
            image_format: surface_format.format,
            depth_format,
            extent,
            device,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;
        log::info!("Created swapchain with {} images", this.images.len());

        this.create_image_views()?;
        this.create_render_pass()?;
        this.create_depth_resources()?;
        this.create_framebuffers()?;
        this.create_render_finished_semaphores()?;

        Ok(this)
    }

    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let view = create_image_view(
                &self.device.device,
                image,
                self.image_format,
                vk::ImageAspectFlags::COLOR,
            )
            .context("Failed to create swapchain image view")?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_render_pass(&mut self) -> Result<()> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(self.image_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        // Depth is only needed during the pass
        let depth_attachment = vk::AttachmentDescription::builder()
            .format(self.depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_attachment_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)
            .depth_stencil_attachment(&depth_attachment_ref)
            .build();

        // Wait for the presentation engine to release the image and for the
        // previous frame's depth writes before clearing
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build();

        let attachments = [color_attachment, depth_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe { self.device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        Ok(())
    }

    fn create_depth_resources(&mut self) -> Result<()> {
        // Stencil is never used, so the view only needs the depth aspect
        let aspect = vk::ImageAspectFlags::DEPTH;

        for i in 0..self.images.len() {
            let image_info = vk::ImageCreateInfo::builder()
                .image_type(vk::ImageType::TYPE_2D)
                .extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .format(self.depth_format)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let (image, allocation) = self.device.create_image_with_info(
                &format!("depth image {}", i),
                &image_info,
                MemoryLocation::GpuOnly,
            )?;

            // Track before creating the view so a failure below is cleaned up
            self.depth_resources.push(DepthResource {
                image,
                view: vk::ImageView::null(),
                allocation: Some(allocation),
            });

            let view = create_image_view(&self.device.device, image, self.depth_format, aspect)
                .context("Failed to create depth image view")?;
            if let Some(resource) = self.depth_resources.last_mut() {
                resource.view = view;
            }
        }

        Ok(())
    }

    fn create_framebuffers(&mut self) -> Result<()> {
        for (color_view, depth) in self.image_views.iter().zip(&self.depth_resources) {
            let attachments = [*color_view, depth.view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_render_finished_semaphores(&mut self) -> Result<()> {
        let device = &self.device.device;
        let semaphores = create_all(
            self.images.len(),
            |_| create_semaphore(device).context("Failed to create render-finished semaphore"),
            |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
        )?;
        self.render_finished = semaphores;
        Ok(())
    }

    /// Acquire next image for rendering, signalling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen. Returns true when the swapchain
    /// should be recreated (suboptimal or out of date).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    /// Same color and depth formats, i.e. pipelines built against the other
    /// swapchain's render pass are compatible with this one
    pub fn compare_formats(&self, other: &Swapchain) -> bool {
        self.image_format == other.image_format && self.depth_format == other.depth_format
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    /// Signalled by the submit that renders into image `index`, waited on
    /// by the present of that image
    pub fn render_finished(&self, index: usize) -> vk::Semaphore {
        self.render_finished[index]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &semaphore in &self.render_finished {
                device.destroy_semaphore(semaphore, None);
            }

            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }

            for depth in &mut self.depth_resources {
                if depth.view != vk::ImageView::null() {
                    device.destroy_image_view(depth.view, None);
                }
                device.destroy_image(depth.image, None);
                if let Some(allocation) = depth.allocation.take() {
                    self.device.free(allocation);
                }
            }

            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }

            for &view in &self.image_views {
                device.destroy_image_view(view, None);
            }

            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    Ok(unsafe { device.create_image_view(&create_info, None) }?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as M;

        let all = [M::FIFO, M::MAILBOX, M::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, M::IMMEDIATE), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], M::IMMEDIATE), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO], M::IMMEDIATE), M::FIFO);
        assert_eq!(choose_present_mode(&all, M::FIFO), M::FIFO);
    }

    #[test]
    fn surface_extent_wins_when_fixed() {
        let mut caps = caps(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(&caps, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extent, caps.current_extent);
    }

    #[test]
    fn window_extent_is_clamped() {
        let caps = caps(2, 3);
        let extent = choose_extent(&caps, vk::Extent2D { width: 8, height: 9000 });
        assert_eq!(extent, vk::Extent2D { width: 16, height: 2048 });

        let extent = choose_extent(&caps, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 0)), 3, "0 means no upper bound");
    }
}
