// Synchronization primitives
//
// One FrameSync per frame in flight:
// - image_available: signalled by acquire, waited on by the submit
// - in_flight_fence: signalled by the submit, waited on by the CPU before the
//   slot's command buffer is reused
//
// The render-finished semaphore that present waits on belongs to the
// swapchain image instead (see `Swapchain::render_finished`): present gives
// no signal when it is done with a semaphore, so it may only be signalled
// again once the same image has been acquired again.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let image_available =
            create_semaphore(&device.device).context("Failed to create image-available semaphore")?;

        // Signalled so the very first wait on this slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight_fence = match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(e).context("Failed to create in-flight fence");
            }
        };

        Ok(Self {
            image_available,
            in_flight_fence,
        })
    }

    /// Block until the GPU has finished the last submission from this slot
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    /// Unsignal the fence right before it is handed to a new submit
    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    Ok(unsafe { device.create_semaphore(&semaphore_info, None) }?)
}

/// Create `count` objects. If one fails, the ones already created are
/// handed to `destroy` before the error is returned.
pub fn create_all<T>(
    count: usize,
    mut create: impl FnMut(usize) -> Result<T>,
    mut destroy: impl FnMut(T),
) -> Result<Vec<T>> {
    let mut created = Vec::with_capacity(count);
    for i in 0..count {
        match create(i) {
            Ok(object) => created.push(object),
            Err(e) => {
                created.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_all_builds_every_object() {
        let objects = create_all(3, |i| Ok(i * 10), |_| panic!("nothing to destroy")).unwrap();
        assert_eq!(objects, vec![0, 10, 20]);
    }

    #[test]
    fn create_all_destroys_partial_results_on_failure() {
        let mut destroyed = Vec::new();
        let result = create_all(
            4,
            |i| {
                if i == 2 {
                    anyhow::bail!("out of memory")
                }
                Ok(i)
            },
            |object| destroyed.push(object),
        );

        assert!(result.is_err());
        assert_eq!(destroyed, vec![0, 1]);
    }

    #[test]
    fn create_all_with_zero_count() {
        let objects: Vec<u32> = create_all(0, |_| anyhow::bail!("never called"), |_| {}).unwrap();
        assert!(objects.is_empty());
    }
}
