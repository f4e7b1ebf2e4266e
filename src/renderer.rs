// =============================================================================
// RENDERER - Frame lifecycle on top of the swapchain
// =============================================================================
//
// FRAME FLOW:
// 1. begin_frame          wait for this slot's fence, acquire an image,
//                         start recording the slot's command buffer
// 2. begin_swapchain_render_pass / render systems record draws /
//    end_swapchain_render_pass
// 3. end_frame            submit, present, recreate the swapchain if the
//                         surface changed, advance to the next slot
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::sync::{create_all, FrameSync};
use crate::backend::{AcquireOutcome, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::window::Window;

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // PER FRAME IN FLIGHT
    // ─────────────────────────────────────────────────────────────────────────
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    /// Fence of the frame currently using each swapchain image (null if none)
    images_in_flight: Vec<vk::Fence>,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAME STATE
    // ─────────────────────────────────────────────────────────────────────────
    current_frame_index: usize,
    current_image_index: u32,
    is_frame_started: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // SETTINGS
    // ─────────────────────────────────────────────────────────────────────────
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    wait_stages: [vk::PipelineStageFlags; 1],

    swapchain: Swapchain,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(device: Arc<VulkanDevice>, window: &Window, config: &Config) -> Result<Self> {
        let present_mode = config.present_mode();
        let swapchain = Swapchain::new(device.clone(), window.extent(), present_mode, None)?;

        let max_frames = config.graphics.max_frames_in_flight;
        let frame_sync = create_all(
            max_frames,
            |_| FrameSync::new(&device),
            |sync| sync.destroy(&device.device),
        )?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(max_frames as u32);

        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                for sync in &frame_sync {
                    sync.destroy(&device.device);
                }
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        log::info!("Renderer ready with {} frame(s) in flight", max_frames);

        Ok(Self {
            command_buffers,
            frame_sync,
            images_in_flight: vec![vk::Fence::null(); swapchain.image_count()],
            current_frame_index: 0,
            current_image_index: 0,
            is_frame_started: false,
            clear_color: config.graphics.clear_color,
            present_mode,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            swapchain,
            device,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent_aspect_ratio()
    }

    /// Slot of the frame being recorded, in `0..max_frames_in_flight`
    pub fn frame_index(&self) -> usize {
        self.current_frame_index
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.frame_sync.len()
    }

    // =========================================================================
    // FRAME LIFECYCLE
    // =========================================================================

    /// Start a frame. Returns `None` when nothing can be drawn right now
    /// (window minimized or swapchain just recreated); skip the frame then.
    pub fn begin_frame(&mut self, window: &Window) -> Result<Option<vk::CommandBuffer>> {
        if self.is_frame_started {
            anyhow::bail!("Cannot call begin_frame while a frame is already in progress");
        }
        if window.is_minimized() {
            return Ok(None);
        }

        let sync = &self.frame_sync[self.current_frame_index];
        sync.wait(&self.device.device)?;

        let image_index = match self.swapchain.acquire_next_image(sync.image_available)? {
            AcquireOutcome::Acquired { index, .. } => index,
            AcquireOutcome::OutOfDate => {
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
        };

        let cmd = self.command_buffers[self.current_frame_index];
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin recording command buffer")?;
        }

        self.current_image_index = image_index;
        self.is_frame_started = true;
        Ok(Some(cmd))
    }

    /// Submit and present the frame started by `begin_frame`
    pub fn end_frame(&mut self, window: &mut Window) -> Result<()> {
        if !self.is_frame_started {
            anyhow::bail!("Cannot call end_frame while frame is not in progress");
        }
        self.is_frame_started = false;

        let device = &self.device.device;
        let cmd = self.command_buffers[self.current_frame_index];
        let sync = &self.frame_sync[self.current_frame_index];
        let image_index = self.current_image_index as usize;

        unsafe { device.end_command_buffer(cmd) }.context("Failed to record command buffer")?;

        // An older frame may still be rendering into this image
        let image_fence = self.images_in_flight[image_index];
        if image_fence != vk::Fence::null() {
            unsafe { device.wait_for_fences(&[image_fence], true, u64::MAX) }
                .context("Failed to wait for image fence")?;
        }
        self.images_in_flight[image_index] = sync.in_flight_fence;

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [self.swapchain.render_finished(image_index)];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        sync.reset(device)?;
        unsafe {
            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")?;
        }

        let needs_recreate = self.swapchain.present(
            self.device.present_queue,
            self.current_image_index,
            &signal_semaphores,
        )?;

        if needs_recreate || window.was_resized() {
            window.reset_resized_flag();
            self.recreate_swapchain(window)?;
        }

        self.current_frame_index = (self.current_frame_index + 1) % self.frame_sync.len();
        Ok(())
    }

    /// Clear color and depth, and set the dynamic viewport/scissor to the
    /// full swapchain extent
    pub fn begin_swapchain_render_pass(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.check_current_command_buffer(cmd, "begin render pass")?;

        let extent = self.swapchain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass())
            .framebuffer(self.swapchain.framebuffer(self.current_image_index as usize))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            let device = &self.device.device;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
        }

        Ok(())
    }

    pub fn end_swapchain_render_pass(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.check_current_command_buffer(cmd, "end render pass")?;
        unsafe { self.device.device.cmd_end_render_pass(cmd) };
        Ok(())
    }

    fn check_current_command_buffer(&self, cmd: vk::CommandBuffer, action: &str) -> Result<()> {
        if !self.is_frame_started {
            anyhow::bail!("Cannot {} when frame not in progress", action);
        }
        if cmd != self.command_buffers[self.current_frame_index] {
            anyhow::bail!("Cannot {} on command buffer from a different frame", action);
        }
        Ok(())
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Rebuild the swapchain for the window's current size. Does nothing
    /// while the window is minimized.
    pub fn recreate_swapchain(&mut self, window: &Window) -> Result<()> {
        if window.is_minimized() {
            log::debug!("Window minimized, postponing swapchain recreation");
            return Ok(());
        }

        self.device.wait_idle()?;

        let swapchain = Swapchain::new(
            self.device.clone(),
            window.extent(),
            self.present_mode,
            Some(&self.swapchain),
        )?;

        // Pipelines were built against the old render pass
        if !swapchain.compare_formats(&self.swapchain) {
            anyhow::bail!("Swapchain image or depth format has changed");
        }

        self.images_in_flight = vec![vk::Fence::null(); swapchain.image_count()];
        self.swapchain = swapchain;

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();

        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, &self.command_buffers);
        }
        for sync in &self.frame_sync {
            sync.destroy(&self.device.device);
        }
    }
}
