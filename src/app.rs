// =============================================================================
// APPLICATION - winit event handling and the per-frame flow
// =============================================================================
//
// GPU resources are created in `resumed` (winit only hands out windows once
// the event loop is running) and live in RenderState. Camera and input are
// plain CPU state and exist from the start.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use gpu_allocator::MemoryLocation;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::WindowId,
};

use crate::backend::model::Builder;
use crate::backend::shader::ShaderWatcher;
use crate::backend::{Buffer, DescriptorPool, DescriptorSetLayout, DescriptorWriter, Model, VulkanDevice};
use crate::camera::{Camera, Projection};
use crate::camera_controller::CameraController;
use crate::config::{Config, DemoModel};
use crate::input::{parse_key_code, InputState};
use crate::render_system::{FrameInfo, GlobalUbo, SimpleRenderSystem};
use crate::renderer::Renderer;
use crate::window::Window;

/// Long stalls (dragging the window, breakpoints) must not teleport the camera
const MAX_FRAME_TIME: f32 = 0.1;

// =============================================================================
// GPU STATE
// =============================================================================

/// Everything tied to the window and the device.
///
/// Field order is drop order: users of the device first, then the renderer
/// (swapchain, sync objects), and the window last so the surface never
/// outlives it.
struct RenderState {
    shader_watcher: Option<ShaderWatcher>,
    models: Vec<Model>,
    render_system: SimpleRenderSystem,
    global_descriptor_sets: Vec<vk::DescriptorSet>,
    global_pool: DescriptorPool,
    _global_set_layout: DescriptorSetLayout,
    /// One `GlobalUbo` instance per frame in flight
    global_ubo: Buffer,
    renderer: Renderer,
    window: Window,
}

impl RenderState {
    fn new(event_loop: &ActiveEventLoop, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let window = Window::new(event_loop, &config.window)?;

        // Validation is a debug-build feature
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, &window)?;

        let renderer = Renderer::new(device.clone(), &window, config)?;
        let frames = renderer.max_frames_in_flight();

        // ─────────────────────────────────────────────────────────────────────
        // Global uniforms: one host-visible buffer with a slot per frame,
        // one descriptor set per slot
        // ─────────────────────────────────────────────────────────────────────
        let global_ubo = Buffer::new(
            device.clone(),
            size_of::<GlobalUbo>() as vk::DeviceSize,
            frames as u32,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            device.properties.limits.min_uniform_buffer_offset_alignment,
        )?;
        log::debug!(
            "Global uniform buffer: {} slots, {} bytes",
            global_ubo.instance_count(),
            global_ubo.size()
        );

        let global_pool = DescriptorPool::builder(device.clone())
            .max_sets(frames as u32)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames as u32)
            .pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .build()?;

        let global_set_layout = DescriptorSetLayout::builder(device.clone())
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
                1,
            )
            .build()?;

        let global_descriptor_sets = (0..global_ubo.instance_count())
            .map(|slot| {
                DescriptorWriter::new(&global_set_layout, &global_pool)
                    .write_buffer(0, global_ubo.descriptor_info_for_index(slot))
                    .build()?
                    .context("Global descriptor pool is exhausted")
            })
            .collect::<Result<Vec<_>>>()?;

        // ─────────────────────────────────────────────────────────────────────
        // Pipeline + geometry
        // ─────────────────────────────────────────────────────────────────────
        let render_system = SimpleRenderSystem::new(
            device.clone(),
            renderer.render_pass(),
            global_set_layout.layout(),
            &config.shaders.vertex,
            &config.shaders.fragment,
        )?;

        let builder = match config.graphics.model {
            DemoModel::Triangle => Builder::triangle(),
            DemoModel::Quad => Builder::quad(),
            DemoModel::Cube => Builder::cube(),
        };
        let models = vec![Model::new(device.clone(), &builder)?];

        let shader_watcher = if config.shaders.hot_reload {
            match ShaderWatcher::new(&[&config.shaders.vertex, &config.shaders.fragment]) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            shader_watcher,
            models,
            render_system,
            global_descriptor_sets,
            global_pool,
            _global_set_layout: global_set_layout,
            global_ubo,
            renderer,
            window,
        })
    }

    fn device(&self) -> &Arc<VulkanDevice> {
        self.renderer.device()
    }
}

impl Drop for RenderState {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device().wait_idle() {
            log::error!("{:#}", e);
        }
        if let Err(e) = self
            .global_pool
            .free_descriptors(&self.global_descriptor_sets)
        {
            log::error!("{:#}", e);
        }
    }
}

// =============================================================================
// APPLICATION
// =============================================================================

pub struct App {
    config: Config,
    state: Option<RenderState>,

    input: InputState,
    camera: Camera,
    controller: CameraController,
    quit_key: KeyCode,
    fullscreen_key: KeyCode,

    // ─────────────────────────────────────────────────────────────────────────
    // TIMING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let camera = Camera::new(
            Vec3::from(config.camera.start_position),
            Vec3::ZERO,
            Projection::from_config(&config.camera),
        );
        let controller = CameraController::from_config(&config.camera);

        let quit_key = configured_key(&config.controls.quit_key, KeyCode::Escape);
        let fullscreen_key = configured_key(&config.controls.fullscreen_key, KeyCode::F11);

        let now = Instant::now();
        Self {
            config,
            state: None,
            input: InputState::new(),
            camera,
            controller,
            quit_key,
            fullscreen_key,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn draw_frame(&mut self) -> Result<()> {
        let now = Instant::now();
        let frame_time = now
            .duration_since(self.last_frame_time)
            .as_secs_f32()
            .min(MAX_FRAME_TIME);
        self.last_frame_time = now;

        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        if state
            .shader_watcher
            .as_ref()
            .is_some_and(|watcher| watcher.take_changed())
        {
            if let Err(e) = state.render_system.reload(state.renderer.render_pass()) {
                log::error!("Shader reload failed, keeping previous pipeline: {:#}", e);
            }
        }

        self.controller
            .update(frame_time, &self.input, &mut self.camera);
        self.camera.set_aspect_ratio(state.renderer.aspect_ratio());

        let Some(command_buffer) = state.renderer.begin_frame(&state.window)? else {
            return Ok(());
        };
        let frame_index = state.renderer.frame_index();
        let frame_info = FrameInfo {
            frame_index,
            frame_time,
            command_buffer,
            global_descriptor_set: state.global_descriptor_sets[frame_index],
        };

        let ubo = GlobalUbo {
            projection: self.camera.projection_matrix(),
            view: self.camera.view_matrix(),
            model: Mat4::IDENTITY,
        };
        state
            .global_ubo
            .write_to_index(bytemuck::bytes_of(&ubo), frame_info.frame_index as u32)?;
        state.global_ubo.flush()?;

        state.renderer.begin_swapchain_render_pass(command_buffer)?;
        state.render_system.render(&frame_info, &state.models);
        state.renderer.end_swapchain_render_pass(command_buffer)?;
        state.renderer.end_frame(&mut state.window)?;

        self.update_fps(frame_info.frame_time);
        Ok(())
    }

    fn update_fps(&mut self, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }
        let Some(state) = self.state.as_ref() else {
            return;
        };

        self.frame_count += 1;

        // Update title every second
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            let mode = if state.window.is_fullscreen() {
                "fullscreen"
            } else {
                "windowed"
            };
            state.window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                state.window.title(),
                fps,
                frame_time * 1000.0,
                mode
            ));

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

fn configured_key(name: &str, fallback: KeyCode) -> KeyCode {
    parse_key_code(name).unwrap_or_else(|| {
        log::warn!("Unknown key '{}' in config, using {:?}", name, fallback);
        fallback
    })
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match RenderState::new(event_loop, &self.config) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        match self.state.as_ref() {
            Some(state) if state.window.id() == id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(state) = self.state.as_mut() {
                    state.window.mark_resized(size.width, size.height);
                }
            }

            WindowEvent::Focused(false) => self.input.clear(),

            WindowEvent::KeyboardInput { event, .. } => {
                self.input.handle_key_event(&event);

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if key == self.quit_key {
                            log::info!("{:?} pressed, exiting...", key);
                            event_loop.exit();
                        } else if key == self.fullscreen_key {
                            if let Some(state) = self.state.as_mut() {
                                state.window.toggle_fullscreen();
                            }
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw_frame() {
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws. A minimized window gets none; the event
    /// loop then sleeps until the next `Resized` brings it back.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            if !state.window.is_minimized() {
                state.window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down while the event loop (and with it the display
        // connection) is still alive
        self.state = None;
        log::info!("Cleanup complete");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(state) = self.state.as_ref() {
            let _ = state.device().wait_idle();
        }
    }
}
