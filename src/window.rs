// Window - winit window plus the bits of state the renderer cares about
//
// The framebuffer size is tracked here rather than queried from winit on
// every frame, so swapchain recreation sees exactly the size that triggered it.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Fullscreen, WindowAttributes},
};

use crate::config::WindowConfig;

pub struct Window {
    window: Arc<winit::window::Window>,
    title: String,
    width: u32,
    height: u32,
    framebuffer_resized: bool,
    is_fullscreen: bool,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let mut attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_resizable(true)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        if config.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;
        let size = window.inner_size();

        log::info!("Created window '{}' ({}x{})", config.title, size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            title: config.title.clone(),
            width: size.width,
            height: size.height,
            framebuffer_resized: false,
            is_fullscreen: config.fullscreen,
        })
    }

    pub fn id(&self) -> winit::window::WindowId {
        self.window.id()
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Minimized windows report a zero extent. Nothing is drawn or
    /// redrawn until a `Resized` event restores it.
    pub fn is_minimized(&self) -> bool {
        is_zero_extent(self.extent())
    }

    pub fn was_resized(&self) -> bool {
        self.framebuffer_resized
    }

    pub fn reset_resized_flag(&mut self) {
        self.framebuffer_resized = false;
    }

    /// Record a new framebuffer size (from `WindowEvent::Resized`)
    pub fn mark_resized(&mut self, width: u32, height: u32) {
        self.framebuffer_resized = true;
        self.width = width;
        self.height = height;
    }

    pub fn toggle_fullscreen(&mut self) {
        self.is_fullscreen = !self.is_fullscreen;

        if self.is_fullscreen {
            self.window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            self.window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.is_fullscreen
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn raw_display_handle(&self) -> RawDisplayHandle {
        self.window.raw_display_handle()
    }

    pub fn raw_window_handle(&self) -> RawWindowHandle {
        self.window.raw_window_handle()
    }
}

fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extent_counts_as_minimized() {
        for (width, height) in [(0, 0), (0, 600), (800, 0)] {
            assert!(is_zero_extent(vk::Extent2D { width, height }));
        }
        assert!(!is_zero_extent(vk::Extent2D {
            width: 1,
            height: 1
        }));
    }
}
