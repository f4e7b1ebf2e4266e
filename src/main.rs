// =============================================================================
// VULKAN ENGINE - small forward renderer on ash + winit
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit ApplicationHandler, input, camera)                  │
// │    ├── SimpleRenderSystem (pipeline, draws models)              │
// │    ├── Global uniforms (buffers + descriptor sets per frame)    │
// │    └── Renderer (frame lifecycle)                               │
// │          └── Swapchain + FrameSync                              │
// │                └── VulkanDevice (instance, GPU, allocator)      │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Update camera from input
// 2. Wait for this frame slot, acquire swapchain image
// 3. Write uniforms, record render pass
// 4. Submit and present
//
// =============================================================================

mod app;
mod backend;
mod camera;
mod camera_controller;
mod config;
mod input;
mod render_system;
mod renderer;
mod window;

use anyhow::Result;
use config::Config;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use winit::event_loop::EventLoop;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; the logger depends on it, so the
    // load result is reported afterwards
    let (config, source) = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan engine");
    source.log();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = app::App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}

/// Initialize logging, optionally mirroring everything into a log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(TeeWriter { file })));
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

fn open_log_file(path: &str) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "=== Vulkan Engine Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;

    Ok(file)
}

/// Writes every log record to stderr and the log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The terminal is best effort; the file is what must not lose records
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_writer_mirrors_into_file() {
        let path = std::env::temp_dir().join(format!("vk_engine_tee_{}.log", std::process::id()));
        let path_str = path.to_string_lossy().into_owned();

        let file = open_log_file(&path_str).unwrap();
        let mut tee = TeeWriter { file };
        tee.write_all(b"hello from the log\n").unwrap();
        tee.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("=== Vulkan Engine Log ==="));
        assert!(contents.ends_with("hello from the log\n"));

        let _ = std::fs::remove_file(&path);
    }
}
