// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to its defaults, so a partial config.toml (or no
// file at all) is fine. A file that fails to parse is reported and ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound on frames in flight; more only adds latency.
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub camera: CameraConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Which built-in mesh the demo draws
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DemoModel {
    Triangle,
    Quad,
    Cube,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub model: DemoModel,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.01, 0.01, 0.01, 1.0],
            max_frames_in_flight: 2,
            model: DemoModel::Cube,
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    /// Rebuild the pipeline when either file changes on disk
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/simple_shader.vert.spv"),
            fragment: PathBuf::from("shaders/simple_shader.frag.spv"),
            hot_reload: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Perspective,
    Orthographic,
}

/// Camera and controller settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub projection: ProjectionKind,
    /// Perspective only
    pub fov_degrees: f32,
    /// Orthographic only: half the visible height in world units
    pub ortho_half_height: f32,
    pub near: f32,
    pub far: f32,
    /// World units per second
    pub move_speed: f32,
    /// Radians per second
    pub look_speed: f32,
    pub start_position: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            projection: ProjectionKind::Perspective,
            fov_degrees: 50.0,
            ortho_half_height: 1.5,
            near: 0.1,
            far: 100.0,
            move_speed: 3.0,
            look_speed: 1.5,
            start_position: [0.0, 0.0, 2.5],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

/// Where the active configuration came from. The logger is set up from the
/// loaded config, so the outcome is kept and reported once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be read or parsed; defaults are used
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(e) => {
                log::warn!("Failed to load config: {:#}. Using defaults.", e)
            }
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    /// Load configuration from `path`, falling back to defaults if the file
    /// is missing or malformed
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Ok(Some(config)) => (config, ConfigSource::File(path.to_path_buf())),
            Ok(None) => (Config::default(), ConfigSource::Missing(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path; `None` if there is no file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.graphics.max_frames_in_flight = config
            .graphics
            .max_frames_in_flight
            .clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
        Ok(config)
    }

    /// Preferred present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.model, DemoModel::Cube);
        assert!(config.shaders.hot_reload);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            title = "Quad"
            width = 1024

            [graphics]
            model = "quad"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Quad");
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.model, DemoModel::Quad);
        assert_eq!(config.graphics.present_mode, "mailbox");
    }

    #[test]
    fn projection_kind_names() {
        assert_eq!(Config::default().camera.projection, ProjectionKind::Perspective);

        let config =
            Config::from_toml("[camera]\nprojection = \"orthographic\"\northo_half_height = 4.0")
                .unwrap();
        assert_eq!(config.camera.projection, ProjectionKind::Orthographic);
        assert_eq!(config.camera.ortho_half_height, 4.0);

        assert!(Config::from_toml("[camera]\nprojection = \"fisheye\"").is_err());
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 1);

        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 16").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, MAX_FRAMES_IN_FLIGHT_LIMIT);
    }

    #[test]
    fn present_mode_names() {
        let mut config = Config::default();
        for (name, mode) in [
            ("immediate", ash::vk::PresentModeKHR::IMMEDIATE),
            ("FIFO", ash::vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", ash::vk::PresentModeKHR::FIFO_RELAXED),
            ("bogus", ash::vk::PresentModeKHR::MAILBOX),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.present_mode(), mode, "{name}");
        }
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
        assert!(Config::from_toml("[graphics]\nmodel = \"teapot\"").is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        assert!(Config::load_from_path("definitely/not/here/config.toml")
            .unwrap()
            .is_none());

        let (config, source) = Config::load_or_default("definitely/not/here/config.toml");
        assert_eq!(config.window.title, "Vulkan Engine");
        assert!(matches!(source, ConfigSource::Missing(_)));
    }

    #[test]
    fn malformed_file_falls_back_with_reported_error() {
        let path = std::env::temp_dir().join(format!("vk_engine_bad_{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, source) = Config::load_or_default(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.window.width, 800);
        match source {
            ConfigSource::Invalid(e) => {
                assert!(format!("{:#}", e).contains("Failed to parse config file"))
            }
            other => panic!("expected an invalid config, got {:?}", other),
        }
    }

    #[test]
    fn valid_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("vk_engine_ok_{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = 1280\n").unwrap();

        let (config, source) = Config::load_or_default(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.window.width, 1280);
        assert!(matches!(source, ConfigSource::File(p) if p == path));
    }
}
