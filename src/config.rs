// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; missing keys take their defaults. A missing file
// means all defaults, an unreadable or invalid one is reported and ignored.

use anyhow::{Context, Result};
use ash::vk;
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backend::InstanceConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub vulkan: VulkanConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
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
            title: "Surface Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present modes, best first. FIFO is always the fallback.
    pub present_modes: Vec<String>,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_modes: vec!["mailbox".to_string()],
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Instance and device requirements
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VulkanConfig {
    /// Validation layers and debug messenger; ignored in release builds.
    pub enable_diagnostics: bool,
    pub validation_layers: Vec<String>,
    pub required_instance_extensions: Vec<String>,
    pub required_device_extensions: Vec<String>,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        let defaults = InstanceConfig::default();
        Self {
            enable_diagnostics: true,
            validation_layers: defaults.validation_layers,
            required_instance_extensions: defaults.required_instance_extensions,
            required_device_extensions: defaults.required_device_extensions,
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

/// Where the active configuration came from.
///
/// Loading happens before the logger exists, so the outcome is kept and
/// reported once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at the path; defaults in use.
    Missing(PathBuf),
    /// The file could not be read or parsed; defaults in use.
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => log::info!("Config file not found at {:?}, using defaults", path),
            ConfigSource::Invalid(e) => log::warn!("{:#}. Using defaults.", e),
        }
    }
}

impl Config {
    /// Load `config.toml`, falling back to defaults if it is missing or invalid
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }
        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Default log filter; `RUST_LOG` still overrides it.
    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.debug.log_level).unwrap_or(LevelFilter::Info)
    }

    /// Requirements handed to instance creation.
    pub fn instance_config(&self) -> InstanceConfig {
        InstanceConfig {
            enable_diagnostics: cfg!(debug_assertions) && self.vulkan.enable_diagnostics,
            validation_layers: self.vulkan.validation_layers.clone(),
            required_instance_extensions: self.vulkan.required_instance_extensions.clone(),
            required_device_extensions: self.vulkan.required_device_extensions.clone(),
        }
    }

    /// Configured present modes as Vulkan enums, in preference order.
    pub fn present_mode_preference(&self) -> Vec<vk::PresentModeKHR> {
        self.graphics
            .present_modes
            .iter()
            .filter_map(|name| match parse_present_mode(name) {
                Some(mode) => Some(mode),
                None => {
                    log::warn!("Unknown present mode '{}', ignoring it", name);
                    None
                }
            })
            .collect()
    }
}

fn parse_present_mode(name: &str) -> Option<vk::PresentModeKHR> {
    match name.to_lowercase().as_str() {
        "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
        "fifo" => Some(vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.present_modes, vec!["mailbox".to_string()]);
        assert_eq!(config.vulkan.validation_layers, vec!["VK_LAYER_KHRONOS_validation".to_string()]);
        assert_eq!(config.vulkan.required_instance_extensions, vec!["VK_KHR_surface".to_string()]);
        assert_eq!(config.vulkan.required_device_extensions, vec!["VK_KHR_swapchain".to_string()]);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
        assert_eq!(config.log_level(), LevelFilter::Info);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [window]
            title = "Test"

            [graphics]
            clear_color = [1.0, 0.5, 0.25, 1.0]

            [debug]
            log_level = "debug"
            "#,
        );
        assert_eq!(config.window.title, "Test");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.clear_color, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(config.graphics.present_modes, vec!["mailbox".to_string()]);
        assert_eq!(config.log_level(), LevelFilter::Debug);
        assert!(config.debug.show_fps);
    }

    #[test]
    fn present_modes_parse_in_order_and_skip_unknown() {
        let config = parse(
            r#"
            [graphics]
            present_modes = ["Immediate", "vsync-ish", "fifo_relaxed", "mailbox"]
            "#,
        );
        assert_eq!(
            config.present_mode_preference(),
            vec![
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::FIFO_RELAXED,
                vk::PresentModeKHR::MAILBOX,
            ]
        );
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let config = parse("[debug]\nlog_level = \"loud\"");
        assert_eq!(config.log_level(), LevelFilter::Info);
    }

    #[test]
    fn instance_config_carries_requirements() {
        let config = parse(
            r#"
            [vulkan]
            enable_diagnostics = false
            validation_layers = []
            required_device_extensions = ["VK_KHR_swapchain", "VK_KHR_maintenance1"]
            "#,
        );
        let instance = config.instance_config();
        assert!(!instance.enable_diagnostics);
        assert!(instance.validation_layers.is_empty());
        assert_eq!(instance.required_instance_extensions, vec!["VK_KHR_surface".to_string()]);
        assert_eq!(
            instance.required_device_extensions,
            vec!["VK_KHR_swapchain".to_string(), "VK_KHR_maintenance1".to_string()]
        );
    }

    #[test]
    fn diagnostics_follow_build_profile() {
        let instance = Config::default().instance_config();
        assert_eq!(instance.enable_diagnostics, cfg!(debug_assertions));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let (config, source) = Config::load_or_default(&path);
        assert_eq!(config.window.title, "Surface Renderer");
        assert!(matches!(source, ConfigSource::Missing(p) if p == path));
    }

    #[test]
    fn invalid_file_falls_back_with_a_reportable_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics]\npresent_modes = \"mailbox\"").unwrap();

        let (config, source) = Config::load_or_default(file.path());
        assert_eq!(config.graphics.present_modes, vec!["mailbox".to_string()]);
        match source {
            ConfigSource::Invalid(e) => assert!(format!("{e:#}").contains("Failed to parse config file")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn valid_file_is_reported_as_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[debug]\nshow_fps = false").unwrap();

        let (config, source) = Config::load_or_default(file.path());
        assert!(!config.debug.show_fps);
        assert!(matches!(source, ConfigSource::File(_)));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nwidth = \"wide\"").unwrap();
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn file_on_disk_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nwidth = 1024\nheight = 768").unwrap();
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!((config.window.width, config.window.height), (1024, 768));
    }
}
