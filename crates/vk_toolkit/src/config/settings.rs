//! # Toolkit Settings
//!
//! Window, renderer and asset settings consumed by the toolkit and the demo
//! application. Every section has sensible defaults so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Config, ConfigError};

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk_toolkit".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// # Vulkan Renderer Configuration
///
/// Application metadata, presentation preferences and pipeline inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Maximum frames in flight
    pub max_frames_in_flight: usize,
    /// Prefer MAILBOX presentation over FIFO when the surface supports it
    pub prefer_mailbox: bool,
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader: String,
    /// Framebuffer clear color (RGBA)
    pub clear_color: [f32; 4],
    /// Descriptor sets allocated per pool before the allocator grows
    pub descriptor_sets_per_pool: u32,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Resolve whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.max_frames_in_flight == 0 || self.max_frames_in_flight > 8 {
            return Err(ConfigError::Invalid(format!(
                "Max frames in flight must be within 1..=8, got {}",
                self.max_frames_in_flight
            )));
        }

        if self.descriptor_sets_per_pool == 0 {
            return Err(ConfigError::Invalid("Descriptor sets per pool must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Check that both shader binaries exist on disk
    pub fn validate_shader_paths(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader, &self.fragment_shader] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {}", path)));
            }
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "vk_toolkit application".to_string(),
            enable_validation: None,
            max_frames_in_flight: 2,
            prefer_mailbox: true,
            vertex_shader: "target/shaders/mesh.spv".to_string(),
            fragment_shader: "target/shaders/mesh_frag.spv".to_string(),
            clear_color: [0.05, 0.05, 0.08, 1.0],
            descriptor_sets_per_pool: 64,
        }
    }
}

/// # Asset Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory searched for OBJ models
    pub models_dir: String,
    /// Directory searched for textures
    pub textures_dir: String,
    /// Model shown by the demo
    pub default_model: String,
    /// Generate a full mip chain for uploaded textures
    pub generate_mipmaps: bool,
}

impl AssetConfig {
    /// Full path to a model inside the models directory
    pub fn model_path(&self, name: &str) -> String {
        Path::new(&self.models_dir).join(name).to_string_lossy().into_owned()
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            models_dir: "resources/models".to_string(),
            textures_dir: "resources/textures".to_string(),
            default_model: "cube.obj".to_string(),
            generate_mipmaps: true,
        }
    }
}

/// # Complete Toolkit Configuration
///
/// Top-level configuration that applications load from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Asset settings
    pub assets: AssetConfig,
}

impl ToolkitConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.renderer.validate()
    }
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
            assets: AssetConfig::default(),
        }
    }
}

impl Config for ToolkitConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ToolkitConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ToolkitConfig::from_toml_str(
            r#"
            log_level = "debug"

            [window]
            title = "Scene"
            width = 640

            [renderer]
            prefer_mailbox = false
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.window.title, "Scene");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, WindowConfig::default().height);
        assert!(!config.renderer.prefer_mailbox);
        assert_eq!(config.renderer.max_frames_in_flight, 2);
        assert_eq!(config.assets, AssetConfig::default());
    }

    #[test]
    fn test_ron_round_trip() {
        let mut config = ToolkitConfig::default();
        config.renderer.clear_color = [1.0, 0.0, 0.0, 1.0];
        config.renderer.enable_validation = Some(false);

        let text = ron::ser::to_string(&config).unwrap();
        let parsed = ToolkitConfig::from_ron_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_frames_in_flight() {
        let mut config = ToolkitConfig::default();
        config.renderer.max_frames_in_flight = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.renderer.max_frames_in_flight = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = ToolkitConfig::default();
        config.window.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let result = ToolkitConfig::load_from_file("settings.ini");
        // Missing file surfaces as IO before the extension is inspected
        assert!(matches!(result, Err(ConfigError::Io(_))));

        let result = ToolkitConfig::default().save_to_file("settings.ini");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_validation_flag_resolution() {
        let mut renderer = RendererConfig::new("app");
        renderer.enable_validation = Some(true);
        assert!(renderer.validation_enabled());
        renderer.enable_validation = None;
        assert_eq!(renderer.validation_enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn test_model_path_joins_dir() {
        let assets = AssetConfig::default();
        let path = assets.model_path("teapot.obj");
        assert!(path.ends_with("teapot.obj"));
        assert!(path.starts_with("resources"));
    }
}
