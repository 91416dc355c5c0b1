//! Renderer configuration for application-specific settings
//!
//! Applications customize the window, presentation and default lighting here
//! instead of hardcoding values in the rendering system.

use serde::{Deserialize, Serialize};

use super::Config;

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
    /// Whether the window can be resized
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "render_framework".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Which present mode the swapchain should prefer when the surface offers it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Low-latency triple buffering, falling back to FIFO
    Mailbox,
    /// Always vsync'd FIFO
    Fifo,
}

/// Lighting values applied to every pipeline right after it is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingDefaults {
    /// Direction the light travels in
    pub direction: [f32; 3],
    /// Light colour (RGBA)
    pub colour: [f32; 4],
    /// Light intensity
    pub intensity: f32,
    /// Ambient light intensity
    pub ambient: f32,
}

impl Default for LightingDefaults {
    fn default() -> Self {
        Self {
            direction: [0.0, 0.0, 1.0],
            colour: [1.0, 1.0, 1.0, 1.0],
            intensity: 1.0,
            ambient: 0.1,
        }
    }
}

/// Configuration for the renderer and its backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for instance creation
    pub application_name: String,
    /// Window settings
    pub window: WindowConfig,
    /// Whether to enable the Vulkan validation layers
    pub enable_validation: bool,
    /// Capacity of each uniform-set pool
    pub uniform_pool_size: u32,
    /// Directory holding the compiled default shaders
    pub shader_dir: String,
    /// Background clear color [R, G, B, A] (0.0-1.0 range)
    pub clear_color: [f32; 4],
    /// Depth attachment clear value
    pub clear_depth: f32,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
    /// Lighting written into new pipelines
    pub lighting: LightingDefaults,
}

impl RendererConfig {
    /// Default capacity of one uniform-set pool
    pub const DEFAULT_POOL_SIZE: u32 = 100;

    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            window: WindowConfig::default(),
            enable_validation: cfg!(debug_assertions),
            uniform_pool_size: Self::DEFAULT_POOL_SIZE,
            shader_dir: "target/shaders".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            present_mode: PresentModePreference::Mailbox,
            lighting: LightingDefaults::default(),
        }
    }

    /// Set window settings
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Enable or disable Vulkan validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the capacity of each uniform-set pool
    pub fn with_uniform_pool_size(mut self, size: u32) -> Self {
        self.uniform_pool_size = size;
        self
    }

    /// Set the directory holding compiled default shaders
    pub fn with_shader_dir(mut self, dir: impl Into<String>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Set background clear color [R, G, B, A] (0.0-1.0 range)
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the preferred present mode
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the lighting applied to new pipelines
    pub fn with_lighting(mut self, lighting: LightingDefaults) -> Self {
        self.lighting = lighting;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.uniform_pool_size == 0 {
            return Err("Uniform pool size must be at least 1".to_string());
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            ));
        }

        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(format!("Depth clear value {} is outside 0..=1", self.clear_depth));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("render_framework application")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.uniform_pool_size, 100);
        assert_eq!(config.shader_dir, "target/shaders");
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.clear_depth, 1.0);
        assert_eq!(config.present_mode, PresentModePreference::Mailbox);
        assert_eq!(config.lighting.direction, [0.0, 0.0, 1.0]);
        assert_eq!(config.lighting.ambient, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RendererConfig::new("").validate().is_err());
        assert!(RendererConfig::default().with_uniform_pool_size(0).validate().is_err());

        let mut config = RendererConfig::default();
        config.window.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = "application_name = \"demo\"\nuniform_pool_size = 8\n[window]\nwidth = 640\n";
        let config = RendererConfig::from_str_as(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.uniform_pool_size, 8);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.lighting, LightingDefaults::default());
    }

    #[test]
    fn test_ron_text_round_trip() {
        let config = RendererConfig::new("ron app")
            .with_present_mode(PresentModePreference::Fifo)
            .with_clear_color([0.1, 0.2, 0.3, 1.0]);
        let text = config.to_string_as(ConfigFormat::Ron).unwrap();
        let parsed = RendererConfig::from_str_as(&text, ConfigFormat::Ron).unwrap();
        assert_eq!(parsed, config);
    }
}
