//! Renderer configuration
//!
//! Application-facing knobs that do not belong in the rendering code itself:
//! instance identity, shader location, frame pacing, and validation control.
//! Loadable from TOML or assembled with the builder methods.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{VulkanError, VulkanResult};

/// Configuration for the renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Root directory holding one subdirectory of `.spv` binaries per algorithm
    pub shader_dir: PathBuf,
    /// Maximum frames in flight (for performance tuning)
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (None = debug builds only)
    pub enable_validation: Option<bool>,
    /// Background clear color [R, G, B, A] (0.0-1.0 range)
    pub clear_color: [f32; 4],
    /// Path-tracer workgroup size (x, y), baked in via specialization constants
    pub workgroup_size: (u32, u32),
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            shader_dir: PathBuf::from("assets/shaders"),
            max_frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.005, 0.005, 0.005, 1.0],
            workgroup_size: (16, 8),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &str) -> VulkanResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to read config {}: {}", path, e))
        })?;
        let config: Self = toml::from_str(&contents).map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to parse config {}: {}", path, e))
        })?;
        Ok(config.sanitized())
    }

    /// Clamp deserialized values into the same ranges the builder methods
    /// enforce; TOML input is untrusted
    fn sanitized(mut self) -> Self {
        self.max_frames_in_flight = self.max_frames_in_flight.clamp(1, 8);
        self.workgroup_size.0 = self.workgroup_size.0.max(1);
        self.workgroup_size.1 = self.workgroup_size.1.max(1);
        self
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the shader binary root directory
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, max_frames: usize) -> Self {
        self.max_frames_in_flight = max_frames.clamp(1, 8);
        self
    }

    /// Set background clear color [R, G, B, A] (0.0-1.0 range)
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Enable or disable Vulkan validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = Some(enable);
        self
    }

    /// Set the path-tracer workgroup size
    pub fn with_workgroup_size(mut self, x: u32, y: u32) -> Self {
        self.workgroup_size = (x.max(1), y.max(1));
        self
    }

    /// Whether validation layers should be active for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Hybrid Renderer Application")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RendererConfig::default();
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.workgroup_size, (16, 8));
        assert!(config.clear_color.iter().all(|c| (0.0..=1.0).contains(c)));
    }

    #[test]
    fn frames_in_flight_clamped() {
        let config = RendererConfig::new("test").with_max_frames_in_flight(0);
        assert_eq!(config.max_frames_in_flight, 1);
        let config = RendererConfig::new("test").with_max_frames_in_flight(64);
        assert_eq!(config.max_frames_in_flight, 8);
    }

    #[test]
    fn workgroup_size_never_zero() {
        let config = RendererConfig::new("test").with_workgroup_size(0, 0);
        assert_eq!(config.workgroup_size, (1, 1));
    }

    #[test]
    fn toml_values_clamped_like_builders() {
        let parsed: RendererConfig =
            toml::from_str("workgroup_size = [0, 8]\nmax_frames_in_flight = 0").unwrap();
        let config = parsed.sanitized();
        assert_eq!(config.workgroup_size, (1, 8));
        assert_eq!(config.max_frames_in_flight, 1);

        let parsed: RendererConfig = toml::from_str("max_frames_in_flight = 64").unwrap();
        assert_eq!(parsed.sanitized().max_frames_in_flight, 8);
    }

    #[test]
    fn parses_partial_toml() {
        let parsed: RendererConfig =
            toml::from_str("application_name = \"demo\"\nworkgroup_size = [8, 8]").unwrap();
        assert_eq!(parsed.application_name, "demo");
        assert_eq!(parsed.workgroup_size, (8, 8));
        assert_eq!(parsed.max_frames_in_flight, 2);
    }
}
