//! Overlay shared state
//!
//! The interactive control panel is an external collaborator. It owns a small
//! plain data record that the orchestrator reads once per frame: which render
//! mode is active, whether a shader hot-reload was requested, and the light
//! parameters. Single-slot, overwrite-on-write; only the latest value matters.

use ash::vk;

/// Which algorithm produces the frame. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Fixed-function rasterization (default)
    #[default]
    Rasterize,
    /// Hardware ray-tracing pipeline
    RayTrace,
    /// Compute path tracer
    PathTrace,
}

/// Shared toggle record between the overlay and the orchestrator
#[derive(Debug)]
pub struct OverlayState {
    mode: RenderMode,
    hot_reload_requested: bool,
    /// Whether hardware ray tracing is available at all; when false the
    /// overlay never offers the ray-trace or path-trace choices
    ray_tracing_available: bool,
    /// Light direction
    pub light_direction: [f32; 3],
    /// Light color
    pub light_color: [f32; 3],
    /// Light intensity scalar
    pub light_intensity: f32,
    /// Most recent path-trace dispatch time in milliseconds, when measured
    pub path_trace_ms: Option<f32>,
}

impl OverlayState {
    /// Create the record; `ray_tracing_available` comes from the device probe
    pub fn new(ray_tracing_available: bool) -> Self {
        Self {
            mode: RenderMode::Rasterize,
            hot_reload_requested: false,
            ray_tracing_available,
            light_direction: [0.0, -1.0, -0.5],
            light_color: [1.0, 1.0, 1.0],
            light_intensity: 1.0,
            path_trace_ms: None,
        }
    }

    /// Request a render mode. Ray-traced modes are refused when the hardware
    /// capability is absent; the mode silently stays as it was.
    pub fn select_mode(&mut self, mode: RenderMode) {
        if mode != RenderMode::Rasterize && !self.ray_tracing_available {
            return;
        }
        self.mode = mode;
    }

    /// Currently selected render mode
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Whether the overlay may offer ray-traced modes
    pub fn ray_tracing_available(&self) -> bool {
        self.ray_tracing_available
    }

    /// Flag a shader hot-reload; processed between frames
    pub fn request_hot_reload(&mut self) {
        self.hot_reload_requested = true;
    }

    /// Edge-triggered read of the hot-reload flag
    pub fn take_hot_reload(&mut self) -> bool {
        std::mem::take(&mut self.hot_reload_requested)
    }
}

/// Already-prepared overlay draw data, layered into the post-composition pass
pub trait OverlayDraw {
    /// Record the overlay's draw commands into the active render pass
    fn record(&mut self, cmd: vk::CommandBuffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_rasterize() {
        let state = OverlayState::new(true);
        assert_eq!(state.mode(), RenderMode::Rasterize);
    }

    #[test]
    fn ray_traced_modes_gated_by_capability() {
        let mut state = OverlayState::new(false);
        state.select_mode(RenderMode::RayTrace);
        assert_eq!(state.mode(), RenderMode::Rasterize);
        state.select_mode(RenderMode::PathTrace);
        assert_eq!(state.mode(), RenderMode::Rasterize);

        let mut state = OverlayState::new(true);
        state.select_mode(RenderMode::PathTrace);
        assert_eq!(state.mode(), RenderMode::PathTrace);
    }

    #[test]
    fn hot_reload_is_edge_triggered() {
        let mut state = OverlayState::new(true);
        assert!(!state.take_hot_reload());
        state.request_hot_reload();
        state.request_hot_reload();
        assert!(state.take_hot_reload());
        assert!(!state.take_hot_reload());
    }
}
