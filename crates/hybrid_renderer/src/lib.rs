//! Hybrid Vulkan renderer with three interchangeable image-generation
//! stages behind one swap-target pipeline.
//!
//! Every frame is produced by exactly one of three algorithms into a shared
//! offscreen image: a forward rasterizer, a hardware ray tracer (when the
//! device carries the full extension set), or a compute-shader path tracer.
//! A post-composition pass then samples that image into the acquired swap
//! image and layers the UI overlay on top.
//!
//! The host application owns the window and event loop; the renderer takes
//! raw window handles at construction and exposes `draw_frame`,
//! `handle_resize`, and the shared [`overlay::OverlayState`] record for
//! input-driven mode switches and shader hot-reload requests.

pub mod accel;
pub mod buffer;
pub mod commands;
pub mod config;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod image;
pub mod overlay;
pub mod renderer;
pub mod scene;
pub mod shader;
pub mod stages;
pub mod swapchain;
pub mod sync;

pub use config::RendererConfig;
pub use error::{VulkanError, VulkanResult};
pub use overlay::{OverlayDraw, OverlayState, RenderMode};
pub use renderer::Renderer;
pub use scene::{GlobalUniform, MaterialParams, Scene, SceneModel, SceneUniform, Vertex};
