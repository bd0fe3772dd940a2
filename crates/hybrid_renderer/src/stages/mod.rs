//! Render stages
//!
//! Exactly one of the rasterizer, hardware ray tracer, and compute path
//! tracer records into the shared offscreen image each frame; the
//! post-composition stage then samples that image into the presentable
//! target. The ray-traced stages exist only when the device capability gate
//! is open.

pub mod path_tracing;
pub mod post;
pub mod rasterizer;
pub mod ray_tracing;

pub use path_tracing::PathTracingStage;
pub use post::PostStage;
pub use rasterizer::RasterizerStage;
pub use ray_tracing::RayTracingStage;
