//! Renderer error types
//!
//! Error taxonomy for the Vulkan renderer: fatal initialization failures,
//! per-frame transients, and invalid-operation misuse are all funneled
//! through a single enum so every layer can propagate with `?`.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Renderer initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Shader binary could not be loaded
    #[error("Shader load failed for {path}: {reason}")]
    ShaderLoad {
        /// Path of the shader binary
        path: String,
        /// What went wrong
        reason: String,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
