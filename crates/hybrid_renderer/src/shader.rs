//! SPIR-V shader loading
//!
//! Shader module RAII plus the fixed on-disk layout the renderer reads its
//! precompiled binaries from: one subdirectory per algorithm, one file per
//! stage, named `<stage-name>.<kind>.spv`.

use ash::{vk, Device};
use std::ffi::CStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{VulkanError, VulkanResult};

/// Entry point shared by every shader stage
pub const SHADER_ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        // SPIR-V words are u32-aligned
        let (prefix, u32_slice, suffix) = unsafe { bytes.align_to::<u32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "SPIR-V bytecode is not properly aligned".to_string(),
            ));
        }

        let create_info = vk::ShaderModuleCreateInfo::builder().code(u32_slice);

        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load shader from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: Device, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| VulkanError::ShaderLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| VulkanError::ShaderLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Create shader stage create info
    pub fn create_stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(SHADER_ENTRY)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Resolves shader binary paths from the per-algorithm directory layout
#[derive(Debug, Clone)]
pub struct ShaderCatalog {
    root: PathBuf,
}

impl ShaderCatalog {
    /// Create a catalog rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rasterizer vertex shader
    pub fn rasterizer_vertex(&self) -> PathBuf {
        self.root.join("rasterizer").join("shader.vert.spv")
    }

    /// Rasterizer fragment shader
    pub fn rasterizer_fragment(&self) -> PathBuf {
        self.root.join("rasterizer").join("shader.frag.spv")
    }

    /// Ray-generation shader
    pub fn ray_generation(&self) -> PathBuf {
        self.root.join("ray_tracing").join("raytrace.rgen.spv")
    }

    /// Primary miss shader
    pub fn ray_miss(&self) -> PathBuf {
        self.root.join("ray_tracing").join("raytrace.rmiss.spv")
    }

    /// Shadow miss shader
    pub fn shadow_miss(&self) -> PathBuf {
        self.root.join("ray_tracing").join("shadow.rmiss.spv")
    }

    /// Closest-hit shader
    pub fn closest_hit(&self) -> PathBuf {
        self.root.join("ray_tracing").join("raytrace.rchit.spv")
    }

    /// Path-tracing compute shader
    pub fn path_trace_compute(&self) -> PathBuf {
        self.root.join("path_tracing").join("path_trace.comp.spv")
    }

    /// Post-composition vertex shader
    pub fn post_vertex(&self) -> PathBuf {
        self.root.join("post").join("post.vert.spv")
    }

    /// Post-composition fragment shader
    pub fn post_fragment(&self) -> PathBuf {
        self.root.join("post").join("post.frag.spv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_uses_stage_kind_naming() {
        let catalog = ShaderCatalog::new("assets/shaders");
        assert!(catalog
            .ray_generation()
            .ends_with("ray_tracing/raytrace.rgen.spv"));
        assert!(catalog.shadow_miss().ends_with("ray_tracing/shadow.rmiss.spv"));
        assert!(catalog
            .path_trace_compute()
            .ends_with("path_tracing/path_trace.comp.spv"));
        assert!(catalog.post_fragment().ends_with("post/post.frag.spv"));
    }
}
