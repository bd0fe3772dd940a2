//! Scene interface types
//!
//! The scene loader is an external collaborator; this module defines the
//! records it hands over and gives them GPU residency. Per model that means
//! vertex, index, per-face material-index, and material-parameter buffers,
//! the model transform, and a fixed-layout descriptor record packing the four
//! buffer device addresses for shader-side access.

use ash::{vk, Device, Instance};
use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix4;

use crate::buffer::Buffer;
use crate::commands::CommandPool;
use crate::error::VulkanResult;

/// Vertex layout shared by the rasterizer and ray-tracing geometry
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Vertex buffer binding description
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Vertex attribute descriptions
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
        ]
    }
}

/// Per-face material parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialParams {
    /// Diffuse color, alpha in w
    pub diffuse: [f32; 4],
    /// Specular color, shininess in w
    pub specular: [f32; 4],
    /// Emissive color
    pub emission: [f32; 4],
}

/// Camera/projection uniform, rewritten every frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct GlobalUniform {
    /// View matrix
    pub view: [[f32; 4]; 4],
    /// Projection matrix
    pub projection: [[f32; 4]; 4],
}

impl GlobalUniform {
    /// Pack view/projection matrices for upload
    pub fn new(view: &Matrix4<f32>, projection: &Matrix4<f32>) -> Self {
        Self {
            view: (*view).into(),
            projection: (*projection).into(),
        }
    }
}

/// Lighting/viewing uniform; camera FOV rides in `cam_pos.w`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct SceneUniform {
    /// Light direction (unused w)
    pub light_dir: [f32; 4],
    /// View direction (unused w)
    pub view_dir: [f32; 4],
    /// Camera position, vertical FOV in radians packed into w
    pub cam_pos: [f32; 4],
}

impl SceneUniform {
    /// Pack lighting and camera state for upload
    pub fn new(light_dir: [f32; 3], view_dir: [f32; 3], cam_pos: [f32; 3], fov: f32) -> Self {
        Self {
            light_dir: [light_dir[0], light_dir[1], light_dir[2], 0.0],
            view_dir: [view_dir[0], view_dir[1], view_dir[2], 0.0],
            cam_pos: [cam_pos[0], cam_pos[1], cam_pos[2], fov],
        }
    }
}

/// Fixed-layout per-object record: the device addresses of the model's four
/// buffers, indexed by shaders through the shared storage buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectDescription {
    /// Vertex buffer device address
    pub vertex_address: u64,
    /// Index buffer device address
    pub index_address: u64,
    /// Per-face material index buffer device address
    pub material_ids_address: u64,
    /// Material parameter buffer device address
    pub materials_address: u64,
}

/// One scene model resident on the GPU
pub struct SceneModel {
    /// Vertex buffer
    pub vertex_buffer: Buffer,
    /// Index buffer
    pub index_buffer: Buffer,
    /// Per-face material index buffer
    pub material_ids_buffer: Buffer,
    /// Material parameter buffer
    pub materials_buffer: Buffer,
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of vertices (needed for acceleration structure builds)
    pub vertex_count: u32,
    /// Model transform
    pub transform: Matrix4<f32>,
}

impl SceneModel {
    /// Upload a model's geometry and material data to device-local memory.
    ///
    /// When `ray_tracing` is set the buffers also get the device-address and
    /// acceleration-structure-input usages the ray tracer needs.
    pub fn upload(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        pool: &CommandPool,
        queue: vk::Queue,
        ray_tracing: bool,
        vertices: &[Vertex],
        indices: &[u32],
        material_ids: &[i32],
        materials: &[MaterialParams],
        transform: Matrix4<f32>,
    ) -> VulkanResult<Self> {
        let mut extra_usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        if ray_tracing {
            extra_usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        }

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            instance,
            physical_device,
            pool,
            queue,
            vk::BufferUsageFlags::VERTEX_BUFFER | extra_usage,
            vertices,
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device.clone(),
            instance,
            physical_device,
            pool,
            queue,
            vk::BufferUsageFlags::INDEX_BUFFER | extra_usage,
            indices,
        )?;
        let material_ids_buffer = Buffer::device_local_with_data(
            device.clone(),
            instance,
            physical_device,
            pool,
            queue,
            extra_usage,
            material_ids,
        )?;
        let materials_buffer = Buffer::device_local_with_data(
            device,
            instance,
            physical_device,
            pool,
            queue,
            extra_usage,
            materials,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            material_ids_buffer,
            materials_buffer,
            index_count: indices.len() as u32,
            vertex_count: vertices.len() as u32,
            transform,
        })
    }

    /// Pack this model's buffer addresses into its descriptor record.
    ///
    /// Only valid when the buffers were uploaded with device-address usage.
    pub fn object_description(&self) -> ObjectDescription {
        ObjectDescription {
            vertex_address: self.vertex_buffer.device_address(),
            index_address: self.index_buffer.device_address(),
            material_ids_address: self.material_ids_buffer.device_address(),
            materials_address: self.materials_buffer.device_address(),
        }
    }
}

/// Flat list of positioned models plus their texture views
pub struct Scene {
    /// Models in draw order
    pub models: Vec<SceneModel>,
    /// Views over scene textures, indexed by material (may be empty)
    pub texture_views: Vec<vk::ImageView>,
}

impl Scene {
    /// An empty scene
    pub fn empty() -> Self {
        Self {
            models: Vec::new(),
            texture_views: Vec::new(),
        }
    }

    /// Number of models
    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_description_is_densely_packed() {
        // Four u64 addresses, nothing else
        assert_eq!(std::mem::size_of::<ObjectDescription>(), 32);
    }

    #[test]
    fn scene_uniform_packs_fov_into_position_w() {
        let uniform = SceneUniform::new([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 2.0, 3.0], 0.8);
        assert_eq!(uniform.cam_pos, [1.0, 2.0, 3.0, 0.8]);
        assert_eq!(uniform.light_dir[3], 0.0);
    }

    #[test]
    fn vertex_attributes_match_layout() {
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(
            Vertex::binding_description().stride as usize,
            std::mem::size_of::<Vertex>()
        );
    }
}
