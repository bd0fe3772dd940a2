//! Acceleration structure management
//!
//! One bottom-level structure per model, built from the model's vertex and
//! index buffer device addresses, and one top-level structure over the
//! per-model transforms. Builds run once after scene load, each as its own
//! synchronous one-shot submission: load-time work, deliberately serialized.

use ash::extensions::khr::AccelerationStructure as AccelLoader;
use ash::{vk, Device, Instance};
use nalgebra::Matrix4;

use crate::buffer::Buffer;
use crate::commands::CommandPool;
use crate::error::{VulkanError, VulkanResult};
use crate::scene::{SceneModel, Vertex};

/// Row-major 3x4 instance transform expected by the API; our matrices are
/// column-major so this is a transpose of the top three rows
pub fn instance_transform(transform: &Matrix4<f32>) -> vk::TransformMatrixKHR {
    let m = transform;
    vk::TransformMatrixKHR {
        matrix: [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(0, 3)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(1, 3)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
            m[(2, 3)],
        ],
    }
}

/// One acceleration structure and its backing storage
struct AccelStructure {
    device_handle: vk::AccelerationStructureKHR,
    address: vk::DeviceAddress,
    _buffer: Buffer,
    loader: AccelLoader,
}

impl Drop for AccelStructure {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_acceleration_structure(self.device_handle, None);
        }
    }
}

/// Builds and owns the scene's BLAS set and TLAS
pub struct AccelManager {
    device: Device,
    loader: AccelLoader,
    physical_device: vk::PhysicalDevice,
    blases: Vec<AccelStructure>,
    tlas: Option<AccelStructure>,
}

impl AccelManager {
    /// Create an empty manager
    pub fn new(device: Device, loader: AccelLoader, physical_device: vk::PhysicalDevice) -> Self {
        Self {
            device,
            loader,
            physical_device,
            blases: Vec::new(),
            tlas: None,
        }
    }

    /// Current top-level structure handle
    pub fn tlas(&self) -> VulkanResult<vk::AccelerationStructureKHR> {
        self.tlas
            .as_ref()
            .map(|t| t.device_handle)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Top-level acceleration structure not built".to_string(),
            })
    }

    /// Whether a top-level structure exists to trace against
    pub fn has_tlas(&self) -> bool {
        self.tlas.is_some()
    }

    /// Number of bottom-level structures
    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    /// Build one bottom-level structure per model, then the top-level
    /// structure over their transforms
    pub fn build(
        &mut self,
        instance: &Instance,
        pool: &CommandPool,
        queue: vk::Queue,
        models: &[SceneModel],
    ) -> VulkanResult<()> {
        self.blases.clear();
        self.tlas = None;

        for model in models {
            let blas = self.build_blas(instance, pool, queue, model)?;
            self.blases.push(blas);
        }

        if !models.is_empty() {
            self.tlas = Some(self.build_tlas(instance, pool, queue, models)?);
        }

        log::info!(
            "Acceleration structures built: {} bottom-level, {} top-level",
            self.blases.len(),
            usize::from(self.tlas.is_some())
        );
        Ok(())
    }

    fn build_blas(
        &self,
        instance: &Instance,
        pool: &CommandPool,
        queue: vk::Queue,
        model: &SceneModel,
    ) -> VulkanResult<AccelStructure> {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: model.vertex_buffer.device_address(),
            })
            .vertex_stride(std::mem::size_of::<Vertex>() as vk::DeviceSize)
            .max_vertex(model.vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: model.index_buffer.device_address(),
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        let primitive_count = model.index_count / 3;
        let geometries = [geometry];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let sizes = unsafe {
            self.loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let (accel, scratch) = self.create_structure_with_scratch(
            instance,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &sizes,
        )?;

        build_info.dst_acceleration_structure = accel.device_handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch.device_address(),
        };

        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();

        pool.submit_one_shot(queue, |cmd| {
            unsafe {
                self.loader
                    .cmd_build_acceleration_structures(cmd, &[build_info], &[&[range]]);

                // Later builds read this structure's memory
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                    .dst_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR)
                    .build();
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }
            Ok(())
        })?;

        Ok(accel)
    }

    fn build_tlas(
        &self,
        instance: &Instance,
        pool: &CommandPool,
        queue: vk::Queue,
        models: &[SceneModel],
    ) -> VulkanResult<AccelStructure> {
        let instances: Vec<vk::AccelerationStructureInstanceKHR> = models
            .iter()
            .zip(self.blases.iter())
            .enumerate()
            .map(|(index, (model, blas))| vk::AccelerationStructureInstanceKHR {
                transform: instance_transform(&model.transform),
                instance_custom_index_and_mask: vk::Packed24_8::new(index as u32, 0xff),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE
                        .as_raw() as u8,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle: blas.address,
                },
            })
            .collect();

        let instance_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(
                instances.as_ptr().cast::<u8>(),
                instances.len() * std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
            )
        };

        let instance_buffer = Buffer::new(
            self.device.clone(),
            instance,
            self.physical_device,
            instance_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        instance_buffer.write_bytes_at(0, instance_bytes)?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.device_address(),
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .build();

        let geometries = [geometry];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let primitive_count = instances.len() as u32;
        let sizes = unsafe {
            self.loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let (accel, scratch) = self.create_structure_with_scratch(
            instance,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &sizes,
        )?;

        build_info.dst_acceleration_structure = accel.device_handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch.device_address(),
        };

        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();

        pool.submit_one_shot(queue, |cmd| {
            unsafe {
                self.loader
                    .cmd_build_acceleration_structures(cmd, &[build_info], &[&[range]]);
            }
            Ok(())
        })?;

        // instance_buffer and scratch drop after the queue has drained
        Ok(accel)
    }

    fn create_structure_with_scratch(
        &self,
        instance: &Instance,
        ty: vk::AccelerationStructureTypeKHR,
        sizes: &vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> VulkanResult<(AccelStructure, Buffer)> {
        let buffer = Buffer::new(
            self.device.clone(),
            instance,
            self.physical_device,
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.handle())
            .size(sizes.acceleration_structure_size)
            .ty(ty);

        let device_handle = unsafe {
            self.loader
                .create_acceleration_structure(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let address = unsafe {
            self.loader.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                    .acceleration_structure(device_handle),
            )
        };

        let scratch = Buffer::new(
            self.device.clone(),
            instance,
            self.physical_device,
            sizes.build_scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        Ok((
            AccelStructure {
                device_handle,
                address,
                _buffer: buffer,
                loader: self.loader.clone(),
            },
            scratch,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_transform_transposes_to_row_major() {
        // Column-major translation matrix: translation lives in column 3
        let m = Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0));
        let t = instance_transform(&m);
        // Row-major 3x4: translation is the last element of each row
        assert_eq!(t.matrix[3], 1.0);
        assert_eq!(t.matrix[7], 2.0);
        assert_eq!(t.matrix[11], 3.0);
        // Diagonal preserved
        assert_eq!(t.matrix[0], 1.0);
        assert_eq!(t.matrix[5], 1.0);
        assert_eq!(t.matrix[10], 1.0);
    }
}
