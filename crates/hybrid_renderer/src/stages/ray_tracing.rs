//! Hardware ray-tracing stage
//!
//! Four shader groups (ray generation, primary miss, shadow miss, closest
//! hit), recursion depth fixed at two for the primary ray plus one shadow
//! ray. The shader binding table is built from the driver's opaque group
//! handles in small host-visible buffers, one region each for ray-gen, the
//! two contiguous miss handles, and the hit group. Skipped entirely when the
//! device lacks the capability; any creation failure here is fatal at
//! startup.

use ash::extensions::khr::RayTracingPipeline;
use ash::{vk, Device, Instance};

use crate::buffer::Buffer;
use crate::device::RayTracingProperties;
use crate::error::{VulkanError, VulkanResult};
use crate::shader::{ShaderCatalog, ShaderModule};

/// Number of shader groups in the pipeline
const GROUP_COUNT: u32 = 4;
/// Primary ray + one shadow ray
const MAX_RECURSION_DEPTH: u32 = 2;

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

struct ShaderBindingTable {
    raygen: Buffer,
    miss: Buffer,
    hit: Buffer,
    handle_size_aligned: u32,
}

/// Hardware ray-tracing stage state
pub struct RayTracingStage {
    device: Device,
    loader: RayTracingPipeline,
    properties: RayTracingProperties,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    sbt: ShaderBindingTable,
}

impl RayTracingStage {
    /// Build the 4-group pipeline and its shader binding table
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        loader: RayTracingPipeline,
        properties: RayTracingProperties,
        catalog: &ShaderCatalog,
        shared_layout: vk::DescriptorSetLayout,
        rt_layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let set_layouts = [shared_layout, rt_layout];
        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::RAYGEN_KHR,
            offset: 0,
            size: std::mem::size_of::<[f32; 4]>() as u32,
        };
        let push_constant_ranges = [push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline = Self::create_pipeline(&device, &loader, catalog, pipeline_layout)?;
        let sbt = Self::create_binding_table(
            &device,
            instance,
            physical_device,
            &loader,
            &properties,
            pipeline,
        )?;

        log::debug!("Ray-tracing stage ready");

        Ok(Self {
            device,
            loader,
            properties,
            pipeline_layout,
            pipeline,
            sbt,
        })
    }

    fn create_pipeline(
        device: &Device,
        loader: &RayTracingPipeline,
        catalog: &ShaderCatalog,
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline> {
        let raygen = ShaderModule::from_file(device.clone(), catalog.ray_generation())?;
        let miss = ShaderModule::from_file(device.clone(), catalog.ray_miss())?;
        let shadow_miss = ShaderModule::from_file(device.clone(), catalog.shadow_miss())?;
        let closest_hit = ShaderModule::from_file(device.clone(), catalog.closest_hit())?;

        let stages = [
            raygen.create_stage_info(vk::ShaderStageFlags::RAYGEN_KHR),
            miss.create_stage_info(vk::ShaderStageFlags::MISS_KHR),
            shadow_miss.create_stage_info(vk::ShaderStageFlags::MISS_KHR),
            closest_hit.create_stage_info(vk::ShaderStageFlags::CLOSEST_HIT_KHR),
        ];

        let general_group = |shader: u32| {
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(shader)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build()
        };
        let groups = [
            general_group(0),
            general_group(1),
            general_group(2),
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(3)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
        ];

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(MAX_RECURSION_DEPTH)
            .layout(layout);

        let pipelines = unsafe {
            loader
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[pipeline_info.build()],
                    None,
                )
                .map_err(VulkanError::Api)?
        };

        Ok(pipelines[0])
    }

    fn create_binding_table(
        device: &Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        loader: &RayTracingPipeline,
        properties: &RayTracingProperties,
        pipeline: vk::Pipeline,
    ) -> VulkanResult<ShaderBindingTable> {
        let handle_size = properties.handle_size;
        let handle_size_aligned = align_up(handle_size, properties.handle_alignment);

        let new_sbt_buffer = |size: u32| {
            Buffer::new(
                device.clone(),
                instance,
                physical_device,
                vk::DeviceSize::from(size),
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
        };

        let raygen = new_sbt_buffer(handle_size_aligned)?;
        let miss = new_sbt_buffer(2 * handle_size_aligned)?;
        let hit = new_sbt_buffer(handle_size_aligned)?;

        let sbt = ShaderBindingTable {
            raygen,
            miss,
            hit,
            handle_size_aligned,
        };
        Self::write_handles(loader, properties, pipeline, &sbt)?;
        Ok(sbt)
    }

    /// Copy the driver's opaque group handles into the table regions
    fn write_handles(
        loader: &RayTracingPipeline,
        properties: &RayTracingProperties,
        pipeline: vk::Pipeline,
        sbt: &ShaderBindingTable,
    ) -> VulkanResult<()> {
        let handle_size = properties.handle_size as usize;
        let aligned = sbt.handle_size_aligned as vk::DeviceSize;

        let handles = unsafe {
            loader
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    GROUP_COUNT,
                    GROUP_COUNT as usize * handle_size,
                )
                .map_err(VulkanError::Api)?
        };
        let handle = |index: usize| &handles[index * handle_size..(index + 1) * handle_size];

        sbt.raygen.write_bytes_at(0, handle(0))?;
        sbt.miss.write_bytes_at(0, handle(1))?;
        sbt.miss.write_bytes_at(aligned, handle(2))?;
        sbt.hit.write_bytes_at(0, handle(3))?;
        Ok(())
    }

    /// Swap shader binaries: rebuild the pipeline and refresh the binding
    /// table handles; layout and descriptor bindings stay untouched
    pub fn reload_shaders(&mut self, catalog: &ShaderCatalog) -> VulkanResult<()> {
        let new_pipeline =
            Self::create_pipeline(&self.device, &self.loader, catalog, self.pipeline_layout)?;
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = new_pipeline;
        Self::write_handles(&self.loader, &self.properties, self.pipeline, &self.sbt)
    }

    /// Record a trace sized to the current swap extent
    pub fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
        shared_set: vk::DescriptorSet,
        rt_set: vk::DescriptorSet,
        clear_color: [f32; 4],
    ) {
        let stride = vk::DeviceSize::from(self.sbt.handle_size_aligned);
        let raygen_region = vk::StridedDeviceAddressRegionKHR {
            device_address: self.sbt.raygen.device_address(),
            stride,
            size: stride,
        };
        let miss_region = vk::StridedDeviceAddressRegionKHR {
            device_address: self.sbt.miss.device_address(),
            stride,
            size: 2 * stride,
        };
        let hit_region = vk::StridedDeviceAddressRegionKHR {
            device_address: self.sbt.hit.device_address(),
            stride,
            size: stride,
        };
        let callable_region = vk::StridedDeviceAddressRegionKHR::default();

        unsafe {
            self.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline,
            );
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline_layout,
                0,
                &[shared_set, rt_set],
                &[],
            );
            self.device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::RAYGEN_KHR,
                0,
                bytemuck::bytes_of(&clear_color),
            );
            self.loader.cmd_trace_rays(
                cmd,
                &raygen_region,
                &miss_region,
                &hit_region,
                &callable_region,
                extent.width,
                extent.height,
                1,
            );
        }
    }
}

impl Drop for RayTracingStage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_alignment() {
        assert_eq!(align_up(32, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(1, 16), 16);
    }

    #[test]
    fn handle_offsets_follow_alignment() {
        // Typical driver values: 32-byte handles, 64-byte alignment
        let aligned = align_up(32, 64);
        assert_eq!(aligned, 64);
        // Miss region holds two contiguous handles
        assert_eq!(2 * aligned, 128);
    }
}
