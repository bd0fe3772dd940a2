//! Compute path-tracing stage
//!
//! One compute pipeline whose workgroup size is baked in through
//! specialization constants. The dispatch is bracketed by queue-family
//! ownership barriers handing the shared offscreen image from graphics-queue
//! reads to compute-queue writes and back, preserving its contents, and by a
//! pair of GPU timestamps whose difference is reported in milliseconds.

use ash::{vk, Device};

use crate::error::{VulkanError, VulkanResult};
use crate::shader::{ShaderCatalog, ShaderModule};

/// Workgroups needed to cover `size` pixels, never less than one
pub fn dispatch_groups(size: u32, workgroup: u32) -> u32 {
    ((size + workgroup - 1) / workgroup).max(1)
}

/// Elapsed milliseconds between two timestamp ticks
pub fn timestamp_ms(start: u64, end: u64, timestamp_period: f32) -> f32 {
    (end.wrapping_sub(start)) as f32 * timestamp_period / 1e6
}

/// Compute path-tracing stage state
pub struct PathTracingStage {
    device: Device,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    query_pool: vk::QueryPool,
    workgroup_size: (u32, u32),
    timestamp_period: f32,
    graphics_family: u32,
    compute_family: u32,
}

impl PathTracingStage {
    /// Build the compute pipeline and timing query pool
    pub fn new(
        device: Device,
        catalog: &ShaderCatalog,
        shared_layout: vk::DescriptorSetLayout,
        rt_layout: vk::DescriptorSetLayout,
        workgroup_size: (u32, u32),
        timestamp_period: f32,
        graphics_family: u32,
        compute_family: u32,
    ) -> VulkanResult<Self> {
        let set_layouts = [shared_layout, rt_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline =
            Self::create_pipeline(&device, catalog, pipeline_layout, workgroup_size)?;

        let query_pool_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(2);
        let query_pool = unsafe {
            device
                .create_query_pool(&query_pool_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!(
            "Path-tracing stage ready (workgroup {}x{})",
            workgroup_size.0,
            workgroup_size.1
        );

        Ok(Self {
            device,
            pipeline_layout,
            pipeline,
            query_pool,
            workgroup_size,
            timestamp_period,
            graphics_family,
            compute_family,
        })
    }

    fn create_pipeline(
        device: &Device,
        catalog: &ShaderCatalog,
        layout: vk::PipelineLayout,
        workgroup_size: (u32, u32),
    ) -> VulkanResult<vk::Pipeline> {
        let shader = ShaderModule::from_file(device.clone(), catalog.path_trace_compute())?;

        // Workgroup dimensions substituted at pipeline creation
        let map_entries = [
            vk::SpecializationMapEntry {
                constant_id: 0,
                offset: 0,
                size: 4,
            },
            vk::SpecializationMapEntry {
                constant_id: 1,
                offset: 4,
                size: 4,
            },
        ];
        let data = [workgroup_size.0, workgroup_size.1];
        let data_bytes: &[u8] = bytemuck::cast_slice(&data);
        let specialization = vk::SpecializationInfo::builder()
            .map_entries(&map_entries)
            .data(data_bytes);

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(crate::shader::SHADER_ENTRY)
            .specialization_info(&specialization);

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(layout);

        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };

        Ok(pipelines[0])
    }

    /// Swap the compute shader binary, keeping layout and bindings
    pub fn reload_shaders(&mut self, catalog: &ShaderCatalog) -> VulkanResult<()> {
        let new_pipeline = Self::create_pipeline(
            &self.device,
            catalog,
            self.pipeline_layout,
            self.workgroup_size,
        )?;
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = new_pipeline;
        Ok(())
    }

    fn ownership_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        src_family: u32,
        dst_family: u32,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(vk::ImageLayout::GENERAL)
            .new_layout(vk::ImageLayout::GENERAL)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }
    }

    /// Record the dispatch covering the swap extent, with the ownership
    /// hand-off and both timestamps
    pub fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        offscreen_image: vk::Image,
        extent: vk::Extent2D,
        shared_set: vk::DescriptorSet,
        rt_set: vk::DescriptorSet,
    ) {
        // Hand the offscreen image to the compute queue family, keeping
        // contents (layout stays GENERAL)
        self.ownership_barrier(
            cmd,
            offscreen_image,
            self.graphics_family,
            self.compute_family,
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        );

        unsafe {
            self.device
                .cmd_reset_query_pool(cmd, self.query_pool, 0, 2);
            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                self.query_pool,
                0,
            );

            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[shared_set, rt_set],
                &[],
            );

            let groups_x = dispatch_groups(extent.width, self.workgroup_size.0);
            let groups_y = dispatch_groups(extent.height, self.workgroup_size.1);
            self.device.cmd_dispatch(cmd, groups_x, groups_y, 1);

            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                self.query_pool,
                1,
            );
        }

        // Hand it back for the post stage's sampled read
        self.ownership_barrier(
            cmd,
            offscreen_image,
            self.compute_family,
            self.graphics_family,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::ALL_COMMANDS,
        );
    }

    /// Milliseconds the last dispatch took, or None while the query is
    /// still in flight
    pub fn read_timing(&self) -> VulkanResult<Option<f32>> {
        let mut ticks = [0u64; 2];
        let result = unsafe {
            self.device.get_query_pool_results(
                self.query_pool,
                0,
                2,
                &mut ticks,
                vk::QueryResultFlags::TYPE_64,
            )
        };

        match result {
            Ok(()) => Ok(Some(timestamp_ms(ticks[0], ticks[1], self.timestamp_period))),
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }
}

impl Drop for PathTracingStage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_query_pool(self.query_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dispatch_covers_the_extent() {
        assert_eq!(dispatch_groups(1920, 16), 120);
        assert_eq!(dispatch_groups(1080, 8), 135);
        // Partial workgroup rounds up
        assert_eq!(dispatch_groups(1921, 16), 121);
    }

    #[test]
    fn dispatch_never_drops_to_zero() {
        assert_eq!(dispatch_groups(1, 16), 1);
        assert_eq!(dispatch_groups(8, 16), 1);
    }

    #[test]
    fn timestamp_delta_converts_to_milliseconds() {
        // 1_000_000 ticks at 1ns per tick = 1ms
        assert_relative_eq!(timestamp_ms(0, 1_000_000, 1.0), 1.0);
        // 52.083ns period (common on older hardware)
        assert_relative_eq!(
            timestamp_ms(1_000, 21_000, 52.083),
            20_000.0 * 52.083 / 1e6
        );
    }
}
