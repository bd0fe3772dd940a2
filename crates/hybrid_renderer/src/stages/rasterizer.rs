//! Rasterizer stage
//!
//! Draws scene geometry into a per-swap-image offscreen color+depth target
//! with a fixed-function graphics pipeline. Owns those offscreen targets; the
//! ray-traced stages write the same color images and the post stage samples
//! them. Offscreen color images live in GENERAL layout between frames.

use ash::{vk, Device, Instance};

use crate::commands::CommandPool;
use crate::error::{VulkanError, VulkanResult};
use crate::image::{choose_depth_format, Image};
use crate::scene::{Scene, Vertex};
use crate::shader::{ShaderCatalog, ShaderModule};

/// Offscreen color format. Plain UNORM rather than the sRGB the surface
/// negotiation prefers: the same image carries storage usage for the
/// compute and ray-tracing writes, and sRGB formats lack the storage-image
/// feature on most hardware.
pub const OFFSCREEN_COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Per-swap-image offscreen render target
pub struct OffscreenTarget {
    /// Color image, storage-compatible, sampled by the post stage
    pub color: Image,
    /// Depth image
    pub depth: Image,
}

/// Rasterizer stage state
pub struct RasterizerStage {
    device: Device,
    targets: Vec<OffscreenTarget>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    extent: vk::Extent2D,
    color_format: vk::Format,
}

impl RasterizerStage {
    /// Create offscreen targets, render pass, and the graphics pipeline
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        pool: &CommandPool,
        graphics_queue: vk::Queue,
        catalog: &ShaderCatalog,
        color_format: vk::Format,
        extent: vk::Extent2D,
        image_count: usize,
        shared_layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<Self> {
        let depth_format = choose_depth_format(instance, physical_device)?;

        let mut targets = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            let color = Image::new(
                device.clone(),
                instance,
                physical_device,
                extent,
                color_format,
                1,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_DST,
                vk::ImageAspectFlags::COLOR,
            )?;
            // Offscreen color rests in GENERAL so any stage may write it
            color.transition_layout(
                pool,
                graphics_queue,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                vk::ImageAspectFlags::COLOR,
            )?;

            let depth = Image::new(
                device.clone(),
                instance,
                physical_device,
                extent,
                depth_format,
                1,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
            )?;

            targets.push(OffscreenTarget { color, depth });
        }

        let render_pass = Self::create_render_pass(&device, color_format, depth_format)?;

        let framebuffers = targets
            .iter()
            .map(|target| {
                let attachments = [target.color.view(), target.depth.view()];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                unsafe {
                    device
                        .create_framebuffer(&framebuffer_info, None)
                        .map_err(VulkanError::Api)
                }
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let set_layouts = [shared_layout];
        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<[[f32; 4]; 4]>() as u32,
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

        let pipeline =
            Self::create_pipeline(&device, catalog, extent, render_pass, pipeline_layout)?;

        log::debug!("Rasterizer stage ready ({} offscreen targets)", image_count);

        Ok(Self {
            device,
            targets,
            framebuffers,
            render_pass,
            pipeline_layout,
            pipeline,
            extent,
            color_format,
        })
    }

    fn create_render_pass(
        device: &Device,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VulkanResult<vk::RenderPass> {
        let attachments = [
            // Offscreen color: stays in GENERAL across the pass so ray-traced
            // frames and the post stage see a consistent resting layout
            vk::AttachmentDescription::builder()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::GENERAL)
                .final_layout(vk::ImageLayout::GENERAL)
                .build(),
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe {
            device
                .create_render_pass(&render_pass_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_pipeline(
        device: &Device,
        catalog: &ShaderCatalog,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline> {
        let vertex_shader = ShaderModule::from_file(device.clone(), catalog.rasterizer_vertex())?;
        let fragment_shader =
            ShaderModule::from_file(device.clone(), catalog.rasterizer_fragment())?;

        let shader_stages = [
            vertex_shader.create_stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.create_stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let binding_descriptions = [Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Standard alpha-over blending
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };

        Ok(pipelines[0])
    }

    /// Swap shader binaries: rebuild only the pipeline, keeping the layout
    /// and every binding untouched
    pub fn reload_shaders(&mut self, catalog: &ShaderCatalog) -> VulkanResult<()> {
        let new_pipeline = Self::create_pipeline(
            &self.device,
            catalog,
            self.extent,
            self.render_pass,
            self.pipeline_layout,
        )?;
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
        self.pipeline = new_pipeline;
        Ok(())
    }

    /// Record this frame's geometry pass. Zero models still begins and ends
    /// the pass cleanly, clearing the target.
    pub fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        scene: &Scene,
        shared_set: vk::DescriptorSet,
        clear_color: [f32; 4],
    ) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                cmd,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[shared_set],
                &[],
            );

            for model in &scene.models {
                // Each model draws with its own transform
                let matrix: [[f32; 4]; 4] = model.transform.into();
                self.device.cmd_push_constants(
                    cmd,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&matrix),
                );
                self.device.cmd_bind_vertex_buffers(
                    cmd,
                    0,
                    &[model.vertex_buffer.handle()],
                    &[0],
                );
                self.device.cmd_bind_index_buffer(
                    cmd,
                    model.index_buffer.handle(),
                    0,
                    vk::IndexType::UINT32,
                );
                self.device.cmd_draw_indexed(cmd, model.index_count, 1, 0, 0, 0);
            }

            self.device.cmd_end_render_pass(cmd);
        }
    }

    /// Offscreen color image for swap image `index`
    pub fn color_image(&self, index: usize) -> vk::Image {
        self.targets[index].color.handle()
    }

    /// Offscreen color view for swap image `index`
    pub fn color_view(&self, index: usize) -> vk::ImageView {
        self.targets[index].color.view()
    }

    /// Number of offscreen targets (always the swap image count)
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Offscreen color format
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }
}

impl Drop for RasterizerStage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offscreen_format_is_storage_compatible_unorm() {
        // The offscreen image is created with STORAGE usage, which sRGB
        // formats do not support; it must stay decoupled from the sRGB
        // formats the surface negotiation prefers
        assert_eq!(OFFSCREEN_COLOR_FORMAT, vk::Format::B8G8R8A8_UNORM);
        assert_ne!(OFFSCREEN_COLOR_FORMAT, vk::Format::B8G8R8A8_SRGB);
        assert_ne!(OFFSCREEN_COLOR_FORMAT, vk::Format::R8G8B8A8_SRGB);
    }
}
