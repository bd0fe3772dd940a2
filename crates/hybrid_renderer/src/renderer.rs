//! Frame orchestrator
//!
//! Owns the whole rendering back end: instance, surface, device, swap
//! targets, per-frame synchronization, the three render stages, and the
//! post-composition pass that writes each frame into the acquired swap
//! image. One `draw_frame` call records and submits exactly one frame.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::accel::AccelManager;
use crate::buffer::{Buffer, UniformBuffer};
use crate::commands::CommandPool;
use crate::config::RendererConfig;
use crate::context::{PresentationSurface, VulkanInstance};
use crate::descriptors::{PostDescriptors, RayTracingDescriptors, SharedDescriptors};
use crate::device::{LogicalDevice, PhysicalDeviceInfo};
use crate::error::{VulkanError, VulkanResult};
use crate::image::record_layout_transition;
use crate::overlay::{OverlayDraw, OverlayState, RenderMode};
use crate::scene::{GlobalUniform, ObjectDescription, Scene, SceneUniform};
use crate::shader::ShaderCatalog;
use crate::stages::rasterizer::OFFSCREEN_COLOR_FORMAT;
use crate::stages::{PathTracingStage, PostStage, RasterizerStage, RayTracingStage};
use crate::swapchain::Swapchain;
use crate::sync::FramePacer;

/// Capacity of the per-object description buffer
pub const MAX_OBJECT_COUNT: usize = 1024;

/// Pick the stage that draws this frame. Exactly one runs; a traced mode is
/// honored only when its pipeline exists and the scene has acceleration
/// structures to trace against, otherwise the frame falls back to the
/// rasterizer.
fn select_stage(
    requested: RenderMode,
    ray_trace_ready: bool,
    path_trace_ready: bool,
) -> RenderMode {
    match requested {
        RenderMode::RayTrace if ray_trace_ready => RenderMode::RayTrace,
        RenderMode::PathTrace if path_trace_ready => RenderMode::PathTrace,
        _ => RenderMode::Rasterize,
    }
}

/// Top-level renderer owning all Vulkan state.
///
/// Field order is teardown order: scene data and stages go first, then
/// descriptors and sync, then the swap chain, and the device and instance
/// last.
pub struct Renderer {
    scene: Scene,
    accel: Option<AccelManager>,
    post_stage: PostStage,
    path_tracing_stage: Option<PathTracingStage>,
    ray_tracing_stage: Option<RayTracingStage>,
    rasterizer_stage: RasterizerStage,
    post_descriptors: PostDescriptors,
    ray_tracing_descriptors: Option<RayTracingDescriptors>,
    shared_descriptors: SharedDescriptors,
    global_uniforms: Vec<UniformBuffer<GlobalUniform>>,
    scene_uniforms: Vec<UniformBuffer<SceneUniform>>,
    object_buffer: Buffer,
    pacer: FramePacer,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    swapchain: Swapchain,
    logical: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: PresentationSurface,
    vulkan: VulkanInstance,
    catalog: ShaderCatalog,
    overlay: OverlayState,
    config: RendererConfig,
}

impl Renderer {
    /// Bring up the full back end against the host window
    pub fn new(
        config: RendererConfig,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let vulkan = VulkanInstance::new(&config, display_handle)?;
        let surface = PresentationSurface::new(&vulkan, display_handle, window_handle)?;
        let physical = PhysicalDeviceInfo::select_suitable_device(
            &vulkan.instance,
            surface.surface,
            &surface.loader,
        )?;
        let logical = LogicalDevice::new(&vulkan.instance, &physical)?;
        let device = logical.device.clone();

        let swapchain = Swapchain::new(
            &vulkan.instance,
            device.clone(),
            surface.surface,
            &surface.loader,
            &physical,
            window_extent,
        )?;
        let image_count = swapchain.image_count();

        let command_pool = CommandPool::new(device.clone(), logical.graphics_family)?;
        let command_buffers = command_pool.allocate_command_buffers(image_count as u32)?;

        // Frames in flight never exceed the negotiated image count, whatever
        // the configuration asked for
        let frames_in_flight = config.max_frames_in_flight.clamp(1, image_count);
        let pacer = FramePacer::new(device.clone(), frames_in_flight, image_count)?;

        let mut global_uniforms = Vec::with_capacity(image_count);
        let mut scene_uniforms = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            global_uniforms.push(UniformBuffer::new(
                device.clone(),
                &vulkan.instance,
                physical.device,
                &command_pool,
                logical.graphics_queue,
                &GlobalUniform::default(),
            )?);
            scene_uniforms.push(UniformBuffer::new(
                device.clone(),
                &vulkan.instance,
                physical.device,
                &command_pool,
                logical.graphics_queue,
                &SceneUniform::default(),
            )?);
        }

        let object_buffer = Buffer::new(
            device.clone(),
            &vulkan.instance,
            physical.device,
            (MAX_OBJECT_COUNT * std::mem::size_of::<ObjectDescription>()) as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let ray_tracing = physical.supports_ray_tracing;

        let shared_descriptors = SharedDescriptors::new(device.clone(), image_count, ray_tracing)?;
        let global_handles: Vec<vk::Buffer> =
            global_uniforms.iter().map(|ubo| ubo.handle()).collect();
        let scene_handles: Vec<vk::Buffer> =
            scene_uniforms.iter().map(|ubo| ubo.handle()).collect();
        shared_descriptors.write_buffers(&global_handles, &scene_handles, object_buffer.handle());

        let catalog = ShaderCatalog::new(config.shader_dir.clone());

        let rasterizer_stage = RasterizerStage::new(
            device.clone(),
            &vulkan.instance,
            physical.device,
            &command_pool,
            logical.graphics_queue,
            &catalog,
            OFFSCREEN_COLOR_FORMAT,
            swapchain.extent(),
            image_count,
            shared_descriptors.layout(),
        )?;

        let mut ray_tracing_descriptors = None;
        let mut ray_tracing_stage = None;
        let mut path_tracing_stage = None;
        let mut accel = None;
        if let Some(loaders) = &logical.ray_tracing {
            let rt_descriptors = RayTracingDescriptors::new(device.clone(), image_count)?;
            ray_tracing_stage = Some(RayTracingStage::new(
                device.clone(),
                &vulkan.instance,
                physical.device,
                loaders.pipeline.clone(),
                loaders.properties,
                &catalog,
                shared_descriptors.layout(),
                rt_descriptors.layout(),
            )?);
            path_tracing_stage = Some(PathTracingStage::new(
                device.clone(),
                &catalog,
                shared_descriptors.layout(),
                rt_descriptors.layout(),
                config.workgroup_size,
                physical.timestamp_period,
                logical.graphics_family,
                logical.compute_family,
            )?);
            accel = Some(AccelManager::new(
                device.clone(),
                loaders.acceleration_structure.clone(),
                physical.device,
            ));
            ray_tracing_descriptors = Some(rt_descriptors);
        }

        let post_descriptors = PostDescriptors::new(device.clone(), image_count)?;
        let post_stage = PostStage::new(
            device,
            &vulkan.instance,
            physical.device,
            &catalog,
            swapchain.format().format,
            swapchain.image_views(),
            swapchain.extent(),
            post_descriptors.layout(),
        )?;
        for index in 0..image_count {
            post_descriptors.write(index, post_stage.sampler(), rasterizer_stage.color_view(index));
        }

        let overlay = OverlayState::new(ray_tracing);

        log::info!(
            "Renderer initialized: {} swap images, {} frames in flight",
            image_count,
            pacer.frames_in_flight()
        );

        Ok(Self {
            scene: Scene::empty(),
            accel,
            post_stage,
            path_tracing_stage,
            ray_tracing_stage,
            rasterizer_stage,
            post_descriptors,
            ray_tracing_descriptors,
            shared_descriptors,
            global_uniforms,
            scene_uniforms,
            object_buffer,
            pacer,
            command_buffers,
            command_pool,
            swapchain,
            logical,
            physical,
            surface,
            vulkan,
            catalog,
            overlay,
            config,
        })
    }

    /// Replace the active scene, uploading object descriptions, textures,
    /// and (when hardware supports it) acceleration structures
    pub fn load_scene(&mut self, scene: Scene) -> VulkanResult<()> {
        if scene.models.len() > MAX_OBJECT_COUNT {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "scene has {} models, limit is {}",
                    scene.models.len(),
                    MAX_OBJECT_COUNT
                ),
            });
        }

        unsafe {
            self.logical
                .device
                .device_wait_idle()
                .map_err(VulkanError::Api)?;
        }

        let descriptions: Vec<ObjectDescription> = scene
            .models
            .iter()
            .map(|model| model.object_description())
            .collect();
        if !descriptions.is_empty() {
            self.object_buffer.write_data(&descriptions)?;
        }

        self.shared_descriptors.write_textures(&scene.texture_views);

        if let Some(accel) = &mut self.accel {
            accel.build(
                &self.vulkan.instance,
                &self.command_pool,
                self.logical.graphics_queue,
                &scene.models,
            )?;
            if let Some(rt_descriptors) = &self.ray_tracing_descriptors {
                if !scene.models.is_empty() {
                    let tlas = accel.tlas()?;
                    for index in 0..rt_descriptors.set_count() {
                        rt_descriptors.write(
                            index,
                            tlas,
                            self.rasterizer_stage.color_view(index),
                        );
                    }
                }
            }
        }

        log::info!("Scene loaded: {} models", scene.models.len());
        self.scene = scene;
        Ok(())
    }

    /// Record, submit, and present one frame.
    ///
    /// Returns without drawing when the surface is out of date; the host is
    /// expected to call `handle_resize` on its next size event.
    pub fn draw_frame(
        &mut self,
        global: &GlobalUniform,
        scene_uniform: &SceneUniform,
        overlay_draw: Option<&mut dyn OverlayDraw>,
    ) -> VulkanResult<()> {
        if self.overlay.take_hot_reload() {
            self.reload_shaders()?;
        }

        self.pacer.wait_current()?;

        let image_index = match self
            .swapchain
            .acquire_next_image(self.pacer.current().image_available.handle())?
        {
            Some(index) => index as usize,
            // Surface went stale between frames; skip without touching fences
            None => return Ok(()),
        };

        self.pacer.claim_image(image_index)?;

        let mode = self.active_mode();
        if mode != RenderMode::Rasterize {
            self.refresh_ray_tracing_state(image_index)?;
        }

        let cmd = self.command_buffers[image_index];
        self.record_frame(cmd, image_index, mode, global, scene_uniform, overlay_draw)?;

        let device = &self.logical.device;
        let frame = self.pacer.current();
        frame.in_flight.reset()?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished.handle()];
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .queue_submit(
                    self.logical.graphics_queue,
                    &[submit_info.build()],
                    frame.in_flight.handle(),
                )
                .map_err(VulkanError::Api)?;
        }

        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe {
            self.swapchain
                .loader()
                .queue_present(self.logical.present_queue, &present_info)
        };
        match present_result {
            Ok(_) => {}
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(()),
            Err(err) => {
                // The frame was submitted and its fence will signal; log and
                // move to the next in-flight slot
                log::warn!("Present failed: {:?}", err);
                self.pacer.advance();
                return Ok(());
            }
        }

        if mode == RenderMode::PathTrace {
            if let Some(path_tracing) = &self.path_tracing_stage {
                self.overlay.path_trace_ms = path_tracing.read_timing()?;
            }
        }

        self.pacer.advance();
        Ok(())
    }

    fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        mode: RenderMode,
        global: &GlobalUniform,
        scene_uniform: &SceneUniform,
        overlay_draw: Option<&mut dyn OverlayDraw>,
    ) -> VulkanResult<()> {
        debug_assert_eq!(
            self.rasterizer_stage.target_count(),
            self.swapchain.image_count()
        );
        debug_assert_eq!(self.post_stage.framebuffer_count(), self.swapchain.image_count());

        let device = self.logical.device.clone();

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.record_uniform_updates(cmd, image_index, global, scene_uniform);

        let shared_set = self.shared_descriptors.set(image_index);
        let extent = self.swapchain.extent();
        match mode {
            RenderMode::Rasterize => {
                self.rasterizer_stage.record_commands(
                    cmd,
                    image_index,
                    &self.scene,
                    shared_set,
                    self.config.clear_color,
                );
            }
            RenderMode::RayTrace => {
                if let (Some(stage), Some(rt_descriptors)) =
                    (&self.ray_tracing_stage, &self.ray_tracing_descriptors)
                {
                    stage.record_commands(
                        cmd,
                        extent,
                        shared_set,
                        rt_descriptors.set(image_index),
                        self.config.clear_color,
                    );
                }
            }
            RenderMode::PathTrace => {
                if let (Some(stage), Some(rt_descriptors)) =
                    (&self.path_tracing_stage, &self.ray_tracing_descriptors)
                {
                    stage.record_commands(
                        cmd,
                        self.rasterizer_stage.color_image(image_index),
                        extent,
                        shared_set,
                        rt_descriptors.set(image_index),
                    );
                }
            }
        }

        // The post pass samples the offscreen image, then it returns to
        // GENERAL so next frame's stage can write it again
        let offscreen = self.rasterizer_stage.color_image(image_index);
        record_layout_transition(
            &device,
            cmd,
            offscreen,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
            1,
        );

        self.post_stage.record_commands(
            cmd,
            image_index,
            self.post_descriptors.set(image_index),
            overlay_draw,
        );

        record_layout_transition(
            &device,
            cmd,
            offscreen,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::GENERAL,
            vk::ImageAspectFlags::COLOR,
            1,
        );

        unsafe {
            device.end_command_buffer(cmd).map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    /// Update both per-frame uniform buffers in place, fenced against the
    /// shader stages that read them
    fn record_uniform_updates(
        &self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        global: &GlobalUniform,
        scene_uniform: &SceneUniform,
    ) {
        let device = &self.logical.device;
        let mut read_stages =
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
        if self.physical.supports_ray_tracing {
            read_stages |= vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR
                | vk::PipelineStageFlags::COMPUTE_SHADER;
        }

        let global_ubo = &self.global_uniforms[image_index];
        let scene_ubo = &self.scene_uniforms[image_index];

        let to_transfer = [
            Self::buffer_barrier(
                global_ubo.handle(),
                global_ubo.size(),
                vk::AccessFlags::UNIFORM_READ,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
            Self::buffer_barrier(
                scene_ubo.handle(),
                scene_ubo.size(),
                vk::AccessFlags::UNIFORM_READ,
                vk::AccessFlags::TRANSFER_WRITE,
            ),
        ];
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                read_stages,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &to_transfer,
                &[],
            );
        }

        global_ubo.record_update(device, cmd, global);
        scene_ubo.record_update(device, cmd, scene_uniform);

        let to_shader = [
            Self::buffer_barrier(
                global_ubo.handle(),
                global_ubo.size(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::UNIFORM_READ,
            ),
            Self::buffer_barrier(
                scene_ubo.handle(),
                scene_ubo.size(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::UNIFORM_READ,
            ),
        ];
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                read_stages,
                vk::DependencyFlags::empty(),
                &[],
                &to_shader,
                &[],
            );
        }
    }

    fn buffer_barrier(
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(size)
            .build()
    }

    /// Re-point this image's ray-tracing set at the scene's structures
    /// before a traced frame. The structures themselves are built once at
    /// scene load; frames in flight may still reference them, so nothing is
    /// rebuilt or dropped here.
    fn refresh_ray_tracing_state(&self, image_index: usize) -> VulkanResult<()> {
        let Some(accel) = &self.accel else {
            return Ok(());
        };
        if !accel.has_tlas() {
            return Ok(());
        }

        if let Some(rt_descriptors) = &self.ray_tracing_descriptors {
            rt_descriptors.write(
                image_index,
                accel.tlas()?,
                self.rasterizer_stage.color_view(image_index),
            );
        }
        Ok(())
    }

    /// Tri-state stage selection for this frame
    fn active_mode(&self) -> RenderMode {
        let tlas_ready = self.accel.as_ref().map_or(false, |accel| accel.has_tlas());
        select_stage(
            self.overlay.mode(),
            self.ray_tracing_stage.is_some() && tlas_ready,
            self.path_tracing_stage.is_some() && tlas_ready,
        )
    }

    /// Rebuild every pipeline from the current on-disk shader binaries.
    /// Layouts and descriptor bindings are untouched, so a failed reload
    /// leaves the previous pipelines running.
    pub fn reload_shaders(&mut self) -> VulkanResult<()> {
        unsafe {
            self.logical
                .device
                .device_wait_idle()
                .map_err(VulkanError::Api)?;
        }

        self.rasterizer_stage.reload_shaders(&self.catalog)?;
        self.post_stage.reload_shaders(&self.catalog)?;
        if let Some(stage) = &mut self.ray_tracing_stage {
            stage.reload_shaders(&self.catalog)?;
        }
        if let Some(stage) = &mut self.path_tracing_stage {
            stage.reload_shaders(&self.catalog)?;
        }

        log::info!("Shaders reloaded");
        Ok(())
    }

    /// Recreate uniform buffers and descriptor sets at a new swap image
    /// count, re-pointing them at the live scene data. Called with the
    /// device idle.
    fn rebuild_per_image_resources(&mut self, image_count: usize) -> VulkanResult<()> {
        let device = self.logical.device.clone();

        let mut global_uniforms = Vec::with_capacity(image_count);
        let mut scene_uniforms = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            global_uniforms.push(UniformBuffer::new(
                device.clone(),
                &self.vulkan.instance,
                self.physical.device,
                &self.command_pool,
                self.logical.graphics_queue,
                &GlobalUniform::default(),
            )?);
            scene_uniforms.push(UniformBuffer::new(
                device.clone(),
                &self.vulkan.instance,
                self.physical.device,
                &self.command_pool,
                self.logical.graphics_queue,
                &SceneUniform::default(),
            )?);
        }
        self.global_uniforms = global_uniforms;
        self.scene_uniforms = scene_uniforms;

        let shared = SharedDescriptors::new(
            device.clone(),
            image_count,
            self.physical.supports_ray_tracing,
        )?;
        let global_handles: Vec<vk::Buffer> =
            self.global_uniforms.iter().map(|ubo| ubo.handle()).collect();
        let scene_handles: Vec<vk::Buffer> =
            self.scene_uniforms.iter().map(|ubo| ubo.handle()).collect();
        shared.write_buffers(&global_handles, &scene_handles, self.object_buffer.handle());
        shared.write_textures(&self.scene.texture_views);
        self.shared_descriptors = shared;

        self.post_descriptors = PostDescriptors::new(device.clone(), image_count)?;
        if self.ray_tracing_descriptors.is_some() {
            self.ray_tracing_descriptors = Some(RayTracingDescriptors::new(device, image_count)?);
        }
        Ok(())
    }

    /// Rebuild the swap chain and every extent-dependent resource after a
    /// drawable-size change
    pub fn handle_resize(&mut self, window_extent: vk::Extent2D) -> VulkanResult<()> {
        unsafe {
            self.logical
                .device
                .device_wait_idle()
                .map_err(VulkanError::Api)?;
        }

        let device = self.logical.device.clone();

        let new_swapchain = Swapchain::recreate(
            &self.vulkan.instance,
            device.clone(),
            self.surface.surface,
            &self.surface.loader,
            &self.physical,
            window_extent,
            self.swapchain.handle(),
        )?;
        // Old chain handle is retired by the recreate call; dropping the
        // wrapper destroys it
        self.swapchain = new_swapchain;
        let image_count = self.swapchain.image_count();

        // A renegotiated chain may change its image count; every per-image
        // resource has to track it or set lookups go out of bounds
        if image_count != self.global_uniforms.len() {
            self.rebuild_per_image_resources(image_count)?;
        }

        self.rasterizer_stage = RasterizerStage::new(
            device.clone(),
            &self.vulkan.instance,
            self.physical.device,
            &self.command_pool,
            self.logical.graphics_queue,
            &self.catalog,
            OFFSCREEN_COLOR_FORMAT,
            self.swapchain.extent(),
            image_count,
            self.shared_descriptors.layout(),
        )?;

        self.post_stage = PostStage::new(
            device,
            &self.vulkan.instance,
            self.physical.device,
            &self.catalog,
            self.swapchain.format().format,
            self.swapchain.image_views(),
            self.swapchain.extent(),
            self.post_descriptors.layout(),
        )?;
        debug_assert_eq!(self.post_descriptors.set_count(), image_count);
        debug_assert_eq!(self.shared_descriptors.set_count(), image_count);
        for index in 0..image_count {
            self.post_descriptors.write(
                index,
                self.post_stage.sampler(),
                self.rasterizer_stage.color_view(index),
            );
        }

        if let (Some(accel), Some(rt_descriptors)) = (&self.accel, &self.ray_tracing_descriptors) {
            if accel.has_tlas() {
                let tlas = accel.tlas()?;
                for index in 0..image_count {
                    rt_descriptors.write(index, tlas, self.rasterizer_stage.color_view(index));
                }
            }
        }

        if self.command_buffers.len() != image_count {
            unsafe {
                self.logical
                    .device
                    .free_command_buffers(self.command_pool.handle(), &self.command_buffers);
            }
            self.command_buffers = self.command_pool.allocate_command_buffers(image_count as u32)?;
        }

        self.pacer.reset_after_rebuild(image_count);

        log::debug!(
            "Swap targets rebuilt: {}x{}, {} images",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            image_count
        );
        Ok(())
    }

    /// Shared overlay record for host-side input handling
    pub fn overlay_state(&mut self) -> &mut OverlayState {
        &mut self.overlay
    }

    /// Whether the hardware ray-tracing path is available
    pub fn ray_tracing_available(&self) -> bool {
        self.physical.supports_ray_tracing
    }

    /// Aspect ratio of the current swap extent
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.aspect_ratio()
    }

    /// Number of models in the active scene
    pub fn model_count(&self) -> usize {
        self.scene.model_count()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device.device_wait_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn traced_modes_need_pipeline_and_structures() {
        init_logging();
        // No pipeline, no structures: traced requests fall back
        assert_eq!(
            select_stage(RenderMode::RayTrace, false, false),
            RenderMode::Rasterize
        );
        assert_eq!(
            select_stage(RenderMode::PathTrace, false, false),
            RenderMode::Rasterize
        );
        // Ready on both counts: the request is honored
        assert_eq!(
            select_stage(RenderMode::RayTrace, true, true),
            RenderMode::RayTrace
        );
        assert_eq!(
            select_stage(RenderMode::PathTrace, true, true),
            RenderMode::PathTrace
        );
    }

    #[test]
    fn empty_scene_never_traces() {
        init_logging();
        // Pipelines exist but no geometry was loaded, so readiness is false
        // for both traced stages regardless of the requested mode
        for requested in [RenderMode::Rasterize, RenderMode::RayTrace, RenderMode::PathTrace] {
            assert_eq!(
                select_stage(requested, false, false),
                RenderMode::Rasterize
            );
        }
    }

    #[test]
    fn rasterize_request_always_wins() {
        assert_eq!(
            select_stage(RenderMode::Rasterize, true, true),
            RenderMode::Rasterize
        );
    }
}
