//! GPU image primitives and layout transitions
//!
//! 2D image allocation with the same staging discipline as buffers, plus the
//! layout-transition operation every stage relies on. Access masks and
//! pipeline stages are derived from a fixed per-layout lookup, keyed by the
//! layout itself rather than the image's usage; layouts outside the table get
//! the most conservative stage/access pair instead of failing.

use ash::{vk, Device, Instance};

use crate::buffer::find_memory_type;
use crate::commands::CommandPool;
use crate::error::{VulkanError, VulkanResult};

/// Access mask appropriate for an image sitting in `layout`
pub fn access_flags_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::AccessFlags::empty(),
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        // Conservative fallback for any layout the table does not name
        _ => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

/// Pipeline stage that must observe an image sitting in `layout`
pub fn pipeline_stage_for_layout(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        // Depth, sampled reads, and general storage access can touch many
        // stages; all-commands is correct for each of them
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        | vk::ImageLayout::GENERAL => vk::PipelineStageFlags::ALL_COMMANDS,
        _ => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Record a layout transition barrier into an existing command buffer
pub fn record_layout_transition(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(access_flags_for_layout(old_layout))
        .dst_access_mask(access_flags_for_layout(new_layout));

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            pipeline_stage_for_layout(old_layout),
            pipeline_stage_for_layout(new_layout),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Pick the first depth format the adapter supports as a depth attachment
pub fn choose_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> VulkanResult<vk::Format> {
    let candidates = [
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    for format in candidates {
        let props =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }

    Err(VulkanError::InitializationFailed(
        "No supported depth format".to_string(),
    ))
}

/// Whether a depth format carries a stencil aspect
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// 2D image wrapper with memory and view management
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
}

impl Image {
    /// Create a device-local 2D image and its view
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extent: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };

        unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            format,
            extent,
            mip_levels,
        })
    }

    /// Transition the image's layout with a synchronous one-shot submission
    pub fn transition_layout(
        &self,
        pool: &CommandPool,
        queue: vk::Queue,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<()> {
        pool.submit_one_shot(queue, |cmd| {
            self.record_transition(cmd, old_layout, new_layout, aspect);
            Ok(())
        })
    }

    /// Record the layout transition into an existing command buffer
    pub fn record_transition(
        &self,
        cmd: vk::CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
    ) {
        record_layout_transition(
            &self.device,
            cmd,
            self.image,
            old_layout,
            new_layout,
            aspect,
            self.mip_levels,
        );
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get image format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Get image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every layout this renderer produces somewhere in a frame
    const PRODUCED_LAYOUTS: [vk::ImageLayout; 8] = [
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::PREINITIALIZED,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::GENERAL,
    ];

    #[test]
    fn lookup_covers_every_produced_layout() {
        let conservative = vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
        for layout in PRODUCED_LAYOUTS {
            // A named entry exists: the result differs from the fallback pair,
            // except UNDEFINED whose access mask is legitimately empty
            let access = access_flags_for_layout(layout);
            assert_ne!(access, conservative, "missing table entry for {:?}", layout);
            assert!(!pipeline_stage_for_layout(layout).is_empty());
        }
    }

    #[test]
    fn unknown_layout_degrades_conservatively() {
        let access = access_flags_for_layout(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            access,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE
        );
        assert_eq!(
            pipeline_stage_for_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
    }

    #[test]
    fn transfer_layouts_map_to_transfer_stage() {
        assert_eq!(
            pipeline_stage_for_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            access_flags_for_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            access_flags_for_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            vk::AccessFlags::TRANSFER_READ
        );
    }

    #[test]
    fn stencil_component_detection() {
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }
}
