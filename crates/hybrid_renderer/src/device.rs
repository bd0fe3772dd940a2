//! Physical device selection and logical device ownership
//!
//! Picks the first adapter that can present, resolves the graphics, compute,
//! and presentation queue families once, and probes hardware ray-tracing
//! support as a single boolean capability. Stages that need that capability
//! are skipped entirely when it is absent; nothing here does a partial
//! fallback.

use ash::extensions::khr::{
    AccelerationStructure, DeferredHostOperations, RayTracingPipeline, Surface,
    Swapchain as SwapchainLoader,
};
use ash::{vk, Device, Instance};
use std::collections::HashSet;
use std::ffi::CStr;

use crate::error::{VulkanError, VulkanResult};

/// Device extensions required for the hardware ray-tracing capability.
///
/// Missing any one of these disables ray tracing and path tracing for the
/// whole process.
fn ray_tracing_extensions() -> [&'static CStr; 5] {
    [
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        vk::KhrRayQueryFn::name(),
        vk::KhrBufferDeviceAddressFn::name(),
        DeferredHostOperations::name(),
    ]
}

/// Check whether `name` appears in a device's reported extension list.
///
/// Exact `CStr` comparison; a near-miss is a miss.
pub fn extension_supported(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available.iter().any(|ext| {
        let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        ext_name == name
    })
}

fn all_extensions_supported(available: &[vk::ExtensionProperties], names: &[&CStr]) -> bool {
    names.iter().all(|name| extension_supported(available, name))
}

/// Shader-group properties needed for shader binding table layout
#[derive(Debug, Clone, Copy, Default)]
pub struct RayTracingProperties {
    /// Size in bytes of one opaque shader group handle
    pub handle_size: u32,
    /// Required alignment of each handle within a binding table
    pub handle_alignment: u32,
    /// Required alignment of each binding table region base address
    pub base_alignment: u32,
}

/// Physical device selection result and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the compute queue family
    pub compute_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Whether the hardware ray-tracing extension set is fully present
    pub supports_ray_tracing: bool,
    /// Nanoseconds per timestamp tick, for GPU timing queries
    pub timestamp_period: f32,
}

impl PhysicalDeviceInfo {
    /// Select the first suitable adapter for rendering
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        for device in devices {
            if let Ok(device_info) = Self::evaluate_device(instance, device, surface, surface_loader)
            {
                log::info!("Selected GPU: {}", unsafe {
                    CStr::from_ptr(device_info.properties.device_name.as_ptr()).to_string_lossy()
                });
                if device_info.supports_ray_tracing {
                    log::info!("Hardware ray tracing available");
                } else {
                    log::info!("Hardware ray tracing unavailable, rasterizer only");
                }
                return Ok(device_info);
            }
        }

        Err(VulkanError::InitializationFailed(
            "No suitable GPU found".to_string(),
        ))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut compute_family = None;
        let mut present_family = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
                graphics_family = Some(index);
            }

            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) && compute_family.is_none() {
                compute_family = Some(index);
            }

            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };

            if present_support && present_family.is_none() {
                present_family = Some(index);
            }

            if graphics_family.is_some() && compute_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;
        let compute_family = compute_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No compute queue family found".to_string())
        })?;
        let present_family = present_family.ok_or_else(|| {
            VulkanError::InitializationFailed("No present queue family found".to_string())
        })?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        if !extension_supported(&extensions, SwapchainLoader::name()) {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        if features.sampler_anisotropy == vk::FALSE {
            return Err(VulkanError::InitializationFailed(
                "Anisotropic sampling not supported".to_string(),
            ));
        }

        // Presentation must offer at least one format and one present mode
        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(device, surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .map_err(VulkanError::Api)?
        };
        if surface_formats.is_empty() || present_modes.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "Surface reports no formats or present modes".to_string(),
            ));
        }

        let rt_extensions = ray_tracing_extensions();
        let supports_ray_tracing = all_extensions_supported(&extensions, &rt_extensions);

        Ok(Self {
            device,
            properties,
            graphics_family,
            compute_family,
            present_family,
            supports_ray_tracing,
            timestamp_period: properties.limits.timestamp_period,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Compute operations queue
    pub compute_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the compute queue family
    pub compute_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
    /// Ray-tracing extension loaders, present only when the capability gate is open
    pub ray_tracing: Option<RayTracingLoaders>,
}

/// Extension loaders and properties for the hardware ray-tracing path
pub struct RayTracingLoaders {
    /// Acceleration structure extension loader
    pub acceleration_structure: AccelerationStructure,
    /// Ray-tracing pipeline extension loader
    pub pipeline: RayTracingPipeline,
    /// Shader-group layout properties reported by the driver
    pub properties: RayTracingProperties,
}

impl LogicalDevice {
    /// Create a logical device with graphics, compute, and present queues
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: HashSet<u32> = [
            info.graphics_family,
            info.compute_family,
            info.present_family,
        ]
        .iter()
        .cloned()
        .collect();

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut extensions = vec![SwapchainLoader::name().as_ptr()];
        if info.supports_ray_tracing {
            for name in ray_tracing_extensions() {
                // Buffer device address is core in 1.2, the rest are extensions
                if name != vk::KhrBufferDeviceAddressFn::name() {
                    extensions.push(name.as_ptr());
                }
            }
        }

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .build();

        // Descriptor indexing and buffer device address are used by the shared
        // descriptor set and acceleration structure builds
        let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(info.supports_ray_tracing)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .shader_sampled_image_array_non_uniform_indexing(true);

        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
            .acceleration_structure(true);
        let mut rt_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);
        let mut ray_query_features =
            vk::PhysicalDeviceRayQueryFeaturesKHR::builder().ray_query(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&device_features)
            .push_next(&mut vulkan12_features);

        if info.supports_ray_tracing {
            create_info = create_info
                .push_next(&mut accel_features)
                .push_next(&mut rt_pipeline_features)
                .push_next(&mut ray_query_features);
        }

        let device = unsafe {
            instance
                .create_device(info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(info.graphics_family, 0) };
        let compute_queue = unsafe { device.get_device_queue(info.compute_family, 0) };
        let present_queue = unsafe { device.get_device_queue(info.present_family, 0) };

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        let ray_tracing = if info.supports_ray_tracing {
            let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::builder().push_next(&mut rt_properties);
            unsafe {
                instance.get_physical_device_properties2(info.device, &mut properties2);
            }

            Some(RayTracingLoaders {
                acceleration_structure: AccelerationStructure::new(instance, &device),
                pipeline: RayTracingPipeline::new(instance, &device),
                properties: RayTracingProperties {
                    handle_size: rt_properties.shader_group_handle_size,
                    handle_alignment: rt_properties.shader_group_handle_alignment,
                    base_alignment: rt_properties.shader_group_base_alignment,
                },
            })
        } else {
            None
        };

        log::debug!(
            "Logical device created (graphics family {}, compute family {}, present family {})",
            info.graphics_family,
            info.compute_family,
            info.present_family
        );

        Ok(Self {
            device,
            graphics_queue,
            compute_queue,
            present_queue,
            graphics_family: info.graphics_family,
            compute_family: info.compute_family,
            present_family: info.present_family,
            swapchain_loader,
            ray_tracing,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            // Ensure device is idle before destruction
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties {
            extension_name: [0; 256],
            spec_version: 1,
        };
        for (dst, src) in props
            .extension_name
            .iter_mut()
            .zip(name.to_bytes_with_nul())
        {
            *dst = *src as i8;
        }
        props
    }

    #[test]
    fn extension_check_is_strict() {
        let available = [extension(SwapchainLoader::name())];
        assert!(extension_supported(&available, SwapchainLoader::name()));
        assert!(!extension_supported(
            &available,
            AccelerationStructure::name()
        ));
    }

    #[test]
    fn one_missing_extension_disables_the_whole_set() {
        // Everything but deferred host operations
        let available = [
            extension(AccelerationStructure::name()),
            extension(RayTracingPipeline::name()),
            extension(vk::KhrRayQueryFn::name()),
        ];
        let required = ray_tracing_extensions();
        assert!(!all_extensions_supported(&available, &required));

        let complete: Vec<_> = required.iter().map(|name| extension(name)).collect();
        assert!(all_extensions_supported(&complete, &required));
    }
}
