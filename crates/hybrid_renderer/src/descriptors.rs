//! Descriptor set layouts, pools, and per-frame sets
//!
//! Three families of sets, each sized to the swap image count so that set
//! index i always belongs to swap image i:
//! - the shared set every stage binds (camera UBO, scene UBO, object
//!   description storage buffer, sampler and sampled-image arrays),
//! - the ray-tracing set (top-level structure + output storage image), also
//!   bound by the path tracer for its ray queries,
//! - the post-composition set (one combined sampler over the offscreen image).

use ash::{vk, Device};

use crate::error::{VulkanError, VulkanResult};

/// Capacity of the sampler/sampled-image arrays; scenes bind fewer and the
/// remainder stays unbound (partially-bound descriptor indexing)
pub const MAX_TEXTURE_COUNT: u32 = 128;

fn stage_flags(ray_tracing: bool, extra: vk::ShaderStageFlags) -> vk::ShaderStageFlags {
    if ray_tracing {
        extra
            | vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            | vk::ShaderStageFlags::COMPUTE
    } else {
        extra
    }
}

/// Shared per-frame descriptor sets
pub struct SharedDescriptors {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    sampler: vk::Sampler,
}

impl SharedDescriptors {
    /// Create layout, pool, and one set per swap image
    pub fn new(device: Device, image_count: usize, ray_tracing: bool) -> VulkanResult<Self> {
        let bindings = [
            // 0: global UBO (view/projection)
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stage_flags(
                    ray_tracing,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ))
                .build(),
            // 1: scene UBO (light/view/camera)
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stage_flags(
                    ray_tracing,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ))
                .build(),
            // 2: object description storage buffer
            vk::DescriptorSetLayoutBinding::builder()
                .binding(2)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(stage_flags(ray_tracing, vk::ShaderStageFlags::FRAGMENT))
                .build(),
            // 3: sampler array
            vk::DescriptorSetLayoutBinding::builder()
                .binding(3)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(MAX_TEXTURE_COUNT)
                .stage_flags(stage_flags(ray_tracing, vk::ShaderStageFlags::FRAGMENT))
                .build(),
            // 4: sampled image array
            vk::DescriptorSetLayoutBinding::builder()
                .binding(4)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(MAX_TEXTURE_COUNT)
                .stage_flags(stage_flags(ray_tracing, vk::ShaderStageFlags::FRAGMENT))
                .build(),
        ];

        // The two arrays are bound only up to the scene's texture count
        let binding_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        ];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .push_next(&mut flags_info);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let count = image_count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 2 * count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: MAX_TEXTURE_COUNT * count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_TEXTURE_COUNT * count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        // One anisotropic sampler reused for every texture slot
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(16.0)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            layout,
            pool,
            sets,
            sampler,
        })
    }

    /// Point each set's uniform and storage bindings at the per-frame buffers
    pub fn write_buffers(
        &self,
        global_ubos: &[vk::Buffer],
        scene_ubos: &[vk::Buffer],
        object_buffer: vk::Buffer,
    ) {
        for (index, &set) in self.sets.iter().enumerate() {
            let global_info = [vk::DescriptorBufferInfo {
                buffer: global_ubos[index],
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            let scene_info = [vk::DescriptorBufferInfo {
                buffer: scene_ubos[index],
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];
            let object_info = [vk::DescriptorBufferInfo {
                buffer: object_buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            }];

            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&global_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&scene_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(2)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&object_info)
                    .build(),
            ];

            unsafe {
                self.device.update_descriptor_sets(&writes, &[]);
            }
        }
    }

    /// Bind the scene's texture views into the arrays; called once after
    /// scene load
    pub fn write_textures(&self, texture_views: &[vk::ImageView]) {
        if texture_views.is_empty() {
            return;
        }

        let sampler_infos: Vec<vk::DescriptorImageInfo> = texture_views
            .iter()
            .map(|_| vk::DescriptorImageInfo {
                sampler: self.sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = texture_views
            .iter()
            .map(|&view| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect();

        for &set in &self.sets {
            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(3)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&sampler_infos)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(4)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(&image_infos)
                    .build(),
            ];
            unsafe {
                self.device.update_descriptor_sets(&writes, &[]);
            }
        }
    }

    /// Layout handle
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Set for swap image `index`
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    /// Number of sets (always the swap image count)
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }
}

impl Drop for SharedDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Ray-tracing descriptor sets: top-level structure + output storage image
pub struct RayTracingDescriptors {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl RayTracingDescriptors {
    /// Create layout, pool, and one set per swap image
    pub fn new(device: Device, image_count: usize) -> VulkanResult<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let count = image_count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            layout,
            pool,
            sets,
        })
    }

    /// Point one set at the current top-level structure and offscreen image
    pub fn write(
        &self,
        index: usize,
        tlas: vk::AccelerationStructureKHR,
        offscreen_view: vk::ImageView,
    ) {
        let structures = [tlas];
        let mut tlas_write =
            vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                .acceleration_structures(&structures);

        let mut accel_write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[index])
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut tlas_write)
            .build();
        // The acceleration structure payload lives in the pNext chain
        accel_write.descriptor_count = 1;

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: offscreen_view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let image_write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[index])
            .dst_binding(1)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info)
            .build();

        unsafe {
            self.device
                .update_descriptor_sets(&[accel_write, image_write], &[]);
        }
    }

    /// Layout handle
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Set for swap image `index`
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    /// Number of sets
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }
}

impl Drop for RayTracingDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Post-composition descriptor sets: one combined sampler per swap image,
/// pointed at that image's offscreen color target
pub struct PostDescriptors {
    device: Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl PostDescriptors {
    /// Create layout, pool, and one set per swap image
    pub fn new(device: Device, image_count: usize) -> VulkanResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let count = image_count as u32;
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let layouts = vec![layout; image_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            layout,
            pool,
            sets,
        })
    }

    /// Point set `index` at an offscreen color view; called at init and again
    /// whenever the swap target is rebuilt
    pub fn write(&self, index: usize, sampler: vk::Sampler, offscreen_view: vk::ImageView) {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: offscreen_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.sets[index])
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();

        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
    }

    /// Layout handle
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Set for swap image `index`
    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    /// Number of sets
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }
}

impl Drop for PostDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
