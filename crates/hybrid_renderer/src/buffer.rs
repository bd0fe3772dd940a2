//! GPU buffer primitives
//!
//! RAII buffer allocation plus the staging round-trip: data reaches
//! device-local memory only by copying through a host-visible staging buffer
//! with a one-shot transfer submission.

use ash::{vk, Device, Instance};
use bytemuck::Pod;
use std::mem;

use crate::commands::CommandPool;
use crate::error::{VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            properties,
        )?;

        let mut alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        // Buffers referenced by device address need the matching allocate flag
        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            alloc_info = alloc_info.push_next(&mut flags_info);
        }

        let memory = unsafe {
            device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };

        unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    /// Allocate a device-local buffer and fill it through a staging buffer
    /// with a synchronous one-shot copy
    pub fn device_local_with_data<T: Pod>(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        pool: &CommandPool,
        queue: vk::Queue,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let size = (data.len() * mem::size_of::<T>()) as vk::DeviceSize;

        let staging = Buffer::new(
            device.clone(),
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_data(data)?;

        let buffer = Buffer::new(
            device.clone(),
            instance,
            physical_device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        pool.submit_one_shot(queue, |cmd| {
            let region = vk::BufferCopy::builder().size(size).build();
            unsafe {
                device.cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]);
            }
            Ok(())
        })?;

        // Staging buffer dropped here, after the copy has drained
        Ok(buffer)
    }

    /// Map memory for writing
    pub fn map_memory(&self) -> VulkanResult<*mut std::ffi::c_void> {
        unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    /// Unmap memory
    pub fn unmap_memory(&self) {
        unsafe {
            self.device.unmap_memory(self.memory);
        }
    }

    /// Write data to a host-visible buffer
    pub fn write_data<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Write of {} bytes exceeds buffer size {}",
                    bytes.len(),
                    self.size
                ),
            });
        }

        let data_ptr = self.map_memory()?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr.cast::<u8>(), bytes.len());
        }
        self.unmap_memory();
        Ok(())
    }

    /// Write data at a byte offset into a host-visible buffer
    pub fn write_bytes_at(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        if offset + bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Write of {} bytes at offset {} exceeds buffer size {}",
                    bytes.len(),
                    offset,
                    self.size
                ),
            });
        }

        let data_ptr = self.map_memory()?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                data_ptr.cast::<u8>().add(offset as usize),
                bytes.len(),
            );
        }
        self.unmap_memory();
        Ok(())
    }

    /// Device address of the buffer; requires SHADER_DEVICE_ADDRESS usage
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Device-local uniform buffer updated in place each frame
///
/// Seeded through the staging path, then rewritten with a barrier-guarded
/// `cmd_update_buffer` inside the frame command buffer rather than a new
/// allocation.
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Create a device-local uniform buffer seeded with `initial`
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        pool: &CommandPool,
        queue: vk::Queue,
        initial: &T,
    ) -> VulkanResult<Self> {
        let buffer = Buffer::device_local_with_data(
            device,
            instance,
            physical_device,
            pool,
            queue,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            std::slice::from_ref(initial),
        )?;

        Ok(Self {
            buffer,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Record an in-place update into a command buffer; the caller wraps the
    /// copy in the appropriate pipeline barriers
    pub fn record_update(&self, device: &Device, cmd: vk::CommandBuffer, data: &T) {
        let bytes = bytemuck::bytes_of(data);
        unsafe {
            device.cmd_update_buffer(cmd, self.buffer.handle(), 0, bytes);
        }
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Size of the uniform payload
    pub fn size(&self) -> vk::DeviceSize {
        mem::size_of::<T>() as vk::DeviceSize
    }
}

/// Find memory type with required properties
pub fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };

    for i in 0..mem_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && (mem_properties.memory_types[i as usize].property_flags & properties) == properties
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}
