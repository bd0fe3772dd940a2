//! Synchronization primitives and frame pacing
//!
//! RAII wrappers for semaphores and fences, plus the per-frame-in-flight
//! bookkeeping: each slot carries an image-available semaphore, a
//! render-finished semaphore, and a CPU-waitable fence, and each swap image
//! remembers the fence of the frame that last used it so it is never reused
//! while that frame's GPU work is still running.

use ash::{vk, Device};

use crate::error::{VulkanError, VulkanResult};

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally already signaled
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, fence })
    }

    /// Block until the fence signals
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset the fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects for one frame in flight
pub struct FrameSync {
    /// Signaled when the acquired swap image is ready to be written
    pub image_available: Semaphore,
    /// Signaled when the frame's GPU work completes
    pub render_finished: Semaphore,
    /// CPU-waitable fence for this slot's submission
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create a frame's synchronization set (fence starts signaled)
    pub fn new(device: Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }
}

/// Next in-flight slot index, wrapping at the frame count
pub fn advance_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight
}

/// Frame-in-flight scheduler over the swap image pool
pub struct FramePacer {
    frames: Vec<FrameSync>,
    /// Fence of the frame that last used each swap image, null when free
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
    device: Device,
}

impl FramePacer {
    /// Create sync sets for `frames_in_flight` slots over `image_count` swap images
    pub fn new(device: Device, frames_in_flight: usize, image_count: usize) -> VulkanResult<Self> {
        let frames = (0..frames_in_flight)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;

        Ok(Self {
            frames,
            images_in_flight: vec![vk::Fence::null(); image_count],
            current_frame: 0,
            device,
        })
    }

    /// Sync objects for the current slot
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.current_frame]
    }

    /// Current slot index
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Number of in-flight slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Block until the current slot's previous submission completed
    pub fn wait_current(&self) -> VulkanResult<()> {
        self.current().in_flight.wait(u64::MAX)
    }

    /// Wait out any frame still using `image_index`, then claim it for the
    /// current slot
    pub fn claim_image(&mut self, image_index: usize) -> VulkanResult<()> {
        let fence = self.images_in_flight[image_index];
        if fence != vk::Fence::null() {
            unsafe {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(VulkanError::Api)?;
            }
        }
        self.images_in_flight[image_index] = self.current().in_flight.handle();
        Ok(())
    }

    /// Advance to the next slot; called only on the frame's success path
    pub fn advance(&mut self) {
        self.current_frame = advance_frame(self.current_frame, self.frames.len());
    }

    /// Reset pacing after a swap target rebuild
    pub fn reset_after_rebuild(&mut self, image_count: usize) {
        self.images_in_flight = vec![vk::Fence::null(); image_count];
        self.current_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_wraps() {
        assert_eq!(advance_frame(0, 2), 1);
        assert_eq!(advance_frame(1, 2), 0);
        assert_eq!(advance_frame(2, 3), 0);
    }

    #[test]
    fn frame_index_stays_in_bounds() {
        let mut index = 0;
        for _ in 0..10 {
            index = advance_frame(index, 3);
            assert!(index < 3);
        }
    }
}
