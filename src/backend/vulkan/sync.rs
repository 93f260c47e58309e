//! Per-frame command buffer and synchronization primitives.

use std::sync::Arc;

use ash::vk;

use crate::error::{DriverError, DriverResult};

use super::device::VulkanDevice;

/// Primary command buffer, semaphores and fence of the frame in flight.
///
/// Frames are serialized by the blocking wait in `present_frame`, so one set
/// is enough; the per-slot fence values live in the frame ring.
pub struct FrameSync {
    device: Arc<VulkanDevice>,
    pub command_buffer: vk::CommandBuffer,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> DriverResult<Self> {
        let mut this = Self {
            device: device.clone(),
            command_buffer: vk::CommandBuffer::null(),
            image_acquired: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            fence: vk::Fence::null(),
        };

        this.command_buffer = device.allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?;
        this.image_acquired = create_semaphore(device)?;
        this.render_finished = create_semaphore(device)?;

        let fence_info = vk::FenceCreateInfo::default();
        this.fence = unsafe { device.device.create_fence(&fence_info, None) }
            .map_err(|e| DriverError::creation("fence", format!("{:?}", e)))?;

        Ok(this)
    }

    /// Replace the acquire semaphore after an acquire was abandoned with the
    /// semaphore possibly left pending.
    pub fn recreate_image_acquired(&mut self) -> DriverResult<()> {
        self.device.wait_idle();
        let semaphore = create_semaphore(&self.device)?;
        unsafe {
            self.device
                .device
                .destroy_semaphore(self.image_acquired, None)
        };
        self.image_acquired = semaphore;
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_acquired != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_acquired, None);
            }
        }
        if self.command_buffer != vk::CommandBuffer::null() {
            self.device.free_command_buffer(self.command_buffer);
        }
    }
}

fn create_semaphore(device: &VulkanDevice) -> DriverResult<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::default();
    unsafe { device.device.create_semaphore(&info, None) }
        .map_err(|e| DriverError::creation("semaphore", format!("{:?}", e)))
}
