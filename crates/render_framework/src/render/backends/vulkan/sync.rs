//! Fences and semaphores
//!
//! Every queue owns one fence. A blocking submission waits for the previous
//! submission's fence, resets it and hands it to the new submission, so
//! `wait` always means "the last blocking submit to this queue finished".

use ash::{vk, Device};

use super::VulkanResult;

/// Fence guarding the last blocking submission to one queue
#[derive(Debug)]
pub struct QueueFence {
    fence: vk::Fence,
}

impl QueueFence {
    /// Create the fence signalled, so the first wait returns immediately
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.create_fence(&create_info, None)? };
        Ok(Self { fence })
    }

    /// Raw fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Whether the fence is signalled
    pub fn is_signalled(&self, device: &Device) -> VulkanResult<bool> {
        Ok(unsafe { device.get_fence_status(self.fence)? })
    }

    /// Block until the fence signals
    pub fn wait(&self, device: &Device) -> VulkanResult<()> {
        unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX)? };
        Ok(())
    }

    /// Return the fence to the unsignalled state
    pub fn reset(&self, device: &Device) -> VulkanResult<()> {
        unsafe { device.reset_fences(&[self.fence])? };
        Ok(())
    }

    /// Destroy the fence. The context calls this once on drop.
    pub(super) unsafe fn destroy(&self, device: &Device) {
        device.destroy_fence(self.fence, None);
    }
}

/// Create a binary semaphore
pub fn create_semaphore(device: &Device) -> VulkanResult<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::builder();
    Ok(unsafe { device.create_semaphore(&create_info, None)? })
}
