use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use crate::device::Device;

/// Timeline semaphore; the renderer's frame fence.
pub struct TimelineSemaphore {
    device: Arc<Device>,
    pub(crate) inner: vk::Semaphore,
}

impl TimelineSemaphore {
    pub(crate) fn new(device: Arc<Device>, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let semaphore_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let inner = unsafe { device.inner.create_semaphore(&semaphore_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn value(&self) -> Result<u64> {
        Ok(unsafe { self.device.inner.get_semaphore_counter_value(self.inner)? })
    }

    pub fn wait_for(&self, value: u64, timeout: Option<u64>) -> Result<()> {
        let semaphores = [self.inner];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe {
            self.device
                .inner
                .wait_semaphores(&wait_info, timeout.unwrap_or(u64::MAX))?
        };

        Ok(())
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.inner.destroy_semaphore(self.inner, None);
        }
    }
}

pub struct Fence {
    device: Arc<Device>,
    pub(crate) inner: vk::Fence,
}

impl Fence {
    pub(crate) fn new(device: Arc<Device>, flags: Option<vk::FenceCreateFlags>) -> Result<Self> {
        let flags = flags.unwrap_or_else(vk::FenceCreateFlags::empty);

        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        let inner = unsafe { device.inner.create_fence(&fence_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn wait(&self, timeout: Option<u64>) -> Result<()> {
        let timeout = timeout.unwrap_or(u64::MAX);

        unsafe {
            self.device
                .inner
                .wait_for_fences(&[self.inner], true, timeout)?
        };

        Ok(())
    }

    pub fn is_signaled(&self) -> Result<bool> {
        Ok(unsafe { self.device.inner.get_fence_status(self.inner)? })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.inner.destroy_fence(self.inner, None);
        }
    }
}
