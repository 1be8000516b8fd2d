use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, CommandBuffer, Fence, TimelineSemaphore};

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub(crate) inner: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub(crate) fn new(index: u32, inner: vk::QueueFamilyProperties) -> Self {
        Self { index, inner }
    }

    pub fn supports_compute(&self) -> bool {
        self.inner.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_graphics(&self) -> bool {
        self.inner.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn has_queues(&self) -> bool {
        self.inner.queue_count > 0
    }
}

pub struct Queue {
    device: Arc<Device>,
    pub inner: vk::Queue,
}

impl Queue {
    pub(crate) fn new(device: Arc<Device>, inner: vk::Queue) -> Self {
        Self { device, inner }
    }

    /// Submits an optional command buffer. The timeline value is signaled once the
    /// submission completes, the fence as well.
    pub fn submit(
        &self,
        command_buffer: Option<&CommandBuffer>,
        signal: Option<TimelineSignal>,
        fence: Option<&Fence>,
    ) -> Result<()> {
        let signal_semaphore_submit_info = signal.map(|s| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(s.semaphore.inner)
                .value(s.value)
                .stage_mask(s.stage_mask)
                .build()
        });

        let cmd_buffer_submit_info = command_buffer.map(|buffer| {
            vk::CommandBufferSubmitInfo::builder()
                .command_buffer(buffer.inner)
                .build()
        });

        let submit_info = vk::SubmitInfo2::builder()
            .command_buffer_infos(cmd_buffer_submit_info.as_slice())
            .signal_semaphore_infos(signal_semaphore_submit_info.as_slice());

        unsafe {
            self.device.inner.queue_submit2(
                self.inner,
                std::slice::from_ref(&submit_info),
                fence.map_or(vk::Fence::null(), |f| f.inner),
            )?
        };

        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.queue_wait_idle(self.inner)? };

        Ok(())
    }
}

pub struct TimelineSignal<'a> {
    pub semaphore: &'a TimelineSemaphore,
    pub value: u64,
    pub stage_mask: vk::PipelineStageFlags2,
}
