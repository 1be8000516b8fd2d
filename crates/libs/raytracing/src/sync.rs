use crate::device::{Device, Fence};
use crate::error::Result;

/// Monotonic GPU timeline. Every signal queues the next value behind the work submitted
/// so far; waits are for that value or any later one.
pub struct FenceCounter<D: Device> {
    fence: D::Fence,
    value: u64,
}

impl<D: Device> FenceCounter<D> {
    pub fn new(device: &D) -> Result<Self> {
        Ok(Self {
            fence: device.create_fence(0)?,
            value: 0,
        })
    }

    /// Last value handed out by [`Self::signal`].
    pub fn current(&self) -> u64 {
        self.value
    }

    pub fn completed(&self) -> Result<u64> {
        self.fence.completed_value()
    }

    pub fn signal(&mut self, device: &D) -> Result<u64> {
        self.value += 1;
        device.signal(&self.fence, self.value)?;
        Ok(self.value)
    }

    pub fn wait(&self, value: u64) -> Result<()> {
        if self.fence.completed_value()? >= value {
            return Ok(());
        }
        self.fence.wait(value)
    }

    /// Signals and blocks until everything submitted so far has completed.
    pub fn wait_idle(&mut self, device: &D) -> Result<()> {
        let value = self.signal(device)?;
        self.wait(value)
    }
}
