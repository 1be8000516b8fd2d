use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::device::Device;

/// Acceleration structure storage and shader tables both need 256 byte aligned addresses.
pub(crate) const PLACEMENT_ALIGNMENT: u64 = 256;

pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    address: u64,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        name: &str,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };
        let mut requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        requirements.alignment = requirements.alignment.max(PLACEMENT_ALIGNMENT);

        let allocation = allocator
            .lock()
            .map_err(|_| anyhow!("allocator lock poisoned"))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory_location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.inner.destroy_buffer(inner, None) };
                return Err(err.into());
            }
        };

        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())?
        };

        let address = if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let addr_info = vk::BufferDeviceAddressInfo::builder().buffer(inner);
            unsafe { device.inner.get_buffer_device_address(&addr_info) }
        } else {
            0
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            address,
            size,
        })
    }

    /// Copies `bytes` into host visible memory at `offset`.
    pub fn copy_bytes_to_buffer(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len() as u64;
        if end > self.size {
            return Err(anyhow!(
                "write of {} bytes at offset {offset} overflows a {} byte buffer",
                bytes.len(),
                self.size
            ));
        }
        let data_ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| anyhow!("buffer memory is not host visible"))?;

        unsafe {
            let destination = data_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), destination, bytes.len());
        }

        Ok(())
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .map(|bytes| bytes[..self.size as usize].to_vec())
            .ok_or_else(|| anyhow!("buffer memory is not host visible"))
    }

    pub fn get_device_address(&self) -> u64 {
        self.address
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        let Some(allocation) = self.allocation.take() else {
            return;
        };
        match self.allocator.lock() {
            Ok(mut allocator) => {
                if let Err(err) = allocator.free(allocation) {
                    log::error!("Failed to free buffer memory: {err}");
                }
            }
            Err(_) => log::error!("Allocator lock poisoned, leaking buffer memory"),
        }
    }
}
