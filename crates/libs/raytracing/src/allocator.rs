use crate::device::{
    AccelerationStructureDesc, AccelerationStructureLevel, BufferDesc, BufferUsage, Device,
    GpuBuffer, HeapKind, ResourceState,
};
use crate::error::Result;

/// Constant buffer views and acceleration structure placements use this granularity.
pub const PLACEMENT_ALIGNMENT: u64 = 256;

pub fn align_up(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + (alignment - 1)) & !(alignment - 1)
}

/// Buffer creation shared by every builder: heap placement, initial state and sizing rules.
pub trait ResourceAllocator: Device {
    /// GPU exclusive working memory for acceleration structure builds.
    fn create_scratch_buffer(&self, label: &'static str, size: u64) -> Result<Self::Buffer> {
        self.create_buffer(&BufferDesc {
            label,
            size: align_up(size.max(1), PLACEMENT_ALIGNMENT),
            heap: HeapKind::Default,
            usage: BufferUsage::Scratch,
            initial_state: ResourceState::UnorderedAccess,
        })
    }

    fn create_upload_buffer(
        &self,
        label: &'static str,
        usage: BufferUsage,
        size: u64,
    ) -> Result<Self::Buffer> {
        self.create_buffer(&BufferDesc {
            label,
            size: size.max(1),
            heap: HeapKind::Upload,
            usage,
            initial_state: ResourceState::GenericRead,
        })
    }

    fn create_upload_buffer_with_data(
        &self,
        label: &'static str,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<Self::Buffer> {
        let buffer = self.create_upload_buffer(label, usage, data.len() as u64)?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Sized up to a whole number of constant buffer view units.
    fn create_constant_buffer(&self, label: &'static str, size: u64) -> Result<Self::Buffer> {
        self.create_upload_buffer(
            label,
            BufferUsage::Constants,
            align_up(size.max(1), PLACEMENT_ALIGNMENT),
        )
    }

    fn create_result_structure(
        &self,
        label: &'static str,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<Self::AccelerationStructure> {
        self.create_acceleration_structure(&AccelerationStructureDesc {
            label,
            level,
            size: align_up(size, PLACEMENT_ALIGNMENT),
        })
    }
}

impl<D: Device> ResourceAllocator for D {}
