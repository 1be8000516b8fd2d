mod bottom_level;
mod instance_table;
mod top_level;

pub use bottom_level::*;
pub use instance_table::*;
pub use top_level::*;

use crate::device::Device;

/// Buffers backing the top-level structure. Scratch is kept for the per-frame refits.
pub struct AccelerationStructureBuffers<D: Device> {
    pub scratch: Option<D::Buffer>,
    pub result: D::AccelerationStructure,
    pub instance_descriptors: Option<D::Buffer>,
}
