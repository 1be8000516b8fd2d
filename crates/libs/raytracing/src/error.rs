use std::error::Error as StdError;

use thiserror::Error as ThisError;

use crate::descriptor_heap::HeapSlot;
use crate::device::RaytracingTier;

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("out of device memory while allocating {label} ({size} bytes)")]
    OutOfMemory { label: &'static str, size: u64 },
    #[error("device call failed: {0}")]
    Device(#[source] BoxedSource),
    #[error("raytracing tier {found} is below the required tier 1.0")]
    UnsupportedRaytracingTier { found: RaytracingTier },
    #[error("failed to load shader {path}: {source}")]
    ShaderLoad {
        path: String,
        #[source]
        source: BoxedSource,
    },
    #[error("export {0} is registered by more than one library or hit group")]
    DuplicateExport(String),
    #[error("hit group {hit_group} references unknown closest hit shader {shader}")]
    UnknownHitGroupShader { hit_group: String, shader: String },
    #[error("no root signature is associated with {0}")]
    MissingRootSignature(String),
    #[error("no root signature was registered for role {0}")]
    MissingSignatureRole(String),
    #[error("{0} is not an export of the compiled pipeline")]
    UnknownExport(String),
    #[error("top-level acceleration structure refit requested before a full build")]
    RefitBeforeBuild,
    #[error("top-level acceleration structure has not been built")]
    TlasNotBuilt,
    #[error("instance count changed from {built} to {requested} since the last full build")]
    InstanceTopologyChanged { built: usize, requested: usize },
    #[error("instance table is empty")]
    EmptyInstanceTable,
    #[error("instance {instance} binds {found} hit groups, expected one per ray type ({expected})")]
    HitGroupCountMismatch {
        instance: u32,
        found: usize,
        expected: u32,
    },
    #[error("instance {instance} selects hit group record {offset} which is missing or bound to another hit group")]
    HitGroupRecordMissing { instance: u32, offset: u32 },
    #[error("instance index {0} is out of range")]
    InstanceOutOfRange(u32),
    #[error("shader binding table needs exactly one ray generation record, found {0}")]
    RayGenRecordCount(usize),
    #[error("descriptor heap slot {slot} exceeds heap capacity {capacity}")]
    HeapSlotOutOfRange { slot: u32, capacity: u32 },
    #[error("descriptor heap layout has no {0:?} slot")]
    MissingHeapSlot(HeapSlot),
    #[error("heap offset {offset} is bound as both {first} and {second}")]
    ConflictingHeapBinding {
        offset: u32,
        first: &'static str,
        second: &'static str,
    },
}

impl Error {
    pub fn device(source: impl Into<BoxedSource>) -> Self {
        Self::Device(source.into())
    }
}
