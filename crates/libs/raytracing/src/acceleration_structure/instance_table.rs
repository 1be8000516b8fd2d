use std::sync::Arc;

use crate::acceleration_structure::BottomLevelAccelerationStructure;
use crate::device::{Device, GpuAddress};
use crate::error::{Error, Result};
use crate::shader_binding_table::RootArgument;
use crate::types::Mat4;

/// Size of one instance record as consumed by the top-level build.
pub const INSTANCE_DESCRIPTOR_SIZE: usize = 64;

/// Instance ids and hit group offsets are packed into 24 bits of an instance record.
pub const INSTANCE_FIELD_LIMIT: u32 = 1 << 24;

const TRIANGLE_CULL_DISABLE: u8 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDescriptor {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub instance_id: u32,
    pub mask: u8,
    pub hit_group_offset: u32,
    pub flags: u8,
    pub blas_address: GpuAddress,
}

impl InstanceDescriptor {
    pub fn to_bytes(&self) -> [u8; INSTANCE_DESCRIPTOR_SIZE] {
        let mut bytes = [0; INSTANCE_DESCRIPTOR_SIZE];
        for (i, value) in self.transform.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        let id_and_mask = (self.instance_id & 0x00FF_FFFF) | (self.mask as u32) << 24;
        let offset_and_flags = (self.hit_group_offset & 0x00FF_FFFF) | (self.flags as u32) << 24;
        bytes[48..52].copy_from_slice(&id_and_mask.to_le_bytes());
        bytes[52..56].copy_from_slice(&offset_and_flags.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.blas_address.to_le_bytes());
        bytes
    }
}

/// Hit group a ray type resolves to, plus its record arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupBinding {
    pub hit_group: String,
    pub arguments: Vec<RootArgument>,
}

impl HitGroupBinding {
    pub fn new(hit_group: &str, arguments: Vec<RootArgument>) -> Self {
        Self {
            hit_group: hit_group.to_owned(),
            arguments,
        }
    }
}

pub struct InstanceEntry<D: Device> {
    pub blas: Arc<BottomLevelAccelerationStructure<D>>,
    pub transform: Mat4,
    /// One binding per ray type, in ray type order.
    pub hit_groups: Vec<HitGroupBinding>,
}

/// Scene instances keyed by instance index. Both the top-level instance descriptors and
/// the hit group section of the shader binding table are derived from this table, so an
/// instance's hit group offset and its records cannot drift apart.
pub struct InstanceTable<D: Device> {
    ray_type_count: u32,
    entries: Vec<InstanceEntry<D>>,
}

impl<D: Device> InstanceTable<D> {
    pub fn new(ray_type_count: u32) -> Self {
        Self {
            ray_type_count,
            entries: Vec::new(),
        }
    }

    /// Registers an instance and returns its index. Fails once the index or its hit group
    /// offset no longer fits an instance record.
    pub fn push(
        &mut self,
        blas: Arc<BottomLevelAccelerationStructure<D>>,
        transform: Mat4,
        hit_groups: Vec<HitGroupBinding>,
    ) -> Result<u32> {
        let index = self.entries.len() as u64;
        let offset = index * u64::from(self.ray_type_count);
        let limit = u64::from(INSTANCE_FIELD_LIMIT);
        if index >= limit || offset >= limit {
            return Err(Error::InstanceOutOfRange(index as u32));
        }
        let index = index as u32;
        if hit_groups.len() != self.ray_type_count as usize {
            return Err(Error::HitGroupCountMismatch {
                instance: index,
                found: hit_groups.len(),
                expected: self.ray_type_count,
            });
        }
        self.entries.push(InstanceEntry {
            blas,
            transform,
            hit_groups,
        });
        Ok(index)
    }

    pub fn set_transform(&mut self, index: u32, transform: Mat4) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index as usize)
            .ok_or(Error::InstanceOutOfRange(index))?;
        entry.transform = transform;
        Ok(())
    }

    pub fn ray_type_count(&self) -> u32 {
        self.ray_type_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[InstanceEntry<D>] {
        &self.entries
    }

    /// First hit group record an instance selects. Ray type `r` lands on `offset + r`.
    pub fn hit_group_offset(&self, index: u32) -> u32 {
        index * self.ray_type_count
    }

    pub fn descriptors(&self) -> Vec<InstanceDescriptor> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let mut transform = [0.0; 12];
                for row in 0..3 {
                    for column in 0..4 {
                        transform[row * 4 + column] = entry.transform[(row, column)];
                    }
                }
                InstanceDescriptor {
                    transform,
                    instance_id: index as u32,
                    mask: 0xFF,
                    hit_group_offset: self.hit_group_offset(index as u32),
                    flags: TRIANGLE_CULL_DISABLE,
                    blas_address: entry.blas.address(),
                }
            })
            .collect()
    }

    pub fn descriptor_bytes(&self) -> Vec<u8> {
        self.descriptors()
            .iter()
            .flat_map(InstanceDescriptor::to_bytes)
            .collect()
    }

    /// Frees the build scratch of every BLAS referenced by the table, including ones shared
    /// with other instances or owners. Only valid once the builds have completed on the GPU.
    /// Returns how many scratch buffers were freed.
    pub fn release_blas_scratch(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.blas.release_scratch())
            .count()
    }

    /// Hit group records in table order: instance-major, ray type minor.
    pub fn hit_group_records(&self) -> impl Iterator<Item = &HitGroupBinding> {
        self.entries.iter().flat_map(|entry| entry.hit_groups.iter())
    }
}
