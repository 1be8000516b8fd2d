use std::sync::{Mutex, PoisonError};

use crate::allocator::ResourceAllocator;
use crate::device::{
    AccelerationStructureLevel, BuildCommand, BuildFlags, BuildInputs, BuildMode, CommandList,
    Device, GpuAddress, GpuResource, IndexData, TriangleGeometry,
};
use crate::error::Result;

/// One vertex buffer of a mesh, optionally indexed.
pub struct MeshGeometry<'a, D: Device> {
    pub vertices: (&'a D::Buffer, u32),
    pub indices: Option<(&'a D::Buffer, u32)>,
    pub vertex_stride: u32,
}

/// Shared between instances through `Arc`, so the scratch buffer sits behind a lock and can
/// be released by any owner once the build has completed.
pub struct BottomLevelAccelerationStructure<D: Device> {
    result: D::AccelerationStructure,
    scratch: Mutex<Option<D::Buffer>>,
    geometries: Vec<TriangleGeometry>,
}

impl<D: Device> BottomLevelAccelerationStructure<D> {
    /// Allocates scratch and result memory and records the build into `commands`.
    /// The result must not be consumed before `commands` has been executed.
    pub fn build(
        device: &D,
        commands: &mut D::CommandList,
        meshes: &[MeshGeometry<D>],
    ) -> Result<Self> {
        let geometries = meshes
            .iter()
            .map(|mesh| TriangleGeometry {
                vertex_address: mesh.vertices.0.gpu_address(),
                vertex_count: mesh.vertices.1,
                vertex_stride: mesh.vertex_stride,
                indices: mesh.indices.map(|(buffer, count)| IndexData {
                    address: buffer.gpu_address(),
                    count,
                }),
                opaque: true,
            })
            .collect::<Vec<_>>();

        let flags = BuildFlags {
            allow_update: false,
            prefer_fast_trace: true,
        };
        let inputs = BuildInputs::Triangles(&geometries);
        let sizes = device.prebuild_info(&inputs, flags)?;

        let scratch = device.create_scratch_buffer("blas scratch", sizes.scratch_size)?;
        let result = device.create_result_structure(
            "blas",
            AccelerationStructureLevel::Bottom,
            sizes.result_size,
        )?;

        commands.build_acceleration_structure(&BuildCommand {
            inputs,
            flags,
            mode: BuildMode::Build,
            destination: &result,
            source: None,
            scratch: scratch.gpu_address(),
        });
        commands.uav_barrier(&result);

        log::info!(
            "BLAS: {} geometries, {} triangles, result {} bytes, scratch {} bytes",
            geometries.len(),
            geometries
                .iter()
                .map(TriangleGeometry::primitive_count)
                .sum::<u32>(),
            sizes.result_size,
            sizes.scratch_size
        );

        Ok(Self {
            result,
            scratch: Mutex::new(Some(scratch)),
            geometries,
        })
    }

    /// Frees the scratch buffer. Only valid after the build has completed.
    /// Returns false when it was already released.
    pub fn release_scratch(&self) -> bool {
        self.scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn holds_scratch(&self) -> bool {
        self.scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn result(&self) -> &D::AccelerationStructure {
        &self.result
    }

    pub fn address(&self) -> GpuAddress {
        self.result.gpu_address()
    }

    pub fn geometries(&self) -> &[TriangleGeometry] {
        &self.geometries
    }
}
