use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use raytracing::{AccelerationStructureLevel, BuildFlags, BuildInputs, BuildMode, PrebuildInfo};

use crate::{Buffer, RayTracingContext};

pub struct AccelerationStructure {
    ray_tracing: Arc<RayTracingContext>,
    pub(crate) inner: vk::AccelerationStructureKHR,
    _buffer: Buffer,
    pub address: u64,
}

pub(crate) fn structure_type(level: AccelerationStructureLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        AccelerationStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

pub(crate) fn build_flags(flags: BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.allow_update {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    if flags.prefer_fast_trace {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    vk_flags
}

pub(crate) fn build_mode(mode: BuildMode) -> vk::BuildAccelerationStructureModeKHR {
    match mode {
        BuildMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
        BuildMode::Update => vk::BuildAccelerationStructureModeKHR::UPDATE,
    }
}

/// Geometry descriptions and one build range per geometry.
pub(crate) struct BuildGeometry {
    pub geometries: Vec<vk::AccelerationStructureGeometryKHR>,
    pub ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR>,
}

impl BuildGeometry {
    pub fn new(inputs: &BuildInputs) -> Self {
        match inputs {
            BuildInputs::Triangles(triangles) => {
                let geometries = triangles
                    .iter()
                    .map(|triangle| {
                        let (index_type, index_address) = match triangle.indices {
                            Some(indices) => (vk::IndexType::UINT32, indices.address),
                            None => (vk::IndexType::NONE_KHR, 0),
                        };
                        let triangles_data =
                            vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                                .vertex_format(vk::Format::R32G32B32_SFLOAT)
                                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                                    device_address: triangle.vertex_address,
                                })
                                .vertex_stride(triangle.vertex_stride as _)
                                .max_vertex(triangle.vertex_count.saturating_sub(1))
                                .index_type(index_type)
                                .index_data(vk::DeviceOrHostAddressConstKHR {
                                    device_address: index_address,
                                })
                                .build();

                        let flags = if triangle.opaque {
                            vk::GeometryFlagsKHR::OPAQUE
                        } else {
                            vk::GeometryFlagsKHR::empty()
                        };

                        vk::AccelerationStructureGeometryKHR::builder()
                            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                            .flags(flags)
                            .geometry(vk::AccelerationStructureGeometryDataKHR {
                                triangles: triangles_data,
                            })
                            .build()
                    })
                    .collect();
                let ranges = triangles
                    .iter()
                    .map(|triangle| {
                        vk::AccelerationStructureBuildRangeInfoKHR::builder()
                            .primitive_count(triangle.primitive_count())
                            .build()
                    })
                    .collect();
                Self { geometries, ranges }
            }
            BuildInputs::Instances { descriptors, count } => {
                let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: *descriptors,
                    })
                    .build();

                let geometry = vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .geometry(vk::AccelerationStructureGeometryDataKHR {
                        instances: instances_data,
                    })
                    .build();
                let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
                    .primitive_count(*count)
                    .build();
                Self {
                    geometries: vec![geometry],
                    ranges: vec![range],
                }
            }
        }
    }

    pub fn max_primitive_counts(&self) -> Vec<u32> {
        self.ranges.iter().map(|r| r.primitive_count).collect()
    }
}

impl AccelerationStructure {
    /// Places an acceleration structure of `buffer.size` bytes at the start of `buffer`.
    pub(crate) fn new(
        ray_tracing: Arc<RayTracingContext>,
        level: AccelerationStructureLevel,
        buffer: Buffer,
    ) -> Result<Self> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(buffer.size)
            .ty(structure_type(level));
        let inner = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .create_acceleration_structure(&create_info, None)?
        };

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(inner);
        let address = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_device_address(&address_info)
        };

        Ok(Self {
            ray_tracing,
            inner,
            _buffer: buffer,
            address,
        })
    }
}

impl RayTracingContext {
    pub fn build_sizes(&self, inputs: &BuildInputs, flags: BuildFlags) -> PrebuildInfo {
        let geometry = BuildGeometry::new(inputs);
        let build_geo_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(structure_type(inputs.level()))
            .flags(build_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometry.geometries);

        let build_size = unsafe {
            self.acceleration_structure_fn
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_geo_info,
                    &geometry.max_primitive_counts(),
                )
        };

        PrebuildInfo {
            result_size: build_size.acceleration_structure_size,
            scratch_size: build_size.build_scratch_size,
            update_scratch_size: build_size.update_scratch_size,
        }
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}
