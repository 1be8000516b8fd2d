mod acceleration_structure;
mod pipeline;

pub use acceleration_structure::*;
pub use pipeline::*;

use ash::{
    extensions::khr::{
        AccelerationStructure as AshAccelerationStructure,
        RayTracingPipeline as AshRayTracingPipeline,
    },
    vk,
};
use raytracing::ShaderTableLimits;

use crate::{buffer::PLACEMENT_ALIGNMENT, device::Device, instance::Instance, physical_device::PhysicalDevice};

pub struct RayTracingContext {
    pub pipeline_properties: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
    pub pipeline_fn: AshRayTracingPipeline,
    pub acceleration_structure_properties: vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
    pub acceleration_structure_fn: AshAccelerationStructure,
}

impl RayTracingContext {
    pub(crate) fn new(instance: &Instance, pdevice: &PhysicalDevice, device: &Device) -> Self {
        let pipeline_properties =
            unsafe { AshRayTracingPipeline::get_properties(&instance.inner, pdevice.inner) };
        let pipeline_fn = AshRayTracingPipeline::new(&instance.inner, &device.inner);

        let acceleration_structure_properties =
            unsafe { AshAccelerationStructure::get_properties(&instance.inner, pdevice.inner) };
        let acceleration_structure_fn =
            AshAccelerationStructure::new(&instance.inner, &device.inner);

        Self {
            pipeline_properties,
            pipeline_fn,
            acceleration_structure_properties,
            acceleration_structure_fn,
        }
    }

    /// Table sections are placed at no less than the buffer placement alignment even where
    /// the device would allow less.
    pub fn shader_table_limits(&self) -> ShaderTableLimits {
        let properties = &self.pipeline_properties;
        ShaderTableLimits {
            identifier_size: properties.shader_group_handle_size,
            record_alignment: properties.shader_group_handle_alignment as u64,
            table_alignment: (properties.shader_group_base_alignment as u64)
                .max(PLACEMENT_ALIGNMENT),
        }
    }
}
