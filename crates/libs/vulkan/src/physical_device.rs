use std::ffi::CStr;

use anyhow::Result;
use ash::{vk, Instance};

use crate::{device::DeviceFeatures, queue::QueueFamily};

#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    pub(crate) inner: vk::PhysicalDevice,
    pub(crate) name: String,
    pub(crate) device_type: vk::PhysicalDeviceType,
    pub(crate) queue_families: Vec<QueueFamily>,
    pub(crate) supported_extensions: Vec<String>,
    pub(crate) supported_device_features: DeviceFeatures,
}

impl PhysicalDevice {
    pub(crate) fn new(instance: &Instance, inner: vk::PhysicalDevice) -> Result<Self> {
        let props = unsafe { instance.get_physical_device_properties(inner) };

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(inner) }
            .into_iter()
            .enumerate()
            .map(|(index, p)| QueueFamily::new(index as _, p))
            .collect();

        let extension_properties =
            unsafe { instance.enumerate_device_extension_properties(inner)? };
        let supported_extensions = extension_properties
            .into_iter()
            .map(|p| {
                unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let mut ray_tracing_feature = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let mut acceleration_struct_feature =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut ray_query_feature = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut ray_tracing_feature)
            .push_next(&mut acceleration_struct_feature)
            .push_next(&mut ray_query_feature)
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(inner, &mut features) };

        let supported_device_features = DeviceFeatures {
            ray_tracing_pipeline: ray_tracing_feature.ray_tracing_pipeline == vk::TRUE,
            acceleration_structure: acceleration_struct_feature.acceleration_structure == vk::TRUE,
            ray_query: ray_query_feature.ray_query == vk::TRUE,
            buffer_device_address: features12.buffer_device_address == vk::TRUE,
            timeline_semaphore: features12.timeline_semaphore == vk::TRUE,
            dynamic_rendering: features13.dynamic_rendering == vk::TRUE,
            synchronization2: features13.synchronization2 == vk::TRUE,
        };

        Ok(Self {
            inner,
            name,
            device_type: props.device_type,
            queue_families,
            supported_extensions,
            supported_device_features,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_extensions(&self, extensions: &[&str]) -> bool {
        extensions
            .iter()
            .all(|e| self.supported_extensions.iter().any(|s| s == e))
    }

    pub fn graphics_queue_family(&self) -> Option<QueueFamily> {
        self.queue_families
            .iter()
            .copied()
            .find(|f| f.has_queues() && f.supports_graphics() && f.supports_compute())
    }
}
