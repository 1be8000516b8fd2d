use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use ash::{vk, Entry};
use gpu_allocator::{
    vulkan::{Allocator, AllocatorCreateDesc},
    AllocatorDebugSettings, MemoryLocation,
};
use raytracing::{RaytracingTier, ResourceState};

use crate::{
    device::{Device, DeviceFeatures},
    instance::Instance,
    physical_device::PhysicalDevice,
    queue::{Queue, QueueFamily},
    state_usage, Buffer, CommandBuffer, CommandPool, Fence, Image, RayTracingContext, Version,
    VERSION_1_3,
};

const RAY_TRACING_EXTENSIONS: [&str; 3] = [
    "VK_KHR_ray_tracing_pipeline",
    "VK_KHR_acceleration_structure",
    "VK_KHR_deferred_host_operations",
];
const RAY_QUERY_EXTENSION: &str = "VK_KHR_ray_query";

/// Submitted command buffer and the fence that tells when it can be freed.
pub(crate) struct InFlight {
    pub buffer: CommandBuffer,
    pub fence: Fence,
}

/// Headless device: one graphics queue, no surface. Ray tracing is enabled whenever the
/// selected device supports it; [`Context::raytracing_tier`] reports what was enabled.
pub struct Context {
    pub(crate) in_flight: Mutex<Vec<InFlight>>,
    pub allocator: Arc<Mutex<Allocator>>,
    pub command_pool: CommandPool,
    pub ray_tracing: Option<Arc<RayTracingContext>>,
    pub graphics_queue: Queue,
    pub device: Arc<Device>,
    pub graphics_queue_family: QueueFamily,
    pub physical_device: PhysicalDevice,
    pub instance: Instance,
    pub(crate) tier: RaytracingTier,
    _entry: Entry,
}

pub struct ContextBuilder<'a> {
    vulkan_version: Version,
    app_name: &'a str,
    required_extensions: &'a [&'a str],
    required_device_features: DeviceFeatures,
}

impl Default for ContextBuilder<'_> {
    fn default() -> Self {
        Self {
            vulkan_version: VERSION_1_3,
            app_name: "",
            required_extensions: &[],
            required_device_features: DeviceFeatures::BASELINE,
        }
    }
}

impl<'a> ContextBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vulkan_version(self, vulkan_version: Version) -> Self {
        Self {
            vulkan_version,
            ..self
        }
    }

    pub fn app_name(self, app_name: &'a str) -> Self {
        Self { app_name, ..self }
    }

    pub fn required_extensions(self, required_extensions: &'a [&str]) -> Self {
        Self {
            required_extensions,
            ..self
        }
    }

    pub fn required_device_features(self, required_device_features: DeviceFeatures) -> Self {
        Self {
            required_device_features,
            ..self
        }
    }

    pub fn build(self) -> Result<Context> {
        Context::new(self)
    }
}

impl Context {
    fn new(
        ContextBuilder {
            vulkan_version,
            app_name,
            required_extensions,
            required_device_features,
        }: ContextBuilder,
    ) -> Result<Self> {
        let entry = Entry::linked();
        let mut instance = Instance::new(&entry, vulkan_version, app_name)?;

        let physical_devices = instance.enumerate_physical_devices()?;
        let (physical_device, graphics_queue_family) = select_suitable_physical_device(
            physical_devices,
            required_extensions,
            &required_device_features,
        )?;
        log::info!("Selected physical device: {:?}", physical_device.name);

        let (extensions, device_features) = enabled_extensions_and_features(
            &physical_device,
            required_extensions,
            required_device_features,
        );
        let tier = device_features.raytracing_tier();
        log::info!("Raytracing tier: {tier}");

        let device = Arc::new(Device::new(
            &instance,
            &physical_device,
            graphics_queue_family,
            &extensions,
            &device_features,
        )?);
        let graphics_queue = device.get_queue(graphics_queue_family, 0);

        let ray_tracing = (tier >= RaytracingTier::Tier1_0).then(|| {
            let ray_tracing =
                Arc::new(RayTracingContext::new(&instance, &physical_device, &device));
            log::debug!(
                "Ray tracing pipeline properties {:#?}",
                ray_tracing.pipeline_properties
            );
            log::debug!(
                "Acceleration structure properties {:#?}",
                ray_tracing.acceleration_structure_properties
            );
            ray_tracing
        });

        let command_pool = CommandPool::new(
            device.clone(),
            ray_tracing.clone(),
            graphics_queue_family,
            Some(vk::CommandPoolCreateFlags::TRANSIENT),
        )?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.inner.clone(),
            device: device.inner.clone(),
            physical_device: physical_device.inner,
            debug_settings: AllocatorDebugSettings {
                log_allocations: true,
                log_frees: true,
                ..Default::default()
            },
            buffer_device_address: device_features.buffer_device_address,
        })?;

        Ok(Self {
            in_flight: Mutex::new(Vec::new()),
            allocator: Arc::new(Mutex::new(allocator)),
            command_pool,
            ray_tracing,
            graphics_queue,
            device,
            graphics_queue_family,
            physical_device,
            instance,
            tier,
            _entry: entry,
        })
    }
}

fn select_suitable_physical_device(
    devices: &[PhysicalDevice],
    required_extensions: &[&str],
    required_device_features: &DeviceFeatures,
) -> Result<(PhysicalDevice, QueueFamily)> {
    log::debug!("Choosing Vulkan physical device");

    let mut candidates = devices
        .iter()
        .filter(|device| {
            device.supports_extensions(required_extensions)
                && device
                    .supported_device_features
                    .is_compatible_with(required_device_features)
        })
        .filter_map(|device| Some((device, device.graphics_queue_family()?)))
        .collect::<Vec<_>>();

    // stable, so device type order is kept within a tier
    candidates.sort_by_key(|(device, _)| {
        std::cmp::Reverse(usable_features(device).raytracing_tier())
    });

    candidates
        .into_iter()
        .next()
        .map(|(device, family)| (device.clone(), family))
        .ok_or_else(|| anyhow!("Could not find a suitable device"))
}

/// Ray tracing features only count when their extensions are there too.
fn usable_features(device: &PhysicalDevice) -> DeviceFeatures {
    let supported = device.supported_device_features;
    let ray_tracing = supported.ray_tracing_pipeline
        && supported.acceleration_structure
        && device.supports_extensions(&RAY_TRACING_EXTENSIONS);
    DeviceFeatures {
        ray_tracing_pipeline: ray_tracing,
        acceleration_structure: ray_tracing,
        ray_query: ray_tracing
            && supported.ray_query
            && device.supports_extensions(&[RAY_QUERY_EXTENSION]),
        ..supported
    }
}

fn enabled_extensions_and_features<'a>(
    device: &PhysicalDevice,
    required_extensions: &[&'a str],
    required_device_features: DeviceFeatures,
) -> (Vec<&'a str>, DeviceFeatures) {
    let usable = usable_features(device);
    let mut extensions = required_extensions.to_vec();
    if usable.ray_tracing_pipeline {
        extensions.extend(RAY_TRACING_EXTENSIONS);
    }
    if usable.ray_query {
        extensions.push(RAY_QUERY_EXTENSION);
    }
    extensions.sort_unstable();
    extensions.dedup();

    let features = DeviceFeatures {
        ray_tracing_pipeline: usable.ray_tracing_pipeline,
        acceleration_structure: usable.acceleration_structure,
        ray_query: usable.ray_query,
        ..required_device_features
    };
    (extensions, features)
}

impl Context {
    pub fn device_name(&self) -> &str {
        self.physical_device.name()
    }

    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.device_wait_idle()? };

        Ok(())
    }

    pub fn execute_one_time_commands<R, F: FnOnce(&CommandBuffer) -> R>(
        &self,
        executor: F,
    ) -> Result<R> {
        let command_buffer = self
            .command_pool
            .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)?;

        command_buffer.begin(Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT))?;
        let executor_result = executor(&command_buffer);
        command_buffer.end()?;

        let fence = Fence::new(self.device.clone(), None)?;
        self.graphics_queue
            .submit(Some(&command_buffer), None, Some(&fence))?;
        fence.wait(None)?;

        self.command_pool.free_command_buffer(&command_buffer);

        Ok(executor_result)
    }

    /// Frees command buffers whose submission has completed.
    pub(crate) fn reap_in_flight(&self) -> Result<()> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| anyhow!("in flight list lock poisoned"))?;
        let mut pending = Vec::with_capacity(in_flight.len());
        for submission in in_flight.drain(..) {
            if submission.fence.is_signaled()? {
                self.command_pool.free_command_buffer(&submission.buffer);
            } else {
                pending.push(submission);
            }
        }
        *in_flight = pending;
        Ok(())
    }

    /// Copies an RGBA8 image into tightly packed rows. `state` is the state the image is in
    /// and is restored afterwards; nothing else may be using the image.
    pub fn read_image(&self, image: &Image, state: ResourceState) -> Result<Vec<u8>> {
        let size = image.extent.width as u64 * image.extent.height as u64 * 4;
        let buffer = Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            "image readback",
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            size,
        )?;

        self.execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.transition_image(image, state, ResourceState::CopySource);
            cmd_buffer.copy_image_to_buffer(
                image,
                state_usage(ResourceState::CopySource).layout,
                &buffer,
            );
            cmd_buffer.transition_image(image, ResourceState::CopySource, state);
            cmd_buffer.host_read_barrier();
        })?;

        buffer.read_bytes()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.device_wait_idle() {
            log::error!("Failed to wait for the device before shutdown: {err}");
        }
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for submission in in_flight.drain(..) {
                self.command_pool.free_command_buffer(&submission.buffer);
            }
        }
    }
}
