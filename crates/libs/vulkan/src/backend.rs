//! [`raytracing::Device`] for [`Context`].

use anyhow::anyhow;
use ash::vk;
use gpu_allocator::{AllocationError, MemoryLocation};
use raytracing::{
    AccelerationStructureDesc, BufferDesc, BufferUsage, BuildFlags, BuildInputs, DescriptorHandle,
    DescriptorHeap as _, DescriptorKind, DescriptorView, Error, Format, GpuAddress,
    GraphicsPipelineDesc, HeapKind, ImageDesc, ImageUsage, PrebuildInfo, RaytracingPipelineDesc,
    RaytracingTier, Result, RootSignatureDesc, ShaderLibraryDesc, ShaderStage, ShaderTableLimits,
};

use crate::{
    state_usage, AccelerationStructure, Buffer, CommandList, Context, DescriptorHeapSet, Fence,
    GraphicsPipeline, GraphicsPipelineCreateInfo, Image, ImageBarrier, InFlight,
    RayTracingContext, RayTracingPipeline, RayTracingPipelineCreateInfo, RootSignature,
    ShaderLibrary, ShaderModule, TimelineSemaphore, TimelineSignal, WriteDescriptorSet,
    WriteDescriptorSetKind,
};

fn is_out_of_memory(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<AllocationError>(),
        Some(AllocationError::OutOfMemory)
    ) || matches!(
        err.downcast_ref::<vk::Result>(),
        Some(&vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | &vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    )
}

/// Maps backend failures of an allocation onto the renderer's error, keeping out of memory
/// conditions distinguishable.
fn allocation_error(label: &'static str, size: u64) -> impl FnOnce(anyhow::Error) -> Error {
    move |err| {
        if is_out_of_memory(&err) {
            Error::OutOfMemory { label, size }
        } else {
            Error::device(err)
        }
    }
}

fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let usage = match usage {
        BufferUsage::Scratch => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::InstanceDescriptors => {
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        }
        BufferUsage::ShaderBindingTable => vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR,
        BufferUsage::Constants => {
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER
        }
        BufferUsage::Vertices => {
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        }
        BufferUsage::Indices => {
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        }
    };
    usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
}

fn memory_location(heap: HeapKind) -> MemoryLocation {
    match heap {
        HeapKind::Default => MemoryLocation::GpuOnly,
        HeapKind::Upload => MemoryLocation::CpuToGpu,
    }
}

fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let usage = match usage {
        ImageUsage::UnorderedAccess => vk::ImageUsageFlags::STORAGE,
        ImageUsage::RenderTarget => vk::ImageUsageFlags::COLOR_ATTACHMENT,
    };
    usage | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
}

pub(crate) fn image_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
    }
}

fn single_export(library: &ShaderLibrary, stage: ShaderStage) -> Result<&ShaderModule> {
    library
        .exports
        .values()
        .find(|(_, export_stage)| *export_stage == stage)
        .map(|(module, _)| module)
        .ok_or_else(|| Error::device(anyhow!("{} has no {stage:?} export", library.name)))
}

impl Context {
    fn ray_tracing(&self) -> Result<&RayTracingContext> {
        self.ray_tracing
            .as_deref()
            .ok_or(Error::UnsupportedRaytracingTier { found: self.tier })
    }
}

impl raytracing::GpuResource for Buffer {
    fn gpu_address(&self) -> GpuAddress {
        self.get_device_address()
    }
}

impl raytracing::GpuBuffer for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.copy_bytes_to_buffer(offset, bytes)
            .map_err(Error::device)
    }
}

impl raytracing::GpuImage for Image {
    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }
}

impl raytracing::GpuResource for AccelerationStructure {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }
}

impl raytracing::Fence for TimelineSemaphore {
    fn completed_value(&self) -> Result<u64> {
        self.value().map_err(Error::device)
    }

    fn wait(&self, value: u64) -> Result<()> {
        self.wait_for(value, None).map_err(Error::device)
    }
}

impl raytracing::Device for Context {
    type Buffer = Buffer;
    type Image = Image;
    type AccelerationStructure = AccelerationStructure;
    type ShaderLibrary = ShaderLibrary;
    type RootSignature = RootSignature;
    type RaytracingPipeline = RayTracingPipeline;
    type GraphicsPipeline = GraphicsPipeline;
    type DescriptorHeap = DescriptorHeapSet;
    type Fence = TimelineSemaphore;
    type CommandList = CommandList;

    fn raytracing_tier(&self) -> RaytracingTier {
        self.tier
    }

    fn shader_table_limits(&self) -> ShaderTableLimits {
        match &self.ray_tracing {
            Some(ray_tracing) => ray_tracing.shader_table_limits(),
            None => ShaderTableLimits {
                identifier_size: 0,
                record_alignment: 1,
                table_alignment: 1,
            },
        }
    }

    fn descriptor_increment(&self) -> u32 {
        1
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            desc.label,
            buffer_usage(desc.usage),
            memory_location(desc.heap),
            desc.size,
        )
        .map_err(allocation_error(desc.label, desc.size))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Image> {
        let size = desc.width as u64 * desc.height as u64 * 4;
        let image = Image::new_2d(
            self.device.clone(),
            self.allocator.clone(),
            desc.label,
            image_usage(desc.usage),
            image_format(desc.format),
            desc.width,
            desc.height,
        )
        .map_err(allocation_error(desc.label, size))?;

        let initial = state_usage(desc.initial_state);
        self.execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.pipeline_image_barriers(&[ImageBarrier {
                image: &image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: initial.layout,
                src_access_mask: vk::AccessFlags2::NONE,
                dst_access_mask: initial.access,
                src_stage_mask: vk::PipelineStageFlags2::NONE,
                dst_stage_mask: initial.stage,
            }]);
        })
        .map_err(Error::device)?;

        Ok(image)
    }

    fn prebuild_info(&self, inputs: &BuildInputs, flags: BuildFlags) -> Result<PrebuildInfo> {
        Ok(self.ray_tracing()?.build_sizes(inputs, flags))
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<AccelerationStructure> {
        let ray_tracing = self
            .ray_tracing
            .clone()
            .ok_or(Error::UnsupportedRaytracingTier { found: self.tier })?;

        let buffer = Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            desc.label,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            desc.size,
        )
        .map_err(allocation_error(desc.label, desc.size))?;

        AccelerationStructure::new(ray_tracing, desc.level, buffer)
            .map_err(allocation_error(desc.label, desc.size))
    }

    fn create_shader_library(&self, desc: &ShaderLibraryDesc) -> Result<ShaderLibrary> {
        ShaderLibrary::new(self.device.clone(), desc.name, desc.exports).map_err(Error::device)
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<RootSignature> {
        RootSignature::new(self.device.clone(), desc).map_err(Error::device)
    }

    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc<Self>,
    ) -> Result<RayTracingPipeline> {
        let ray_tracing = self.ray_tracing()?;

        let local_signatures = desc
            .local_signatures
            .iter()
            .map(|signature| &signature.desc)
            .collect::<Vec<_>>();
        for (export, index) in &desc.associations {
            let signature = local_signatures
                .get(*index)
                .ok_or_else(|| Error::MissingRootSignature(export.clone()))?;
            log::debug!("{export} reads its record through the {}", signature.label);
        }

        RayTracingPipeline::new(
            self.device.clone(),
            ray_tracing,
            RayTracingPipelineCreateInfo {
                libraries: &desc.libraries,
                hit_groups: desc.hit_groups,
                local_signatures: &local_signatures,
                config: desc.config,
            },
        )
        .map_err(Error::device)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<Self>,
    ) -> Result<GraphicsPipeline> {
        let layout = desc.signature.layout.as_ref().ok_or_else(|| {
            Error::device(anyhow!(
                "{} is local and cannot lay out a graphics pipeline",
                desc.signature.desc.label
            ))
        })?;

        GraphicsPipeline::new(
            self.device.clone(),
            layout,
            GraphicsPipelineCreateInfo {
                vertex: single_export(desc.vertex, ShaderStage::Vertex)?,
                fragment: single_export(desc.pixel, ShaderStage::Pixel)?,
                vertex_stride: desc.vertex_stride,
                vertex_attributes: desc.vertex_attributes,
                color_attachment_format: image_format(desc.target_format),
            },
        )
        .map_err(Error::device)
    }

    fn create_descriptor_heap(&self, slots: &[DescriptorKind]) -> Result<DescriptorHeapSet> {
        DescriptorHeapSet::new(self.device.clone(), slots).map_err(Error::device)
    }

    fn write_descriptor(
        &self,
        heap: &DescriptorHeapSet,
        handle: DescriptorHandle,
        view: DescriptorView<Self>,
    ) -> Result<()> {
        let slot = handle.0.saturating_sub(heap.cpu_start().0);
        let kind = heap
            .slot_kind(DescriptorHandle(slot))
            .ok_or(Error::HeapSlotOutOfRange {
                slot: u32::try_from(slot).unwrap_or(u32::MAX),
                capacity: heap.capacity(),
            })?;
        if kind != view.kind() {
            return Err(Error::device(anyhow!(
                "heap slot {slot} holds a {}, not a {}",
                kind.name(),
                view.kind().name()
            )));
        }

        let kind = match view {
            DescriptorView::StorageImage(image) => WriteDescriptorSetKind::StorageImage {
                view: image.view,
                layout: state_usage(raytracing::ResourceState::UnorderedAccess).layout,
            },
            DescriptorView::AccelerationStructure(acceleration_structure) => {
                WriteDescriptorSetKind::AccelerationStructure {
                    acceleration_structure,
                }
            }
            DescriptorView::ConstantBuffer(buffer) => {
                WriteDescriptorSetKind::UniformBuffer { buffer }
            }
        };
        heap.set.update(WriteDescriptorSet {
            binding: slot as u32,
            kind,
        });
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<TimelineSemaphore> {
        TimelineSemaphore::new(self.device.clone(), initial_value).map_err(Error::device)
    }

    fn begin_commands(&self) -> Result<CommandList> {
        self.reap_in_flight().map_err(Error::device)?;
        let buffer = self
            .command_pool
            .allocate_command_buffer(vk::CommandBufferLevel::PRIMARY)
            .map_err(Error::device)?;
        buffer
            .begin(Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT))
            .map_err(Error::device)?;
        Ok(CommandList::new(buffer))
    }

    fn execute(&self, commands: CommandList) -> Result<()> {
        let buffer = commands.buffer;
        buffer.end().map_err(Error::device)?;

        let fence = Fence::new(self.device.clone(), None).map_err(Error::device)?;
        self.graphics_queue
            .submit(Some(&buffer), None, Some(&fence))
            .map_err(Error::device)?;

        self.in_flight
            .lock()
            .map_err(|_| Error::device(anyhow!("in flight list lock poisoned")))?
            .push(InFlight { buffer, fence });
        Ok(())
    }

    fn signal(&self, fence: &TimelineSemaphore, value: u64) -> Result<()> {
        self.graphics_queue
            .submit(
                None,
                Some(TimelineSignal {
                    semaphore: fence,
                    value,
                    stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
                }),
                None,
            )
            .map_err(Error::device)
    }
}
