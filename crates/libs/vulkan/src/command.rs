use std::sync::Arc;

use anyhow::{anyhow, Result};
use ash::vk;
use raytracing::{BuildCommand, DispatchRaysDesc, GpuAddress, ResourceState, TableRegion};

use crate::{
    acceleration_structure_usage, build_flags, build_mode, device::Device,
    image::COLOR_SUBRESOURCE_LAYERS, image::COLOR_SUBRESOURCE_RANGE, state_usage,
    structure_type, Buffer, BuildGeometry, Context, DescriptorHeapSet, GraphicsPipeline, Image, QueueFamily, RayTracingContext, RayTracingPipeline,
    ROOT_ADDRESS_SIZE, ROOT_ADDRESS_STAGES,
};

pub struct CommandPool {
    device: Arc<Device>,
    ray_tracing: Option<Arc<RayTracingContext>>,
    pub inner: vk::CommandPool,
}

impl CommandPool {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: Option<Arc<RayTracingContext>>,
        queue_family: QueueFamily,
        flags: Option<vk::CommandPoolCreateFlags>,
    ) -> Result<Self> {
        let flags = flags.unwrap_or_else(vk::CommandPoolCreateFlags::empty);

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family.index)
            .flags(flags);
        let inner = unsafe { device.inner.create_command_pool(&command_pool_info, None)? };

        Ok(Self {
            device,
            ray_tracing,
            inner,
        })
    }

    pub fn allocate_command_buffer(&self, level: vk::CommandBufferLevel) -> Result<CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.inner)
            .level(level)
            .command_buffer_count(1);

        let inner = unsafe { self.device.inner.allocate_command_buffers(&allocate_info)? }
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("command pool returned no command buffer"))?;

        Ok(CommandBuffer {
            device: self.device.clone(),
            ray_tracing: self.ray_tracing.clone(),
            inner,
        })
    }

    pub fn free_command_buffer(&self, buffer: &CommandBuffer) {
        let buffs = [buffer.inner];
        unsafe { self.device.inner.free_command_buffers(self.inner, &buffs) };
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_command_pool(self.inner, None) };
    }
}

pub struct CommandBuffer {
    device: Arc<Device>,
    ray_tracing: Option<Arc<RayTracingContext>>,
    pub inner: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn begin(&self, flags: Option<vk::CommandBufferUsageFlags>) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(flags.unwrap_or(vk::CommandBufferUsageFlags::empty()));
        unsafe {
            self.device
                .inner
                .begin_command_buffer(self.inner, &begin_info)?
        };

        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.inner.end_command_buffer(self.inner)? };

        Ok(())
    }

    pub fn bind_rt_pipeline(&self, pipeline: &RayTracingPipeline) {
        unsafe {
            self.device.inner.cmd_bind_pipeline(
                self.inner,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                pipeline.inner,
            )
        }
    }

    pub fn bind_graphics_pipeline(&self, pipeline: &GraphicsPipeline) {
        unsafe {
            self.device.inner.cmd_bind_pipeline(
                self.inner,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.inner,
            )
        }
    }

    pub fn bind_vertex_buffer(&self, vertex_buffer: &Buffer) {
        unsafe {
            self.device
                .inner
                .cmd_bind_vertex_buffers(self.inner, 0, &[vertex_buffer.inner], &[0])
        };
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .inner
                .cmd_draw(self.inner, vertex_count, instance_count, 0, 0)
        };
    }

    pub fn bind_descriptor_set(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.inner.cmd_bind_descriptor_sets(
                self.inner,
                bind_point,
                layout,
                0,
                std::slice::from_ref(&set),
                &[],
            )
        }
    }

    pub fn push_constants(&self, layout: vk::PipelineLayout, offset: u32, bytes: &[u8]) {
        unsafe {
            self.device.inner.cmd_push_constants(
                self.inner,
                layout,
                ROOT_ADDRESS_STAGES,
                offset,
                bytes,
            )
        }
    }

    pub fn pipeline_image_barriers(&self, barriers: &[ImageBarrier]) {
        let barriers = barriers
            .iter()
            .map(|b| {
                vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(b.src_stage_mask)
                    .src_access_mask(b.src_access_mask)
                    .old_layout(b.old_layout)
                    .dst_stage_mask(b.dst_stage_mask)
                    .dst_access_mask(b.dst_access_mask)
                    .new_layout(b.new_layout)
                    .image(b.image.inner)
                    .subresource_range(COLOR_SUBRESOURCE_RANGE)
                    .build()
            })
            .collect::<Vec<_>>();

        let dependency_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    /// Barrier between two ray tracing states of an image.
    pub fn transition_image(&self, image: &Image, before: ResourceState, after: ResourceState) {
        let src = state_usage(before);
        let dst = state_usage(after);
        self.pipeline_image_barriers(&[ImageBarrier {
            image,
            old_layout: src.layout,
            new_layout: dst.layout,
            src_access_mask: src.access,
            dst_access_mask: dst.access,
            src_stage_mask: src.stage,
            dst_stage_mask: dst.stage,
        }]);
    }

    /// Orders earlier acceleration structure builds and traces before later ones.
    pub fn acceleration_structure_barrier(&self) {
        let (stages, access) = acceleration_structure_usage();
        let barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(stages)
            .src_access_mask(access)
            .dst_stage_mask(stages)
            .dst_access_mask(access)
            .build();

        let dependency_info =
            vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&barrier));

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    /// Makes transfer writes visible to host reads after the submission completes.
    pub fn host_read_barrier(&self) {
        let barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::COPY)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::HOST)
            .dst_access_mask(vk::AccessFlags2::HOST_READ)
            .build();

        let dependency_info =
            vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&barrier));

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    pub fn copy_image(
        &self,
        src_image: &Image,
        src_layout: vk::ImageLayout,
        dst_image: &Image,
        dst_layout: vk::ImageLayout,
    ) {
        let region = vk::ImageCopy::builder()
            .src_subresource(COLOR_SUBRESOURCE_LAYERS)
            .dst_subresource(COLOR_SUBRESOURCE_LAYERS)
            .extent(src_image.extent);

        unsafe {
            self.device.inner.cmd_copy_image(
                self.inner,
                src_image.inner,
                src_layout,
                dst_image.inner,
                dst_layout,
                std::slice::from_ref(&region),
            )
        };
    }

    pub fn copy_image_to_buffer(&self, src: &Image, layout: vk::ImageLayout, dst: &Buffer) {
        let region = vk::BufferImageCopy::builder()
            .image_subresource(COLOR_SUBRESOURCE_LAYERS)
            .image_extent(src.extent);

        unsafe {
            self.device.inner.cmd_copy_image_to_buffer(
                self.inner,
                src.inner,
                layout,
                dst.inner,
                std::slice::from_ref(&region),
            );
        };
    }

    pub fn build_acceleration_structures(
        &self,
        as_build_geo_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
        as_build_range_info: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        let Some(ray_tracing) = self.ray_tracing.as_ref() else {
            log::error!("Acceleration structure build recorded without ray tracing support");
            return;
        };

        unsafe {
            ray_tracing
                .acceleration_structure_fn
                .cmd_build_acceleration_structures(
                    self.inner,
                    std::slice::from_ref(as_build_geo_info),
                    std::slice::from_ref(&as_build_range_info),
                )
        };
    }

    pub fn trace_rays(&self, desc: &DispatchRaysDesc) {
        let Some(ray_tracing) = self.ray_tracing.as_ref() else {
            log::error!("Ray dispatch recorded without ray tracing support");
            return;
        };

        unsafe {
            ray_tracing.pipeline_fn.cmd_trace_rays(
                self.inner,
                &strided_region(desc.ray_generation),
                &strided_region(desc.miss),
                &strided_region(desc.hit_group),
                &vk::StridedDeviceAddressRegionKHR::default(),
                desc.width,
                desc.height,
                desc.depth,
            )
        };
    }

    pub fn begin_rendering(&self, image: &Image, clear_color: [f32; 4]) {
        let color_attachment_info = vk::RenderingAttachmentInfo::builder()
            .image_view(image.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: image.extent_2d(),
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment_info));

        unsafe {
            self.device
                .inner
                .cmd_begin_rendering(self.inner, &rendering_info)
        };
    }

    pub fn end_rendering(&self) {
        unsafe { self.device.inner.cmd_end_rendering(self.inner) };
    }

    /// Flipped viewport, so clip space y points up like in the ray generation shader.
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        unsafe {
            self.device.inner.cmd_set_viewport(
                self.inner,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: extent.height as _,
                    width: extent.width as _,
                    height: -(extent.height as f32),
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            )
        };
    }

    pub fn set_scissor(&self, extent: vk::Extent2D) {
        unsafe {
            self.device.inner.cmd_set_scissor(
                self.inner,
                0,
                &[vk::Rect2D {
                    extent,
                    ..Default::default()
                }],
            )
        };
    }
}

fn strided_region(region: TableRegion) -> vk::StridedDeviceAddressRegionKHR {
    vk::StridedDeviceAddressRegionKHR::builder()
        .device_address(region.start)
        .size(region.size)
        .stride(region.stride)
        .build()
}

#[derive(Clone, Copy)]
pub struct ImageBarrier<'a> {
    pub image: &'a Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
}

/// Recording state for one frame's worth of commands.
///
/// The descriptor heap may be set before the pipeline that defines its layout, so binding
/// is deferred until both are known.
pub struct CommandList {
    pub(crate) buffer: CommandBuffer,
    heap: Option<vk::DescriptorSet>,
    ray_tracing_layout: Option<vk::PipelineLayout>,
    graphics_layout: Option<vk::PipelineLayout>,
}

impl CommandList {
    pub(crate) fn new(buffer: CommandBuffer) -> Self {
        Self {
            buffer,
            heap: None,
            ray_tracing_layout: None,
            graphics_layout: None,
        }
    }

    fn bind_heap(&self) {
        if let (Some(set), Some(layout)) = (self.heap, self.ray_tracing_layout) {
            self.buffer
                .bind_descriptor_set(vk::PipelineBindPoint::RAY_TRACING_KHR, layout, set);
        }
    }
}

impl raytracing::CommandList<Context> for CommandList {
    fn build_acceleration_structure(&mut self, command: &BuildCommand<Context>) {
        let geometry = BuildGeometry::new(&command.inputs);
        let build_geo_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(structure_type(command.inputs.level()))
            .flags(build_flags(command.flags))
            .mode(build_mode(command.mode))
            .src_acceleration_structure(
                command
                    .source
                    .map_or(vk::AccelerationStructureKHR::null(), |s| s.inner),
            )
            .dst_acceleration_structure(command.destination.inner)
            .geometries(&geometry.geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: command.scratch,
            });

        self.buffer
            .build_acceleration_structures(&build_geo_info, &geometry.ranges);
    }

    fn uav_barrier(&mut self, _structure: &crate::AccelerationStructure) {
        self.buffer.acceleration_structure_barrier();
    }

    fn transition_image(&mut self, image: &Image, before: ResourceState, after: ResourceState) {
        self.buffer.transition_image(image, before, after);
    }

    fn set_descriptor_heap(&mut self, heap: &DescriptorHeapSet) {
        self.heap = Some(heap.set.inner);
        self.bind_heap();
    }

    fn set_raytracing_pipeline(&mut self, pipeline: &RayTracingPipeline) {
        self.buffer.bind_rt_pipeline(pipeline);
        self.ray_tracing_layout = Some(pipeline.layout.inner);
        self.bind_heap();
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        self.buffer.trace_rays(desc);
    }

    fn copy_image(&mut self, source: &Image, destination: &Image) {
        self.buffer.copy_image(
            source,
            state_usage(ResourceState::CopySource).layout,
            destination,
            state_usage(ResourceState::CopyDest).layout,
        );
    }

    fn begin_render_pass(&mut self, target: &Image, clear_color: [f32; 4]) {
        self.buffer.begin_rendering(target, clear_color);
        self.buffer.set_viewport(target.extent_2d());
        self.buffer.set_scissor(target.extent_2d());
    }

    fn end_render_pass(&mut self) {
        self.buffer.end_rendering();
    }

    fn set_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        self.buffer.bind_graphics_pipeline(pipeline);
        self.graphics_layout = Some(pipeline.layout);
    }

    fn set_graphics_constant_buffer(&mut self, parameter: u32, address: GpuAddress) {
        let Some(layout) = self.graphics_layout else {
            log::error!("Constant buffer {parameter} set before a graphics pipeline");
            return;
        };
        self.buffer
            .push_constants(layout, parameter * ROOT_ADDRESS_SIZE, &address.to_le_bytes());
    }

    fn set_vertex_buffer(&mut self, buffer: &Buffer, _stride: u32) {
        self.buffer.bind_vertex_buffer(buffer);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.buffer.draw(vertex_count, instance_count);
    }
}
