use std::sync::Arc;

use crate::acceleration_structure::{
    BottomLevelAccelerationStructure, HitGroupBinding, InstanceTable, MeshGeometry,
    TopLevelAccelerationStructure,
};
use crate::allocator::ResourceAllocator;
use crate::config::RendererConfig;
use crate::descriptor_heap::{compose_descriptor_heap, HeapLayout, HeapResources};
use crate::device::{
    check_raytracing_support, BufferUsage, CommandList, Device, Format, GpuBuffer, GpuImage,
    GpuResource, ImageDesc, ImageUsage, ResourceState,
};
use crate::error::Result;
use crate::pipeline::CompiledPipeline;
use crate::programs::{
    compile_raytracing_pipeline, ShaderSource, MISS, PLANE_HIT_GROUP, RAY_GEN, RAY_TYPE_COUNT,
    SHADOW_HIT_GROUP, SHADOW_MISS,
};
use crate::raster::{MeshBuffer, RasterPath};
use crate::render_mode::RenderMode;
use crate::scene::{CameraConstants, FrameView, GroundPlane, VERTEX_STRIDE};
use crate::shader_binding_table::{RootArgument, ShaderBindingTable, ShaderBindingTableBuilder};
use crate::sync::FenceCounter;
use crate::types::Mat4;

/// Everything the ray traced path owns: structures, pipeline, output image, heap and SBT.
/// Nothing here is reallocated after construction.
pub struct RaytracingPath<D: Device> {
    instances: InstanceTable<D>,
    plane_instance: u32,
    tlas: TopLevelAccelerationStructure<D>,
    pipeline: CompiledPipeline<D>,
    output: D::Image,
    camera: D::Buffer,
    camera_bytes: Vec<u8>,
    heap: D::DescriptorHeap,
    sbt: ShaderBindingTable<D>,
}

impl<D: Device> RaytracingPath<D> {
    /// Builds the structures and blocks until the GPU is done with them before compiling
    /// the pipeline and writing the heap and SBT.
    pub fn new(
        device: &D,
        fence: &mut FenceCounter<D>,
        shaders: &dyn ShaderSource,
        config: &RendererConfig,
        plane: &GroundPlane,
        mesh: &MeshBuffer<D>,
        frame: &FrameView,
    ) -> Result<Self> {
        let camera_bytes = CameraConstants::new(frame, config.aspect_ratio()).to_bytes();
        let camera = device.create_constant_buffer("camera constants", CameraConstants::SIZE)?;
        camera.write(0, &camera_bytes)?;

        let mut commands = device.begin_commands()?;
        let blas = BottomLevelAccelerationStructure::build(
            device,
            &mut commands,
            &[MeshGeometry {
                vertices: (&mesh.vertices, mesh.vertex_count),
                indices: None,
                vertex_stride: VERTEX_STRIDE,
            }],
        )?;

        let mut instances = InstanceTable::new(RAY_TYPE_COUNT);
        let plane_instance = instances.push(
            Arc::new(blas),
            plane.instance_transform(&frame.world),
            vec![
                HitGroupBinding::new(
                    PLANE_HIT_GROUP,
                    vec![
                        RootArgument::Address(mesh.vertices.gpu_address()),
                        // Not indexed.
                        RootArgument::Address(0),
                        RootArgument::Address(camera.gpu_address()),
                        RootArgument::HeapBase,
                    ],
                ),
                HitGroupBinding::new(SHADOW_HIT_GROUP, Vec::new()),
            ],
        )?;

        let mut tlas = TopLevelAccelerationStructure::new();
        tlas.build(device, &mut commands, &instances)?;

        device.execute(commands)?;
        fence.wait_idle(device)?;
        instances.release_blas_scratch();

        let layout = HeapLayout::RAYTRACING;
        let pipeline =
            compile_raytracing_pipeline(device, shaders, &layout, config.max_recursion_depth)?;

        let output = device.create_image(&ImageDesc {
            label: "raytracing output",
            width: config.width,
            height: config.height,
            format: Format::Rgba8Unorm,
            usage: ImageUsage::UnorderedAccess,
            initial_state: ResourceState::CopySource,
        })?;

        let heap = compose_descriptor_heap(
            device,
            &layout,
            &HeapResources {
                output: &output,
                tlas: tlas.result()?,
                camera: &camera,
            },
        )?;

        let mut builder = ShaderBindingTableBuilder::new();
        builder.add_ray_generation_program(RAY_GEN, vec![RootArgument::HeapBase]);
        builder.add_miss_program(MISS, Vec::new());
        builder.add_miss_program(SHADOW_MISS, Vec::new());
        builder.add_instance_hit_groups(&instances);
        let sbt = builder.build(device, &pipeline, &heap)?;
        sbt.verify_instance_coverage(&instances)?;

        Ok(Self {
            instances,
            plane_instance,
            tlas,
            pipeline,
            output,
            camera,
            camera_bytes,
            heap,
            sbt,
        })
    }

    /// Brings the camera constants and the plane transform up to date. Shared upload
    /// buffers are only rewritten once no frame in flight can read them.
    pub fn update(
        &mut self,
        fence: &FenceCounter<D>,
        frame: &FrameView,
        transform: Mat4,
        aspect: f32,
    ) -> Result<()> {
        self.instances.set_transform(self.plane_instance, transform)?;
        let camera_bytes = CameraConstants::new(frame, aspect).to_bytes();
        let camera_changed = camera_bytes != self.camera_bytes;

        if camera_changed || self.tlas.descriptors_changed(&self.instances) {
            fence.wait(fence.current())?;
        }
        if camera_changed {
            self.camera.write(0, &camera_bytes)?;
            self.camera_bytes = camera_bytes;
        }
        Ok(())
    }

    /// Refit, trace into the output image and copy it into `target`, which must be in the
    /// render target state and is left there.
    pub fn record(&mut self, commands: &mut D::CommandList, target: &D::Image) -> Result<()> {
        self.tlas.refit(commands, &self.instances)?;

        let (width, height) = self.output.extent();
        commands.set_descriptor_heap(&self.heap);
        commands.transition_image(
            &self.output,
            ResourceState::CopySource,
            ResourceState::UnorderedAccess,
        );
        commands.set_raytracing_pipeline(self.pipeline.pipeline());
        commands.dispatch_rays(&self.sbt.dispatch_desc(width, height));
        commands.transition_image(
            &self.output,
            ResourceState::UnorderedAccess,
            ResourceState::CopySource,
        );

        commands.transition_image(target, ResourceState::RenderTarget, ResourceState::CopyDest);
        commands.copy_image(&self.output, target);
        commands.transition_image(target, ResourceState::CopyDest, ResourceState::RenderTarget);
        Ok(())
    }

    pub fn output(&self) -> &D::Image {
        &self.output
    }

    pub fn instances(&self) -> &InstanceTable<D> {
        &self.instances
    }

    pub fn tlas(&self) -> &TopLevelAccelerationStructure<D> {
        &self.tlas
    }

    pub fn pipeline(&self) -> &CompiledPipeline<D> {
        &self.pipeline
    }

    pub fn heap(&self) -> &D::DescriptorHeap {
        &self.heap
    }

    pub fn shader_binding_table(&self) -> &ShaderBindingTable<D> {
        &self.sbt
    }

    pub fn camera(&self) -> &D::Buffer {
        &self.camera
    }
}

/// Owns both render paths and the frame timeline, and runs exactly one path per frame.
pub struct FrameOrchestrator<D: Device> {
    mode: RenderMode,
    config: RendererConfig,
    plane: GroundPlane,
    raytracing: RaytracingPath<D>,
    raster: RasterPath<D>,
    mesh: MeshBuffer<D>,
    fence: FenceCounter<D>,
    slot_values: Vec<u64>,
    frame_index: u64,
}

impl<D: Device> FrameOrchestrator<D> {
    pub fn new(device: &D, shaders: &dyn ShaderSource, config: RendererConfig) -> Result<Self> {
        check_raytracing_support(device)?;
        let mut fence = FenceCounter::new(device)?;

        let plane = GroundPlane::default();
        let mesh = MeshBuffer {
            vertices: device.create_upload_buffer_with_data(
                "plane vertices",
                BufferUsage::Vertices,
                &plane.vertex_bytes(),
            )?,
            vertex_count: plane.vertex_count(),
        };

        let raster = RasterPath::new(device, shaders, config.frames_in_flight)?;
        let raytracing = RaytracingPath::new(
            device,
            &mut fence,
            shaders,
            &config,
            &plane,
            &mesh,
            &FrameView::default(),
        )?;

        log::info!(
            "Renderer ready: {}x{}, {} frames in flight, starting in {} mode",
            config.width,
            config.height,
            raster.slot_count(),
            config.initial_mode
        );

        Ok(Self {
            mode: config.initial_mode,
            slot_values: vec![0; raster.slot_count()],
            config,
            plane,
            raytracing,
            raster,
            mesh,
            fence,
            frame_index: 0,
        })
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode != self.mode {
            log::info!("Render mode: {} -> {mode}", self.mode);
            self.mode = mode;
        }
    }

    /// Switches to the next render mode. Nothing is rebuilt.
    pub fn toggle_mode(&mut self) -> RenderMode {
        self.set_mode(self.mode.next());
        self.mode
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn raytracing(&self) -> &RaytracingPath<D> {
        &self.raytracing
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_index
    }

    /// Records and submits one frame into `target`, a presentable image, and returns the
    /// fence value that completes it.
    pub fn render(&mut self, device: &D, target: &D::Image, frame: &FrameView) -> Result<u64> {
        let slot = (self.frame_index % self.slot_values.len() as u64) as usize;
        self.fence.wait(self.slot_values[slot])?;

        let world = self.plane.instance_transform(&frame.world);
        let mut commands = device.begin_commands()?;
        commands.transition_image(target, ResourceState::Present, ResourceState::RenderTarget);
        match self.mode {
            RenderMode::Rasterize => {
                self.raster
                    .record(&mut commands, slot, target, frame, &world, &self.mesh)?
            }
            RenderMode::Raytrace => {
                self.raytracing
                    .update(&self.fence, frame, world, self.config.aspect_ratio())?;
                self.raytracing.record(&mut commands, target)?;
            }
        }
        commands.transition_image(target, ResourceState::RenderTarget, ResourceState::Present);
        device.execute(commands)?;

        let value = self.fence.signal(device)?;
        self.slot_values[slot] = value;
        self.frame_index += 1;
        Ok(value)
    }

    /// Blocks until every submitted frame has completed.
    pub fn wait_idle(&mut self, device: &D) -> Result<()> {
        self.fence.wait_idle(device)
    }

    /// Waits for the GPU, then releases every path's resources.
    pub fn shutdown(mut self, device: &D) -> Result<()> {
        self.wait_idle(device)?;
        log::info!("Renderer shut down after {} frames", self.frame_index);
        Ok(())
    }
}
