use crate::allocator::ResourceAllocator;
use crate::device::{
    CommandList, Device, Format, GpuBuffer, GpuResource, GraphicsPipelineDesc, ShaderExport,
    ShaderLibraryDesc, ShaderStage,
};
use crate::error::Result;
use crate::pipeline::RootSignatureBuilder;
use crate::programs::{load_shader, ShaderSource, RASTER_PIXEL_SHADER, RASTER_VERTEX_SHADER};
use crate::scene::{FrameView, LightConstants, TransformConstants, VERTEX_ATTRIBUTES, VERTEX_STRIDE};
use crate::types::Mat4;

pub const RASTER_CLEAR_COLOR: [f32; 4] = [0.4, 0.4, 0.4, 1.0];

/// Root parameter the vertex stage reads its transforms from (b0).
pub const TRANSFORM_PARAMETER: u32 = 0;
/// Root parameter the pixel stage reads its light from (b1).
pub const LIGHT_PARAMETER: u32 = 1;

/// Non-indexed vertex buffer shared by the BLAS, the hit group records and the draw.
pub struct MeshBuffer<D: Device> {
    pub vertices: D::Buffer,
    pub vertex_count: u32,
}

struct SlotConstants<D: Device> {
    transform: D::Buffer,
    light: D::Buffer,
}

/// Conventional draw path: the ground plane through a graphics pipeline, lit in the pixel
/// shader. Constant buffers are per frame slot and rewritten every frame.
pub struct RasterPath<D: Device> {
    pipeline: D::GraphicsPipeline,
    _signature: D::RootSignature,
    _shaders: [D::ShaderLibrary; 2],
    slots: Vec<SlotConstants<D>>,
}

impl<D: Device> RasterPath<D> {
    pub fn new(device: &D, shaders: &dyn ShaderSource, frame_slots: usize) -> Result<Self> {
        let vertex = device.create_shader_library(&ShaderLibraryDesc {
            name: "plane vertex",
            exports: &[ShaderExport {
                name: "main".to_owned(),
                stage: ShaderStage::Vertex,
                code: load_shader(shaders, RASTER_VERTEX_SHADER)?,
            }],
        })?;
        let pixel = device.create_shader_library(&ShaderLibraryDesc {
            name: "plane pixel",
            exports: &[ShaderExport {
                name: "main".to_owned(),
                stage: ShaderStage::Pixel,
                code: load_shader(shaders, RASTER_PIXEL_SHADER)?,
            }],
        })?;
        let signature = device.create_root_signature(
            &RootSignatureBuilder::global("raster signature")
                .constant_buffer(TRANSFORM_PARAMETER)
                .constant_buffer(LIGHT_PARAMETER)
                .build(),
        )?;
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            vertex: &vertex,
            pixel: &pixel,
            signature: &signature,
            vertex_stride: VERTEX_STRIDE,
            vertex_attributes: &VERTEX_ATTRIBUTES,
            target_format: Format::Rgba8Unorm,
        })?;

        let slots = (0..frame_slots.max(1))
            .map(|_| {
                Ok(SlotConstants {
                    transform: device
                        .create_constant_buffer("raster transform", TransformConstants::SIZE)?,
                    light: device.create_constant_buffer("raster light", LightConstants::SIZE)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pipeline,
            _signature: signature,
            _shaders: [vertex, pixel],
            slots,
        })
    }

    /// Writes the slot's constants and records the draw. The slot's previous frame must have
    /// completed; `target` must be in the render target state.
    pub fn record(
        &self,
        commands: &mut D::CommandList,
        slot: usize,
        target: &D::Image,
        frame: &FrameView,
        world: &Mat4,
        mesh: &MeshBuffer<D>,
    ) -> Result<()> {
        let constants = &self.slots[slot % self.slots.len()];
        constants
            .transform
            .write(0, &TransformConstants::new(frame, *world).to_bytes())?;
        constants
            .light
            .write(0, &LightConstants::new(frame).to_bytes())?;

        commands.begin_render_pass(target, RASTER_CLEAR_COLOR);
        commands.set_graphics_pipeline(&self.pipeline);
        commands.set_graphics_constant_buffer(TRANSFORM_PARAMETER, constants.transform.gpu_address());
        commands.set_graphics_constant_buffer(LIGHT_PARAMETER, constants.light.gpu_address());
        commands.set_vertex_buffer(&mesh.vertices, VERTEX_STRIDE);
        commands.draw(mesh.vertex_count, 1);
        commands.end_render_pass();
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
