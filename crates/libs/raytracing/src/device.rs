//! Everything the renderer needs from a GPU device, command list and fence.
//!
//! States, heaps and table layouts follow the explicit-API model: resources carry an
//! explicit [`ResourceState`], buffers live in a default (GPU only) or upload (CPU writable)
//! heap and acceleration structures are addressed by their GPU virtual address.

use strum_macros::Display;

use crate::error::Result;

pub type GpuAddress = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum RaytracingTier {
    #[strum(serialize = "not supported")]
    NotSupported,
    #[strum(serialize = "1.0")]
    Tier1_0,
    #[strum(serialize = "1.1")]
    Tier1_1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    UnorderedAccess,
    CopySource,
    CopyDest,
    RenderTarget,
    Present,
    GenericRead,
    AccelerationStructure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapKind {
    /// GPU exclusive.
    Default,
    /// CPU writable, GPU readable.
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Scratch,
    InstanceDescriptors,
    ShaderBindingTable,
    Constants,
    Vertices,
    Indices,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub heap: HeapKind,
    pub usage: BufferUsage,
    pub initial_state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Rgba8Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsage {
    /// Written by ray generation shaders, copied out afterwards.
    UnorderedAccess,
    /// Presentable target, drawn into by the raster path and copied into by the ray path.
    RenderTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: ImageUsage,
    pub initial_state: ResourceState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccelerationStructureDesc {
    pub label: &'static str,
    pub level: AccelerationStructureLevel,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexData {
    pub address: GpuAddress,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_address: GpuAddress,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub indices: Option<IndexData>,
    pub opaque: bool,
}

impl TriangleGeometry {
    pub fn primitive_count(&self) -> u32 {
        match self.indices {
            Some(indices) => indices.count / 3,
            None => self.vertex_count / 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildInputs<'a> {
    Triangles(&'a [TriangleGeometry]),
    Instances { descriptors: GpuAddress, count: u32 },
}

impl BuildInputs<'_> {
    pub fn level(&self) -> AccelerationStructureLevel {
        match self {
            Self::Triangles(_) => AccelerationStructureLevel::Bottom,
            Self::Instances { .. } => AccelerationStructureLevel::Top,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildFlags {
    pub allow_update: bool,
    pub prefer_fast_trace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Build,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

pub struct BuildCommand<'a, D: Device> {
    pub inputs: BuildInputs<'a>,
    pub flags: BuildFlags,
    pub mode: BuildMode,
    pub destination: &'a D::AccelerationStructure,
    /// Structure to refit from. Only set for [`BuildMode::Update`].
    pub source: Option<&'a D::AccelerationStructure>,
    pub scratch: GpuAddress,
}

/// Shader identifier size and the alignments a shader table must honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLimits {
    pub identifier_size: u32,
    pub record_alignment: u64,
    pub table_alignment: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderStage {
    RayGeneration,
    Miss,
    ClosestHit,
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderExport {
    pub name: String,
    pub stage: ShaderStage,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderLibraryDesc<'a> {
    pub name: &'a str,
    pub exports: &'a [ShaderExport],
}

/// View a descriptor heap slot holds, and therefore the register class it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    StorageImage,
    AccelerationStructure,
    ConstantBuffer,
}

impl DescriptorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::StorageImage => "UAV",
            Self::AccelerationStructure => "SRV",
            Self::ConstantBuffer => "CBV",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    pub kind: DescriptorKind,
    pub register: u32,
    pub heap_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// Pointer to the start of the bound descriptor heap, resolved through the ranges.
    DescriptorTable(Vec<DescriptorRange>),
    ShaderResource { register: u32 },
    ConstantBuffer { register: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub label: &'static str,
    pub parameters: Vec<RootParameter>,
    /// Local signatures are bound per shader record, global ones per dispatch.
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub name: String,
    pub closest_hit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

pub struct RaytracingPipelineDesc<'a, D: Device> {
    pub libraries: Vec<&'a D::ShaderLibrary>,
    pub hit_groups: &'a [HitGroupDesc],
    pub global_signature: &'a D::RootSignature,
    pub local_signatures: Vec<&'a D::RootSignature>,
    /// Export or hit group name to index into `local_signatures`.
    pub associations: Vec<(String, usize)>,
    pub config: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float3,
    Float4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

pub struct GraphicsPipelineDesc<'a, D: Device> {
    pub vertex: &'a D::ShaderLibrary,
    pub pixel: &'a D::ShaderLibrary,
    pub signature: &'a D::RootSignature,
    pub vertex_stride: u32,
    pub vertex_attributes: &'a [VertexAttribute],
    pub target_format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorHandle(pub u64);

impl DescriptorHandle {
    pub fn offset(self, count: u32, increment: u32) -> Self {
        Self(self.0 + count as u64 * increment as u64)
    }
}

pub enum DescriptorView<'a, D: Device> {
    StorageImage(&'a D::Image),
    AccelerationStructure(&'a D::AccelerationStructure),
    ConstantBuffer(&'a D::Buffer),
}

impl<D: Device> DescriptorView<'_, D> {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::StorageImage(_) => DescriptorKind::StorageImage,
            Self::AccelerationStructure(_) => DescriptorKind::AccelerationStructure,
            Self::ConstantBuffer(_) => DescriptorKind::ConstantBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableRegion {
    pub start: GpuAddress,
    pub size: u64,
    pub stride: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRaysDesc {
    pub ray_generation: TableRegion,
    pub miss: TableRegion,
    pub hit_group: TableRegion,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

pub trait GpuResource {
    fn gpu_address(&self) -> GpuAddress;
}

pub trait GpuBuffer: GpuResource {
    fn size(&self) -> u64;

    /// Copies `bytes` into an upload heap buffer.
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()>;
}

pub trait GpuImage {
    fn extent(&self) -> (u32, u32);
}

pub trait ShaderIdentifiers {
    fn shader_identifier(&self, export: &str) -> Option<&[u8]>;
}

pub trait DescriptorHeap {
    fn capacity(&self) -> u32;
    fn cpu_start(&self) -> DescriptorHandle;
    fn gpu_start(&self) -> GpuAddress;
}

pub trait Fence {
    fn completed_value(&self) -> Result<u64>;

    /// Blocks until the fence reaches `value` or any later value.
    fn wait(&self, value: u64) -> Result<()>;
}

pub trait Device: Sized {
    type Buffer: GpuBuffer;
    type Image: GpuImage;
    type AccelerationStructure: GpuResource;
    type ShaderLibrary;
    type RootSignature;
    type RaytracingPipeline: ShaderIdentifiers;
    type GraphicsPipeline;
    type DescriptorHeap: DescriptorHeap;
    type Fence: Fence;
    type CommandList: CommandList<Self>;

    fn raytracing_tier(&self) -> RaytracingTier;
    fn shader_table_limits(&self) -> ShaderTableLimits;
    fn descriptor_increment(&self) -> u32;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer>;
    fn create_image(&self, desc: &ImageDesc) -> Result<Self::Image>;
    fn prebuild_info(&self, inputs: &BuildInputs, flags: BuildFlags) -> Result<PrebuildInfo>;
    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<Self::AccelerationStructure>;

    fn create_shader_library(&self, desc: &ShaderLibraryDesc) -> Result<Self::ShaderLibrary>;
    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<Self::RootSignature>;
    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc<Self>,
    ) -> Result<Self::RaytracingPipeline>;
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<Self>,
    ) -> Result<Self::GraphicsPipeline>;

    fn create_descriptor_heap(&self, slots: &[DescriptorKind]) -> Result<Self::DescriptorHeap>;
    fn write_descriptor(
        &self,
        heap: &Self::DescriptorHeap,
        handle: DescriptorHandle,
        view: DescriptorView<Self>,
    ) -> Result<()>;

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence>;
    fn begin_commands(&self) -> Result<Self::CommandList>;
    /// Closes and submits a command list.
    fn execute(&self, commands: Self::CommandList) -> Result<()>;
    /// Queues a fence signal behind everything executed so far.
    fn signal(&self, fence: &Self::Fence, value: u64) -> Result<()>;
}

pub trait CommandList<D: Device> {
    fn build_acceleration_structure(&mut self, command: &BuildCommand<D>);
    fn uav_barrier(&mut self, structure: &D::AccelerationStructure);
    fn transition_image(&mut self, image: &D::Image, before: ResourceState, after: ResourceState);
    fn set_descriptor_heap(&mut self, heap: &D::DescriptorHeap);
    fn set_raytracing_pipeline(&mut self, pipeline: &D::RaytracingPipeline);
    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc);
    fn copy_image(&mut self, source: &D::Image, destination: &D::Image);

    fn begin_render_pass(&mut self, target: &D::Image, clear_color: [f32; 4]);
    fn end_render_pass(&mut self);
    fn set_graphics_pipeline(&mut self, pipeline: &D::GraphicsPipeline);
    fn set_graphics_constant_buffer(&mut self, parameter: u32, address: GpuAddress);
    fn set_vertex_buffer(&mut self, buffer: &D::Buffer, stride: u32);
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
}

/// Fails unless the device supports at least raytracing tier 1.0.
pub fn check_raytracing_support<D: Device>(device: &D) -> Result<RaytracingTier> {
    let tier = device.raytracing_tier();
    if tier < RaytracingTier::Tier1_0 {
        return Err(crate::Error::UnsupportedRaytracingTier { found: tier });
    }
    log::info!("Raytracing tier {tier} supported");
    Ok(tier)
}
