//! Recording device for unit tests. Upload buffers keep their bytes, command lists are
//! validated and logged when executed and the GPU timeline completes instantly.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::acceleration_structure::{BottomLevelAccelerationStructure, MeshGeometry};
use crate::allocator::{align_up, ResourceAllocator};
use crate::device::*;
use crate::error::{Error, Result};
use crate::programs::ShaderSource;

type Memory = Rc<RefCell<HashMap<GpuAddress, Rc<RefCell<Vec<u8>>>>>>;

pub struct MockDevice {
    tier: RaytracingTier,
    budget: Cell<Option<u64>>,
    next_address: Cell<u64>,
    next_id: Cell<u64>,
    memory: Memory,
    image_states: RefCell<HashMap<u64, ResourceState>>,
    structures: RefCell<HashMap<GpuAddress, BuiltStructure>>,
    executed: RefCell<Vec<Recorded>>,
}

#[derive(Debug, Clone)]
struct BuiltStructure {
    allow_update: bool,
    content: Vec<u8>,
}

#[derive(Debug)]
pub struct MockBuffer {
    pub(crate) address: GpuAddress,
    pub(crate) size: u64,
    pub(crate) heap: HeapKind,
    pub(crate) usage: BufferUsage,
    pub(crate) initial_state: ResourceState,
    data: Rc<RefCell<Vec<u8>>>,
}

impl MockBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl GpuResource for MockBuffer {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }
}

impl GpuBuffer for MockBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.heap != HeapKind::Upload {
            return Err(Error::device("buffer is not CPU visible"));
        }
        let end = offset as usize + bytes.len();
        let mut data = self.data.borrow_mut();
        if end > data.len() {
            return Err(Error::device(format!(
                "write of {} bytes at {offset} overflows a {} byte buffer",
                bytes.len(),
                data.len()
            )));
        }
        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockImage {
    pub(crate) id: u64,
    width: u32,
    height: u32,
}

impl GpuImage for MockImage {
    fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Debug)]
pub struct MockStructure {
    address: GpuAddress,
    pub(crate) size: u64,
    pub(crate) level: AccelerationStructureLevel,
}

impl GpuResource for MockStructure {
    fn gpu_address(&self) -> GpuAddress {
        self.address
    }
}

#[derive(Debug)]
pub struct MockLibrary {
    exports: Vec<(String, ShaderStage)>,
}

#[derive(Debug)]
pub struct MockRootSignature {
    pub(crate) desc: RootSignatureDesc,
}

#[derive(Debug)]
pub struct MockPipeline {
    identifiers: HashMap<String, Vec<u8>>,
    pub(crate) associations: Vec<(String, &'static str)>,
    pub(crate) config: PipelineConfig,
}

impl ShaderIdentifiers for MockPipeline {
    fn shader_identifier(&self, export: &str) -> Option<&[u8]> {
        self.identifiers.get(export).map(Vec::as_slice)
    }
}

#[derive(Debug)]
pub struct MockGraphicsPipeline {
    pub(crate) vertex_stride: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Written {
    StorageImage(u64),
    AccelerationStructure(GpuAddress),
    ConstantBuffer(GpuAddress),
}

#[derive(Debug)]
pub struct MockHeap {
    kinds: Vec<DescriptorKind>,
    start: DescriptorHandle,
    gpu_start: GpuAddress,
    slots: RefCell<Vec<Option<Written>>>,
}

impl MockHeap {
    pub fn written(&self) -> Vec<Option<Written>> {
        self.slots.borrow().clone()
    }
}

impl DescriptorHeap for MockHeap {
    fn capacity(&self) -> u32 {
        self.kinds.len() as u32
    }

    fn cpu_start(&self) -> DescriptorHandle {
        self.start
    }

    fn gpu_start(&self) -> GpuAddress {
        self.gpu_start
    }
}

#[derive(Debug)]
pub struct MockFence {
    value: Rc<Cell<u64>>,
}

impl Fence for MockFence {
    fn completed_value(&self) -> Result<u64> {
        Ok(self.value.get())
    }

    fn wait(&self, value: u64) -> Result<()> {
        if self.value.get() >= value {
            Ok(())
        } else {
            Err(Error::device(format!(
                "waiting for fence value {value} that was never signaled"
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedInputs {
    Triangles(Vec<TriangleGeometry>),
    Instances { descriptors: GpuAddress, count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Build {
        inputs: RecordedInputs,
        mode: BuildMode,
        flags: BuildFlags,
        destination: GpuAddress,
        source: Option<GpuAddress>,
        scratch: GpuAddress,
    },
    UavBarrier(GpuAddress),
    Transition {
        image: u64,
        before: ResourceState,
        after: ResourceState,
    },
    SetDescriptorHeap(GpuAddress),
    SetRaytracingPipeline,
    DispatchRays(DispatchRaysDesc),
    CopyImage {
        source: u64,
        destination: u64,
    },
    BeginRenderPass {
        target: u64,
        clear_color: [f32; 4],
    },
    EndRenderPass,
    SetGraphicsPipeline,
    SetConstantBuffer {
        parameter: u32,
        address: GpuAddress,
    },
    SetVertexBuffer {
        address: GpuAddress,
        stride: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Debug, Default)]
pub struct MockCommandList {
    commands: Vec<Recorded>,
}

impl CommandList<MockDevice> for MockCommandList {
    fn build_acceleration_structure(&mut self, command: &BuildCommand<MockDevice>) {
        let inputs = match command.inputs {
            BuildInputs::Triangles(geometries) => RecordedInputs::Triangles(geometries.to_vec()),
            BuildInputs::Instances { descriptors, count } => {
                RecordedInputs::Instances { descriptors, count }
            }
        };
        self.commands.push(Recorded::Build {
            inputs,
            mode: command.mode,
            flags: command.flags,
            destination: command.destination.address,
            source: command.source.map(|source| source.address),
            scratch: command.scratch,
        });
    }

    fn uav_barrier(&mut self, structure: &MockStructure) {
        self.commands.push(Recorded::UavBarrier(structure.address));
    }

    fn transition_image(&mut self, image: &MockImage, before: ResourceState, after: ResourceState) {
        self.commands.push(Recorded::Transition {
            image: image.id,
            before,
            after,
        });
    }

    fn set_descriptor_heap(&mut self, heap: &MockHeap) {
        self.commands.push(Recorded::SetDescriptorHeap(heap.gpu_start));
    }

    fn set_raytracing_pipeline(&mut self, _pipeline: &MockPipeline) {
        self.commands.push(Recorded::SetRaytracingPipeline);
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        self.commands.push(Recorded::DispatchRays(*desc));
    }

    fn copy_image(&mut self, source: &MockImage, destination: &MockImage) {
        self.commands.push(Recorded::CopyImage {
            source: source.id,
            destination: destination.id,
        });
    }

    fn begin_render_pass(&mut self, target: &MockImage, clear_color: [f32; 4]) {
        self.commands.push(Recorded::BeginRenderPass {
            target: target.id,
            clear_color,
        });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(Recorded::EndRenderPass);
    }

    fn set_graphics_pipeline(&mut self, _pipeline: &MockGraphicsPipeline) {
        self.commands.push(Recorded::SetGraphicsPipeline);
    }

    fn set_graphics_constant_buffer(&mut self, parameter: u32, address: GpuAddress) {
        self.commands
            .push(Recorded::SetConstantBuffer { parameter, address });
    }

    fn set_vertex_buffer(&mut self, buffer: &MockBuffer, stride: u32) {
        self.commands.push(Recorded::SetVertexBuffer {
            address: buffer.address,
            stride,
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(Recorded::Draw {
            vertex_count,
            instance_count,
        });
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_tier(RaytracingTier::Tier1_1)
    }

    pub fn with_tier(tier: RaytracingTier) -> Self {
        Self {
            tier,
            budget: Cell::new(None),
            next_address: Cell::new(0x1_0000),
            next_id: Cell::new(1),
            memory: Rc::new(RefCell::new(HashMap::new())),
            image_states: RefCell::new(HashMap::new()),
            structures: RefCell::new(HashMap::new()),
            executed: RefCell::new(Vec::new()),
        }
    }

    pub fn with_memory_budget(self, bytes: u64) -> Self {
        self.budget.set(Some(bytes));
        self
    }

    pub fn executed(&self) -> Vec<Recorded> {
        self.executed.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.executed.borrow_mut().clear();
    }

    pub fn image_state(&self, image: &MockImage) -> Option<ResourceState> {
        self.image_states.borrow().get(&image.id).copied()
    }

    pub fn transitions_of(&self, image: &MockImage) -> Vec<(ResourceState, ResourceState)> {
        self.executed
            .borrow()
            .iter()
            .filter_map(|command| match command {
                Recorded::Transition {
                    image: id,
                    before,
                    after,
                } if *id == image.id => Some((*before, *after)),
                _ => None,
            })
            .collect()
    }

    /// What a trace against the structure would observe.
    pub fn structure_content(&self, structure: &MockStructure) -> Option<Vec<u8>> {
        self.structures
            .borrow()
            .get(&structure.address)
            .map(|built| built.content.clone())
    }

    fn id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn allocate(&self, label: &'static str, size: u64) -> Result<GpuAddress> {
        if let Some(budget) = self.budget.get() {
            if size > budget {
                return Err(Error::OutOfMemory { label, size });
            }
            self.budget.set(Some(budget - size));
        }
        let address = self.next_address.get();
        self.next_address.set(address + align_up(size.max(1), 256));
        Ok(address)
    }

    fn read(&self, address: GpuAddress, len: usize) -> Result<Vec<u8>> {
        let memory = self.memory.borrow();
        let data = memory
            .get(&address)
            .ok_or_else(|| Error::device(format!("no CPU visible buffer at {address:#x}")))?
            .borrow();
        data.get(..len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::device("read past the end of a buffer"))
    }

    fn apply(&self, command: &Recorded, pipeline_bound: &mut bool) -> Result<()> {
        match command {
            Recorded::Build {
                inputs,
                mode,
                flags,
                destination,
                source,
                ..
            } => {
                let content = match inputs {
                    RecordedInputs::Triangles(geometries) => format!("{geometries:?}").into_bytes(),
                    RecordedInputs::Instances { descriptors, count } => self.read(
                        *descriptors,
                        *count as usize * crate::acceleration_structure::INSTANCE_DESCRIPTOR_SIZE,
                    )?,
                };
                let mut structures = self.structures.borrow_mut();
                if *mode == BuildMode::Update {
                    let previous = structures
                        .get(destination)
                        .ok_or_else(|| Error::device("update of a structure that was never built"))?;
                    if !previous.allow_update || *source != Some(*destination) {
                        return Err(Error::device("invalid in-place update"));
                    }
                }
                structures.insert(
                    *destination,
                    BuiltStructure {
                        allow_update: flags.allow_update,
                        content,
                    },
                );
            }
            Recorded::Transition {
                image,
                before,
                after,
            } => {
                let mut states = self.image_states.borrow_mut();
                let state = states
                    .get_mut(image)
                    .ok_or_else(|| Error::device("transition of an unknown image"))?;
                if state != before {
                    return Err(Error::device(format!(
                        "image {image} is in {state:?}, barrier expects {before:?}"
                    )));
                }
                *state = *after;
            }
            Recorded::CopyImage {
                source,
                destination,
            } => {
                let states = self.image_states.borrow();
                if states.get(source) != Some(&ResourceState::CopySource)
                    || states.get(destination) != Some(&ResourceState::CopyDest)
                {
                    return Err(Error::device("copy between images in the wrong states"));
                }
            }
            Recorded::SetRaytracingPipeline => *pipeline_bound = true,
            Recorded::DispatchRays(_) if !*pipeline_bound => {
                return Err(Error::device("dispatch without a raytracing pipeline"));
            }
            _ => {}
        }
        Ok(())
    }
}

impl Device for MockDevice {
    type Buffer = MockBuffer;
    type Image = MockImage;
    type AccelerationStructure = MockStructure;
    type ShaderLibrary = MockLibrary;
    type RootSignature = MockRootSignature;
    type RaytracingPipeline = MockPipeline;
    type GraphicsPipeline = MockGraphicsPipeline;
    type DescriptorHeap = MockHeap;
    type Fence = MockFence;
    type CommandList = MockCommandList;

    fn raytracing_tier(&self) -> RaytracingTier {
        self.tier
    }

    fn shader_table_limits(&self) -> ShaderTableLimits {
        ShaderTableLimits {
            identifier_size: 32,
            record_alignment: 32,
            table_alignment: 64,
        }
    }

    fn descriptor_increment(&self) -> u32 {
        32
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<MockBuffer> {
        let address = self.allocate(desc.label, desc.size)?;
        let data = Rc::new(RefCell::new(vec![0; desc.size as usize]));
        if desc.heap == HeapKind::Upload {
            self.memory.borrow_mut().insert(address, data.clone());
        }
        Ok(MockBuffer {
            address,
            size: desc.size,
            heap: desc.heap,
            usage: desc.usage,
            initial_state: desc.initial_state,
            data,
        })
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<MockImage> {
        self.allocate(desc.label, desc.width as u64 * desc.height as u64 * 4)?;
        let id = self.id();
        self.image_states
            .borrow_mut()
            .insert(id, desc.initial_state);
        Ok(MockImage {
            id,
            width: desc.width,
            height: desc.height,
        })
    }

    fn prebuild_info(&self, inputs: &BuildInputs, _flags: BuildFlags) -> Result<PrebuildInfo> {
        let result_size = match inputs {
            BuildInputs::Triangles(geometries) => {
                256 + 64 * geometries
                    .iter()
                    .map(|geometry| geometry.primitive_count() as u64)
                    .sum::<u64>()
            }
            BuildInputs::Instances { count, .. } => 256 + 128 * *count as u64,
        };
        Ok(PrebuildInfo {
            result_size,
            scratch_size: result_size / 2,
            update_scratch_size: result_size / 4,
        })
    }

    fn create_acceleration_structure(
        &self,
        desc: &AccelerationStructureDesc,
    ) -> Result<MockStructure> {
        Ok(MockStructure {
            address: self.allocate(desc.label, desc.size)?,
            size: desc.size,
            level: desc.level,
        })
    }

    fn create_shader_library(&self, desc: &ShaderLibraryDesc) -> Result<MockLibrary> {
        if desc.exports.iter().any(|export| export.code.is_empty()) {
            return Err(Error::device(format!("library {} has empty bytecode", desc.name)));
        }
        Ok(MockLibrary {
            exports: desc
                .exports
                .iter()
                .map(|export| (export.name.clone(), export.stage))
                .collect(),
        })
    }

    fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<MockRootSignature> {
        Ok(MockRootSignature { desc: desc.clone() })
    }

    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc<Self>,
    ) -> Result<MockPipeline> {
        let mut identifiers = HashMap::new();
        let identifier = |name: &str| -> Vec<u8> { name.bytes().cycle().take(32).collect() };
        for library in &desc.libraries {
            for (name, stage) in &library.exports {
                if matches!(stage, ShaderStage::RayGeneration | ShaderStage::Miss) {
                    identifiers.insert(name.clone(), identifier(name));
                }
            }
        }
        for group in desc.hit_groups {
            identifiers.insert(group.name.clone(), identifier(&group.name));
        }
        let mut associations = Vec::new();
        for (export, index) in &desc.associations {
            let signature = desc
                .local_signatures
                .get(*index)
                .ok_or_else(|| Error::device("association to a missing signature"))?;
            associations.push((export.clone(), signature.desc.label));
        }
        Ok(MockPipeline {
            identifiers,
            associations,
            config: desc.config,
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<Self>,
    ) -> Result<MockGraphicsPipeline> {
        Ok(MockGraphicsPipeline {
            vertex_stride: desc.vertex_stride,
        })
    }

    fn create_descriptor_heap(&self, slots: &[DescriptorKind]) -> Result<MockHeap> {
        let gpu_start = self.allocate("descriptor heap", slots.len() as u64 * 32)?;
        Ok(MockHeap {
            kinds: slots.to_vec(),
            start: DescriptorHandle(0x8000_0000 + self.id() * 0x1000),
            gpu_start,
            slots: RefCell::new(vec![None; slots.len()]),
        })
    }

    fn write_descriptor(
        &self,
        heap: &MockHeap,
        handle: DescriptorHandle,
        view: DescriptorView<Self>,
    ) -> Result<()> {
        let increment = self.descriptor_increment() as u64;
        let distance = handle.0.wrapping_sub(heap.start.0);
        let slot = (distance / increment) as u32;
        if distance % increment != 0 || slot >= heap.capacity() {
            return Err(Error::HeapSlotOutOfRange {
                slot,
                capacity: heap.capacity(),
            });
        }
        if heap.kinds[slot as usize] != view.kind() {
            return Err(Error::device(format!(
                "slot {slot} holds a {} but a {} was written",
                heap.kinds[slot as usize].name(),
                view.kind().name()
            )));
        }
        let written = match view {
            DescriptorView::StorageImage(image) => Written::StorageImage(image.id),
            DescriptorView::AccelerationStructure(structure) => {
                Written::AccelerationStructure(structure.address)
            }
            DescriptorView::ConstantBuffer(buffer) => Written::ConstantBuffer(buffer.address),
        };
        heap.slots.borrow_mut()[slot as usize] = Some(written);
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<MockFence> {
        Ok(MockFence {
            value: Rc::new(Cell::new(initial_value)),
        })
    }

    fn begin_commands(&self) -> Result<MockCommandList> {
        Ok(MockCommandList::default())
    }

    fn execute(&self, commands: MockCommandList) -> Result<()> {
        let mut pipeline_bound = false;
        for command in &commands.commands {
            self.apply(command, &mut pipeline_bound)?;
        }
        self.executed.borrow_mut().extend(commands.commands);
        Ok(())
    }

    fn signal(&self, fence: &MockFence, value: u64) -> Result<()> {
        if value < fence.value.get() {
            return Err(Error::device("fence values must not decrease"));
        }
        fence.value.set(value);
        Ok(())
    }
}

/// Serves every shader file as its own name, except an optional missing one.
#[derive(Default)]
pub struct MockShaders {
    pub missing: Option<&'static str>,
}

impl ShaderSource for MockShaders {
    fn read(&self, file: &str) -> std::result::Result<Vec<u8>, crate::error::BoxedSource> {
        if self.missing == Some(file) {
            return Err(format!("{file} not found").into());
        }
        Ok(file.as_bytes().to_vec())
    }
}

/// Builds and executes a BLAS over a six vertex plane.
pub fn plane_blas(device: &MockDevice) -> Arc<BottomLevelAccelerationStructure<MockDevice>> {
    let vertices = device
        .create_upload_buffer("vertices", BufferUsage::Vertices, 6 * 28)
        .unwrap();
    let mut commands = device.begin_commands().unwrap();
    let blas = BottomLevelAccelerationStructure::build(
        device,
        &mut commands,
        &[MeshGeometry {
            vertices: (&vertices, 6),
            indices: None,
            vertex_stride: 28,
        }],
    )
    .unwrap();
    device.execute(commands).unwrap();
    Arc::new(blas)
}
