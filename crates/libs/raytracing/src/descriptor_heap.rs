use crate::device::{
    DescriptorHeap, DescriptorKind, DescriptorRange, DescriptorView, Device, RootSignatureDesc,
};
use crate::error::{Error, Result};
use crate::pipeline::RootSignatureBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapSlot {
    OutputImage,
    SceneTlas,
    Camera,
}

impl HeapSlot {
    pub fn kind(self) -> DescriptorKind {
        match self {
            Self::OutputImage => DescriptorKind::StorageImage,
            Self::SceneTlas => DescriptorKind::AccelerationStructure,
            Self::Camera => DescriptorKind::ConstantBuffer,
        }
    }

    /// Register the ray generation shader reads the slot from (u0, t0, b0).
    pub fn register(self) -> u32 {
        0
    }
}

/// Positional slot order of the raytracing heap. The ray generation signature's table
/// ranges are generated from the same layout, so the two cannot disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    slots: [HeapSlot; 3],
}

impl Default for HeapLayout {
    fn default() -> Self {
        Self::RAYTRACING
    }
}

impl HeapLayout {
    pub const RAYTRACING: Self = Self {
        slots: [HeapSlot::OutputImage, HeapSlot::SceneTlas, HeapSlot::Camera],
    };

    pub fn slots(&self) -> &[HeapSlot] {
        &self.slots
    }

    pub fn offset_of(&self, slot: HeapSlot) -> Result<u32> {
        self.slots
            .iter()
            .position(|candidate| *candidate == slot)
            .map(|offset| offset as u32)
            .ok_or(Error::MissingHeapSlot(slot))
    }

    pub fn kinds(&self) -> Vec<DescriptorKind> {
        self.slots.iter().map(|slot| slot.kind()).collect()
    }

    pub fn ranges(&self) -> Vec<DescriptorRange> {
        self.slots
            .iter()
            .enumerate()
            .map(|(offset, slot)| DescriptorRange {
                kind: slot.kind(),
                register: slot.register(),
                heap_offset: offset as u32,
            })
            .collect()
    }

    pub fn ray_generation_signature(&self) -> RootSignatureDesc {
        RootSignatureBuilder::local("ray generation signature")
            .heap_ranges(self.ranges())
            .build()
    }
}

/// Resources the raytracing heap points at.
pub struct HeapResources<'a, D: Device> {
    pub output: &'a D::Image,
    pub tlas: &'a D::AccelerationStructure,
    pub camera: &'a D::Buffer,
}

impl<'a, D: Device> HeapResources<'a, D> {
    fn view(&self, slot: HeapSlot) -> DescriptorView<'a, D> {
        match slot {
            HeapSlot::OutputImage => DescriptorView::StorageImage(self.output),
            HeapSlot::SceneTlas => DescriptorView::AccelerationStructure(self.tlas),
            HeapSlot::Camera => DescriptorView::ConstantBuffer(self.camera),
        }
    }
}

/// Creates the shader visible heap and writes one descriptor per slot, in layout order,
/// advancing the handle by the device's descriptor increment.
pub fn compose_descriptor_heap<D: Device>(
    device: &D,
    layout: &HeapLayout,
    resources: &HeapResources<D>,
) -> Result<D::DescriptorHeap> {
    let heap = device.create_descriptor_heap(&layout.kinds())?;
    let capacity = heap.capacity();
    let increment = device.descriptor_increment();

    let mut handle = heap.cpu_start();
    for (slot, kind) in layout.slots().iter().enumerate() {
        if slot as u32 >= capacity {
            return Err(Error::HeapSlotOutOfRange {
                slot: slot as u32,
                capacity,
            });
        }
        device.write_descriptor(&heap, handle, resources.view(*kind))?;
        handle = handle.offset(1, increment);
    }

    log::info!(
        "Descriptor heap: {}",
        layout
            .slots()
            .iter()
            .enumerate()
            .map(|(slot, kind)| format!("{slot} = {} {kind:?}", kind.kind().name()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(heap)
}

/// Fails if two signatures bind different descriptor kinds at one heap offset.
pub fn check_heap_ranges<'a>(
    signatures: impl IntoIterator<Item = &'a RootSignatureDesc>,
) -> Result<()> {
    let mut bound: Vec<(u32, DescriptorKind)> = Vec::new();
    for range in signatures
        .into_iter()
        .flat_map(|signature| signature.heap_ranges())
    {
        let existing = bound
            .iter()
            .find(|(offset, _)| *offset == range.heap_offset)
            .map(|(_, kind)| *kind);
        match existing {
            Some(kind) if kind != range.kind => {
                return Err(Error::ConflictingHeapBinding {
                    offset: range.heap_offset,
                    first: kind.name(),
                    second: range.kind.name(),
                })
            }
            Some(_) => {}
            None => bound.push((range.heap_offset, range.kind)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ResourceAllocator;
    use crate::device::{Format, ImageDesc, ImageUsage, ResourceState};
    use crate::mock::{MockDevice, Written};
    use crate::pipeline::hit_signature;

    #[test]
    fn slots_are_uav_srv_cbv() {
        let device = MockDevice::new();
        let output = device
            .create_image(&ImageDesc {
                label: "output",
                width: 4,
                height: 4,
                format: Format::Rgba8Unorm,
                usage: ImageUsage::UnorderedAccess,
                initial_state: ResourceState::CopySource,
            })
            .unwrap();
        let tlas = device
            .create_result_structure("tlas", crate::device::AccelerationStructureLevel::Top, 256)
            .unwrap();
        let camera = device.create_constant_buffer("camera", 320).unwrap();

        let heap = compose_descriptor_heap(
            &device,
            &HeapLayout::RAYTRACING,
            &HeapResources {
                camera: &camera,
                tlas: &tlas,
                output: &output,
            },
        )
        .unwrap();

        assert_eq!(
            heap.written(),
            vec![
                Some(Written::StorageImage(output.id)),
                Some(Written::AccelerationStructure(
                    crate::device::GpuResource::gpu_address(&tlas)
                )),
                Some(Written::ConstantBuffer(
                    crate::device::GpuResource::gpu_address(&camera)
                )),
            ]
        );
    }

    #[test]
    fn ray_generation_ranges_follow_the_heap_layout() {
        let layout = HeapLayout::RAYTRACING;
        let signature = layout.ray_generation_signature();
        let ranges: Vec<_> = signature.heap_ranges().copied().collect();
        assert_eq!(ranges.len(), 3);
        for (offset, slot) in layout.slots().iter().enumerate() {
            assert_eq!(ranges[offset].heap_offset, offset as u32);
            assert_eq!(ranges[offset].kind, slot.kind());
            assert_eq!(ranges[offset].register, 0);
        }
    }

    #[test]
    fn hit_signature_agrees_with_the_heap() {
        let layout = HeapLayout::RAYTRACING;
        let hit = hit_signature("hit", layout.offset_of(HeapSlot::SceneTlas).unwrap());
        check_heap_ranges([&layout.ray_generation_signature(), &hit]).unwrap();

        let wrong = hit_signature("hit", layout.offset_of(HeapSlot::Camera).unwrap());
        assert!(matches!(
            check_heap_ranges([&layout.ray_generation_signature(), &wrong]),
            Err(Error::ConflictingHeapBinding { offset: 2, .. })
        ));
    }

    #[test]
    fn offsets_are_looked_up_by_slot() {
        let layout = HeapLayout::RAYTRACING;
        assert_eq!(layout.offset_of(HeapSlot::OutputImage).unwrap(), 0);
        assert_eq!(layout.offset_of(HeapSlot::SceneTlas).unwrap(), 1);
        assert_eq!(layout.offset_of(HeapSlot::Camera).unwrap(), 2);

        let without_tlas = HeapLayout {
            slots: [HeapSlot::OutputImage, HeapSlot::Camera, HeapSlot::Camera],
        };
        assert!(matches!(
            without_tlas.offset_of(HeapSlot::SceneTlas),
            Err(Error::MissingHeapSlot(HeapSlot::SceneTlas))
        ));
    }
}
