use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use raytracing::{DescriptorHandle, DescriptorKind, GpuAddress};

use crate::{device::Device, AccelerationStructure, Buffer};

/// Every stage of the ray tracing pipeline may read the heap.
pub(crate) const RAY_TRACING_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

pub(crate) fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        DescriptorKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

/// One binding per heap slot, the binding number being the slot's offset from the heap start.
pub(crate) fn heap_bindings(
    slots: impl IntoIterator<Item = (u32, DescriptorKind)>,
) -> Vec<vk::DescriptorSetLayoutBinding> {
    slots
        .into_iter()
        .map(|(binding, kind)| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type(kind))
                .descriptor_count(1)
                .stage_flags(RAY_TRACING_STAGES)
                .build()
        })
        .collect()
}

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<Self> {
        let dsl_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let inner = unsafe { device.inner.create_descriptor_set_layout(&dsl_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .inner
                .destroy_descriptor_set_layout(self.inner, None);
        }
    }
}

pub struct DescriptorPool {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorPool,
}

impl DescriptorPool {
    pub(crate) fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let inner = unsafe { device.inner.create_descriptor_pool(&pool_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn allocate_set(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSet> {
        let sets_alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.inner)
            .set_layouts(std::slice::from_ref(&layout.inner));
        let inner = unsafe {
            self.device
                .inner
                .allocate_descriptor_sets(&sets_alloc_info)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("descriptor pool returned no set"))?;

        Ok(DescriptorSet {
            device: self.device.clone(),
            inner,
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_descriptor_pool(self.inner, None) };
    }
}

pub struct DescriptorSet {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSet,
}

impl DescriptorSet {
    pub fn update(&self, write: WriteDescriptorSet) {
        let base = vk::WriteDescriptorSet::builder()
            .dst_set(self.inner)
            .dst_binding(write.binding);

        match write.kind {
            WriteDescriptorSetKind::StorageImage { view, layout } => {
                let img_info = vk::DescriptorImageInfo::builder()
                    .image_view(view)
                    .image_layout(layout)
                    .build();
                let descriptor_write = base
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(&img_info));
                self.write(&descriptor_write);
            }
            WriteDescriptorSetKind::AccelerationStructure {
                acceleration_structure,
            } => {
                let mut write_set_as = vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                    .acceleration_structures(std::slice::from_ref(&acceleration_structure.inner));
                let mut descriptor_write = base
                    .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                    .push_next(&mut write_set_as)
                    .build();
                descriptor_write.descriptor_count = 1;
                self.write(&descriptor_write);
            }
            WriteDescriptorSetKind::UniformBuffer { buffer } => {
                let buffer_info = vk::DescriptorBufferInfo::builder()
                    .buffer(buffer.inner)
                    .range(vk::WHOLE_SIZE)
                    .build();
                let descriptor_write = base
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_info));
                self.write(&descriptor_write);
            }
        }
    }

    fn write(&self, descriptor_write: &vk::WriteDescriptorSet) {
        unsafe {
            self.device
                .inner
                .update_descriptor_sets(std::slice::from_ref(descriptor_write), &[])
        };
    }
}

#[derive(Clone, Copy)]
pub struct WriteDescriptorSet<'a> {
    pub binding: u32,
    pub kind: WriteDescriptorSetKind<'a>,
}

#[derive(Clone, Copy)]
pub enum WriteDescriptorSetKind<'a> {
    StorageImage {
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    AccelerationStructure {
        acceleration_structure: &'a AccelerationStructure,
    },
    UniformBuffer {
        buffer: &'a Buffer,
    },
}

/// Shader visible heap backed by a single descriptor set. Handles are binding numbers, so
/// the increment between slots is one and the GPU start is the raw set handle.
pub struct DescriptorHeapSet {
    pub(crate) set: DescriptorSet,
    _pool: DescriptorPool,
    pub(crate) layout: DescriptorSetLayout,
    slots: Vec<DescriptorKind>,
}

impl DescriptorHeapSet {
    pub(crate) fn new(device: Arc<Device>, slots: &[DescriptorKind]) -> Result<Self> {
        let bindings = heap_bindings(slots.iter().copied().enumerate().map(|(i, k)| (i as u32, k)));
        let layout = DescriptorSetLayout::new(device.clone(), &bindings)?;

        let pool_sizes = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorPoolSize::builder()
                    .ty(binding.descriptor_type)
                    .descriptor_count(1)
                    .build()
            })
            .collect::<Vec<_>>();
        let pool = DescriptorPool::new(device, 1, &pool_sizes)?;
        let set = pool.allocate_set(&layout)?;

        Ok(Self {
            set,
            _pool: pool,
            layout,
            slots: slots.to_vec(),
        })
    }

    pub fn slot_kind(&self, handle: DescriptorHandle) -> Option<DescriptorKind> {
        usize::try_from(handle.0)
            .ok()
            .and_then(|slot| self.slots.get(slot).copied())
    }
}

impl raytracing::DescriptorHeap for DescriptorHeapSet {
    fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn cpu_start(&self) -> DescriptorHandle {
        DescriptorHandle(0)
    }

    fn gpu_start(&self) -> GpuAddress {
        use vk::Handle;
        self.set.inner.as_raw()
    }
}
