use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, DescriptorSetLayout};

pub struct PipelineLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::PipelineLayout,
}

impl PipelineLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layouts = descriptor_set_layouts
            .iter()
            .map(|l| l.inner)
            .collect::<Vec<_>>();

        let pipe_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&layouts)
            .push_constant_ranges(push_constant_ranges);
        let inner = unsafe {
            device
                .inner
                .create_pipeline_layout(&pipe_layout_info, None)?
        };

        Ok(Self { device, inner })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline_layout(self.inner, None) };
    }
}

/// Graphics stages read root constant buffers as 64-bit addresses from push constants.
pub(crate) const ROOT_ADDRESS_SIZE: u32 = std::mem::size_of::<u64>() as u32;
pub(crate) const ROOT_ADDRESS_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL_GRAPHICS;

/// A global signature becomes a pipeline layout whose push constants hold one address per
/// root descriptor. Local signatures only describe shader record arguments and have no
/// Vulkan object behind them.
pub struct RootSignature {
    pub desc: raytracing::RootSignatureDesc,
    pub(crate) layout: Option<PipelineLayout>,
}

impl RootSignature {
    pub(crate) fn new(device: Arc<Device>, desc: &raytracing::RootSignatureDesc) -> Result<Self> {
        use raytracing::RootParameter;

        let layout = if desc.local {
            None
        } else {
            if desc
                .parameters
                .iter()
                .any(|p| matches!(p, RootParameter::DescriptorTable(_)))
            {
                anyhow::bail!(
                    "{}: descriptor tables are only supported in local signatures",
                    desc.label
                );
            }
            let size = desc.parameters.len() as u32 * ROOT_ADDRESS_SIZE;
            let ranges = (size > 0)
                .then(|| {
                    vk::PushConstantRange::builder()
                        .stage_flags(ROOT_ADDRESS_STAGES)
                        .offset(0)
                        .size(size)
                        .build()
                })
                .into_iter()
                .collect::<Vec<_>>();
            Some(PipelineLayout::new(device, &[], &ranges)?)
        };

        Ok(Self {
            desc: desc.clone(),
            layout,
        })
    }
}
