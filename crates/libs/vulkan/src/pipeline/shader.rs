use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use ash::vk;
use raytracing::ShaderStage;

use crate::{device::Device, utils::read_shader_from_bytes};

pub struct ShaderModule {
    device: Arc<Device>,
    pub(crate) inner: vk::ShaderModule,
}

impl ShaderModule {
    pub(crate) fn from_bytes(device: Arc<Device>, source: &[u8]) -> Result<Self> {
        let source = read_shader_from_bytes(source)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&source);
        let inner = unsafe { device.inner.create_shader_module(&create_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.inner.destroy_shader_module(self.inner, None);
        }
    }
}

pub(crate) fn shader_stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
        ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
        ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
    }
}

/// SPIR-V has no multi-entry libraries in the DXIL sense, so every export is its own module
/// with a `main` entry point.
pub struct ShaderLibrary {
    pub name: String,
    pub(crate) exports: HashMap<String, (ShaderModule, ShaderStage)>,
}

impl ShaderLibrary {
    pub(crate) fn new(
        device: Arc<Device>,
        name: &str,
        exports: &[raytracing::ShaderExport],
    ) -> Result<Self> {
        let exports = exports
            .iter()
            .map(|export| {
                let module = ShaderModule::from_bytes(device.clone(), &export.code)?;
                Ok((export.name.clone(), (module, export.stage)))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            name: name.to_owned(),
            exports,
        })
    }

    pub(crate) fn export(&self, name: &str) -> Option<&(ShaderModule, ShaderStage)> {
        self.exports.get(name)
    }

    /// Export names in a stable order.
    pub fn export_names(&self) -> Vec<&str> {
        let mut names = self.exports.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}
