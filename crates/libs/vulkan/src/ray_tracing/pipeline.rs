use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use ash::vk;
use raytracing::{
    DescriptorKind, HitGroupDesc, PipelineConfig, RootParameter, RootSignatureDesc, ShaderStage,
};

use crate::{
    descriptor::heap_bindings, device::Device, pipeline::ENTRY_POINT, shader_stage_flags,
    DescriptorSetLayout, PipelineLayout, RayTracingContext, ShaderLibrary,
};

pub struct RayTracingPipelineCreateInfo<'a> {
    pub libraries: &'a [&'a ShaderLibrary],
    pub hit_groups: &'a [HitGroupDesc],
    pub local_signatures: &'a [&'a RootSignatureDesc],
    pub config: PipelineConfig,
}

pub struct RayTracingPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub(crate) layout: PipelineLayout,
    _heap_layout: DescriptorSetLayout,
    handles: HashMap<String, Vec<u8>>,
}

/// Union of the heap ranges every local signature declares, keyed by heap offset.
pub(crate) fn heap_slots(signatures: &[&RootSignatureDesc]) -> Result<BTreeMap<u32, DescriptorKind>> {
    let mut slots = BTreeMap::new();
    for signature in signatures {
        for parameter in &signature.parameters {
            let RootParameter::DescriptorTable(ranges) = parameter else {
                continue;
            };
            for range in ranges {
                match slots.insert(range.heap_offset, range.kind) {
                    Some(previous) if previous != range.kind => bail!(
                        "{}: heap offset {} bound as {} and {}",
                        signature.label,
                        range.heap_offset,
                        previous.name(),
                        range.kind.name()
                    ),
                    _ => {}
                }
            }
        }
    }
    Ok(slots)
}

impl RayTracingPipeline {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: &RayTracingContext,
        create_info: RayTracingPipelineCreateInfo,
    ) -> Result<Self> {
        let properties = &ray_tracing.pipeline_properties;

        let largest_record = create_info
            .local_signatures
            .iter()
            .map(|s| s.argument_size())
            .max()
            .unwrap_or_default()
            + properties.shader_group_handle_size as u64;
        if largest_record > properties.max_shader_group_stride as u64 {
            bail!(
                "shader records of {largest_record} bytes exceed the maximum stride {}",
                properties.max_shader_group_stride
            );
        }

        let bindings = heap_bindings(heap_slots(create_info.local_signatures)?);
        let heap_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let layout = PipelineLayout::new(device.clone(), &[&heap_layout], &[])?;

        let mut stages = vec![];
        let mut groups = vec![];
        let mut group_names = vec![];
        let mut closest_hits = HashMap::new();

        for library in create_info.libraries {
            for name in library.export_names() {
                let Some((module, stage)) = library.export(name) else {
                    continue;
                };
                let stage_index = stages.len() as u32;
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(shader_stage_flags(*stage))
                        .module(module.inner)
                        .name(ENTRY_POINT)
                        .build(),
                );

                match stage {
                    ShaderStage::RayGeneration | ShaderStage::Miss => {
                        groups.push(
                            general_group()
                                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                                .general_shader(stage_index)
                                .build(),
                        );
                        group_names.push(name.to_owned());
                    }
                    ShaderStage::ClosestHit => {
                        closest_hits.insert(name, stage_index);
                    }
                    ShaderStage::Vertex | ShaderStage::Pixel => bail!(
                        "{}: {name} is not a ray tracing stage",
                        library.name
                    ),
                }
            }
        }

        for hit_group in create_info.hit_groups {
            let closest_hit = closest_hits
                .get(hit_group.closest_hit.as_str())
                .ok_or_else(|| {
                    anyhow!(
                        "hit group {} references unknown shader {}",
                        hit_group.name,
                        hit_group.closest_hit
                    )
                })?;
            groups.push(
                general_group()
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .closest_hit_shader(*closest_hit)
                    .build(),
            );
            group_names.push(hit_group.name.clone());
        }

        let max_ray_recursion_depth = create_info
            .config
            .max_recursion_depth
            .min(properties.max_ray_recursion_depth);
        log::debug!(
            "Ray tracing pipeline: {} stages, {} groups, payload {} bytes, attributes {} bytes, recursion {}",
            stages.len(),
            groups.len(),
            create_info.config.max_payload_size,
            create_info.config.max_attribute_size,
            max_ray_recursion_depth
        );

        let pipe_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .layout(layout.inner)
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_ray_recursion_depth);

        let inner = unsafe {
            ray_tracing.pipeline_fn.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipe_info),
                None,
            )?
        }
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no ray tracing pipeline was created"))?;

        let handle_size = properties.shader_group_handle_size as usize;
        let data = unsafe {
            ray_tracing
                .pipeline_fn
                .get_ray_tracing_shader_group_handles(
                    inner,
                    0,
                    groups.len() as u32,
                    groups.len() * handle_size,
                )
        };
        let data = match data {
            Ok(data) => data,
            Err(err) => {
                unsafe { device.inner.destroy_pipeline(inner, None) };
                return Err(err.into());
            }
        };
        let handles = group_names
            .into_iter()
            .zip(data.chunks_exact(handle_size))
            .map(|(name, handle)| (name, handle.to_vec()))
            .collect();

        Ok(Self {
            device,
            inner,
            layout,
            _heap_layout: heap_layout,
            handles,
        })
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }
}

fn general_group<'a>() -> vk::RayTracingShaderGroupCreateInfoKHRBuilder<'a> {
    vk::RayTracingShaderGroupCreateInfoKHR::builder()
        .general_shader(vk::SHADER_UNUSED_KHR)
        .closest_hit_shader(vk::SHADER_UNUSED_KHR)
        .any_hit_shader(vk::SHADER_UNUSED_KHR)
        .intersection_shader(vk::SHADER_UNUSED_KHR)
}

impl raytracing::ShaderIdentifiers for RayTracingPipeline {
    fn shader_identifier(&self, export: &str) -> Option<&[u8]> {
        self.handles.get(export).map(Vec::as_slice)
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raytracing::{DescriptorRange, RootSignatureBuilder};

    fn table(label: &'static str, ranges: Vec<DescriptorRange>) -> RootSignatureDesc {
        RootSignatureDesc {
            label,
            parameters: vec![RootParameter::DescriptorTable(ranges)],
            local: true,
        }
    }

    #[test]
    fn heap_slots_merge_ranges_from_every_signature() {
        let ray_gen = table(
            "ray generation",
            vec![
                DescriptorRange {
                    kind: DescriptorKind::StorageImage,
                    register: 0,
                    heap_offset: 0,
                },
                DescriptorRange {
                    kind: DescriptorKind::AccelerationStructure,
                    register: 0,
                    heap_offset: 1,
                },
            ],
        );
        let hit = table(
            "hit",
            vec![DescriptorRange {
                kind: DescriptorKind::AccelerationStructure,
                register: 2,
                heap_offset: 1,
            }],
        );
        let miss = RootSignatureBuilder::local("miss").build();

        let slots = heap_slots(&[&ray_gen, &hit, &miss]).unwrap();
        assert_eq!(
            slots.into_iter().collect::<Vec<_>>(),
            vec![
                (0, DescriptorKind::StorageImage),
                (1, DescriptorKind::AccelerationStructure)
            ]
        );
    }

    #[test]
    fn heap_slots_reject_a_slot_bound_twice_with_different_kinds() {
        let first = table(
            "first",
            vec![DescriptorRange {
                kind: DescriptorKind::StorageImage,
                register: 0,
                heap_offset: 0,
            }],
        );
        let second = table(
            "second",
            vec![DescriptorRange {
                kind: DescriptorKind::ConstantBuffer,
                register: 0,
                heap_offset: 0,
            }],
        );

        assert!(heap_slots(&[&first, &second]).is_err());
    }
}
