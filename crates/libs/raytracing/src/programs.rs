//! Shader programs of the renderer and the pipeline they are compiled into.

use crate::descriptor_heap::{check_heap_ranges, HeapLayout, HeapSlot};
use crate::device::{Device, PipelineConfig, ShaderExport, ShaderStage};
use crate::error::{BoxedSource, Error, Result};
use crate::pipeline::{
    hit_signature, miss_signature, AssociationScope, CompiledPipeline, RaytracingPipelineCompiler,
    SignatureRole,
};

pub const RAY_GEN: &str = "RayGen";
pub const MISS: &str = "Miss";
pub const SHADOW_MISS: &str = "ShadowMiss";
pub const CLOSEST_HIT: &str = "ClosestHit";
pub const PLANE_CLOSEST_HIT: &str = "PlaneClosestHit";
pub const SHADOW_CLOSEST_HIT: &str = "ShadowClosestHit";
pub const HIT_GROUP: &str = "HitGroup";
pub const PLANE_HIT_GROUP: &str = "PlaneHitGroup";
pub const SHADOW_HIT_GROUP: &str = "ShadowHitGroup";

pub const PRIMARY_RAY: u32 = 0;
pub const SHADOW_RAY: u32 = 1;
pub const RAY_TYPE_COUNT: u32 = 2;

/// Color and hit distance.
pub const MAX_PAYLOAD_SIZE: u32 = 4 * 4;
/// Barycentrics.
pub const MAX_ATTRIBUTE_SIZE: u32 = 2 * 4;

pub const RASTER_VERTEX_SHADER: &str = "plane.vert.spv";
pub const RASTER_PIXEL_SHADER: &str = "plane.frag.spv";

/// Where compiled shader binaries come from.
pub trait ShaderSource {
    fn read(&self, file: &str) -> std::result::Result<Vec<u8>, BoxedSource>;
}

struct Library {
    name: &'static str,
    exports: &'static [(&'static str, ShaderStage, &'static str)],
}

const LIBRARIES: [Library; 4] = [
    Library {
        name: "RayGen",
        exports: &[(RAY_GEN, ShaderStage::RayGeneration, "raygen.rgen.spv")],
    },
    Library {
        name: "Miss",
        exports: &[(MISS, ShaderStage::Miss, "miss.rmiss.spv")],
    },
    Library {
        name: "Hit",
        exports: &[
            (CLOSEST_HIT, ShaderStage::ClosestHit, "hit.rchit.spv"),
            (PLANE_CLOSEST_HIT, ShaderStage::ClosestHit, "plane_hit.rchit.spv"),
        ],
    },
    Library {
        name: "ShadowRay",
        exports: &[
            (SHADOW_CLOSEST_HIT, ShaderStage::ClosestHit, "shadow_hit.rchit.spv"),
            (SHADOW_MISS, ShaderStage::Miss, "shadow.rmiss.spv"),
        ],
    },
];

const HIT_GROUPS: [(&str, &str); 3] = [
    (HIT_GROUP, CLOSEST_HIT),
    (PLANE_HIT_GROUP, PLANE_CLOSEST_HIT),
    (SHADOW_HIT_GROUP, SHADOW_CLOSEST_HIT),
];

/// Reads a shader binary, any failure is a [`Error::ShaderLoad`].
pub fn load_shader(shaders: &dyn ShaderSource, file: &str) -> Result<Vec<u8>> {
    shaders.read(file).map_err(|source| Error::ShaderLoad {
        path: file.to_owned(),
        source,
    })
}

/// Compiles every raytracing library of the renderer into one pipeline.
pub fn compile_raytracing_pipeline<D: Device>(
    device: &D,
    shaders: &dyn ShaderSource,
    heap: &HeapLayout,
    max_recursion_depth: u32,
) -> Result<CompiledPipeline<D>> {
    let mut compiler = RaytracingPipelineCompiler::new(
        device,
        PipelineConfig {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_attribute_size: MAX_ATTRIBUTE_SIZE,
            max_recursion_depth,
        },
    );

    for library in &LIBRARIES {
        let exports = library
            .exports
            .iter()
            .map(|(name, stage, file)| {
                Ok(ShaderExport {
                    name: (*name).to_owned(),
                    stage: *stage,
                    code: load_shader(shaders, file)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        compiler.add_library(library.name, exports)?;
    }
    for (name, closest_hit) in HIT_GROUPS {
        compiler.add_hit_group(name, closest_hit)?;
    }

    let tlas_offset = heap.offset_of(HeapSlot::SceneTlas)?;
    let signatures = [
        (SignatureRole::RayGeneration, heap.ray_generation_signature()),
        (SignatureRole::Miss, miss_signature()),
        (SignatureRole::Hit, hit_signature(SignatureRole::Hit.label(), tlas_offset)),
        (
            SignatureRole::Shadow,
            hit_signature(SignatureRole::Shadow.label(), tlas_offset),
        ),
    ];
    check_heap_ranges(signatures.iter().map(|(_, desc)| desc))?;
    for (role, desc) in signatures {
        compiler.add_root_signature(role, desc)?;
    }

    compiler.associate(SignatureRole::RayGeneration, &[RAY_GEN], AssociationScope::Specific);
    compiler.associate(
        SignatureRole::Shadow,
        &[SHADOW_HIT_GROUP],
        AssociationScope::Specific,
    );
    compiler.associate(SignatureRole::Miss, &[MISS, SHADOW_MISS], AssociationScope::Shared);
    compiler.associate(
        SignatureRole::Hit,
        &[HIT_GROUP, PLANE_HIT_GROUP],
        AssociationScope::Shared,
    );

    compiler.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockShaders};

    #[test]
    fn every_entry_point_resolves_to_its_role() {
        let device = MockDevice::new();
        let compiled = compile_raytracing_pipeline(
            &device,
            &MockShaders::default(),
            &HeapLayout::RAYTRACING,
            2,
        )
        .unwrap();

        let expected = [
            (HIT_GROUP, SignatureRole::Hit),
            (MISS, SignatureRole::Miss),
            (PLANE_HIT_GROUP, SignatureRole::Hit),
            (RAY_GEN, SignatureRole::RayGeneration),
            (SHADOW_HIT_GROUP, SignatureRole::Shadow),
            (SHADOW_MISS, SignatureRole::Miss),
        ];
        let resolved: Vec<_> = compiled
            .associations()
            .iter()
            .map(|(export, role)| (export.as_str(), *role))
            .collect();
        assert_eq!(resolved, expected);

        let by_label: Vec<_> = compiled.pipeline().associations.clone();
        assert!(by_label.contains(&(SHADOW_HIT_GROUP.to_owned(), "shadow signature")));
        assert!(by_label.contains(&(PLANE_HIT_GROUP.to_owned(), "hit signature")));
        assert_eq!(compiled.config().max_payload_size, 16);
        assert_eq!(compiled.config().max_attribute_size, 8);
        assert_eq!(compiled.config().max_recursion_depth, 2);
    }

    #[test]
    fn every_sbt_program_has_an_identifier() {
        let device = MockDevice::new();
        let compiled = compile_raytracing_pipeline(
            &device,
            &MockShaders::default(),
            &HeapLayout::RAYTRACING,
            2,
        )
        .unwrap();
        for export in [
            RAY_GEN,
            MISS,
            SHADOW_MISS,
            HIT_GROUP,
            PLANE_HIT_GROUP,
            SHADOW_HIT_GROUP,
        ] {
            assert!(
                crate::device::ShaderIdentifiers::shader_identifier(&compiled, export).is_some(),
                "{export}"
            );
        }
    }

    #[test]
    fn a_missing_shader_binary_is_fatal() {
        let device = MockDevice::new();
        let result = compile_raytracing_pipeline(
            &device,
            &MockShaders {
                missing: Some("shadow.rmiss.spv"),
            },
            &HeapLayout::RAYTRACING,
            2,
        );
        assert!(matches!(
            result,
            Err(Error::ShaderLoad { path, .. }) if path == "shadow.rmiss.spv"
        ));
    }
}
