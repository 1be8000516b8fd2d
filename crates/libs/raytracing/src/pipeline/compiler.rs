use std::collections::BTreeMap;

use crate::device::{
    Device, HitGroupDesc, PipelineConfig, RaytracingPipelineDesc, RootSignatureDesc,
    ShaderExport, ShaderIdentifiers, ShaderLibraryDesc, ShaderStage,
};
use crate::error::{Error, Result};
use crate::pipeline::{AssociationMap, AssociationScope, RootSignatureBuilder, SignatureRole};

/// A compiled raytracing pipeline together with the signatures and libraries it was
/// created from, which stay alive as long as the pipeline does.
pub struct CompiledPipeline<D: Device> {
    pipeline: D::RaytracingPipeline,
    associations: BTreeMap<String, SignatureRole>,
    signatures: BTreeMap<SignatureRole, (RootSignatureDesc, D::RootSignature)>,
    _global_signature: D::RootSignature,
    _libraries: Vec<D::ShaderLibrary>,
    config: PipelineConfig,
}

impl<D: Device> CompiledPipeline<D> {
    pub fn pipeline(&self) -> &D::RaytracingPipeline {
        &self.pipeline
    }

    /// Final export to signature map, after override resolution.
    pub fn associations(&self) -> &BTreeMap<String, SignatureRole> {
        &self.associations
    }

    pub fn signature(&self, role: SignatureRole) -> Option<&RootSignatureDesc> {
        self.signatures.get(&role).map(|(desc, _)| desc)
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }
}

impl<D: Device> ShaderIdentifiers for CompiledPipeline<D> {
    fn shader_identifier(&self, export: &str) -> Option<&[u8]> {
        self.pipeline.shader_identifier(export)
    }
}

pub struct RaytracingPipelineCompiler<'d, D: Device> {
    device: &'d D,
    libraries: Vec<D::ShaderLibrary>,
    exports: BTreeMap<String, ShaderStage>,
    hit_groups: Vec<HitGroupDesc>,
    signatures: BTreeMap<SignatureRole, (RootSignatureDesc, D::RootSignature)>,
    associations: AssociationMap<SignatureRole>,
    config: PipelineConfig,
}

impl<'d, D: Device> RaytracingPipelineCompiler<'d, D> {
    pub fn new(device: &'d D, config: PipelineConfig) -> Self {
        Self {
            device,
            libraries: Vec::new(),
            exports: BTreeMap::new(),
            hit_groups: Vec::new(),
            signatures: BTreeMap::new(),
            associations: AssociationMap::new(),
            config,
        }
    }

    pub fn add_library(&mut self, name: &str, exports: Vec<ShaderExport>) -> Result<()> {
        for export in &exports {
            if self.is_registered(&export.name) {
                return Err(Error::DuplicateExport(export.name.clone()));
            }
        }
        let library = self.device.create_shader_library(&ShaderLibraryDesc {
            name,
            exports: &exports,
        })?;
        for export in exports {
            self.exports.insert(export.name, export.stage);
        }
        self.libraries.push(library);
        Ok(())
    }

    pub fn add_hit_group(&mut self, name: &str, closest_hit: &str) -> Result<()> {
        if self.is_registered(name) {
            return Err(Error::DuplicateExport(name.to_owned()));
        }
        if self.exports.get(closest_hit) != Some(&ShaderStage::ClosestHit) {
            return Err(Error::UnknownHitGroupShader {
                hit_group: name.to_owned(),
                shader: closest_hit.to_owned(),
            });
        }
        self.hit_groups.push(HitGroupDesc {
            name: name.to_owned(),
            closest_hit: closest_hit.to_owned(),
        });
        Ok(())
    }

    pub fn add_root_signature(&mut self, role: SignatureRole, desc: RootSignatureDesc) -> Result<()> {
        let signature = self.device.create_root_signature(&desc)?;
        self.signatures.insert(role, (desc, signature));
        Ok(())
    }

    pub fn associate(&mut self, role: SignatureRole, exports: &[&str], scope: AssociationScope) {
        self.associations.associate(role, exports, scope);
    }

    pub fn compile(self) -> Result<CompiledPipeline<D>> {
        let associations = self.associations.resolve();
        for (export, role) in &associations {
            if !self.is_registered(export) {
                return Err(Error::UnknownExport(export.clone()));
            }
            if !self.signatures.contains_key(role) {
                return Err(Error::MissingSignatureRole(format!("{role:?}")));
            }
        }
        let entry_points = self
            .exports
            .iter()
            .filter(|(_, stage)| matches!(stage, ShaderStage::RayGeneration | ShaderStage::Miss))
            .map(|(name, _)| name);
        let groups = self.hit_groups.iter().map(|group| &group.name);
        if let Some(unbound) = entry_points
            .chain(groups)
            .find(|name| !associations.contains_key(*name))
        {
            return Err(Error::MissingRootSignature(unbound.clone()));
        }

        let global_signature = self
            .device
            .create_root_signature(&RootSignatureBuilder::global("global signature").build())?;

        let roles: Vec<SignatureRole> = self.signatures.keys().copied().collect();
        let pipeline = {
            let desc = RaytracingPipelineDesc::<D> {
                libraries: self.libraries.iter().collect(),
                hit_groups: &self.hit_groups,
                global_signature: &global_signature,
                local_signatures: self.signatures.values().map(|(_, signature)| signature).collect(),
                associations: associations
                    .iter()
                    .filter_map(|(export, role)| {
                        let index = roles.iter().position(|candidate| candidate == role)?;
                        Some((export.clone(), index))
                    })
                    .collect(),
                config: self.config,
            };
            self.device.create_raytracing_pipeline(&desc)?
        };

        log::info!(
            "Raytracing pipeline compiled: {} exports, {} hit groups, {} signatures, \
             payload {} bytes, attributes {} bytes, recursion depth {}",
            self.exports.len(),
            self.hit_groups.len(),
            self.signatures.len(),
            self.config.max_payload_size,
            self.config.max_attribute_size,
            self.config.max_recursion_depth
        );

        Ok(CompiledPipeline {
            pipeline,
            associations,
            signatures: self.signatures,
            _global_signature: global_signature,
            _libraries: self.libraries,
            config: self.config,
        })
    }

    fn is_registered(&self, name: &str) -> bool {
        self.exports.contains_key(name) || self.hit_groups.iter().any(|group| group.name == name)
    }
}
