use crate::device::{DescriptorKind, DescriptorRange, RootParameter, RootSignatureDesc};
use crate::shader_binding_table::ROOT_ARGUMENT_SIZE;

/// Roles a local root signature is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureRole {
    RayGeneration,
    Miss,
    Hit,
    Shadow,
}

impl SignatureRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::RayGeneration => "ray generation signature",
            Self::Miss => "miss signature",
            Self::Hit => "hit signature",
            Self::Shadow => "shadow signature",
        }
    }
}

pub struct RootSignatureBuilder {
    label: &'static str,
    parameters: Vec<RootParameter>,
    local: bool,
}

impl RootSignatureBuilder {
    pub fn local(label: &'static str) -> Self {
        Self {
            label,
            parameters: Vec::new(),
            local: true,
        }
    }

    pub fn global(label: &'static str) -> Self {
        Self {
            local: false,
            ..Self::local(label)
        }
    }

    pub fn shader_resource(mut self, register: u32) -> Self {
        self.parameters
            .push(RootParameter::ShaderResource { register });
        self
    }

    pub fn constant_buffer(mut self, register: u32) -> Self {
        self.parameters
            .push(RootParameter::ConstantBuffer { register });
        self
    }

    pub fn heap_ranges(mut self, ranges: Vec<DescriptorRange>) -> Self {
        self.parameters.push(RootParameter::DescriptorTable(ranges));
        self
    }

    pub fn build(self) -> RootSignatureDesc {
        RootSignatureDesc {
            label: self.label,
            parameters: self.parameters,
            local: self.local,
        }
    }
}

impl RootSignatureDesc {
    /// Bytes this signature's arguments occupy in a shader record.
    pub fn argument_size(&self) -> u64 {
        self.parameters.len() as u64 * ROOT_ARGUMENT_SIZE
    }

    /// Every heap range referenced by a descriptor table parameter.
    pub fn heap_ranges(&self) -> impl Iterator<Item = &DescriptorRange> {
        self.parameters.iter().flat_map(|parameter| match parameter {
            RootParameter::DescriptorTable(ranges) => ranges.as_slice(),
            _ => &[][..],
        })
    }
}

/// Vertex buffer (t0), index buffer (t1), constants (b0) and the scene TLAS through the
/// heap (t2) for shadow rays.
pub fn hit_signature(label: &'static str, tlas_heap_offset: u32) -> RootSignatureDesc {
    RootSignatureBuilder::local(label)
        .shader_resource(0)
        .shader_resource(1)
        .constant_buffer(0)
        .heap_ranges(vec![DescriptorRange {
            kind: DescriptorKind::AccelerationStructure,
            register: 2,
            heap_offset: tlas_heap_offset,
        }])
        .build()
}

pub fn miss_signature() -> RootSignatureDesc {
    RootSignatureBuilder::local(SignatureRole::Miss.label()).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_signature_layout() {
        let desc = hit_signature("hit", 1);
        assert!(desc.local);
        assert_eq!(desc.argument_size(), 32);
        assert_eq!(
            desc.heap_ranges().collect::<Vec<_>>(),
            vec![&DescriptorRange {
                kind: DescriptorKind::AccelerationStructure,
                register: 2,
                heap_offset: 1,
            }]
        );
    }

    #[test]
    fn miss_signature_is_empty() {
        let desc = miss_signature();
        assert_eq!(desc.argument_size(), 0);
        assert_eq!(desc.heap_ranges().count(), 0);
    }
}
