use crate::acceleration_structure::InstanceTable;
use crate::allocator::{align_up, ResourceAllocator};
use crate::device::{
    BufferUsage, DescriptorHeap, Device, DispatchRaysDesc, GpuAddress, GpuResource,
    ShaderIdentifiers, ShaderTableLimits, TableRegion,
};
use crate::error::{Error, Result};

/// Every root argument is a 64-bit descriptor table pointer or GPU virtual address.
pub const ROOT_ARGUMENT_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootArgument {
    /// Start of the shader visible descriptor heap bound at dispatch time.
    HeapBase,
    Address(GpuAddress),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Program {
    name: String,
    arguments: Vec<RootArgument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    RayGeneration,
    Miss,
    HitGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionLayout {
    pub offset: u64,
    pub stride: u64,
    pub count: u32,
    pub size: u64,
}

impl SectionLayout {
    fn new(offset: u64, programs: &[Program], limits: &ShaderTableLimits) -> Self {
        let arguments = programs
            .iter()
            .map(|program| program.arguments.len() as u64)
            .max()
            .unwrap_or(0);
        let stride = align_up(
            limits.identifier_size as u64 + arguments * ROOT_ARGUMENT_SIZE,
            limits.record_alignment,
        );
        let count = programs.len() as u32;
        Self {
            offset,
            stride,
            count,
            size: align_up(stride * count as u64, limits.table_alignment),
        }
    }

    pub fn record_offset(&self, index: u32) -> Option<u64> {
        (index < self.count).then(|| self.offset + index as u64 * self.stride)
    }
}

/// Section placement inside the table buffer. Every section starts on the table alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub ray_generation: SectionLayout,
    pub miss: SectionLayout,
    pub hit_group: SectionLayout,
    pub total_size: u64,
}

impl TableLayout {
    pub fn section(&self, section: Section) -> &SectionLayout {
        match section {
            Section::RayGeneration => &self.ray_generation,
            Section::Miss => &self.miss,
            Section::HitGroup => &self.hit_group,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ShaderBindingTableBuilder {
    ray_generation: Vec<Program>,
    miss: Vec<Program>,
    hit_groups: Vec<Program>,
}

impl ShaderBindingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ray_generation_program(&mut self, name: &str, arguments: Vec<RootArgument>) {
        self.ray_generation.push(Program {
            name: name.to_owned(),
            arguments,
        });
    }

    /// Miss programs are indexed by ray type, in insertion order.
    pub fn add_miss_program(&mut self, name: &str, arguments: Vec<RootArgument>) {
        self.miss.push(Program {
            name: name.to_owned(),
            arguments,
        });
    }

    pub fn add_hit_group(&mut self, name: &str, arguments: Vec<RootArgument>) {
        self.hit_groups.push(Program {
            name: name.to_owned(),
            arguments,
        });
    }

    /// Appends one record per instance and ray type, in the order the instances' hit
    /// group offsets address them.
    pub fn add_instance_hit_groups<D: Device>(&mut self, instances: &InstanceTable<D>) {
        for binding in instances.hit_group_records() {
            self.add_hit_group(&binding.hit_group, binding.arguments.clone());
        }
    }

    pub fn layout(&self, limits: &ShaderTableLimits) -> Result<TableLayout> {
        if self.ray_generation.len() != 1 {
            return Err(Error::RayGenRecordCount(self.ray_generation.len()));
        }
        let ray_generation = SectionLayout::new(0, &self.ray_generation, limits);
        // A single ray generation record spans its whole section.
        let ray_generation = SectionLayout {
            stride: ray_generation.size,
            ..ray_generation
        };
        let miss = SectionLayout::new(ray_generation.size, &self.miss, limits);
        let hit_group = SectionLayout::new(miss.offset + miss.size, &self.hit_groups, limits);
        Ok(TableLayout {
            ray_generation,
            miss,
            hit_group,
            total_size: hit_group.offset + hit_group.size,
        })
    }

    /// Writes every record into a new upload buffer. Fails if any program is not an
    /// export of `pipeline`.
    pub fn build<D: Device>(
        self,
        device: &D,
        pipeline: &impl ShaderIdentifiers,
        heap: &D::DescriptorHeap,
    ) -> Result<ShaderBindingTable<D>> {
        let limits = device.shader_table_limits();
        let layout = self.layout(&limits)?;
        let identifier_size = limits.identifier_size as usize;

        let mut data = vec![0u8; layout.total_size as usize];
        let sections = [
            (&self.ray_generation, &layout.ray_generation),
            (&self.miss, &layout.miss),
            (&self.hit_groups, &layout.hit_group),
        ];
        for (programs, section) in sections {
            for (index, program) in programs.iter().enumerate() {
                let identifier = pipeline
                    .shader_identifier(&program.name)
                    .filter(|identifier| identifier.len() >= identifier_size)
                    .ok_or_else(|| Error::UnknownExport(program.name.clone()))?;
                let start = (section.offset + index as u64 * section.stride) as usize;
                data[start..start + identifier_size]
                    .copy_from_slice(&identifier[..identifier_size]);

                let mut cursor = start + identifier_size;
                for argument in &program.arguments {
                    let value = match argument {
                        RootArgument::HeapBase => heap.gpu_start(),
                        RootArgument::Address(address) => *address,
                    };
                    data[cursor..cursor + ROOT_ARGUMENT_SIZE as usize]
                        .copy_from_slice(&value.to_le_bytes());
                    cursor += ROOT_ARGUMENT_SIZE as usize;
                }
                log::debug!(
                    "SBT record {} at {start}, {} arguments",
                    program.name,
                    program.arguments.len()
                );
            }
        }

        let buffer = device.create_upload_buffer_with_data(
            "shader binding table",
            BufferUsage::ShaderBindingTable,
            &data,
        )?;
        log::info!(
            "Shader binding table: {} bytes, strides {}/{}/{}, {} miss and {} hit group records",
            layout.total_size,
            layout.ray_generation.stride,
            layout.miss.stride,
            layout.hit_group.stride,
            layout.miss.count,
            layout.hit_group.count
        );

        Ok(ShaderBindingTable {
            buffer,
            layout,
            hit_groups: self.hit_groups.into_iter().map(|program| program.name).collect(),
        })
    }
}

pub struct ShaderBindingTable<D: Device> {
    buffer: D::Buffer,
    layout: TableLayout,
    hit_groups: Vec<String>,
}

impl<D: Device> ShaderBindingTable<D> {
    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn region(&self, section: Section) -> TableRegion {
        let layout = self.layout.section(section);
        TableRegion {
            start: self.buffer.gpu_address() + layout.offset,
            size: layout.size,
            stride: layout.stride,
        }
    }

    pub fn dispatch_desc(&self, width: u32, height: u32) -> DispatchRaysDesc {
        DispatchRaysDesc {
            ray_generation: self.region(Section::RayGeneration),
            miss: self.region(Section::Miss),
            hit_group: self.region(Section::HitGroup),
            width,
            height,
            depth: 1,
        }
    }

    /// Byte offset and hit group name of the record a hit group index selects.
    pub fn hit_group_record(&self, index: u32) -> Option<(u64, &str)> {
        let offset = self.layout.hit_group.record_offset(index)?;
        Some((offset, self.hit_groups.get(index as usize)?.as_str()))
    }

    /// Checks that every ray type of every instance resolves to the record its table
    /// entry asks for.
    pub fn verify_instance_coverage(&self, instances: &InstanceTable<D>) -> Result<()> {
        for (index, entry) in instances.entries().iter().enumerate() {
            let base = instances.hit_group_offset(index as u32);
            for (ray_type, binding) in entry.hit_groups.iter().enumerate() {
                let offset = base + ray_type as u32;
                match self.hit_group_record(offset) {
                    Some((_, name)) if name == binding.hit_group => {}
                    _ => {
                        return Err(Error::HitGroupRecordMissing {
                            instance: index as u32,
                            offset,
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceleration_structure::HitGroupBinding;
    use crate::device::DescriptorKind;
    use crate::mock::{plane_blas, MockDevice};
    use crate::pipeline::{miss_signature, AssociationScope, RaytracingPipelineCompiler, SignatureRole};
    use crate::device::{PipelineConfig, ShaderExport, ShaderStage};
    use crate::types::Mat4;

    fn pipeline(device: &MockDevice) -> crate::pipeline::CompiledPipeline<MockDevice> {
        let mut compiler = RaytracingPipelineCompiler::new(
            device,
            PipelineConfig {
                max_payload_size: 16,
                max_attribute_size: 8,
                max_recursion_depth: 2,
            },
        );
        let export = |name: &str, stage| ShaderExport {
            name: name.to_owned(),
            stage,
            code: vec![1],
        };
        compiler
            .add_library(
                "all",
                vec![
                    export("RayGen", ShaderStage::RayGeneration),
                    export("Miss", ShaderStage::Miss),
                    export("ShadowMiss", ShaderStage::Miss),
                    export("PlaneClosestHit", ShaderStage::ClosestHit),
                    export("ShadowClosestHit", ShaderStage::ClosestHit),
                ],
            )
            .unwrap();
        compiler
            .add_hit_group("PlaneHitGroup", "PlaneClosestHit")
            .unwrap();
        compiler
            .add_hit_group("ShadowHitGroup", "ShadowClosestHit")
            .unwrap();
        compiler
            .add_root_signature(SignatureRole::Miss, miss_signature())
            .unwrap();
        compiler.associate(
            SignatureRole::Miss,
            &["RayGen", "Miss", "ShadowMiss", "PlaneHitGroup", "ShadowHitGroup"],
            AssociationScope::Shared,
        );
        compiler.compile().unwrap()
    }

    fn instances(device: &MockDevice, count: usize) -> InstanceTable<MockDevice> {
        let blas = plane_blas(device);
        let mut table = InstanceTable::new(2);
        for i in 0..count {
            table
                .push(
                    blas.clone(),
                    Mat4::identity(),
                    vec![
                        HitGroupBinding::new(
                            "PlaneHitGroup",
                            vec![RootArgument::Address(0x1000 * i as u64), RootArgument::HeapBase],
                        ),
                        HitGroupBinding::new("ShadowHitGroup", vec![]),
                    ],
                )
                .unwrap();
        }
        table
    }

    fn builder(table: &InstanceTable<MockDevice>) -> ShaderBindingTableBuilder {
        let mut builder = ShaderBindingTableBuilder::new();
        builder.add_ray_generation_program("RayGen", vec![RootArgument::HeapBase]);
        builder.add_miss_program("Miss", vec![]);
        builder.add_miss_program("ShadowMiss", vec![]);
        builder.add_instance_hit_groups(table);
        builder
    }

    fn limits() -> ShaderTableLimits {
        MockDevice::new().shader_table_limits()
    }

    #[test]
    fn total_size_is_the_sum_of_section_strides() {
        // Under the mock's 64 byte table alignment no section needs padding.
        for count in [1, 2, 5] {
            let device = MockDevice::new();
            let table = instances(&device, count);
            let layout = builder(&table).layout(&limits()).unwrap();

            let hit_count = 2 * count as u64;
            assert_eq!(layout.miss.count, 2);
            assert_eq!(layout.hit_group.count as u64, hit_count);
            assert_eq!(
                layout.total_size,
                layout.ray_generation.stride + layout.miss.stride * 2 + layout.hit_group.stride * hit_count
            );
        }
    }

    #[test]
    fn sections_are_padded_to_a_wide_table_alignment() {
        let limits = ShaderTableLimits {
            identifier_size: 32,
            record_alignment: 32,
            table_alignment: 256,
        };
        let mut builder = ShaderBindingTableBuilder::new();
        builder.add_ray_generation_program("RayGen", vec![RootArgument::HeapBase]);
        builder.add_miss_program("Miss", vec![]);
        builder.add_miss_program("ShadowMiss", vec![]);
        builder.add_hit_group(
            "PlaneHitGroup",
            vec![
                RootArgument::Address(0x1000),
                RootArgument::Address(0x2000),
                RootArgument::Address(0x3000),
                RootArgument::HeapBase,
            ],
        );
        builder.add_hit_group("ShadowHitGroup", vec![]);
        let layout = builder.layout(&limits).unwrap();

        assert_eq!(layout.ray_generation.stride, 256);
        assert_eq!(layout.miss.stride, 32);
        assert_eq!(layout.hit_group.stride, 64);
        assert_eq!(layout.miss.offset, 256);
        assert_eq!(layout.hit_group.offset, 512);
        let padded = |section: &SectionLayout| align_up(section.stride * section.count as u64, 256);
        assert_eq!(
            layout.total_size,
            padded(&layout.ray_generation) + padded(&layout.miss) + padded(&layout.hit_group)
        );
        assert_eq!(layout.total_size, 768);
    }

    #[test]
    fn strides_cover_the_largest_record_of_each_section() {
        let device = MockDevice::new();
        let table = instances(&device, 1);
        let layout = builder(&table).layout(&limits()).unwrap();
        // 32 byte identifier + one argument, rounded to the 32 byte record alignment.
        assert_eq!(layout.ray_generation.stride, 64);
        assert_eq!(layout.miss.stride, 32);
        // Shadow records share the plane records' stride.
        assert_eq!(layout.hit_group.stride, 64);
    }

    #[test]
    fn sections_start_on_the_table_alignment() {
        let device = MockDevice::new();
        let table = instances(&device, 3);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let sbt = builder(&table)
            .build(&device, &pipeline(&device), &heap)
            .unwrap();
        let alignment = device.shader_table_limits().table_alignment;
        for section in [Section::RayGeneration, Section::Miss, Section::HitGroup] {
            assert_eq!(sbt.region(section).start % alignment, 0, "{section:?}");
        }
        assert_eq!(sbt.buffer().gpu_address() % 256, 0);
    }

    #[test]
    fn every_instance_offset_resolves_to_a_non_null_identifier() {
        let device = MockDevice::new();
        let table = instances(&device, 4);
        let compiled = pipeline(&device);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let sbt = builder(&table).build(&device, &compiled, &heap).unwrap();
        sbt.verify_instance_coverage(&table).unwrap();

        let bytes = sbt.buffer().bytes();
        for descriptor in table.descriptors() {
            for ray_type in 0..table.ray_type_count() {
                let (offset, name) = sbt
                    .hit_group_record(descriptor.hit_group_offset + ray_type)
                    .unwrap();
                assert_eq!(offset % sbt.layout().hit_group.stride, 0);
                let identifier = &bytes[offset as usize..offset as usize + 32];
                assert!(identifier.iter().any(|byte| *byte != 0));
                assert_eq!(identifier, compiled.shader_identifier(name).unwrap());
            }
        }
    }

    #[test]
    fn arguments_follow_the_identifier() {
        let device = MockDevice::new();
        let table = instances(&device, 2);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let sbt = builder(&table)
            .build(&device, &pipeline(&device), &heap)
            .unwrap();
        let bytes = sbt.buffer().bytes();
        let word = |at: u64| u64::from_le_bytes(bytes[at as usize..at as usize + 8].try_into().unwrap());

        assert_eq!(word(32), heap.gpu_start());
        let (second_plane, _) = sbt.hit_group_record(2).unwrap();
        assert_eq!(word(second_plane + 32), 0x1000);
        assert_eq!(word(second_plane + 40), heap.gpu_start());
    }

    #[test]
    fn unknown_exports_fail_construction() {
        let device = MockDevice::new();
        let table = instances(&device, 1);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let mut builder = builder(&table);
        builder.add_miss_program("Unregistered", vec![]);
        let Err(error) = builder.build(&device, &pipeline(&device), &heap) else {
            panic!("table built with an unregistered miss export");
        };
        assert!(matches!(error, Error::UnknownExport(name) if name == "Unregistered"));
    }

    #[test]
    fn exactly_one_ray_generation_record() {
        let mut builder = ShaderBindingTableBuilder::new();
        assert!(matches!(
            builder.layout(&limits()),
            Err(Error::RayGenRecordCount(0))
        ));
        builder.add_ray_generation_program("RayGen", vec![]);
        builder.add_ray_generation_program("RayGen", vec![]);
        assert!(matches!(
            builder.layout(&limits()),
            Err(Error::RayGenRecordCount(2))
        ));
    }

    #[test]
    fn coverage_check_catches_reordered_hit_groups() {
        let device = MockDevice::new();
        let table = instances(&device, 1);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let mut builder = ShaderBindingTableBuilder::new();
        builder.add_ray_generation_program("RayGen", vec![]);
        builder.add_miss_program("Miss", vec![]);
        builder.add_hit_group("ShadowHitGroup", vec![]);
        builder.add_hit_group("PlaneHitGroup", vec![]);
        let sbt = builder.build(&device, &pipeline(&device), &heap).unwrap();
        assert!(matches!(
            sbt.verify_instance_coverage(&table),
            Err(Error::HitGroupRecordMissing {
                instance: 0,
                offset: 0
            })
        ));
    }

    #[test]
    fn dispatch_uses_the_section_regions() {
        let device = MockDevice::new();
        let table = instances(&device, 1);
        let heap = device
            .create_descriptor_heap(&[DescriptorKind::StorageImage])
            .unwrap();
        let sbt = builder(&table)
            .build(&device, &pipeline(&device), &heap)
            .unwrap();
        let desc = sbt.dispatch_desc(8, 4);
        let start = sbt.buffer().gpu_address();
        assert_eq!(desc.ray_generation.start, start);
        assert_eq!(desc.miss.start, start + sbt.layout().ray_generation.size);
        assert_eq!(desc.hit_group.start, desc.miss.start + sbt.layout().miss.size);
        assert_eq!(desc.hit_group.stride, 64);
        assert_eq!((desc.width, desc.height, desc.depth), (8, 4, 1));
    }
}
