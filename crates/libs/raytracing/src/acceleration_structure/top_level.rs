use crate::acceleration_structure::{AccelerationStructureBuffers, InstanceTable};
use crate::allocator::ResourceAllocator;
use crate::device::{
    AccelerationStructureLevel, BufferUsage, BuildCommand, BuildFlags, BuildInputs, BuildMode,
    CommandList, Device, GpuBuffer, GpuResource,
};
use crate::error::{Error, Result};

const FLAGS: BuildFlags = BuildFlags {
    allow_update: true,
    prefer_fast_trace: true,
};

struct Built<D: Device> {
    buffers: AccelerationStructureBuffers<D>,
    instance_count: usize,
    /// Last bytes written to the instance descriptor buffer.
    descriptors: Vec<u8>,
}

/// Scene-level structure. Built once from an [`InstanceTable`], then only refitted in place:
/// the instance count is fixed by the full build and no buffer is reallocated afterwards.
pub struct TopLevelAccelerationStructure<D: Device> {
    built: Option<Built<D>>,
}

impl<D: Device> Default for TopLevelAccelerationStructure<D> {
    fn default() -> Self {
        Self { built: None }
    }
}

impl<D: Device> TopLevelAccelerationStructure<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Full build when `update_only` is false, in-place refit otherwise.
    pub fn generate(
        &mut self,
        device: &D,
        commands: &mut D::CommandList,
        instances: &InstanceTable<D>,
        update_only: bool,
    ) -> Result<()> {
        if update_only {
            self.refit(commands, instances)
        } else {
            self.build(device, commands, instances)
        }
    }

    /// Drops any previous build, allocates scratch, result and instance descriptor buffers
    /// and records a build from every instance of the table.
    pub fn build(
        &mut self,
        device: &D,
        commands: &mut D::CommandList,
        instances: &InstanceTable<D>,
    ) -> Result<()> {
        if instances.is_empty() {
            return Err(Error::EmptyInstanceTable);
        }
        self.built = None;

        let descriptors = instances.descriptor_bytes();
        let count = instances.len() as u32;
        let sizes = device.prebuild_info(
            &BuildInputs::Instances {
                descriptors: 0,
                count,
            },
            FLAGS,
        )?;

        let scratch = device.create_scratch_buffer(
            "tlas scratch",
            sizes.scratch_size.max(sizes.update_scratch_size),
        )?;
        let result = device.create_result_structure(
            "tlas",
            AccelerationStructureLevel::Top,
            sizes.result_size,
        )?;
        let instance_descriptors = device.create_upload_buffer_with_data(
            "tlas instance descriptors",
            BufferUsage::InstanceDescriptors,
            &descriptors,
        )?;

        let buffers = AccelerationStructureBuffers {
            scratch: Some(scratch),
            result,
            instance_descriptors: Some(instance_descriptors),
        };
        Self::record(commands, &buffers, count, BuildMode::Build)?;

        log::info!(
            "TLAS: {count} instances, result {} bytes, scratch {} bytes",
            sizes.result_size,
            sizes.scratch_size
        );

        self.built = Some(Built {
            buffers,
            instance_count: instances.len(),
            descriptors,
        });
        Ok(())
    }

    /// Rewrites instance transforms if they changed and records an update of the result
    /// structure into itself.
    pub fn refit(&mut self, commands: &mut D::CommandList, instances: &InstanceTable<D>) -> Result<()> {
        let built = self.built.as_mut().ok_or(Error::RefitBeforeBuild)?;
        if instances.len() != built.instance_count {
            return Err(Error::InstanceTopologyChanged {
                built: built.instance_count,
                requested: instances.len(),
            });
        }

        let descriptors = instances.descriptor_bytes();
        if descriptors != built.descriptors {
            if let Some(buffer) = &built.buffers.instance_descriptors {
                buffer.write(0, &descriptors)?;
            }
            built.descriptors = descriptors;
            log::debug!("TLAS instance transforms rewritten");
        }

        Self::record(
            commands,
            &built.buffers,
            built.instance_count as u32,
            BuildMode::Update,
        )
    }

    /// True when a refit would have to rewrite the instance descriptor buffer.
    pub fn descriptors_changed(&self, instances: &InstanceTable<D>) -> bool {
        match &self.built {
            Some(built) => built.descriptors != instances.descriptor_bytes(),
            None => true,
        }
    }

    pub fn result(&self) -> Result<&D::AccelerationStructure> {
        self.built
            .as_ref()
            .map(|built| &built.buffers.result)
            .ok_or(Error::TlasNotBuilt)
    }

    fn record(
        commands: &mut D::CommandList,
        buffers: &AccelerationStructureBuffers<D>,
        count: u32,
        mode: BuildMode,
    ) -> Result<()> {
        let (Some(scratch), Some(instance_descriptors)) =
            (&buffers.scratch, &buffers.instance_descriptors)
        else {
            return Err(Error::TlasNotBuilt);
        };
        let source = match mode {
            BuildMode::Build => None,
            BuildMode::Update => {
                // The previous trace and update still read and write result and scratch.
                commands.uav_barrier(&buffers.result);
                Some(&buffers.result)
            }
        };
        commands.build_acceleration_structure(&BuildCommand {
            inputs: BuildInputs::Instances {
                descriptors: instance_descriptors.gpu_address(),
                count,
            },
            flags: FLAGS,
            mode,
            destination: &buffers.result,
            source,
            scratch: scratch.gpu_address(),
        });
        commands.uav_barrier(&buffers.result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceleration_structure::HitGroupBinding;
    use crate::mock::{plane_blas, MockDevice, Recorded};
    use crate::types::{Mat4, Vec3};

    fn table(device: &MockDevice, count: usize) -> InstanceTable<MockDevice> {
        let blas = plane_blas(device);
        let mut table = InstanceTable::new(2);
        for i in 0..count {
            let transform = Mat4::new_translation(&Vec3::new(i as f32, 0.0, 2.0));
            table
                .push(
                    blas.clone(),
                    transform,
                    vec![
                        HitGroupBinding::new("PlaneHitGroup", vec![]),
                        HitGroupBinding::new("ShadowHitGroup", vec![]),
                    ],
                )
                .unwrap();
        }
        table
    }

    fn run(
        device: &MockDevice,
        tlas: &mut TopLevelAccelerationStructure<MockDevice>,
        instances: &InstanceTable<MockDevice>,
        update_only: bool,
    ) -> Result<()> {
        let mut commands = device.begin_commands()?;
        tlas.generate(device, &mut commands, instances, update_only)?;
        device.execute(commands)
    }

    #[test]
    fn refit_with_unchanged_transforms_is_a_no_op() {
        for count in [1, 3, 8] {
            let device = MockDevice::new();
            let instances = table(&device, count);
            let mut tlas = TopLevelAccelerationStructure::new();

            run(&device, &mut tlas, &instances, false).unwrap();
            let built = device.structure_content(tlas.result().unwrap()).unwrap();
            assert_eq!(built.len(), count * crate::acceleration_structure::INSTANCE_DESCRIPTOR_SIZE);

            run(&device, &mut tlas, &instances, true).unwrap();
            let refitted = device.structure_content(tlas.result().unwrap()).unwrap();
            assert_eq!(built, refitted);
        }
    }

    #[test]
    fn refit_reuses_buffers_and_updates_in_place() {
        let device = MockDevice::new();
        let instances = table(&device, 2);
        let mut tlas = TopLevelAccelerationStructure::new();
        run(&device, &mut tlas, &instances, false).unwrap();
        device.clear_log();

        run(&device, &mut tlas, &instances, true).unwrap();
        let result = tlas.result().unwrap().gpu_address();
        let executed = device.executed();
        assert_eq!(executed.len(), 3);
        assert_eq!(executed[0], Recorded::UavBarrier(result));
        match &executed[1] {
            Recorded::Build {
                mode,
                destination,
                source,
                flags,
                ..
            } => {
                assert_eq!(*mode, BuildMode::Update);
                assert_eq!(*destination, result);
                assert_eq!(*source, Some(result));
                assert!(flags.allow_update);
            }
            other => panic!("expected a build, found {other:?}"),
        }
        assert_eq!(executed[2], Recorded::UavBarrier(result));
    }

    #[test]
    fn every_refit_waits_on_the_previous_frame() {
        let device = MockDevice::new();
        let instances = table(&device, 2);
        let mut tlas = TopLevelAccelerationStructure::new();
        device.clear_log();
        run(&device, &mut tlas, &instances, false).unwrap();
        let result = tlas.result().unwrap().gpu_address();
        assert!(matches!(
            device.executed().first(),
            Some(Recorded::Build {
                mode: BuildMode::Build,
                ..
            })
        ));
        device.clear_log();

        for _ in 0..2 {
            run(&device, &mut tlas, &instances, true).unwrap();
        }
        let executed = device.executed();
        let updates: Vec<_> = executed
            .iter()
            .enumerate()
            .filter(|(_, command)| matches!(command, Recorded::Build { .. }))
            .map(|(at, _)| at)
            .collect();
        assert_eq!(updates.len(), 2);
        for at in updates {
            assert_eq!(executed[at - 1], Recorded::UavBarrier(result));
            assert_eq!(executed[at + 1], Recorded::UavBarrier(result));
        }
    }

    #[test]
    fn refit_picks_up_moved_instances() {
        let device = MockDevice::new();
        let mut instances = table(&device, 2);
        let mut tlas = TopLevelAccelerationStructure::new();
        run(&device, &mut tlas, &instances, false).unwrap();
        let before = device.structure_content(tlas.result().unwrap()).unwrap();

        instances
            .set_transform(1, Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0)))
            .unwrap();
        assert!(tlas.descriptors_changed(&instances));
        run(&device, &mut tlas, &instances, true).unwrap();

        let after = device.structure_content(tlas.result().unwrap()).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, instances.descriptor_bytes());
        assert!(!tlas.descriptors_changed(&instances));
    }

    #[test]
    fn refit_before_build_is_an_error() {
        let device = MockDevice::new();
        let instances = table(&device, 1);
        let mut tlas = TopLevelAccelerationStructure::new();
        assert!(matches!(
            run(&device, &mut tlas, &instances, true),
            Err(Error::RefitBeforeBuild)
        ));
        assert!(matches!(tlas.result(), Err(Error::TlasNotBuilt)));
    }

    #[test]
    fn refit_rejects_a_different_instance_count() {
        let device = MockDevice::new();
        let mut tlas = TopLevelAccelerationStructure::new();
        run(&device, &mut tlas, &table(&device, 2), false).unwrap();
        assert!(matches!(
            run(&device, &mut tlas, &table(&device, 3), true),
            Err(Error::InstanceTopologyChanged {
                built: 2,
                requested: 3
            })
        ));
    }

    #[test]
    fn empty_tables_cannot_be_built() {
        let device = MockDevice::new();
        let mut tlas = TopLevelAccelerationStructure::new();
        let empty = InstanceTable::new(2);
        assert!(matches!(
            run(&device, &mut tlas, &empty, false),
            Err(Error::EmptyInstanceTable)
        ));
    }
}
