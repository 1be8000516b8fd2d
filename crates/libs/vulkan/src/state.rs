use ash::vk;
use raytracing::ResourceState;

/// Layout, stages and accesses an image is used with while in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUsage {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

/// Offscreen targets have no presentation engine behind them, so the present state is
/// plain `GENERAL`.
pub fn state_usage(state: ResourceState) -> StateUsage {
    let (layout, stage, access) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
        ResourceState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::COPY,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::Present | ResourceState::GenericRead => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ,
        ),
        ResourceState::AccelerationStructure => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        ),
    };
    StateUsage {
        layout,
        stage,
        access,
    }
}

/// Stages and accesses on both sides of an acceleration structure barrier. Refits write the
/// result and scratch that the previous build, refit or trace used, so every pair of builds
/// and traces is ordered, reads and writes alike.
pub fn acceleration_structure_usage() -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    (
        vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
            | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
    )
}
