use std::{ffi::CStr, sync::Arc};

use anyhow::{anyhow, Result};
use ash::vk;
use raytracing::{VertexAttribute, VertexFormat};

use crate::{device::Device, PipelineLayout, ShaderModule};

pub(crate) const ENTRY_POINT: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

pub struct GraphicsPipeline {
    device: Arc<Device>,
    pub(crate) inner: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
}

#[derive(Clone, Copy)]
pub struct GraphicsPipelineCreateInfo<'a> {
    pub vertex: &'a ShaderModule,
    pub fragment: &'a ShaderModule,
    pub vertex_stride: u32,
    pub vertex_attributes: &'a [VertexAttribute],
    pub color_attachment_format: vk::Format,
}

fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

impl GraphicsPipeline {
    pub(crate) fn new(
        device: Arc<Device>,
        layout: &PipelineLayout,
        create_info: GraphicsPipelineCreateInfo,
    ) -> Result<Self> {
        let shader_stages_infos = [
            (vk::ShaderStageFlags::VERTEX, create_info.vertex),
            (vk::ShaderStageFlags::FRAGMENT, create_info.fragment),
        ]
        .map(|(stage, module)| {
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(stage)
                .module(module.inner)
                .name(ENTRY_POINT)
                .build()
        });

        // vertex
        let vertex_bindings = [vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(create_info.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()];
        let vertex_attributes = create_info
            .vertex_attributes
            .iter()
            .map(|attribute| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(attribute.location)
                    .format(vertex_format(attribute.format))
                    .offset(attribute.offset)
                    .build()
            })
            .collect::<Vec<_>>();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // viewport and scissor are set per render pass
        let viewport_info = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        // the plane is visible from both sides
        let rasterizer_info = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling_info = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }];
        let color_blending_info = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // dynamic rendering
        let color_attachment_formats = [create_info.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_attachment_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages_infos)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterizer_info)
            .multisample_state(&multisampling_info)
            .color_blend_state(&color_blending_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout.inner)
            .push_next(&mut rendering_info);

        let inner = unsafe {
            device
                .inner
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&pipeline_info),
                    None,
                )
                .map_err(|e| e.1)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no graphics pipeline was created"))?;

        Ok(Self {
            device,
            inner,
            layout: layout.inner,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_pipeline(self.inner, None) };
    }
}
