// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// All fixed-function state lives in PipelineConfig so render systems can
// start from the defaults and override what they need.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use super::model::Vertex;
use super::shader::load_shader_module;
use super::VulkanDevice;

const SHADER_ENTRY_POINT: &CStr = c"main";

/// Fixed-function state for one graphics pipeline
#[derive(Clone)]
pub struct PipelineConfig {
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    pub input_assembly: vk::PipelineInputAssemblyStateCreateInfo,
    pub rasterization: vk::PipelineRasterizationStateCreateInfo,
    pub multisample: vk::PipelineMultisampleStateCreateInfo,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub depth_stencil: vk::PipelineDepthStencilStateCreateInfo,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

impl PipelineConfig {
    /// Opaque triangle list with depth testing, drawn into `render_pass`.
    /// Viewport and scissor are dynamic so the pipeline survives resizes.
    pub fn default_for(render_pass: vk::RenderPass) -> Self {
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
            .build();

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
            .build();

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .build();

        // No blending, opaque
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        // Closer fragments win
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
            .build();

        Self {
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            input_assembly,
            rasterization,
            multisample,
            color_blend_attachment,
            depth_stencil,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            render_pass,
            subpass: 0,
        }
    }
}

/// A graphics pipeline built from a vertex + fragment SPIR-V pair
pub struct Pipeline {
    pipeline: vk::Pipeline,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        vert_path: &Path,
        frag_path: &Path,
        config: &PipelineConfig,
        layout: vk::PipelineLayout,
    ) -> Result<Self> {
        if layout == vk::PipelineLayout::null() {
            anyhow::bail!("Cannot create graphics pipeline: no pipeline layout provided");
        }
        if config.render_pass == vk::RenderPass::null() {
            anyhow::bail!("Cannot create graphics pipeline: no render pass provided");
        }

        let vert_module = load_shader_module(&device, vert_path)?;
        let frag_module = match load_shader_module(&device, frag_path) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = Self::create(&device, vert_module, frag_module, config, layout);

        // Modules are only needed while the pipeline is being built
        unsafe {
            device.device.destroy_shader_module(vert_module, None);
            device.device.destroy_shader_module(frag_module, None);
        }

        let pipeline = result?;
        log::info!(
            "Created graphics pipeline ({}, {})",
            vert_path.display(),
            frag_path.display()
        );

        Ok(Self { pipeline, device })
    }

    fn create(
        device: &VulkanDevice,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
        config: &PipelineConfig,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&config.binding_descriptions)
            .vertex_attribute_descriptions(&config.attribute_descriptions);

        // Actual rectangles are set per frame (dynamic state)
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let color_blend_attachments = [config.color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments)
            .blend_constants([0.0; 4]);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&config.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&config.rasterization)
            .multisample_state(&config.multisample)
            .depth_stencil_state(&config.depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(config.render_pass)
            .subpass(config.subpass)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };

        pipelines
            .into_iter()
            .next()
            .context("Driver returned no graphics pipeline")
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constant_ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn default_config_is_opaque_depth_tested_triangles() {
        let config = PipelineConfig::default_for(vk::RenderPass::null());

        assert_eq!(config.input_assembly.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.rasterization.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(config.rasterization.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(config.rasterization.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(config.multisample.rasterization_samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(config.color_blend_attachment.blend_enable, vk::FALSE);
        assert_eq!(config.color_blend_attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(config.depth_stencil.depth_test_enable, vk::TRUE);
        assert_eq!(config.depth_stencil.depth_write_enable, vk::TRUE);
        assert_eq!(config.depth_stencil.depth_compare_op, vk::CompareOp::LESS);
        assert_eq!(config.subpass, 0);
    }

    #[test]
    fn viewport_and_scissor_are_dynamic() {
        let config = PipelineConfig::default_for(vk::RenderPass::null());
        assert_eq!(
            config.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn default_config_uses_vertex_layout() {
        let render_pass = vk::RenderPass::from_raw(0x42);
        let config = PipelineConfig::default_for(render_pass);
        assert_eq!(config.render_pass, render_pass);
        assert_eq!(config.binding_descriptions.len(), 1);
        assert_eq!(config.attribute_descriptions.len(), 2);
    }
}
