// Simple render system - one pipeline, one global uniform set, many models

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::pipeline::create_pipeline_layout;
use crate::backend::{Model, Pipeline, PipelineConfig, VulkanDevice};

/// Per-frame uniform block at set 0, binding 0 (vertex stage)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
        }
    }
}

/// Everything a render system needs to record one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub frame_index: usize,
    /// Seconds since the previous frame
    pub frame_time: f32,
    pub command_buffer: vk::CommandBuffer,
    pub global_descriptor_set: vk::DescriptorSet,
}

pub struct SimpleRenderSystem {
    pipeline: Pipeline,
    pipeline_layout: vk::PipelineLayout,
    vert_path: PathBuf,
    frag_path: PathBuf,
    device: Arc<VulkanDevice>,
}

impl SimpleRenderSystem {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        vert_path: &Path,
        frag_path: &Path,
    ) -> Result<Self> {
        let pipeline_layout = create_pipeline_layout(&device, &[global_set_layout], &[])?;

        let pipeline = match Self::create_pipeline(
            &device,
            render_pass,
            pipeline_layout,
            vert_path,
            frag_path,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pipeline,
            pipeline_layout,
            vert_path: vert_path.to_path_buf(),
            frag_path: frag_path.to_path_buf(),
            device,
        })
    }

    fn create_pipeline(
        device: &Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        vert_path: &Path,
        frag_path: &Path,
    ) -> Result<Pipeline> {
        let config = PipelineConfig::default_for(render_pass);
        Pipeline::new(device.clone(), vert_path, frag_path, &config, layout)
    }

    /// Rebuild the pipeline from the shader files on disk. On failure the
    /// previous pipeline stays in use.
    pub fn reload(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        let pipeline = Self::create_pipeline(
            &self.device,
            render_pass,
            self.pipeline_layout,
            &self.vert_path,
            &self.frag_path,
        )?;

        // The old pipeline may still be referenced by frames in flight
        self.device.wait_idle()?;
        self.pipeline = pipeline;

        log::info!("Reloaded shaders");
        Ok(())
    }

    pub fn render(&self, frame_info: &FrameInfo, models: &[Model]) {
        let cmd = frame_info.command_buffer;

        self.pipeline.bind(cmd);
        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[frame_info.global_descriptor_set],
                &[],
            );
        }

        for model in models {
            model.bind(cmd);
            model.draw(cmd);
        }
    }
}

impl Drop for SimpleRenderSystem {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ubo_is_three_matrices() {
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 192);
        assert_eq!(std::mem::offset_of!(GlobalUbo, projection), 0);
        assert_eq!(std::mem::offset_of!(GlobalUbo, view), 64);
        assert_eq!(std::mem::offset_of!(GlobalUbo, model), 128);
    }

    #[test]
    fn global_ubo_bytes_are_column_major() {
        let ubo = GlobalUbo {
            projection: Mat4::from_cols_array(&[
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0,
                16.0,
            ]),
            ..Default::default()
        };
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&ubo));
        assert_eq!(floats.len(), 48);
        assert_eq!(&floats[..4], &[1.0, 2.0, 3.0, 4.0]);
        // view starts as identity
        assert_eq!(&floats[16..20], &[1.0, 0.0, 0.0, 0.0]);
    }
}
