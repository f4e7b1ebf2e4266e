// Mesh data uploaded to device-local memory
//
// Vertices (and optional u32 indices) go through a host-visible staging
// buffer and a one-shot copy, so the draw-time buffers live in the fastest
// memory the GPU has.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use gpu_allocator::MemoryLocation;
use std::mem::{offset_of, size_of};
use std::sync::Arc;

use super::buffer::Buffer;
use super::VulkanDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// One interleaved binding at index 0
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()]
    }

    /// location 0 = position, location 1 = color
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, position) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32)
                .build(),
        ]
    }
}

/// CPU-side mesh description
#[derive(Debug, Clone, Default)]
pub struct Builder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Builder {
    pub fn triangle() -> Self {
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            ],
            indices: Vec::new(),
        }
    }

    pub fn quad() -> Self {
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
                Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
                Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::new(1.0, 1.0, 1.0)),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    /// Unit cube centered on the origin, one flat color per face
    pub fn cube() -> Self {
        // (normal axis, sign, color)
        let faces: [(usize, f32, Vec3); 6] = [
            (0, -1.0, Vec3::new(0.9, 0.9, 0.9)),
            (0, 1.0, Vec3::new(0.8, 0.8, 0.1)),
            (1, -1.0, Vec3::new(0.9, 0.6, 0.1)),
            (1, 1.0, Vec3::new(0.8, 0.1, 0.1)),
            (2, -1.0, Vec3::new(0.1, 0.1, 0.8)),
            (2, 1.0, Vec3::new(0.1, 0.8, 0.1)),
        ];

        let mut builder = Self::default();
        for (axis, sign, color) in faces {
            // The two axes spanning the face
            let u = (axis + 1) % 3;
            let v = (axis + 2) % 3;
            let base = builder.vertices.len() as u32;

            for (du, dv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let mut position = Vec3::ZERO;
                position[axis] = 0.5 * sign;
                position[u] = du;
                position[v] = dv;
                builder.vertices.push(Vertex::new(position, color));
            }

            builder
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        builder
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() < 3 {
            anyhow::bail!(
                "A model needs at least 3 vertices, got {}",
                self.vertices.len()
            );
        }
        if self.indices.len() % 3 != 0 {
            anyhow::bail!(
                "Index count {} is not a whole number of triangles",
                self.indices.len()
            );
        }
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            anyhow::bail!(
                "Index {} is out of range for {} vertices",
                index,
                self.vertices.len()
            );
        }
        Ok(())
    }
}

pub struct Model {
    vertex_buffer: Buffer,
    vertex_count: u32,
    index_buffer: Option<Buffer>,
    index_count: u32,
    device: Arc<VulkanDevice>,
}

impl Model {
    pub fn new(device: Arc<VulkanDevice>, builder: &Builder) -> Result<Self> {
        builder.validate()?;

        let vertex_buffer = upload(
            &device,
            bytemuck::cast_slice(&builder.vertices),
            size_of::<Vertex>() as vk::DeviceSize,
            builder.vertices.len() as u32,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = if builder.indices.is_empty() {
            None
        } else {
            Some(upload(
                &device,
                bytemuck::cast_slice(&builder.indices),
                size_of::<u32>() as vk::DeviceSize,
                builder.indices.len() as u32,
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?)
        };

        log::info!(
            "Uploaded model: {} vertices, {} indices",
            builder.vertices.len(),
            builder.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            vertex_count: builder.vertices.len() as u32,
            index_buffer,
            index_count: builder.indices.len() as u32,
            device,
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer()], &[0]);
            if let Some(index_buffer) = &self.index_buffer {
                self.device.device.cmd_bind_index_buffer(
                    cmd,
                    index_buffer.buffer(),
                    0,
                    vk::IndexType::UINT32,
                );
            }
        }
    }

    pub fn draw(&self, cmd: vk::CommandBuffer) {
        unsafe {
            if self.index_buffer.is_some() {
                self.device
                    .device
                    .cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            } else {
                self.device.device.cmd_draw(cmd, self.vertex_count, 1, 0, 0);
            }
        }
    }
}

/// Copy `data` into a new device-local buffer via a staging buffer
fn upload(
    device: &Arc<VulkanDevice>,
    data: &[u8],
    instance_size: vk::DeviceSize,
    instance_count: u32,
    usage: vk::BufferUsageFlags,
) -> Result<Buffer> {
    let mut staging = Buffer::new(
        device.clone(),
        instance_size,
        instance_count,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        0,
    )?;
    staging.write(data, 0)?;
    staging.flush()?;

    let buffer = Buffer::new(
        device.clone(),
        instance_size,
        instance_count,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        0,
    )?;

    device.copy_buffer(staging.buffer(), buffer.buffer(), data.len() as vk::DeviceSize)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(size_of::<Vertex>(), 24);

        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes.len(), 2);
        assert_eq!((attributes[0].location, attributes[0].offset), (0, 0));
        assert_eq!((attributes[1].location, attributes[1].offset), (1, 12));
        assert!(attributes
            .iter()
            .all(|a| a.format == vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn vertices_cast_to_bytes() {
        let vertices = [Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0))];
        let floats: &[f32] = bytemuck::cast_slice(&vertices);
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn builtin_meshes_are_valid() {
        for builder in [Builder::triangle(), Builder::quad(), Builder::cube()] {
            builder.validate().unwrap();
        }
        assert!(Builder::triangle().indices.is_empty());
        assert_eq!(Builder::quad().indices.len(), 6);
    }

    #[test]
    fn cube_has_flat_faces() {
        let cube = Builder::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);

        for face in cube.vertices.chunks(4) {
            // All corners of a face share its color and lie on one plane
            assert!(face.iter().all(|v| v.color == face[0].color));
            let on_plane = (0..3).any(|axis| {
                face.iter()
                    .all(|v| v.position[axis] == face[0].position[axis])
            });
            assert!(on_plane);
        }

        for v in &cube.vertices {
            assert_eq!(v.position.abs(), Vec3::splat(0.5));
        }
    }

    #[test]
    fn too_few_vertices_rejected() {
        assert!(Builder::default().validate().is_err());

        let mut builder = Builder::triangle();
        builder.vertices.pop();
        assert!(builder.validate().is_err());
    }

    #[test]
    fn bad_indices_rejected() {
        let mut builder = Builder::quad();
        builder.indices[5] = 4;
        assert!(builder.validate().is_err());

        let mut builder = Builder::quad();
        builder.indices.pop();
        assert!(builder.validate().is_err());
    }
}
