//! Mesh and vertex types.
//!
//! Model importers hand the engine raw per-mesh arrays; everything here is
//! already interleaved and validated. Indices are always 32-bit.

use ash::vk;
use strata_core::{Aabb, Error, Result};

/// Interleaved vertex as laid out in the shared batch vertex buffers.
///
/// Layout must match the vertex shader input exactly.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinates.
    pub uv: [f32; 2],
}

impl Vertex {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Vertex input binding description for the batch vertex buffers.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(Self::SIZE as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// Vertex attribute descriptions (position, normal, uv).
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Self, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Self, normal) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Self, uv) as u32),
        ]
    }
}

/// A validated mesh ready for batch accumulation.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    /// Interleaved vertices.
    pub vertices: Vec<Vertex>,
    /// 32-bit triangle indices into `vertices`.
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a mesh, validating the importer contract: non-empty arrays,
    /// triangle-multiple index count, indices in range.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(Error::InvalidData(
                "mesh has empty vertex or index array".to_string(),
            ));
        }
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidData(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertex_count = vertices.len() as u32;
        if let Some(&bad) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(Error::InvalidData(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }

        Ok(Self { vertices, indices })
    }

    /// Vertex data size in bytes.
    pub fn vertex_bytes(&self) -> u64 {
        (self.vertices.len() * Vertex::SIZE) as u64
    }

    /// Index data size in bytes.
    pub fn index_bytes(&self) -> u64 {
        (self.indices.len() * std::mem::size_of::<u32>()) as u64
    }

    /// Total payload size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.vertex_bytes() + self.index_bytes()
    }

    /// Object-space bounding box of the vertex positions.
    pub fn local_aabb(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| glam::Vec3::from(v.position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> MeshData {
        let vertices = vec![
            Vertex {
                position: [0.0, 0.0, 0.0],
                normal: [0.0, 0.0, 1.0],
                uv: [0.0, 0.0],
            },
            Vertex {
                position: [1.0, 0.0, 0.0],
                normal: [0.0, 0.0, 1.0],
                uv: [1.0, 0.0],
            },
            Vertex {
                position: [1.0, 1.0, 0.0],
                normal: [0.0, 0.0, 1.0],
                uv: [1.0, 1.0],
            },
            Vertex {
                position: [0.0, 1.0, 0.0],
                normal: [0.0, 0.0, 1.0],
                uv: [0.0, 1.0],
            },
        ];
        MeshData::new(vertices, vec![0, 1, 2, 2, 3, 0]).unwrap()
    }

    #[test]
    fn vertex_layout() {
        // Layout must match the shader-side struct
        assert_eq!(Vertex::SIZE, 32);
        assert_eq!(std::mem::offset_of!(Vertex, position), 0);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn rejects_empty_mesh() {
        assert!(MeshData::new(Vec::new(), vec![0]).is_err());
        assert!(MeshData::new(vec![Vertex::default()], Vec::new()).is_err());
    }

    #[test]
    fn rejects_non_triangle_indices() {
        let m = quad();
        assert!(MeshData::new(m.vertices.clone(), vec![0, 1]).is_err());
    }

    #[test]
    fn rejects_out_of_range_index() {
        let m = quad();
        assert!(MeshData::new(m.vertices.clone(), vec![0, 1, 99]).is_err());
    }

    #[test]
    fn byte_sizes() {
        let m = quad();
        assert_eq!(m.vertex_bytes(), 4 * 32);
        assert_eq!(m.index_bytes(), 6 * 4);
        assert_eq!(m.total_bytes(), 128 + 24);
    }

    #[test]
    fn local_bounds() {
        let m = quad();
        let aabb = m.local_aabb();
        assert_eq!(aabb.min, glam::Vec3::ZERO);
        assert_eq!(aabb.max, glam::Vec3::new(1.0, 1.0, 0.0));
    }
}
