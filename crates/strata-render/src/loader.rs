//! Parallel mesh import.
//!
//! Model importers supply raw per-mesh attribute arrays; conversion into
//! interleaved [`MeshData`] is CPU work and runs on the rayon pool. Results
//! are joined on the calling thread before any GPU resource is created from
//! them; GPU calls never happen on worker threads.

use rayon::prelude::*;
use strata_core::{Error, Result};

use crate::mesh::{MeshData, Vertex};

/// Raw importer output for one mesh.
///
/// The contract: `positions` is non-empty, `normals`/`texcoords` are either
/// empty or the same length as `positions`, and indices are 32-bit.
#[derive(Clone, Debug, Default)]
pub struct RawMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

/// Convert raw importer meshes in parallel.
///
/// Any invalid mesh fails the whole import; partial scenes are not useful to
/// the batch rebuild that consumes this.
pub fn import_meshes(raw: Vec<RawMesh>) -> Result<Vec<MeshData>> {
    raw.into_par_iter().map(convert_mesh).collect()
}

fn convert_mesh(raw: RawMesh) -> Result<MeshData> {
    let vertex_count = raw.positions.len();

    if !raw.normals.is_empty() && raw.normals.len() != vertex_count {
        return Err(Error::InvalidData(format!(
            "normal count {} does not match vertex count {vertex_count}",
            raw.normals.len()
        )));
    }
    if !raw.texcoords.is_empty() && raw.texcoords.len() != vertex_count {
        return Err(Error::InvalidData(format!(
            "texcoord count {} does not match vertex count {vertex_count}",
            raw.texcoords.len()
        )));
    }

    let vertices: Vec<Vertex> = (0..vertex_count)
        .map(|i| Vertex {
            position: raw.positions[i],
            normal: raw.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            uv: raw.texcoords.get(i).copied().unwrap_or([0.0, 0.0]),
        })
        .collect();

    MeshData::new(vertices, raw.indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_triangle() -> RawMesh {
        RawMesh {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            texcoords: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn imports_interleaved_vertices() {
        let meshes = import_meshes(vec![raw_triangle()]).unwrap();
        assert_eq!(meshes.len(), 1);
        let mesh = &meshes[0];
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[1].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[2].uv, [0.0, 1.0]);
    }

    #[test]
    fn missing_attributes_get_defaults() {
        let raw = RawMesh {
            normals: Vec::new(),
            texcoords: Vec::new(),
            ..raw_triangle()
        };
        let meshes = import_meshes(vec![raw]).unwrap();
        assert_eq!(meshes[0].vertices[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(meshes[0].vertices[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn rejects_mismatched_attribute_counts() {
        let raw = RawMesh {
            normals: vec![[0.0, 0.0, 1.0]; 2],
            ..raw_triangle()
        };
        assert!(import_meshes(vec![raw]).is_err());
    }

    #[test]
    fn one_bad_mesh_fails_the_import() {
        let bad = RawMesh {
            indices: vec![0, 1, 9],
            ..raw_triangle()
        };
        assert!(import_meshes(vec![raw_triangle(), bad]).is_err());
    }

    #[test]
    fn imports_many_meshes() {
        let meshes = import_meshes(vec![raw_triangle(); 64]).unwrap();
        assert_eq!(meshes.len(), 64);
    }
}
