//! CPU-side mesh data
//!
//! [`Vertex`] is laid out for direct upload; its Vulkan input description
//! comes from the [`VertexInput`] impl below.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use super::AssetError;
use crate::foundation::math::Vec3;
use crate::vulkan::pipeline::VertexInput;

/// 3D vertex with position, normal and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Position in 3D space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a new vertex
    pub fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }

    /// Bit pattern used to find identical vertices
    pub(crate) fn key(&self) -> [u32; 8] {
        let floats: [f32; 8] = bytemuck::cast(*self);
        floats.map(f32::to_bits)
    }
}

impl VertexInput for Vertex {
    fn bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, tex_coord) as u32,
            },
        ]
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Box center
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Edge lengths
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    /// Name from the source file
    pub name: String,
    /// Unique vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a mesh from vertices and triangle indices
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertices,
            indices,
        }
    }

    /// Check that indices form whole triangles and stay in range
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.indices.len() % 3 != 0 {
            return Err(AssetError::InvalidData(format!(
                "Mesh '{}' has {} indices, not a multiple of 3",
                self.name,
                self.indices.len()
            )));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= self.vertices.len()) {
            return Err(AssetError::InvalidData(format!(
                "Mesh '{}' index {} out of range for {} vertices",
                self.name,
                bad,
                self.vertices.len()
            )));
        }
        Ok(())
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Whether any vertex carries a non-zero normal
    pub fn has_normals(&self) -> bool {
        self.vertices.iter().any(|v| v.normal != [0.0; 3])
    }

    /// Bounding box of all vertices, `None` for an empty mesh
    pub fn bounds(&self) -> Option<Aabb> {
        let first = Vec3::from(self.vertices.first()?.position);
        let init = Aabb { min: first, max: first };
        Some(self.vertices.iter().fold(init, |acc, v| {
            let p = Vec3::from(v.position);
            Aabb {
                min: acc.min.inf(&p),
                max: acc.max.sup(&p),
            }
        }))
    }

    /// Center the mesh on the origin and scale its largest extent to 1
    pub fn normalize_to_unit_cube(&mut self) {
        let Some(bounds) = self.bounds() else {
            return;
        };
        let center = bounds.center();
        let extent = bounds.size().max();
        let scale = if extent > f32::EPSILON { 1.0 / extent } else { 1.0 };

        for vertex in &mut self.vertices {
            let p = (Vec3::from(vertex.position) - center) * scale;
            vertex.position = p.into();
        }
    }

    /// Replace normals with per-face normals
    ///
    /// Vertices are duplicated per triangle so each face can carry its own normal.
    /// Meshes that fail [`MeshData::validate`] are left untouched.
    pub fn compute_flat_normals(&mut self) -> Result<(), AssetError> {
        self.validate()?;

        let mut vertices = Vec::with_capacity(self.indices.len());
        for tri in self.indices.chunks_exact(3) {
            let corners = [
                self.vertices[tri[0] as usize],
                self.vertices[tri[1] as usize],
                self.vertices[tri[2] as usize],
            ];
            let [a, b, c] = corners.map(|v| Vec3::from(v.position));
            let normal = (b - a).cross(&(c - a)).try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);

            vertices.extend(corners.into_iter().map(|v| Vertex {
                normal: normal.into(),
                ..v
            }));
        }

        self.indices = (0..vertices.len() as u32).collect();
        self.vertices = vertices;
        Ok(())
    }

    /// Unit cube centered on the origin with outward counter-clockwise faces
    pub fn cube() -> Self {
        // (normal, u, v) with u x v = normal
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ];
        let corners = [(-1.0, -1.0, [0.0, 1.0]), (1.0, -1.0, [1.0, 1.0]), (1.0, 1.0, [1.0, 0.0]), (-1.0, 1.0, [0.0, 0.0])];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in faces {
            let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
            let base = vertices.len() as u32;
            for (su, sv, tex_coord) in corners {
                let position = (n + u * su + v * sv) * 0.5;
                vertices.push(Vertex::new(position.into(), normal, tex_coord));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new("cube", vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> MeshData {
        MeshData::new(
            "tri",
            vec![
                Vertex::new([0.0, 0.0, 0.0], [0.0; 3], [0.0, 0.0]),
                Vertex::new([2.0, 0.0, 0.0], [0.0; 3], [1.0, 0.0]),
                Vertex::new([0.0, 4.0, 0.0], [0.0; 3], [0.0, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 32);
        let attributes = Vertex::attributes();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::bindings()[0].stride, 32);
        assert!(attributes.iter().enumerate().all(|(i, a)| a.location == i as u32));
    }

    #[test]
    fn test_bounds() {
        let bounds = triangle().bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(2.0, 4.0, 0.0));
        assert!(MeshData::default().bounds().is_none());
    }

    #[test]
    fn test_normalize_to_unit_cube() {
        let mut mesh = triangle();
        mesh.normalize_to_unit_cube();
        let bounds = mesh.bounds().unwrap();

        assert_relative_eq!(bounds.size().max(), 1.0);
        assert_relative_eq!(bounds.center(), Vec3::zeros(), epsilon = 1e-6);
        assert_relative_eq!(bounds.max.x, 0.25);
    }

    #[test]
    fn test_flat_normals() {
        let mut mesh = triangle();
        assert!(!mesh.has_normals());
        mesh.compute_flat_normals().unwrap();

        assert!(mesh.has_normals());
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        for vertex in &mesh.vertices {
            assert_relative_eq!(Vec3::from(vertex.normal), Vec3::new(0.0, 0.0, 1.0));
        }
    }

    #[test]
    fn test_flat_normals_reject_bad_indices() {
        let mut mesh = triangle();
        mesh.indices = vec![0, 1, 7];
        assert!(matches!(mesh.compute_flat_normals(), Err(AssetError::InvalidData(_))));
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 7]);
    }

    #[test]
    fn test_validate() {
        assert!(triangle().validate().is_ok());
        let mut partial = triangle();
        partial.indices.push(0);
        assert!(partial.validate().is_err());
        let mut out_of_range = triangle();
        out_of_range.indices[2] = 3;
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube.validate().is_ok());

        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(cube.vertices[i as usize].position));
            let winding_normal = (b - a).cross(&(c - a)).normalize();
            let stored = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert_relative_eq!(winding_normal, stored, epsilon = 1e-6);
            // Outward: the face normal points away from the center
            assert!(a.dot(&stored) > 0.0);
        }

        let bounds = cube.bounds().unwrap();
        assert_relative_eq!(bounds.size(), Vec3::new(1.0, 1.0, 1.0));
    }
}
