//! OBJ file loader for 3D models
//!
//! Parsing is done by `tobj` with triangulation and a single index buffer;
//! this module converts its models into [`MeshData`].

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use super::mesh::{MeshData, Vertex};
use super::AssetError;

/// Loads Wavefront OBJ files into mesh data
pub struct ObjLoader;

impl ObjLoader {
    fn load_options() -> tobj::LoadOptions {
        tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        }
    }

    /// Load every model in an OBJ file, one mesh per model
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<MeshData>, AssetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        log::debug!("Loading OBJ from {:?}", path);
        let (models, _materials) = tobj::load_obj(path, &Self::load_options())
            .map_err(|e| AssetError::LoadFailed(format!("{}: {}", path.display(), e)))?;

        let meshes = Self::convert(models, &path.display().to_string())?;
        log::info!("Loaded {} mesh(es) from {:?}", meshes.len(), path);
        Ok(meshes)
    }

    /// Load OBJ data from any buffered reader; material libraries are ignored
    pub fn load_from_reader<R: BufRead>(mut reader: R, name: &str) -> Result<Vec<MeshData>, AssetError> {
        let (models, _materials) = tobj::load_obj_buf(&mut reader, &Self::load_options(), |_| Ok(Default::default()))
            .map_err(|e| AssetError::LoadFailed(format!("{}: {}", name, e)))?;

        Self::convert(models, name)
    }

    fn convert(models: Vec<tobj::Model>, source: &str) -> Result<Vec<MeshData>, AssetError> {
        let mut meshes = Vec::with_capacity(models.len());
        for model in models {
            if model.mesh.indices.is_empty() {
                log::debug!("Skipping empty model '{}' in {}", model.name, source);
                continue;
            }
            let mesh = Self::convert_model(model)?;
            mesh.validate()?;
            meshes.push(mesh);
        }

        if meshes.is_empty() {
            return Err(AssetError::Empty(source.to_string()));
        }
        Ok(meshes)
    }

    fn convert_model(model: tobj::Model) -> Result<MeshData, AssetError> {
        let mesh = &model.mesh;
        let vertex_count = mesh.positions.len() / 3;
        let has_normals = mesh.normals.len() / 3 >= vertex_count;
        let has_tex_coords = mesh.texcoords.len() / 2 >= vertex_count;

        let mut vertices = Vec::new();
        let mut indices = Vec::with_capacity(mesh.indices.len());
        let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

        for &index in &mesh.indices {
            let i = index as usize;
            if i >= vertex_count {
                return Err(AssetError::InvalidData(format!(
                    "Model '{}' index {} out of range for {} positions",
                    model.name, index, vertex_count
                )));
            }

            let position = [mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]];
            let normal = if has_normals {
                [mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2]]
            } else {
                [0.0; 3]
            };
            // OBJ puts the texture origin at the bottom left
            let tex_coord = if has_tex_coords {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0; 2]
            };

            let vertex = Vertex::new(position, normal, tex_coord);
            let next = vertices.len() as u32;
            let slot = *unique.entry(vertex.key()).or_insert_with(|| {
                vertices.push(vertex);
                next
            });
            indices.push(slot);
        }

        let mut data = MeshData::new(model.name, vertices, indices);
        if !has_normals {
            log::debug!("Model '{}' has no normals, computing flat normals", data.name);
            data.compute_flat_normals()?;
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
o quad
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn test_quad_is_triangulated_and_deduplicated() {
        let meshes = ObjLoader::load_from_reader(Cursor::new(QUAD), "quad").unwrap();
        assert_eq!(meshes.len(), 1);

        let quad = &meshes[0];
        assert_eq!(quad.name, "quad");
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.indices.len(), 6);
        assert!(quad.validate().is_ok());
        assert!(quad.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_tex_coords_are_flipped() {
        let meshes = ObjLoader::load_from_reader(Cursor::new(QUAD), "quad").unwrap();
        let origin = meshes[0]
            .vertices
            .iter()
            .find(|v| v.position == [0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(origin.tex_coord, [0.0, 1.0]);
    }

    #[test]
    fn test_missing_normals_are_computed() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let meshes = ObjLoader::load_from_reader(Cursor::new(source), "tri").unwrap();

        let tri = &meshes[0];
        assert_eq!(tri.triangle_count(), 1);
        assert!(tri.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_empty_source() {
        let result = ObjLoader::load_from_reader(Cursor::new("# nothing here\n"), "empty");
        assert!(matches!(result, Err(AssetError::Empty(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ObjLoader::load("definitely/not/here.obj");
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }
}
