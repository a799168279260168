//! Scene management: node hierarchy, camera and GPU meshes

pub mod camera;
pub mod graph;
pub mod mesh;

pub use camera::Camera;
pub use graph::{NodeFlags, NodeKey, SceneError, SceneGraph, SceneNode};
pub use mesh::{GpuMesh, MeshHandle, MeshLibrary};
