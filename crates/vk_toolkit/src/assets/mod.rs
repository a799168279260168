//! Asset loading: meshes from OBJ files and RGBA images
//!
//! Parsing and decoding are delegated to `tobj` and `image`; this module turns
//! their output into GPU-ready vertex, index and pixel data.

pub mod image_loader;
pub mod mesh;
pub mod obj_loader;

pub use image_loader::ImageData;
pub use mesh::{Aabb, MeshData, Vertex};
pub use obj_loader::ObjLoader;

use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// Asset not found
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Failed to load asset
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),

    /// Invalid asset data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The source contained no usable geometry
    #[error("No geometry in {0}")]
    Empty(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
