//! # vk_toolkit
//!
//! A thin Vulkan rendering toolkit built on `ash`.
//!
//! ## Features
//!
//! - **Vulkan wrappers**: RAII instance, device, swapchain, pipeline and descriptor types
//! - **VMA-backed resources**: buffers and images allocated through `vk-mem`
//! - **Layout tracking**: per-mip image layouts with planned barriers
//! - **Assets**: OBJ meshes via `tobj`, textures via `image`
//! - **Scene graph**: slotmap-keyed node hierarchy drawn by a forward renderer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_toolkit::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ToolkitConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let ctx = VulkanContext::new(&mut window, &config.renderer)?;
//!     let mut renderer = Renderer::new(&ctx, &window, &config.renderer)?;
//!
//!     let mut meshes = MeshLibrary::new();
//!     let cube = meshes.upload(&ctx, &MeshData::cube())?;
//!     let mut scene = SceneGraph::new();
//!     let node = scene.add_node(scene.root(), "cube", Transform::identity())?;
//!     scene.set_mesh(node, Some(cube))?;
//!
//!     let camera = Camera::default();
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_frame(&ctx, &mut window, &mut scene, &meshes, &camera)?;
//!     }
//!     drop(renderer);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod foundation;
pub mod renderer;
pub mod scene;
pub mod vulkan;
pub mod window;

/// Common imports for toolkit users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, ImageData, MeshData, ObjLoader, Vertex},
        config::{Config, ToolkitConfig},
        foundation::math::{Mat4, Quat, Vec3, Transform},
        renderer::{FrameStatus, Renderer, RendererError},
        scene::{Camera, MeshHandle, MeshLibrary, NodeKey, SceneGraph},
        vulkan::{VulkanContext, VulkanError},
        window::Window,
    };
}
