//! GPU-resident meshes and the library that owns them

use ash::vk;
use slotmap::{new_key_type, SlotMap};

use crate::assets::{Aabb, MeshData};
use crate::vulkan::transfer::create_device_buffer;
use crate::vulkan::{Buffer, VulkanContext, VulkanError, VulkanResult};

new_key_type! {
    /// Handle to a mesh stored in a [`MeshLibrary`]
    pub struct MeshHandle;
}

/// Mesh uploaded to device-local vertex and index buffers
pub struct GpuMesh {
    name: String,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    bounds: Option<Aabb>,
}

impl GpuMesh {
    /// Upload mesh data through a staging buffer
    pub fn upload(ctx: &VulkanContext, mesh: &MeshData) -> VulkanResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(VulkanError::invalid(format!("mesh '{}' has no geometry", mesh.name)));
        }
        mesh.validate().map_err(|e| VulkanError::invalid(e.to_string()))?;

        let vertex_buffer = create_device_buffer(
            ctx,
            bytemuck::cast_slice(&mesh.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = create_device_buffer(
            ctx,
            bytemuck::cast_slice(&mesh.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} triangles)",
            mesh.name,
            mesh.vertices.len(),
            mesh.triangle_count()
        );

        Ok(Self {
            name: mesh.name.clone(),
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            bounds: mesh.bounds(),
        })
    }

    /// Mesh name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vertex buffer handle
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle (`u32` indices)
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Object-space bounds
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }
}

/// Owns GPU meshes and hands out stable handles
#[derive(Default)]
pub struct MeshLibrary {
    meshes: SlotMap<MeshHandle, GpuMesh>,
}

impl MeshLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload a mesh and return its handle
    pub fn upload(&mut self, ctx: &VulkanContext, mesh: &MeshData) -> VulkanResult<MeshHandle> {
        let gpu_mesh = GpuMesh::upload(ctx, mesh)?;
        Ok(self.meshes.insert(gpu_mesh))
    }

    /// Look up a mesh
    pub fn get(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle)
    }

    /// Remove a mesh; its buffers are freed when the returned value drops
    pub fn remove(&mut self, handle: MeshHandle) -> Option<GpuMesh> {
        self.meshes.remove(handle)
    }

    /// Handle of the first mesh with the given name
    pub fn find(&self, name: &str) -> Option<MeshHandle> {
        self.meshes.iter().find(|(_, m)| m.name == name).map(|(h, _)| h)
    }

    /// Number of meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Drop every mesh
    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}
