//! GPU memory allocation through the Vulkan Memory Allocator
//!
//! Buffers and images never touch `vkAllocateMemory` directly; they go
//! through [`GpuAllocator`], which picks memory types from a [`MemoryLocation`].

use ash::{vk, Device, Instance};
use vk_mem::Alloc;

use super::{VulkanError, VulkanResult};

/// Where a resource's memory should live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local memory, not host visible
    GpuOnly,
    /// Host-visible memory written sequentially by the CPU (staging, uniforms)
    CpuToGpu,
    /// Host-visible memory read back by the CPU (downloads)
    GpuToCpu,
}

impl MemoryLocation {
    /// Whether the CPU can map memory at this location
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Translate a memory location into VMA allocation parameters
pub fn allocation_create_info(location: MemoryLocation) -> vk_mem::AllocationCreateInfo {
    let host_coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

    match location {
        MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            required_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ..Default::default()
        },
        MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            required_flags: host_coherent,
            ..Default::default()
        },
        MemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            required_flags: host_coherent,
            preferred_flags: vk::MemoryPropertyFlags::HOST_CACHED,
            ..Default::default()
        },
    }
}

/// Wrapper around `vk_mem::Allocator`
///
/// Must be dropped before the logical device it was created from.
pub struct GpuAllocator {
    allocator: vk_mem::Allocator,
}

impl GpuAllocator {
    /// Create an allocator for the given device
    pub fn new(instance: &Instance, device: &Device, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device);
        #[allow(unused_unsafe)]
        let allocator = unsafe { vk_mem::Allocator::new(create_info) }.map_err(VulkanError::Allocation)?;

        log::debug!("Created VMA allocator");
        Ok(Self { allocator })
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        location: MemoryLocation,
    ) -> VulkanResult<(vk::Buffer, vk_mem::Allocation)> {
        let alloc_info = allocation_create_info(location);
        unsafe { self.allocator.create_buffer(info, &alloc_info) }.map_err(VulkanError::Allocation)
    }

    /// Create an image and bind freshly allocated memory to it
    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
    ) -> VulkanResult<(vk::Image, vk_mem::Allocation)> {
        let alloc_info = allocation_create_info(location);
        unsafe { self.allocator.create_image(info, &alloc_info) }.map_err(VulkanError::Allocation)
    }

    /// Destroy a buffer and free its memory
    pub fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        unsafe { self.allocator.destroy_buffer(buffer, allocation) };
    }

    /// Destroy an image and free its memory
    pub fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        unsafe { self.allocator.destroy_image(image, allocation) };
    }

    /// Map an allocation into host address space
    pub fn map(&self, allocation: &mut vk_mem::Allocation) -> VulkanResult<*mut u8> {
        unsafe { self.allocator.map_memory(allocation) }.map_err(VulkanError::Allocation)
    }

    /// Unmap a previously mapped allocation
    pub fn unmap(&self, allocation: &mut vk_mem::Allocation) {
        unsafe { self.allocator.unmap_memory(allocation) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_only_is_device_local() {
        let info = allocation_create_info(MemoryLocation::GpuOnly);
        assert!(info.required_flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
        assert!(!info.required_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(info.flags.is_empty());
    }

    #[test]
    fn test_upload_is_sequential_write() {
        let info = allocation_create_info(MemoryLocation::CpuToGpu);
        assert!(info.required_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT));
        assert!(info.flags.contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE));
    }

    #[test]
    fn test_readback_is_random_access() {
        let info = allocation_create_info(MemoryLocation::GpuToCpu);
        assert!(info.flags.contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM));
        assert!(info.preferred_flags.contains(vk::MemoryPropertyFlags::HOST_CACHED));
    }

    #[test]
    fn test_host_visibility() {
        assert!(!MemoryLocation::GpuOnly.is_host_visible());
        assert!(MemoryLocation::CpuToGpu.is_host_visible());
        assert!(MemoryLocation::GpuToCpu.is_host_visible());
    }
}
