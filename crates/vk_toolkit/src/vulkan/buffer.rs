//! Buffer management for vertex data, uniforms and staging
//!
//! Memory comes from [`GpuAllocator`]; host access is only allowed for
//! host-visible locations.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use super::allocator::{GpuAllocator, MemoryLocation};
use super::{VulkanError, VulkanResult};

/// Check that `len` bytes written at `offset` fit in a buffer of `capacity` bytes
pub fn check_write_range(capacity: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> VulkanResult<()> {
    let end = offset.checked_add(len as vk::DeviceSize).ok_or(VulkanError::SizeMismatch {
        expected: capacity,
        actual: u64::MAX,
    })?;
    if end > capacity {
        return Err(VulkanError::SizeMismatch {
            expected: capacity,
            actual: end,
        });
    }
    Ok(())
}

/// Check that a buffer created with `usage` may be used for `what`, which needs `required`
pub fn check_usage(usage: vk::BufferUsageFlags, required: vk::BufferUsageFlags, what: &str) -> VulkanResult<()> {
    if usage.contains(required) {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!("Buffer needs {:?} usage for {} (has {:?})", required, what, usage),
        })
    }
}

/// Buffer wrapper with allocator-backed memory
pub struct Buffer {
    allocator: Arc<GpuAllocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
}

impl Buffer {
    /// Create a new buffer
    pub fn new(
        allocator: Arc<GpuAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::invalid("Buffer size must be non-zero"));
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (buffer, allocation) = allocator.create_buffer(&buffer_info, location)?;
        log::trace!("Created {:?} buffer of {} bytes ({:?})", location, size, usage);

        Ok(Self {
            allocator,
            buffer,
            allocation,
            size,
            usage,
            location,
        })
    }

    /// Create a host-visible buffer initialised with `data`
    pub fn with_data<T: Pod>(
        allocator: Arc<GpuAllocator>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(allocator, bytes.len() as vk::DeviceSize, usage, MemoryLocation::CpuToGpu)?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    /// Write raw bytes at `offset`
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        self.require_host_visible()?;
        check_write_range(self.size, offset, bytes.len())?;

        let ptr = self.allocator.map(&mut self.allocation)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
        self.allocator.unmap(&mut self.allocation);
        Ok(())
    }

    /// Write a slice of plain-old-data values from the start of the buffer
    pub fn write_slice<T: Pod>(&mut self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copy the whole buffer contents back to the host
    pub fn read_bytes(&mut self) -> VulkanResult<Vec<u8>> {
        self.require_host_visible()?;

        let ptr = self.allocator.map(&mut self.allocation)?;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, self.size as usize) }.to_vec();
        self.allocator.unmap(&mut self.allocation);
        Ok(bytes)
    }

    fn require_host_visible(&self) -> VulkanResult<()> {
        if self.location.is_host_visible() {
            Ok(())
        } else {
            Err(VulkanError::invalid("Buffer memory is not host visible; use a staging transfer"))
        }
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Fail unless the buffer was created with `required` usage
    pub fn require_usage(&self, required: vk::BufferUsageFlags, what: &str) -> VulkanResult<()> {
        check_usage(self.usage, required, what)
    }

    /// Memory location the buffer was allocated in
    pub fn location(&self) -> MemoryLocation {
        self.location
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.allocator.destroy_buffer(self.buffer, &mut self.allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_range_fits() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 64, 0).is_ok());
    }

    #[test]
    fn test_write_range_overflow() {
        match check_write_range(64, 60, 8) {
            Err(VulkanError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 64);
                assert_eq!(actual, 68);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }

    #[test]
    fn test_usage_check() {
        let device_local = vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        assert!(check_usage(device_local, vk::BufferUsageFlags::TRANSFER_DST, "uploads").is_ok());
        assert!(matches!(
            check_usage(device_local, vk::BufferUsageFlags::TRANSFER_SRC, "downloads"),
            Err(VulkanError::InvalidOperation { .. })
        ));

        let both = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        assert!(check_usage(vk::BufferUsageFlags::TRANSFER_SRC, both, "copies").is_err());
        assert!(check_usage(both | device_local, both, "copies").is_ok());
    }
}
