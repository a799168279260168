//! Allocator-backed images, views, samplers and textures
//!
//! Each [`Image`] owns a [`MipLayoutTracker`]; [`Image::transition`] is the
//! only place that records image memory barriers.

use ash::{vk, Device};
use std::sync::Arc;

use super::allocator::{GpuAllocator, MemoryLocation};
use super::barrier::{ImageAccess, MipLayoutTracker, PlannedBarrier};
use super::transfer::mip_level_count;
use super::{VulkanError, VulkanResult};

/// Bytes per texel for the uncompressed formats the toolkit uploads
pub fn format_texel_size(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Parameters for [`Image::new`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size of mip level 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Intended usage
    pub usage: vk::ImageUsageFlags,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Aspect used for views and barriers
    pub aspect: vk::ImageAspectFlags,
    /// Memory location
    pub location: MemoryLocation,
}

impl ImageDesc {
    /// Single-level device-local color image
    pub fn color(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            aspect: vk::ImageAspectFlags::COLOR,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Depth attachment image
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            mip_levels: 1,
            aspect: vk::ImageAspectFlags::DEPTH,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Set the number of mip levels
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Check extent and mip count
    pub fn validate(&self) -> VulkanResult<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(VulkanError::invalid("Image extent must be non-zero"));
        }
        let max_levels = mip_level_count(self.extent.width, self.extent.height);
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "{} mip level(s) requested for a {}x{} image (max {})",
                    self.mip_levels, self.extent.width, self.extent.height, max_levels
                ),
            });
        }
        Ok(())
    }
}

/// 2D image with allocator-backed memory and per-mip layout tracking
pub struct Image {
    device: Device,
    allocator: Arc<GpuAllocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    desc: ImageDesc,
    tracker: MipLayoutTracker,
}

impl Image {
    /// Create an image in the undefined layout
    pub fn new(device: Device, allocator: Arc<GpuAllocator>, desc: ImageDesc) -> VulkanResult<Self> {
        desc.validate()?;

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let (image, allocation) = allocator.create_image(&create_info, desc.location)?;
        log::debug!(
            "Created {}x{} {:?} image with {} mip level(s)",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels
        );

        Ok(Self {
            device,
            allocator,
            image,
            allocation,
            desc,
            tracker: MipLayoutTracker::new(desc.mip_levels),
        })
    }

    /// Record the barriers that move mips `base_mip..base_mip + count` into `new_layout`
    ///
    /// The tracked layouts change immediately. Transfers that may fail to
    /// submit plan against a copy from [`Image::layouts`] instead and hand it
    /// back through [`Image::commit_layouts`].
    pub fn transition(
        &mut self,
        cmd: vk::CommandBuffer,
        base_mip: u32,
        count: u32,
        new_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let barriers = self.tracker.plan(base_mip, count, new_layout)?;
        self.record_barriers(cmd, &barriers);
        Ok(())
    }

    /// Record already planned barriers without touching the tracked layouts
    pub fn record_barriers(&self, cmd: vk::CommandBuffer, barriers: &[PlannedBarrier]) {
        for planned in barriers {
            let barrier = planned.image_memory_barrier(self.image, self.desc.aspect);
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    planned.src_stage,
                    planned.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
        }
    }

    /// Tracked per-mip layouts
    pub fn layouts(&self) -> &MipLayoutTracker {
        &self.tracker
    }

    /// Replace the tracked layouts once the GPU has executed the planned barriers
    pub fn commit_layouts(&mut self, tracker: MipLayoutTracker) -> VulkanResult<()> {
        if tracker.mip_levels() != self.desc.mip_levels {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Tracker covers {} mip level(s), image has {}",
                    tracker.mip_levels(),
                    self.desc.mip_levels
                ),
            });
        }
        self.tracker = tracker;
        Ok(())
    }

    /// Record a layout change performed by a render pass
    pub fn assume_layout(&mut self, layout: vk::ImageLayout) -> VulkanResult<()> {
        self.tracker
            .assume(0, self.desc.mip_levels, ImageAccess::for_layout(layout))
    }

    /// Create a view over `count` mip levels starting at `base_mip`
    pub fn create_view(&self, base_mip: u32, count: u32) -> VulkanResult<ImageView> {
        if count == 0 || base_mip.saturating_add(count) > self.desc.mip_levels {
            return Err(VulkanError::invalid("Image view mip range out of bounds"));
        }

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.desc.aspect,
                base_mip_level: base_mip,
                level_count: count,
                base_array_layer: 0,
                layer_count: 1,
            });

        ImageView::new(self.device.clone(), &create_info)
    }

    /// Current state of a mip level
    pub fn mip_state(&self, mip: u32) -> Option<ImageAccess> {
        self.tracker.state(mip)
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Size of mip level 0
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.allocator.destroy_image(self.image, &mut self.allocation);
    }
}

/// Image view wrapper with RAII cleanup
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// Create an image view from a filled-in create info
    pub fn new(device: Device, create_info: &vk::ImageViewCreateInfo) -> VulkanResult<Self> {
        let view = unsafe { device.create_image_view(create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, view })
    }

    /// Get view handle
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.view, None) };
    }
}

/// Clamp a requested anisotropy level to what the device allows
///
/// Returns `None` when anisotropic filtering should be disabled.
pub fn clamp_anisotropy(requested: Option<f32>, device_limit: Option<f32>) -> Option<f32> {
    let clamped = requested?.min(device_limit?);
    (clamped > 1.0).then_some(clamped)
}

/// Parameters for [`Sampler::new`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Magnification filter
    pub mag_filter: vk::Filter,
    /// Minification filter
    pub min_filter: vk::Filter,
    /// Filter between mip levels
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Address mode for all axes
    pub address_mode: vk::SamplerAddressMode,
    /// Requested anisotropy; `None` disables it
    pub max_anisotropy: Option<f32>,
    /// Highest mip level that may be sampled
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: Some(16.0),
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a sampler, clamping anisotropy to `device_limit`
    pub fn new(device: Device, desc: &SamplerDesc, device_limit: Option<f32>) -> VulkanResult<Self> {
        let anisotropy = clamp_anisotropy(desc.max_anisotropy, device_limit);

        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(desc.mipmap_mode)
            .min_lod(0.0)
            .max_lod(desc.max_lod);

        let sampler = unsafe { device.create_sampler(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, sampler })
    }

    /// Get sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

/// Sampled image ready for descriptor binding
pub struct Texture {
    /// Sampler, dropped first
    pub sampler: Sampler,
    /// View over every mip level
    pub view: ImageView,
    /// Backing image
    pub image: Image,
}

impl Texture {
    /// Descriptor info for a combined image sampler binding
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.handle(),
            image_view: self.view.handle(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_texel_sizes() {
        assert_eq!(format_texel_size(vk::Format::R8G8B8A8_SRGB), Some(4));
        assert_eq!(format_texel_size(vk::Format::R8_UNORM), Some(1));
        assert_eq!(format_texel_size(vk::Format::R32G32B32A32_SFLOAT), Some(16));
        assert_eq!(format_texel_size(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn test_desc_validation() {
        let usage = vk::ImageUsageFlags::SAMPLED;
        assert!(ImageDesc::color(extent(256, 128), vk::Format::R8G8B8A8_UNORM, usage).validate().is_ok());
        assert!(ImageDesc::color(extent(256, 128), vk::Format::R8G8B8A8_UNORM, usage)
            .with_mip_levels(9)
            .validate()
            .is_ok());
        assert!(ImageDesc::color(extent(256, 128), vk::Format::R8G8B8A8_UNORM, usage)
            .with_mip_levels(10)
            .validate()
            .is_err());
        assert!(ImageDesc::color(extent(0, 16), vk::Format::R8G8B8A8_UNORM, usage).validate().is_err());
        assert!(ImageDesc::color(extent(16, 16), vk::Format::R8G8B8A8_UNORM, usage)
            .with_mip_levels(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_depth_desc() {
        let desc = ImageDesc::depth(extent(800, 600), vk::Format::D32_SFLOAT);
        assert_eq!(desc.aspect, vk::ImageAspectFlags::DEPTH);
        assert!(desc.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert_eq!(desc.location, MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_anisotropy_clamp() {
        assert_eq!(clamp_anisotropy(Some(16.0), Some(8.0)), Some(8.0));
        assert_eq!(clamp_anisotropy(Some(4.0), Some(16.0)), Some(4.0));
        assert_eq!(clamp_anisotropy(Some(16.0), None), None);
        assert_eq!(clamp_anisotropy(None, Some(16.0)), None);
        assert_eq!(clamp_anisotropy(Some(1.0), Some(16.0)), None);
    }
}
