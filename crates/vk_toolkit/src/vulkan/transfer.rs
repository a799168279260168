//! Staged uploads, readbacks and mipmap generation
//!
//! All transfers are synchronous: commands are recorded into the context's
//! [`ImmediateSubmitter`](super::ImmediateSubmitter) and this module returns
//! only after the GPU has finished. Staging memory is released on return.

use ash::vk;

use super::allocator::MemoryLocation;
use super::barrier::{MipLayoutTracker, PlannedBarrier};
use super::buffer::Buffer;
use super::context::VulkanContext;
use super::image::{format_texel_size, Image, ImageDesc, Sampler, SamplerDesc, Texture};
use super::{VulkanError, VulkanResult};

/// Texture format used for RGBA8 color uploads
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Extent of mip `level`; each dimension halves and never drops below 1
pub fn mip_extent(extent: vk::Extent2D, level: u32) -> vk::Extent2D {
    let shrink = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    vk::Extent2D {
        width: shrink(extent.width),
        height: shrink(extent.height),
    }
}

/// Blit that downsamples mip `level - 1` into mip `level`
pub fn blit_region(extent: vk::Extent2D, level: u32) -> vk::ImageBlit {
    let src_level = level.saturating_sub(1);
    let src = mip_extent(extent, src_level);
    let dst = mip_extent(extent, level);
    let far_corner = |e: vk::Extent2D| vk::Offset3D {
        x: e.width as i32,
        y: e.height as i32,
        z: 1,
    };
    let layer = |mip_level| vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    };

    vk::ImageBlit {
        src_subresource: layer(src_level),
        src_offsets: [vk::Offset3D::default(), far_corner(src)],
        dst_subresource: layer(level),
        dst_offsets: [vk::Offset3D::default(), far_corner(dst)],
    }
}

/// Byte size of one mip level of a `format` image
pub fn mip_byte_size(extent: vk::Extent2D, level: u32, format: vk::Format) -> VulkanResult<usize> {
    let texel = format_texel_size(format).ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("No host transfer support for format {:?}", format),
    })?;
    let mip = mip_extent(extent, level);
    Ok(mip.width as usize * mip.height as usize * texel as usize)
}

/// Whether a format's optimal-tiling features allow linear-filtered blits
pub fn supports_linear_blit(properties: &vk::FormatProperties) -> bool {
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
}

/// Fail unless `mip` names one of `mip_levels` levels
pub fn check_mip_level(mip_levels: u32, mip: u32) -> VulkanResult<()> {
    if mip < mip_levels {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!("Mip level {} outside image with {} level(s)", mip, mip_levels),
        })
    }
}

/// Barriers recorded ahead of the blit into `level`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipBlitStep {
    /// Destination mip of the blit
    pub level: u32,
    /// Level `level - 1` to TRANSFER_SRC, then `level` to TRANSFER_DST
    pub barriers: Vec<PlannedBarrier>,
}

/// Full barrier sequence for building a mip chain from level 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipChainPlan {
    /// One step per blit, in recording order
    pub blits: Vec<MipBlitStep>,
    /// Barriers moving every level into the final layout
    pub finish: Vec<PlannedBarrier>,
}

/// Plan the barriers of [`generate_mipmaps`] against `layouts`
///
/// Mip 0 is expected to hold the written contents. `layouts` ends with every
/// level in `final_layout`.
pub fn plan_mip_chain(layouts: &mut MipLayoutTracker, final_layout: vk::ImageLayout) -> VulkanResult<MipChainPlan> {
    let levels = layouts.mip_levels();
    let mut blits = Vec::with_capacity(levels.saturating_sub(1) as usize);
    for level in 1..levels {
        let mut barriers = layouts.plan(level - 1, 1, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        barriers.extend(layouts.plan(level, 1, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?);
        blits.push(MipBlitStep { level, barriers });
    }
    let finish = layouts.plan_all(final_layout)?;
    Ok(MipChainPlan { blits, finish })
}

/// Submit commands that move `image` between layouts
///
/// `record` plans against a copy of the tracked layouts, which replaces the
/// image's own only after the GPU has finished the work.
fn submit_tracked<F>(ctx: &VulkanContext, image: &mut Image, record: F) -> VulkanResult<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer, &Image, &mut MipLayoutTracker) -> VulkanResult<()>,
{
    let mut layouts = image.layouts().clone();
    {
        let target: &Image = image;
        ctx.submitter()
            .submit(|device, cmd| record(device, cmd, target, &mut layouts))?;
    }
    image.commit_layouts(layouts)
}

fn copy_region(image: &Image, mip: u32) -> vk::BufferImageCopy {
    let extent = mip_extent(image.extent(), mip);
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: image.desc().aspect,
            mip_level: mip,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    }
}

fn require_usage(image: &Image, usage: vk::ImageUsageFlags, what: &str) -> VulkanResult<()> {
    if image.desc().usage.contains(usage) {
        Ok(())
    } else {
        Err(VulkanError::InvalidOperation {
            reason: format!("Image needs {:?} usage for {}", usage, what),
        })
    }
}

/// Copy `data` into the start of `dst` through a staging buffer
pub fn upload_buffer(ctx: &VulkanContext, dst: &Buffer, data: &[u8]) -> VulkanResult<()> {
    dst.require_usage(vk::BufferUsageFlags::TRANSFER_DST, "uploads")?;
    if data.is_empty() {
        return Ok(());
    }
    if data.len() as vk::DeviceSize > dst.size() {
        return Err(VulkanError::SizeMismatch {
            expected: dst.size(),
            actual: data.len() as u64,
        });
    }

    let mut staging = Buffer::new(
        ctx.allocator().clone(),
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    staging.write_bytes(0, data)?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: data.len() as vk::DeviceSize,
    };
    ctx.submitter().submit(|device, cmd| {
        unsafe { device.cmd_copy_buffer(cmd, staging.handle(), dst.handle(), &[region]) };
        Ok(())
    })?;

    log::trace!("Uploaded {} bytes to buffer {:?}", data.len(), dst.handle());
    Ok(())
}

/// Create a device-local buffer holding `data`
pub fn create_device_buffer(ctx: &VulkanContext, data: &[u8], usage: vk::BufferUsageFlags) -> VulkanResult<Buffer> {
    let buffer = Buffer::new(
        ctx.allocator().clone(),
        data.len() as vk::DeviceSize,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
    )?;
    upload_buffer(ctx, &buffer, data)?;
    Ok(buffer)
}

/// Read back the whole contents of `src`
pub fn download_buffer(ctx: &VulkanContext, src: &Buffer) -> VulkanResult<Vec<u8>> {
    src.require_usage(vk::BufferUsageFlags::TRANSFER_SRC, "downloads")?;
    let mut staging = Buffer::new(
        ctx.allocator().clone(),
        src.size(),
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
    )?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size(),
    };
    ctx.submitter().submit(|device, cmd| {
        unsafe { device.cmd_copy_buffer(cmd, src.handle(), staging.handle(), &[region]) };
        Ok(())
    })?;

    staging.read_bytes()
}

/// Upload tightly packed texels into one mip level
///
/// The level is left in `TRANSFER_DST_OPTIMAL`.
pub fn upload_image(ctx: &VulkanContext, image: &mut Image, mip: u32, data: &[u8]) -> VulkanResult<()> {
    require_usage(image, vk::ImageUsageFlags::TRANSFER_DST, "uploads")?;
    check_mip_level(image.mip_levels(), mip)?;
    let expected = mip_byte_size(image.extent(), mip, image.format())?;
    if data.len() != expected {
        return Err(VulkanError::SizeMismatch {
            expected: expected as u64,
            actual: data.len() as u64,
        });
    }

    let mut staging = Buffer::new(
        ctx.allocator().clone(),
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    staging.write_bytes(0, data)?;

    let region = copy_region(image, mip);
    submit_tracked(ctx, image, |device, cmd, image, layouts| {
        image.record_barriers(cmd, &layouts.plan(mip, 1, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?);
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    })
}

/// Read back one mip level; the level is left in `TRANSFER_SRC_OPTIMAL`
pub fn download_image(ctx: &VulkanContext, image: &mut Image, mip: u32) -> VulkanResult<Vec<u8>> {
    require_usage(image, vk::ImageUsageFlags::TRANSFER_SRC, "downloads")?;
    check_mip_level(image.mip_levels(), mip)?;
    let size = mip_byte_size(image.extent(), mip, image.format())?;

    let mut staging = Buffer::new(
        ctx.allocator().clone(),
        size as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
    )?;

    let region = copy_region(image, mip);
    submit_tracked(ctx, image, |device, cmd, image, layouts| {
        image.record_barriers(cmd, &layouts.plan(mip, 1, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?);
        unsafe {
            device.cmd_copy_image_to_buffer(
                cmd,
                image.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.handle(),
                &[region],
            );
        }
        Ok(())
    })?;

    staging.read_bytes()
}

/// Fill mips `1..` by repeatedly blitting from the level above
///
/// Mip 0 must already hold the image contents. Every level ends in `final_layout`.
pub fn generate_mipmaps(ctx: &VulkanContext, image: &mut Image, final_layout: vk::ImageLayout) -> VulkanResult<()> {
    let properties = ctx.format_properties(image.format());
    if !supports_linear_blit(&properties) {
        return Err(VulkanError::InvalidOperation {
            reason: format!("Format {:?} does not support linear blits", image.format()),
        });
    }
    require_usage(
        image,
        vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        "mipmap generation",
    )?;

    let extent = image.extent();
    let levels = image.mip_levels();
    submit_tracked(ctx, image, |device, cmd, image, layouts| {
        let plan = plan_mip_chain(layouts, final_layout)?;
        for step in &plan.blits {
            image.record_barriers(cmd, &step.barriers);
            unsafe {
                device.cmd_blit_image(
                    cmd,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit_region(extent, step.level)],
                    vk::Filter::LINEAR,
                );
            }
        }
        image.record_barriers(cmd, &plan.finish);
        Ok(())
    })?;

    log::debug!("Generated {} mip level(s) for {:?}", levels, image.handle());
    Ok(())
}

/// Build a sampled texture from tightly packed RGBA8 pixels
///
/// Mipmaps are skipped with a warning when the format cannot be blitted
/// with linear filtering.
pub fn upload_texture(
    ctx: &VulkanContext,
    rgba: &[u8],
    width: u32,
    height: u32,
    generate_mips: bool,
) -> VulkanResult<Texture> {
    let blit_ok = supports_linear_blit(&ctx.format_properties(TEXTURE_FORMAT));
    if generate_mips && !blit_ok {
        log::warn!("{:?} cannot be blitted linearly; uploading without mipmaps", TEXTURE_FORMAT);
    }
    let mip_levels = if generate_mips && blit_ok {
        mip_level_count(width, height)
    } else {
        1
    };

    let desc = ImageDesc::color(
        vk::Extent2D { width, height },
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
    )
    .with_mip_levels(mip_levels);
    let mut image = Image::new(ctx.device().clone(), ctx.allocator().clone(), desc)?;

    upload_image(ctx, &mut image, 0, rgba)?;
    if mip_levels > 1 {
        generate_mipmaps(ctx, &mut image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
    } else {
        submit_tracked(ctx, &mut image, |_, cmd, image, layouts| {
            image.record_barriers(cmd, &layouts.plan_all(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?);
            Ok(())
        })?;
    }

    let view = image.create_view(0, mip_levels)?;
    let sampler_desc = SamplerDesc {
        max_lod: mip_levels as f32,
        ..SamplerDesc::default()
    };
    let sampler = Sampler::new(ctx.device().clone(), &sampler_desc, ctx.physical_device().max_anisotropy())?;

    log::debug!("Uploaded {}x{} texture ({} mip level(s))", width, height, mip_levels);
    Ok(Texture { sampler, view, image })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(0, 0), 1);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 1), 2);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(300, 17), 9);
        assert_eq!(mip_level_count(1, 1024), 11);
    }

    #[test]
    fn test_mip_extent_halves_with_floor() {
        assert_eq!(mip_extent(extent(256, 64), 0), extent(256, 64));
        assert_eq!(mip_extent(extent(256, 64), 3), extent(32, 8));
        assert_eq!(mip_extent(extent(256, 64), 7), extent(2, 1));
        assert_eq!(mip_extent(extent(300, 17), 1), extent(150, 8));
        assert_eq!(mip_extent(extent(4, 4), 40), extent(1, 1));
    }

    #[test]
    fn test_blit_region() {
        let blit = blit_region(extent(64, 32), 2);
        assert_eq!(blit.src_subresource.mip_level, 1);
        assert_eq!(blit.dst_subresource.mip_level, 2);
        assert_eq!(blit.src_offsets[1], vk::Offset3D { x: 32, y: 16, z: 1 });
        assert_eq!(blit.dst_offsets[1], vk::Offset3D { x: 16, y: 8, z: 1 });
        assert_eq!(blit.dst_offsets[0], vk::Offset3D::default());
    }

    #[test]
    fn test_mip_byte_size() {
        assert_eq!(mip_byte_size(extent(16, 8), 0, vk::Format::R8G8B8A8_SRGB).unwrap(), 512);
        assert_eq!(mip_byte_size(extent(16, 8), 1, vk::Format::R8G8B8A8_SRGB).unwrap(), 128);
        assert_eq!(mip_byte_size(extent(16, 8), 10, vk::Format::R8_UNORM).unwrap(), 1);
        assert!(mip_byte_size(extent(16, 8), 0, vk::Format::BC7_UNORM_BLOCK).is_err());
    }

    #[test]
    fn test_linear_blit_support() {
        let mut properties = vk::FormatProperties::default();
        assert!(!supports_linear_blit(&properties));
        properties.optimal_tiling_features =
            vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        assert!(supports_linear_blit(&properties));
        properties.optimal_tiling_features = vk::FormatFeatureFlags::empty();
        properties.linear_tiling_features = vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR;
        assert!(!supports_linear_blit(&properties));
    }

    #[test]
    fn test_mip_level_check() {
        assert!(check_mip_level(3, 0).is_ok());
        assert!(check_mip_level(3, 2).is_ok());
        assert!(matches!(check_mip_level(3, 3), Err(VulkanError::InvalidOperation { .. })));
        assert!(check_mip_level(1, u32::MAX).is_err());
    }

    fn uploaded_tracker(levels: u32) -> MipLayoutTracker {
        let mut layouts = MipLayoutTracker::new(levels);
        layouts.plan(0, 1, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        layouts
    }

    #[test]
    fn test_mip_chain_blit_barriers() {
        let mut layouts = uploaded_tracker(4);
        let plan = plan_mip_chain(&mut layouts, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();

        assert_eq!(plan.blits.len(), 3);
        for (i, step) in plan.blits.iter().enumerate() {
            let level = i as u32 + 1;
            assert_eq!(step.level, level);
            assert_eq!(step.barriers.len(), 2);

            let src = step.barriers[0];
            assert_eq!((src.base_mip, src.level_count), (level - 1, 1));
            assert_eq!(src.old.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            assert_eq!(src.old.access, vk::AccessFlags::TRANSFER_WRITE);
            assert_eq!(src.new.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            assert_eq!(src.new.access, vk::AccessFlags::TRANSFER_READ);
            assert_eq!(src.src_stage, vk::PipelineStageFlags::TRANSFER);

            let dst = step.barriers[1];
            assert_eq!((dst.base_mip, dst.level_count), (level, 1));
            assert_eq!(dst.old.layout, vk::ImageLayout::UNDEFINED);
            assert_eq!(dst.new.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            assert_eq!(dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        }
    }

    #[test]
    fn test_mip_chain_final_barriers_merge() {
        let mut layouts = uploaded_tracker(4);
        let plan = plan_mip_chain(&mut layouts, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();

        assert_eq!(plan.finish.len(), 2);
        assert_eq!((plan.finish[0].base_mip, plan.finish[0].level_count), (0, 3));
        assert_eq!(plan.finish[0].old.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!((plan.finish[1].base_mip, plan.finish[1].level_count), (3, 1));
        assert_eq!(plan.finish[1].old.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(plan
            .finish
            .iter()
            .all(|b| b.new.layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                && b.dst_stage == vk::PipelineStageFlags::FRAGMENT_SHADER));

        for mip in 0..4 {
            assert_eq!(layouts.state(mip).unwrap().layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
    }

    #[test]
    fn test_mip_chain_single_level() {
        let mut layouts = uploaded_tracker(1);
        let plan = plan_mip_chain(&mut layouts, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert!(plan.blits.is_empty());
        assert_eq!(plan.finish.len(), 1);
        assert_eq!(plan.finish[0].old.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
