//! Vulkan swapchain management
//!
//! Format, present mode, extent and image count are chosen by pure functions
//! so the selection policy can be tested without a surface.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::context::VulkanContext;
use super::device::QueueFamilyIndices;
use super::image::ImageView;
use super::{VulkanError, VulkanResult};

/// Pick the surface format, preferring 8-bit sRGB
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    // A lone UNDEFINED entry means the surface accepts anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(preferred);
        }
    }

    let srgb = |format: vk::Format| {
        formats
            .iter()
            .find(|sf| sf.format == format && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
    };

    srgb(vk::Format::B8G8R8A8_SRGB)
        .or_else(|| srgb(vk::Format::R8G8B8A8_SRGB))
        .or_else(|| formats.first().copied())
}

/// MAILBOX when preferred and offered, otherwise the always-available FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface extent, falling back to the clamped window size when the surface leaves it open
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window_extent
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_extent
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Sharing mode and family list for swapchain images
pub fn image_sharing(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image ready for rendering
    Ready(u32),
    /// Image usable but the swapchain no longer matches the surface exactly
    Suboptimal(u32),
    /// Swapchain must be recreated before rendering
    OutOfDate,
}

impl AcquireOutcome {
    /// Interpret the result of `vkAcquireNextImageKHR`
    pub fn from_result(result: Result<(u32, bool), vk::Result>) -> VulkanResult<Self> {
        match result {
            Ok((index, false)) => Ok(Self::Ready(index)),
            Ok((index, true)) => Ok(Self::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

/// Result of presenting a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swapchain should be recreated
    Suboptimal,
    /// Not presented; the swapchain must be recreated
    OutOfDate,
}

impl PresentOutcome {
    /// Interpret the result of `vkQueuePresentKHR`
    pub fn from_result(result: Result<bool, vk::Result>) -> VulkanResult<Self> {
        match result {
            Ok(false) => Ok(Self::Presented),
            Ok(true) => Ok(Self::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Self::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Whether the caller should recreate the swapchain
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Swapchain wrapper with RAII cleanup
pub struct Swapchain {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the context's surface
    ///
    /// Passing the previous swapchain as `old` lets the driver reuse its resources.
    pub fn new(
        ctx: &VulkanContext,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
        old: Option<&Swapchain>,
    ) -> VulkanResult<Self> {
        let device: &Device = ctx.device();
        let physical = ctx.physical_device().device;
        let surface = ctx.surface();
        let surface_loader = ctx.surface_loader();
        let loader = SwapchainLoader::new(ctx.instance(), device);

        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical, surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical, surface)
                .map_err(VulkanError::Api)?
        };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, prefer_mailbox);
        let extent = choose_extent(&caps, window_extent);
        let image_count = choose_image_count(&caps);
        let (sharing_mode, family_indices) = image_sharing(&ctx.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |previous| previous.swapchain));

        let swapchain = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut swapchain = Self {
            loader,
            swapchain,
            images,
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };
        // Views are pushed one at a time so Drop cleans up after a partial failure
        for &image in &swapchain.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            swapchain.image_views.push(ImageView::new(device.clone(), &view_info)?);
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            swapchain.images.len(),
            format.format,
            present_mode
        );
        Ok(swapchain)
    }

    /// Acquire the next image, signalling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: u64) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        };
        AcquireOutcome::from_result(result)
    }

    /// Queue image `index` for presentation once `wait` is signalled
    pub fn present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        PresentOutcome::from_result(result)
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Image views, one per swapchain image
    pub fn image_views(&self) -> &[ImageView] {
        &self.image_views
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Surface format in use
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.image_views.clear();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(current: u32, min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current,
                height: current,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            min_image_count: min_count,
            max_image_count: max_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_preference() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choose_surface_format(&formats[..2]).unwrap().format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(choose_surface_format(&formats[..1]).unwrap().format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_surface_format_edge_cases() {
        assert!(choose_surface_format(&[]).is_none());
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_current() {
        let window = vk::Extent2D { width: 10, height: 10 };
        assert_eq!(choose_extent(&caps(800, 2, 3), window), vk::Extent2D { width: 800, height: 800 });
    }

    #[test]
    fn test_extent_clamped_to_window() {
        let open = caps(u32::MAX, 2, 3);
        let window = vk::Extent2D { width: 5000, height: 600 };
        assert_eq!(choose_extent(&open, window), vk::Extent2D { width: 4096, height: 600 });
        let tiny = vk::Extent2D { width: 0, height: 0 };
        assert_eq!(choose_extent(&open, tiny), vk::Extent2D { width: 1, height: 1 });
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(0, 2, 8)), 3);
        assert_eq!(choose_image_count(&caps(0, 3, 3)), 3);
        assert_eq!(choose_image_count(&caps(0, 2, 0)), 3);
    }

    #[test]
    fn test_sharing_mode() {
        let shared = QueueFamilyIndices { graphics: 0, present: 0 };
        assert_eq!(image_sharing(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));
        let split = QueueFamilyIndices { graphics: 2, present: 1 };
        assert_eq!(image_sharing(&split), (vk::SharingMode::CONCURRENT, vec![1, 2]));
    }

    #[test]
    fn test_acquire_outcome() {
        assert_eq!(AcquireOutcome::from_result(Ok((2, false))).unwrap(), AcquireOutcome::Ready(2));
        assert_eq!(AcquireOutcome::from_result(Ok((1, true))).unwrap(), AcquireOutcome::Suboptimal(1));
        assert_eq!(
            AcquireOutcome::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(AcquireOutcome::from_result(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn test_present_outcome() {
        assert!(!PresentOutcome::from_result(Ok(false)).unwrap().needs_recreate());
        assert!(PresentOutcome::from_result(Ok(true)).unwrap().needs_recreate());
        assert!(PresentOutcome::from_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
            .unwrap()
            .needs_recreate());
        assert!(PresentOutcome::from_result(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
