//! Swapchain-sized render targets
//!
//! Everything that has to be rebuilt when the surface changes size: the
//! swapchain itself, the depth buffer and one framebuffer per swapchain image.

use ash::vk;

use crate::vulkan::{Framebuffer, Image, ImageDesc, ImageView, Swapchain, VulkanContext, VulkanResult};

/// Swapchain plus the attachments rendered into it
pub struct RenderTargets {
    framebuffers: Vec<Framebuffer>,
    depth_view: ImageView,
    depth_image: Image,
    swapchain: Swapchain,
}

impl RenderTargets {
    /// Build depth buffer and framebuffers for `swapchain`
    pub fn new(
        ctx: &VulkanContext,
        swapchain: Swapchain,
        depth_format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<Self> {
        let extent = swapchain.extent();
        let depth_image = Image::new(
            ctx.device().clone(),
            ctx.allocator().clone(),
            ImageDesc::depth(extent, depth_format),
        )?;
        let depth_view = depth_image.create_view(0, 1)?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|view| {
                Framebuffer::new(
                    ctx.device().clone(),
                    render_pass,
                    &[view.handle(), depth_view.handle()],
                    extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Created {} framebuffer(s) at {}x{}",
            framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            framebuffers,
            depth_view,
            depth_image,
            swapchain,
        })
    }

    /// Presentation swapchain
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).map(Framebuffer::handle)
    }

    /// Current render extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Depth attachment format
    pub fn depth_format(&self) -> vk::Format {
        self.depth_image.format()
    }
}
