//! Vulkan context: instance, surface, device, allocator and submission
//!
//! Everything that lives for the whole application and is shared by the
//! renderer and the transfer helpers.

use ash::extensions::khr::Surface;
use ash::{vk, Device, Instance};
use std::sync::Arc;

use super::allocator::GpuAllocator;
use super::commands::{CommandPool, ImmediateSubmitter};
use super::device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
use super::instance::VulkanInstance;
use super::{VulkanError, VulkanResult};
use crate::config::RendererConfig;
use crate::window::Window;

/// Presentation surface with RAII cleanup
struct SurfaceHandle {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Vulkan context managing core Vulkan objects
///
/// Fields are dropped in declaration order: submitter, command pool,
/// allocator, device, surface, instance.
pub struct VulkanContext {
    submitter: ImmediateSubmitter,
    command_pool: CommandPool,
    allocator: Arc<GpuAllocator>,
    device: LogicalDevice,
    surface: SurfaceHandle,
    physical_device: PhysicalDeviceInfo,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a context rendering to `window`
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let extensions = window
            .required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let instance = VulkanInstance::new(&config.application_name, &extensions, config.validation_enabled())?;

        let loader = Surface::new(&instance.entry, &instance.instance);
        let raw_surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let surface = SurfaceHandle {
            loader,
            surface: raw_surface,
        };

        let physical_device = PhysicalDeviceInfo::select(&instance.instance, surface.surface, &surface.loader)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;
        let allocator = Arc::new(GpuAllocator::new(
            &instance.instance,
            &device.device,
            physical_device.device,
        )?);

        let families = device.queue_families;
        let command_pool = CommandPool::new(device.device.clone(), families.graphics)?;
        let submitter = ImmediateSubmitter::new(device.device.clone(), device.graphics_queue, families.graphics)?;

        log::info!(
            "Vulkan context ready (graphics family {}, present family {})",
            families.graphics,
            families.present
        );

        Ok(Self {
            submitter,
            command_pool,
            allocator,
            device,
            surface,
            physical_device,
            instance,
        })
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Whether validation layers are active
    pub fn validation_enabled(&self) -> bool {
        self.instance.validation_enabled()
    }

    /// Presentation surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface.loader
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Logical device with its queues
    pub fn logical_device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Raw logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Memory allocator shared by buffers and images
    pub fn allocator(&self) -> &Arc<GpuAllocator> {
        &self.allocator
    }

    /// Command pool for per-frame command buffers
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Synchronous submitter used by transfers
    pub fn submitter(&self) -> &ImmediateSubmitter {
        &self.submitter
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.device.queue_families
    }

    /// Format capabilities of the physical device
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device.device, format)
        }
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        let _ = self.wait_idle();
        if Arc::strong_count(&self.allocator) > 1 {
            log::warn!("GPU resources still alive while the Vulkan context is dropped");
        }
        log::debug!("Destroying Vulkan context");
    }
}
