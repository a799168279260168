//! Physical device selection and logical device creation
//!
//! Selection policy is split into pure functions ([`find_queue_families`],
//! [`rate_device`]) so it can be exercised without a GPU.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};
use std::collections::BTreeSet;
use std::ffi::CStr;

use super::{VulkanError, VulkanResult};

/// Queue family indices used by the toolkit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics and transfer work
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Distinct family indices, sorted
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }

    /// Whether graphics and present share one family
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Pick graphics and present queue families
///
/// A family that can do both is preferred over splitting the work.
pub fn find_queue_families<F>(families: &[vk::QueueFamilyProperties], mut present_support: F) -> Option<QueueFamilyIndices>
where
    F: FnMut(u32) -> bool,
{
    let mut graphics = None;
    let mut present = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics = family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = family.queue_count > 0 && present_support(index);

        if has_graphics && has_present {
            return Some(QueueFamilyIndices { graphics: index, present: index });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
    })
}

/// Score a physical device; zero means unusable
pub fn rate_device(properties: &vk::PhysicalDeviceProperties, has_queues: bool, has_extensions: bool) -> u64 {
    if !has_queues || !has_extensions {
        return 0;
    }

    let type_score: u64 = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 1,
    };

    // Texture size limit breaks ties within a device class
    type_score * 1_000_000 + u64::from(properties.limits.max_image_dimension2_d)
}

/// Device extensions the toolkit cannot run without
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [SwapchainLoader::name()]
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Select the best physical device for rendering to `surface`
    pub fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        if devices.is_empty() {
            return Err(VulkanError::NoSuitableDevice);
        }

        let mut best: Option<(u64, Self)> = None;
        let mut any_with_queues = false;
        for device in devices {
            let (score, info, has_queues) = Self::evaluate(instance, device, surface, surface_loader)?;
            any_with_queues |= has_queues;
            let name = unsafe { CStr::from_ptr(info.properties.device_name.as_ptr()) };
            log::debug!("GPU candidate {:?} scored {}", name, score);

            if score > 0 && best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                best = Some((score, info));
            }
        }

        let (_, info) = best.ok_or(if any_with_queues {
            VulkanError::NoSuitableDevice
        } else {
            VulkanError::MissingQueueFamily("graphics + present")
        })?;
        log::info!("Selected GPU: {}", info.name());
        Ok(info)
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<(u64, Self, bool)> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families = find_queue_families(&families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        });

        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_extensions = required_device_extensions().iter().all(|required| {
            available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == *required
            })
        });

        let has_queues = queue_families.is_some();
        let score = rate_device(&properties, has_queues, has_extensions);
        let info = Self {
            device,
            properties,
            features,
            memory_properties,
            // Placeholder for unusable devices; they are never selected
            queue_families: queue_families.unwrap_or(QueueFamilyIndices { graphics: 0, present: 0 }),
        };
        Ok((score, info, has_queues))
    }

    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// Maximum sampler anisotropy, or `None` when the feature is unsupported
    pub fn max_anisotropy(&self) -> Option<f32> {
        (self.features.sampler_anisotropy == vk::TRUE).then_some(self.properties.limits.max_sampler_anisotropy)
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Queue family indices the queues were taken from
    pub queue_families: QueueFamilyIndices,
}

impl LogicalDevice {
    /// Create a new logical device with required queues
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = required_device_extensions().map(|name| name.as_ptr());

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.max_anisotropy().is_some())
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.queue_families.present, 0) };

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            queue_families: physical.queue_families,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn properties(device_type: vk::PhysicalDeviceType, max_dim: u32) -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = max_dim;
        properties
    }

    #[test]
    fn test_prefers_combined_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 0 cannot present, family 2 can do both
        let indices = find_queue_families(&families, |i| i != 0).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
    }

    #[test]
    fn test_split_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn test_missing_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn test_empty_family_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let indices = find_queue_families(&families, |_| true).unwrap();
        assert_eq!(indices.graphics, 1);
    }

    #[test]
    fn test_rate_device_ordering() {
        let discrete = properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        let integrated = properties(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);
        let cpu = properties(vk::PhysicalDeviceType::CPU, 16384);

        assert!(rate_device(&discrete, true, true) > rate_device(&integrated, true, true));
        assert!(rate_device(&integrated, true, true) > rate_device(&cpu, true, true));
    }

    #[test]
    fn test_rate_device_unusable() {
        let discrete = properties(vk::PhysicalDeviceType::DISCRETE_GPU, 8192);
        assert_eq!(rate_device(&discrete, false, true), 0);
        assert_eq!(rate_device(&discrete, true, false), 0);
    }

    #[test]
    fn test_rate_device_tie_break() {
        let small = properties(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);
        let large = properties(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        assert!(rate_device(&large, true, true) > rate_device(&small, true, true));
    }
}
