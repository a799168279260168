//! Descriptor set layouts, a growable descriptor allocator and set writes
//!
//! [`DescriptorAllocator`] hands out sets from a list of pools. When a pool
//! runs dry it is retired and a larger one is created, so callers never size
//! pools up front.

use ash::{vk, Device};
use std::collections::HashSet;

use super::{VulkanError, VulkanResult};

/// Upper bound on sets per pool when growing
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a dynamic-offset uniform buffer binding
    pub fn add_dynamic_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Reject layouts that use a binding number twice
    pub fn validate(&self) -> VulkanResult<()> {
        let mut seen = HashSet::new();
        for binding in &self.bindings {
            if !seen.insert(binding.binding) {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("Descriptor binding {} declared twice", binding.binding),
                });
            }
        }
        Ok(())
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        self.validate()?;

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Share of a pool reserved for one descriptor type, per set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor type
    pub ty: vk::DescriptorType,
    /// Descriptors of `ty` per set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Ratio for a descriptor type
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Pool sizes for `max_sets` sets: `ceil(ratio * max_sets)`, at least 1 each
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| vk::DescriptorPoolSize {
            ty: r.ty,
            descriptor_count: ((r.ratio * max_sets as f32).ceil() as u32).max(1),
        })
        .collect()
}

/// Size of the pool created after one with `current` sets, growing by half
pub fn next_pool_size(current: u32) -> u32 {
    current.saturating_add(current / 2).clamp(1, MAX_SETS_PER_POOL)
}

/// Whether an allocation failure means the pool is used up rather than a real error
pub fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

/// Growable descriptor allocator
pub struct DescriptorAllocator {
    device: Device,
    ratios: Vec<PoolSizeRatio>,
    sets_per_pool: u32,
    ready_pools: Vec<vk::DescriptorPool>,
    full_pools: Vec<vk::DescriptorPool>,
}

impl DescriptorAllocator {
    /// Create an allocator with one pool of `initial_sets` sets
    pub fn new(device: Device, initial_sets: u32, ratios: &[PoolSizeRatio]) -> VulkanResult<Self> {
        let mut allocator = Self {
            device,
            ratios: ratios.to_vec(),
            sets_per_pool: initial_sets.max(1),
            ready_pools: Vec::new(),
            full_pools: Vec::new(),
        };

        let first = allocator.create_pool(allocator.sets_per_pool)?;
        allocator.ready_pools.push(first);
        allocator.sets_per_pool = next_pool_size(allocator.sets_per_pool);
        Ok(allocator)
    }

    fn create_pool(&self, max_sets: u32) -> VulkanResult<vk::DescriptorPool> {
        let sizes = pool_sizes(max_sets, &self.ratios);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None).map_err(VulkanError::Api)? };
        log::debug!("Created descriptor pool for {} sets", max_sets);
        Ok(pool)
    }

    fn take_pool(&mut self) -> VulkanResult<vk::DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }
        let pool = self.create_pool(self.sets_per_pool)?;
        self.sets_per_pool = next_pool_size(self.sets_per_pool);
        Ok(pool)
    }

    fn try_allocate(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    /// Allocate one set, growing into a new pool if the current one is exhausted
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let mut pool = self.take_pool()?;

        let set = match self.try_allocate(pool, layout) {
            Ok(set) => set,
            Err(e) if is_pool_exhausted(e) => {
                log::debug!("Descriptor pool exhausted ({:?}); retiring it", e);
                self.full_pools.push(pool);
                pool = self.take_pool()?;
                match self.try_allocate(pool, layout) {
                    Ok(set) => set,
                    Err(e) => {
                        self.ready_pools.push(pool);
                        return Err(VulkanError::Api(e));
                    }
                }
            }
            Err(e) => {
                self.ready_pools.push(pool);
                return Err(VulkanError::Api(e));
            }
        };

        self.ready_pools.push(pool);
        Ok(set)
    }

    /// Reset every pool, invalidating all sets allocated so far
    pub fn reset_pools(&mut self) -> VulkanResult<()> {
        self.ready_pools.append(&mut self.full_pools);
        for &pool in &self.ready_pools {
            unsafe {
                self.device
                    .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                    .map_err(VulkanError::Api)?;
            }
        }
        Ok(())
    }

    /// Number of pools, ready and full
    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteSource {
    Buffer(usize),
    Image(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    ty: vk::DescriptorType,
    source: WriteSource,
}

/// Accumulates descriptor writes and applies them in one update
///
/// Info structs are stored by value; pointers into them are only taken inside
/// [`DescriptorWriter::update`], after all writes have been queued.
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffer write
    pub fn write_buffer(
        &mut self,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> &mut Self {
        self.buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range });
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Buffer(self.buffer_infos.len() - 1),
        });
        self
    }

    /// Queue an image write
    pub fn write_image(&mut self, binding: u32, ty: vk::DescriptorType, info: vk::DescriptorImageInfo) -> &mut Self {
        self.image_infos.push(info);
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Image(self.image_infos.len() - 1),
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether no writes are queued
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Drop all queued writes
    pub fn clear(&mut self) {
        self.buffer_infos.clear();
        self.image_infos.clear();
        self.writes.clear();
    }

    // Raw pointers in the result point into `self`; keep it local to `update`
    fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet> {
        self.writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.ty);
                match write.source {
                    WriteSource::Buffer(i) => builder.buffer_info(std::slice::from_ref(&self.buffer_infos[i])).build(),
                    WriteSource::Image(i) => builder.image_info(std::slice::from_ref(&self.image_infos[i])).build(),
                }
            })
            .collect()
    }

    /// Apply all queued writes to `set`
    pub fn update(&self, device: &Device, set: vk::DescriptorSet) {
        let writes = self.descriptor_writes(set);
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_round_up() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
            PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 0.5),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 0.01),
        ];
        let sizes = pool_sizes(10, &ratios);

        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].descriptor_count, 10);
        assert_eq!(sizes[1].descriptor_count, 5);
        assert_eq!(sizes[2].descriptor_count, 1);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        assert_eq!(pool_sizes(3, &ratios[1..2])[0].descriptor_count, 2);
    }

    #[test]
    fn test_pool_sizes_minimum_one() {
        let ratios = [PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.0)];
        assert_eq!(pool_sizes(100, &ratios)[0].descriptor_count, 1);
    }

    #[test]
    fn test_pool_growth() {
        assert_eq!(next_pool_size(64), 96);
        assert_eq!(next_pool_size(96), 144);
        assert_eq!(next_pool_size(4000), MAX_SETS_PER_POOL);
        assert_eq!(next_pool_size(MAX_SETS_PER_POOL), MAX_SETS_PER_POOL);
        assert_eq!(next_pool_size(0), 1);
    }

    #[test]
    fn test_exhaustion_errors() {
        assert!(is_pool_exhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        assert!(is_pool_exhausted(vk::Result::ERROR_FRAGMENTED_POOL));
        assert!(!is_pool_exhausted(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    }

    #[test]
    fn test_layout_duplicate_binding() {
        let ok = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);
        assert!(ok.validate().is_ok());

        let duplicate = ok.add_storage_buffer(1, vk::ShaderStageFlags::VERTEX);
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_writer_resolves_infos() {
        let mut writer = DescriptorWriter::new();
        // Enough writes to force the info vectors to reallocate
        for binding in 0..32 {
            writer.write_buffer(binding, vk::DescriptorType::UNIFORM_BUFFER, vk::Buffer::null(), 0, 64 + binding as u64);
        }
        writer.write_image(
            32,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorImageInfo {
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ..Default::default()
            },
        );
        assert_eq!(writer.len(), 33);

        let writes = writer.descriptor_writes(vk::DescriptorSet::null());
        assert_eq!(writes.len(), 33);
        for (i, write) in writes.iter().take(32).enumerate() {
            assert_eq!(write.dst_binding, i as u32);
            assert_eq!(write.descriptor_count, 1);
            let info = unsafe { &*write.p_buffer_info };
            assert_eq!(info.range, 64 + i as u64);
        }
        let image_write = writes[32];
        assert_eq!(image_write.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        let info = unsafe { &*image_write.p_image_info };
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        writer.clear();
        assert!(writer.is_empty());
    }
}
