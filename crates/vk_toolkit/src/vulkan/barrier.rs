//! Image layout tracking and barrier planning
//!
//! Every image carries a [`MipLayoutTracker`] that remembers the layout and
//! last access of each mip level. Transitions are planned against that state,
//! so call sites only name the layout they want next and never write stage or
//! access masks by hand.

use ash::vk;

use super::{VulkanError, VulkanResult};

/// Layout and most recent access of one image subresource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageAccess {
    /// Current image layout
    pub layout: vk::ImageLayout,
    /// Access flags of the last operation that touched the subresource
    pub access: vk::AccessFlags,
}

impl ImageAccess {
    /// State of a freshly created image
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        access: vk::AccessFlags::empty(),
    };

    /// Canonical state for an image in `layout`
    pub fn for_layout(layout: vk::ImageLayout) -> Self {
        Self {
            layout,
            access: access_for_layout(layout),
        }
    }

    /// Whether the last access wrote to the subresource
    pub fn is_write(&self) -> bool {
        self.access.intersects(
            vk::AccessFlags::SHADER_WRITE
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::TRANSFER_WRITE
                | vk::AccessFlags::HOST_WRITE
                | vk::AccessFlags::MEMORY_WRITE,
        )
    }

    /// Pipeline stage associated with this state
    pub fn stage(&self) -> vk::PipelineStageFlags {
        stage_for_access(self.access, self.layout)
    }
}

/// Access mask an operation using `layout` performs
pub fn access_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED | vk::ImageLayout::PRESENT_SRC_KHR => {
            vk::AccessFlags::empty()
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ
        }
        _ => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

/// Pipeline stage at which `access` in `layout` happens
pub fn stage_for_access(access: vk::AccessFlags, layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL | vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        vk::ImageLayout::PRESENT_SRC_KHR => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::ImageLayout::GENERAL => vk::PipelineStageFlags::ALL_COMMANDS,
        _ if access.intersects(vk::AccessFlags::HOST_READ | vk::AccessFlags::HOST_WRITE) => {
            vk::PipelineStageFlags::HOST
        }
        _ if access.is_empty() => vk::PipelineStageFlags::TOP_OF_PIPE,
        _ => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// One barrier covering a contiguous run of mip levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBarrier {
    /// First mip level covered
    pub base_mip: u32,
    /// Number of mip levels covered
    pub level_count: u32,
    /// State before the barrier
    pub old: ImageAccess,
    /// State after the barrier
    pub new: ImageAccess,
    /// Stages that must complete before the barrier
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that wait on the barrier
    pub dst_stage: vk::PipelineStageFlags,
}

impl PlannedBarrier {
    /// Build the Vulkan barrier for `image`
    pub fn image_memory_barrier(&self, image: vk::Image, aspect: vk::ImageAspectFlags) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(self.old.layout)
            .new_layout(self.new.layout)
            .src_access_mask(self.old.access)
            .dst_access_mask(self.new.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: self.base_mip,
                level_count: self.level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build()
    }
}

/// Per-mip layout and access state of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLayoutTracker {
    levels: Vec<ImageAccess>,
}

impl MipLayoutTracker {
    /// Track `mip_levels` levels, all starting undefined
    pub fn new(mip_levels: u32) -> Self {
        Self {
            levels: vec![ImageAccess::UNDEFINED; mip_levels as usize],
        }
    }

    /// Number of tracked mip levels
    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Current state of one mip level
    pub fn state(&self, mip: u32) -> Option<ImageAccess> {
        self.levels.get(mip as usize).copied()
    }

    /// Record a layout change made outside the tracker, e.g. by a render pass
    pub fn assume(&mut self, base_mip: u32, count: u32, state: ImageAccess) -> VulkanResult<()> {
        let range = self.range(base_mip, count)?;
        self.levels[range].iter_mut().for_each(|level| *level = state);
        Ok(())
    }

    /// Plan the barriers that move `count` levels from `base_mip` into `new_layout`
    ///
    /// Adjacent levels that share a state are merged into one barrier. Levels
    /// already in `new_layout` whose last access was read-only are left alone.
    pub fn plan(&mut self, base_mip: u32, count: u32, new_layout: vk::ImageLayout) -> VulkanResult<Vec<PlannedBarrier>> {
        let range = self.range(base_mip, count)?;
        let target = ImageAccess::for_layout(new_layout);

        let mut barriers: Vec<PlannedBarrier> = Vec::new();
        let mut run: Option<PlannedBarrier> = None;

        for mip in range {
            let current = self.levels[mip];
            let mip = mip as u32;

            if current.layout == new_layout && !current.is_write() {
                barriers.extend(run.take());
                continue;
            }

            match run.as_mut() {
                Some(open) if open.old == current => open.level_count += 1,
                _ => {
                    barriers.extend(run.take());
                    run = Some(PlannedBarrier {
                        base_mip: mip,
                        level_count: 1,
                        old: current,
                        new: target,
                        src_stage: current.stage(),
                        dst_stage: target.stage(),
                    });
                }
            }

            self.levels[mip as usize] = target;
        }
        barriers.extend(run);

        log::trace!(
            "Planned {} barrier(s) for mips {}..{} -> {:?}",
            barriers.len(),
            base_mip,
            base_mip + count,
            new_layout
        );
        Ok(barriers)
    }

    /// Plan a transition of every level into `new_layout`
    pub fn plan_all(&mut self, new_layout: vk::ImageLayout) -> VulkanResult<Vec<PlannedBarrier>> {
        self.plan(0, self.mip_levels(), new_layout)
    }

    fn range(&self, base_mip: u32, count: u32) -> VulkanResult<std::ops::Range<usize>> {
        let end = base_mip.checked_add(count).filter(|end| *end <= self.mip_levels());
        match end {
            Some(end) if count > 0 => Ok(base_mip as usize..end as usize),
            _ => Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Mip range {}+{} outside image with {} level(s)",
                    base_mip,
                    count,
                    self.mip_levels()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_access_mapping() {
        assert_eq!(access_for_layout(vk::ImageLayout::UNDEFINED), vk::AccessFlags::empty());
        assert_eq!(access_for_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL), vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(access_for_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL), vk::AccessFlags::TRANSFER_READ);
        assert_eq!(access_for_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL), vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_stage_mapping() {
        let stage = |layout| stage_for_access(access_for_layout(layout), layout);

        assert_eq!(stage(vk::ImageLayout::UNDEFINED), vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(stage(vk::ImageLayout::TRANSFER_DST_OPTIMAL), vk::PipelineStageFlags::TRANSFER);
        assert_eq!(stage(vk::ImageLayout::TRANSFER_SRC_OPTIMAL), vk::PipelineStageFlags::TRANSFER);
        assert_eq!(stage(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL), vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(stage(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL), vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(
            stage(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(stage(vk::ImageLayout::PRESENT_SRC_KHR), vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(stage(vk::ImageLayout::GENERAL), vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_plan_merges_uniform_levels() {
        let mut tracker = MipLayoutTracker::new(4);
        let barriers = tracker.plan_all(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();

        assert_eq!(barriers.len(), 1);
        let barrier = barriers[0];
        assert_eq!((barrier.base_mip, barrier.level_count), (0, 4));
        assert_eq!(barrier.old, ImageAccess::UNDEFINED);
        assert_eq!(barrier.new.access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::TRANSFER);

        for mip in 0..4 {
            assert_eq!(tracker.state(mip).unwrap().layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        }
    }

    #[test]
    fn test_plan_splits_mixed_levels() {
        let mut tracker = MipLayoutTracker::new(3);
        tracker.plan_all(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        tracker.plan(0, 1, vk::ImageLayout::TRANSFER_SRC_OPTIMAL).unwrap();

        let barriers = tracker.plan_all(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(barriers.len(), 2);
        assert_eq!((barriers[0].base_mip, barriers[0].level_count), (0, 1));
        assert_eq!(barriers[0].old.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!((barriers[1].base_mip, barriers[1].level_count), (1, 2));
        assert_eq!(barriers[1].old.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(barriers.iter().all(|b| b.dst_stage == vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn test_read_only_levels_skipped() {
        let mut tracker = MipLayoutTracker::new(3);
        tracker.plan(1, 1, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();

        let barriers = tracker.plan_all(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(barriers.len(), 2);
        assert_eq!((barriers[0].base_mip, barriers[0].level_count), (0, 1));
        assert_eq!((barriers[1].base_mip, barriers[1].level_count), (2, 1));

        assert!(tracker.plan_all(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap().is_empty());
    }

    #[test]
    fn test_write_layout_always_barriers() {
        let mut tracker = MipLayoutTracker::new(1);
        tracker.plan_all(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();

        // A second write to the same layout still needs a write-after-write barrier
        let barriers = tracker.plan_all(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(barriers.len(), 1);
        assert_eq!(barriers[0].src_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut tracker = MipLayoutTracker::new(2);
        assert!(tracker.plan(1, 2, vk::ImageLayout::GENERAL).is_err());
        assert!(tracker.plan(2, 1, vk::ImageLayout::GENERAL).is_err());
        assert!(tracker.plan(0, 0, vk::ImageLayout::GENERAL).is_err());
        assert!(tracker.plan(u32::MAX, 2, vk::ImageLayout::GENERAL).is_err());
        assert_eq!(tracker.state(0), Some(ImageAccess::UNDEFINED));
    }

    #[test]
    fn test_assume_external_transition() {
        let mut tracker = MipLayoutTracker::new(1);
        tracker
            .assume(0, 1, ImageAccess::for_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
            .unwrap();
        let barriers = tracker.plan_all(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(barriers[0].old.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_barrier_subresource_range() {
        let mut tracker = MipLayoutTracker::new(5);
        let planned = tracker.plan(2, 3, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap()[0];
        let barrier = planned.image_memory_barrier(vk::Image::null(), vk::ImageAspectFlags::COLOR);

        assert_eq!(barrier.subresource_range.base_mip_level, 2);
        assert_eq!(barrier.subresource_range.level_count, 3);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn test_plan_on_copy_leaves_original() {
        let tracked = MipLayoutTracker::new(2);
        let mut pending = tracked.clone();
        pending.plan_all(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();

        assert_eq!(tracked.state(1), Some(ImageAccess::UNDEFINED));
        assert_ne!(tracked, pending);
        assert_eq!(pending.state(1).unwrap().layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
