//! Vulkan wrapper layer
//!
//! RAII wrappers over `ash` handles plus the pure policy functions they use
//! (device rating, swapchain choices, barrier planning, pool sizing).

pub mod allocator;
pub mod barrier;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use allocator::{GpuAllocator, MemoryLocation};
pub use barrier::{ImageAccess, MipLayoutTracker, PlannedBarrier};
pub use buffer::Buffer;
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder, ImmediateSubmitter};
pub use context::VulkanContext;
pub use descriptor::{DescriptorAllocator, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorWriter, PoolSizeRatio};
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
pub use error::{VulkanError, VulkanResult};
pub use image::{Image, ImageDesc, ImageView, Sampler, SamplerDesc, Texture};
pub use instance::VulkanInstance;
pub use pipeline::{GraphicsPipeline, GraphicsPipelineBuilder, PipelineLayout, ShaderModule, VertexInput};
pub use render_pass::{Framebuffer, RenderPass};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{Fence, FrameSync, Semaphore};
