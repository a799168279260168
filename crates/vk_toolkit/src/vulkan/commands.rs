//! Command buffer management
//!
//! Command pools, a recorder with render-pass scoping, and the synchronous
//! submitter that every transfer goes through.

use ash::{vk, Device};

use super::sync::Fence;
use super::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api) }
    }

    /// Return command buffers to the pool
    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.command_pool, command_buffers) };
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Pool destruction frees its command buffers, so nothing may be in flight
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Command buffer recorder that tracks recording state
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Wrap a command buffer
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Begin one-time-submit recording
    pub fn begin(&mut self) -> VulkanResult<&mut Self> {
        if self.recording {
            return Err(VulkanError::invalid("Command buffer already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(self)
    }

    /// Whether `begin` has been called without a matching `end`
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin a render pass; it ends when the returned guard is dropped
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.command_buffer, &render_pass_begin, vk::SubpassContents::INLINE);
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Finish recording and hand back the command buffer
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }

    /// Raw command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Render pass scope; ends the pass on drop
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl<'a> ActiveRenderPass<'a> {
    fn cmd(&self) -> vk::CommandBuffer {
        self.recorder.command_buffer
    }

    /// Set viewport 0
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe { self.recorder.device.cmd_set_viewport(self.cmd(), 0, std::slice::from_ref(viewport)) };
    }

    /// Set scissor 0
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe { self.recorder.device.cmd_set_scissor(self.cmd(), 0, std::slice::from_ref(scissor)) };
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_pipeline(self.cmd(), vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, first_set: u32, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.recorder.device.cmd_bind_descriptor_sets(
                self.cmd(),
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_vertex_buffers(self.cmd(), first_binding, buffers, offsets);
        }
    }

    /// Bind a 32-bit index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.recorder
                .device
                .cmd_bind_index_buffer(self.cmd(), buffer, 0, vk::IndexType::UINT32);
        }
    }

    /// Push constants to shaders
    pub fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.recorder
                .device
                .cmd_push_constants(self.cmd(), layout, stages, offset, data);
        }
    }

    /// Draw indexed
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        unsafe {
            self.recorder
                .device
                .cmd_draw_indexed(self.cmd(), index_count, instance_count, 0, 0, 0);
        }
    }
}

impl<'a> Drop for ActiveRenderPass<'a> {
    fn drop(&mut self) {
        unsafe { self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer) };
    }
}

/// Synchronous one-shot command submission
///
/// Records into a dedicated command buffer, submits to the graphics queue and
/// blocks until the GPU has finished.
pub struct ImmediateSubmitter {
    device: Device,
    queue: vk::Queue,
    fence: Fence,
    command_buffer: vk::CommandBuffer,
    // Dropped last; owns `command_buffer`
    pool: CommandPool,
}

impl ImmediateSubmitter {
    /// Create a submitter for `queue`, which belongs to `queue_family_index`
    pub fn new(device: Device, queue: vk::Queue, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index)?;
        let command_buffer = pool
            .allocate(1)?
            .into_iter()
            .next()
            .ok_or(VulkanError::InitializationFailed("No command buffer allocated".to_string()))?;
        let fence = Fence::new(device.clone(), false)?;

        Ok(Self {
            device,
            queue,
            fence,
            command_buffer,
            pool,
        })
    }

    /// Record commands with `record`, submit them and wait for completion
    pub fn submit<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let cmd = self.command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        let recorded = record(&self.device, cmd);
        let ended = unsafe { self.device.end_command_buffer(cmd).map_err(VulkanError::Api) };
        recorded?;
        ended?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], self.fence.handle())
                .map_err(VulkanError::Api)?;
        }

        self.fence.wait(u64::MAX)?;
        unsafe {
            self.device.queue_wait_idle(self.queue).map_err(VulkanError::Api)?;
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }
        self.fence.reset()
    }

    /// Command pool backing the submitter
    pub fn pool(&self) -> &CommandPool {
        &self.pool
    }
}
