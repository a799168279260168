//! Forward renderer for a scene graph
//!
//! One pipeline, one descriptor set per frame (camera uniforms + texture) and a
//! push-constant model matrix per drawable. Swapchain-sized resources live in
//! [`RenderTargets`] and are rebuilt on resize or when presentation reports the
//! swapchain out of date.

pub mod frame;
pub mod targets;

pub use frame::{FrameResources, FrameUniforms, MODEL_PUSH_CONSTANT_SIZE};
pub use targets::RenderTargets;

use ash::vk;
use thiserror::Error;

use crate::assets::{AssetError, ImageData, Vertex};
use crate::config::{ConfigError, RendererConfig};
use crate::foundation::math::Vec3;
use crate::scene::{Camera, MeshLibrary, SceneError, SceneGraph};
use crate::vulkan::render_pass::{choose_depth_format, supports_depth_attachment, DEPTH_FORMAT_CANDIDATES};
use crate::vulkan::transfer::upload_texture;
use crate::vulkan::{
    AcquireOutcome, Buffer, CommandRecorder, DescriptorAllocator, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter, FrameSync, GraphicsPipeline, GraphicsPipelineBuilder, MemoryLocation, PipelineLayout,
    PoolSizeRatio, RenderPass, ShaderModule, Swapchain, Texture, VulkanContext, VulkanError, VulkanResult,
};
use crate::window::{Window, WindowError};

/// Renderer errors
#[derive(Error, Debug)]
pub enum RendererError {
    /// Vulkan layer failure
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// Asset loading failure
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Scene graph misuse
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Result alias for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Presented,
    /// Nothing was drawn (minimized window or swapchain rebuilt)
    Skipped,
}

const FRAME_SET_RATIOS: [PoolSizeRatio; 2] = [
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
];

/// Scene graph renderer
///
/// Must be dropped before the [`VulkanContext`] it was created from.
pub struct Renderer {
    device: ash::Device,
    command_pool: vk::CommandPool,
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    frames: Vec<FrameResources>,
    texture: Texture,
    descriptor_allocator: DescriptorAllocator,
    frame_set_layout: DescriptorSetLayout,
    targets: RenderTargets,
    render_pass: RenderPass,
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
    needs_recreate: bool,
    prefer_mailbox: bool,
    clear_color: [f32; 4],
    light_direction: Vec3,
}

impl Renderer {
    /// Create the renderer for `window`
    pub fn new(ctx: &VulkanContext, window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        config.validate()?;
        config.validate_shader_paths()?;
        let device = ctx.device().clone();

        let swapchain = Swapchain::new(ctx, window.framebuffer_extent(), config.prefer_mailbox, None)?;
        let depth_format = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            supports_depth_attachment(&ctx.format_properties(format))
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))?;

        let render_pass = RenderPass::new_forward(device.clone(), swapchain.format().format, depth_format)?;
        let targets = RenderTargets::new(ctx, swapchain, depth_format, render_pass.handle())?;

        let frame_set_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)?;
        let mut descriptor_allocator =
            DescriptorAllocator::new(device.clone(), config.descriptor_sets_per_pool, &FRAME_SET_RATIOS)?;

        let checker = ImageData::checkerboard(64, 8, [230, 230, 230, 255], [60, 60, 70, 255]);
        let texture = upload_texture(ctx, &checker.data, checker.width, checker.height, true)?;

        let frame_count = config.max_frames_in_flight;
        let command_buffers = ctx.command_pool().allocate(frame_count as u32)?;
        let mut frames = Vec::with_capacity(frame_count);
        for command_buffer in command_buffers {
            let uniforms = Buffer::new(
                ctx.allocator().clone(),
                std::mem::size_of::<FrameUniforms>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?;
            let descriptor_set = descriptor_allocator.allocate(frame_set_layout.handle())?;
            frames.push(FrameResources {
                sync: FrameSync::new(device.clone())?,
                command_buffer,
                uniforms,
                descriptor_set,
            });
        }
        write_frame_sets(&device, &frames, &texture);

        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: MODEL_PUSH_CONSTANT_SIZE,
        }];
        let pipeline_layout = PipelineLayout::new(device.clone(), &[frame_set_layout.handle()], &push_ranges)?;

        let vertex_shader = ShaderModule::from_file(device.clone(), &config.vertex_shader)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &config.fragment_shader)?;
        let pipeline = GraphicsPipelineBuilder::new(&vertex_shader, &fragment_shader)
            .vertex_input::<Vertex>()
            .build(device.clone(), render_pass.handle(), &pipeline_layout)?;

        let images_in_flight = vec![vk::Fence::null(); targets.swapchain().image_count()];
        log::info!("Renderer ready with {} frame(s) in flight", frame_count);

        Ok(Self {
            device,
            command_pool: ctx.command_pool().handle(),
            pipeline,
            pipeline_layout,
            frames,
            texture,
            descriptor_allocator,
            frame_set_layout,
            targets,
            render_pass,
            images_in_flight,
            current_frame: 0,
            needs_recreate: false,
            prefer_mailbox: config.prefer_mailbox,
            clear_color: config.clear_color,
            light_direction: Vec3::new(-0.4, -1.0, -0.3),
        })
    }

    /// Current render extent
    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    /// Set the world-space direction the light travels
    pub fn set_light_direction(&mut self, direction: Vec3) {
        self.light_direction = direction;
    }

    /// Replace the texture sampled by every drawable
    pub fn set_texture(&mut self, ctx: &VulkanContext, image: &ImageData, generate_mips: bool) -> RendererResult<()> {
        let texture = upload_texture(ctx, &image.data, image.width, image.height, generate_mips)?;
        // Frames in flight still sample the old texture
        ctx.wait_idle()?;
        self.descriptor_allocator.reset_pools()?;
        for frame in &mut self.frames {
            frame.descriptor_set = self.descriptor_allocator.allocate(self.frame_set_layout.handle())?;
        }
        write_frame_sets(&self.device, &self.frames, &texture);
        self.texture = texture;
        Ok(())
    }

    /// Rebuild the swapchain and everything sized to it
    pub fn recreate_swapchain(&mut self, ctx: &VulkanContext, window_extent: vk::Extent2D) -> RendererResult<()> {
        ctx.wait_idle()?;

        let swapchain = Swapchain::new(ctx, window_extent, self.prefer_mailbox, Some(self.targets.swapchain()))?;
        let old_format = self.targets.swapchain().format().format;
        if swapchain.format().format != old_format {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Surface format changed from {:?} to {:?}",
                    old_format,
                    swapchain.format().format
                ),
            }
            .into());
        }

        let depth_format = self.targets.depth_format();
        self.targets = RenderTargets::new(ctx, swapchain, depth_format, self.render_pass.handle())?;
        self.images_in_flight = vec![vk::Fence::null(); self.targets.swapchain().image_count()];
        self.needs_recreate = false;
        Ok(())
    }

    /// Draw every visible mesh in `scene` from `camera`
    ///
    /// World transforms are brought up to date before recording.
    pub fn draw_frame(
        &mut self,
        ctx: &VulkanContext,
        window: &mut Window,
        scene: &mut SceneGraph,
        meshes: &MeshLibrary,
        camera: &Camera,
    ) -> RendererResult<FrameStatus> {
        let window_extent = window.framebuffer_extent();
        if window_extent.width == 0 || window_extent.height == 0 {
            return Ok(FrameStatus::Skipped);
        }
        if window.take_resized() || self.needs_recreate {
            self.recreate_swapchain(ctx, window_extent)?;
        }

        let frame_index = self.current_frame;
        self.frames[frame_index].sync.in_flight.wait(u64::MAX)?;

        let acquire_semaphore = self.frames[frame_index].sync.image_available.handle();
        let image_index = match self.targets.swapchain().acquire_next_image(acquire_semaphore, u64::MAX)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                self.needs_recreate = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate_swapchain(ctx, window_extent)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // Another frame may still be rendering into this image
        let image_fence = self.images_in_flight[image_index as usize];
        if image_fence != vk::Fence::null() {
            unsafe {
                self.device
                    .wait_for_fences(&[image_fence], true, u64::MAX)
                    .map_err(VulkanError::Api)?;
            }
        }
        let frame = &mut self.frames[frame_index];
        self.images_in_flight[image_index as usize] = frame.sync.in_flight.handle();

        let uniforms = FrameUniforms::new(&camera.view_matrix(), &camera.projection_matrix(), &self.light_direction);
        frame.uniforms.write_slice(std::slice::from_ref(&uniforms))?;

        scene.update_world_transforms();
        self.record(image_index, scene, meshes)?;
        self.submit(ctx)?;

        let frame = &self.frames[frame_index];
        let outcome = self.targets.swapchain().present(
            ctx.present_queue(),
            image_index,
            frame.sync.render_finished.handle(),
        )?;
        if outcome.needs_recreate() {
            self.needs_recreate = true;
        }

        self.current_frame = (self.current_frame + 1) % self.frames.len();
        Ok(FrameStatus::Presented)
    }

    fn record(&self, image_index: u32, scene: &SceneGraph, meshes: &MeshLibrary) -> VulkanResult<()> {
        let frame = &self.frames[self.current_frame];
        let framebuffer = self
            .targets
            .framebuffer(image_index)
            .ok_or_else(|| VulkanError::invalid(format!("No framebuffer for swapchain image {}", image_index)))?;
        let extent = self.targets.extent();
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let mut recorder = CommandRecorder::new(frame.command_buffer, self.device.clone());
        recorder.begin()?;
        {
            let mut pass = recorder.begin_render_pass(self.render_pass.handle(), framebuffer, render_area, &clear_values)?;
            pass.set_viewport(&vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            pass.set_scissor(&render_area);
            pass.bind_pipeline(self.pipeline.handle());
            pass.bind_descriptor_sets(self.pipeline_layout.handle(), 0, &[frame.descriptor_set]);

            let mut draws = 0usize;
            scene.visit_drawables(|node, handle, world| {
                let Some(mesh) = meshes.get(handle) else {
                    log::trace!("Node {:?} refers to a missing mesh", node);
                    return;
                };
                pass.bind_vertex_buffers(0, &[mesh.vertex_buffer()], &[0]);
                pass.bind_index_buffer(mesh.index_buffer());
                pass.push_constants(
                    self.pipeline_layout.handle(),
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::cast_slice(world.as_slice()),
                );
                pass.draw_indexed(mesh.index_count(), 1);
                draws += 1;
            });
            log::trace!("Recorded {} draw(s)", draws);
        }
        recorder.end()?;
        Ok(())
    }

    /// Reset the frame fence and submit the recorded commands
    ///
    /// The fence is only unsignaled here so that a failure anywhere earlier in
    /// the frame leaves it signaled and the next wait on it returns.
    fn submit(&self, ctx: &VulkanContext) -> VulkanResult<()> {
        let frame = &self.frames[self.current_frame];
        frame.sync.in_flight.reset()?;

        let wait_semaphores = [frame.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(ctx.graphics_queue(), &[submit_info], frame.sync.in_flight.handle())
                .map_err(VulkanError::Api)
        }
    }
}

/// Point every frame's set at its uniform buffer and the shared texture
fn write_frame_sets(device: &ash::Device, frames: &[FrameResources], texture: &Texture) {
    let mut writer = DescriptorWriter::new();
    for frame in frames {
        writer.clear();
        writer
            .write_buffer(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                frame.uniforms.handle(),
                0,
                frame.uniforms.size(),
            )
            .write_image(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, texture.descriptor_info());
        writer.update(device, frame.descriptor_set);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            let command_buffers: Vec<_> = self.frames.iter().map(|f| f.command_buffer).collect();
            self.device.free_command_buffers(self.command_pool, &command_buffers);
        }
        log::debug!("Renderer destroyed");
    }
}
