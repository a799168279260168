//! Scene graph demo
//!
//! Loads an OBJ model (falling back to a built-in cube), places a spinning
//! parent node with orbiting children in a scene graph and renders it until
//! the window is closed. Escape closes the window.

use std::f32::consts::TAU;

use glfw::{Action, Key, WindowEvent};
use thiserror::Error;
use vk_toolkit::assets::{AssetError, ImageData, MeshData, ObjLoader};
use vk_toolkit::config::{Config, ConfigError, ToolkitConfig};
use vk_toolkit::foundation::logging;
use vk_toolkit::foundation::math::{Quat, Transform, Vec3};
use vk_toolkit::renderer::{FrameStatus, Renderer, RendererError};
use vk_toolkit::scene::{Camera, MeshHandle, MeshLibrary, NodeKey, SceneError, SceneGraph};
use vk_toolkit::vulkan::{VulkanContext, VulkanError};
use vk_toolkit::window::{Window, WindowError};

const CONFIG_PATH: &str = "scene_app.toml";
const ORBITER_COUNT: usize = 4;
const ORBIT_RADIUS: f32 = 1.6;

#[derive(Error, Debug)]
enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("window: {0}")]
    Window(#[from] WindowError),
    #[error("vulkan: {0}")]
    Vulkan(#[from] VulkanError),
    #[error("renderer: {0}")]
    Renderer(#[from] RendererError),
    #[error("assets: {0}")]
    Asset(#[from] AssetError),
    #[error("scene: {0}")]
    Scene(#[from] SceneError),
}

/// Nodes animated every frame
struct Rig {
    spinner: NodeKey,
    orbiters: Vec<NodeKey>,
}

// Field order is drop order: GPU users before the context, the window last
struct SceneApp {
    renderer: Renderer,
    meshes: MeshLibrary,
    ctx: VulkanContext,
    window: Window,
    scene: SceneGraph,
    camera: Camera,
    rig: Rig,
}

impl SceneApp {
    fn new(config: &ToolkitConfig) -> Result<Self, AppError> {
        let mut window = Window::new(&config.window)?;
        let ctx = VulkanContext::new(&mut window, &config.renderer)?;
        let mut renderer = Renderer::new(&ctx, &window, &config.renderer)?;

        let texture_path = std::path::Path::new(&config.assets.textures_dir).join("albedo.png");
        if texture_path.exists() {
            let image = ImageData::from_file(&texture_path)?;
            renderer.set_texture(&ctx, &image, config.assets.generate_mipmaps)?;
        }

        let mut meshes = MeshLibrary::new();
        let model = load_model(&config.assets.model_path(&config.assets.default_model));
        let model_handle = meshes.upload(&ctx, &model)?;
        let cube_handle = meshes.upload(&ctx, &MeshData::cube())?;

        let mut scene = SceneGraph::new();
        let rig = build_scene(&mut scene, model_handle, cube_handle)?;

        let extent = renderer.extent();
        let mut camera = Camera::perspective(Vec3::new(0.0, 2.5, 5.0), 60.0, 1.0, 0.1, 100.0);
        camera.set_viewport(extent.width, extent.height);

        Ok(Self {
            renderer,
            meshes,
            ctx,
            window,
            scene,
            camera,
            rig,
        })
    }

    fn run(&mut self) -> Result<(), AppError> {
        let mut frames = 0u64;
        while !self.window.should_close() {
            self.window.poll_events();
            for event in self.window.drain_events() {
                if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                    self.window.set_should_close(true);
                }
            }

            self.animate(self.window.time() as f32)?;

            let status = self.renderer.draw_frame(
                &self.ctx,
                &mut self.window,
                &mut self.scene,
                &self.meshes,
                &self.camera,
            )?;
            match status {
                FrameStatus::Presented => {
                    frames += 1;
                    let extent = self.renderer.extent();
                    self.camera.set_viewport(extent.width, extent.height);
                }
                FrameStatus::Skipped => {
                    // Minimized: sleep until something happens
                    let extent = self.window.framebuffer_extent();
                    if extent.width == 0 || extent.height == 0 {
                        self.window.wait_events();
                    }
                }
            }
        }

        self.ctx.wait_idle()?;
        log::info!("Rendered {} frame(s)", frames);
        Ok(())
    }

    fn animate(&mut self, time: f32) -> Result<(), AppError> {
        let spin = Quat::from_axis_angle(&Vec3::y_axis(), time * 0.6);
        self.scene
            .set_local_transform(self.rig.spinner, Transform::identity().with_rotation(spin))?;

        for (i, &orbiter) in self.rig.orbiters.iter().enumerate() {
            let tumble = Quat::from_axis_angle(&Vec3::x_axis(), time * (1.0 + i as f32 * 0.3));
            let transform = orbiter_transform(i).with_rotation(tumble);
            self.scene.set_local_transform(orbiter, transform)?;
        }
        Ok(())
    }
}

/// Resting place of orbiter `i`, evenly spaced around the spinner
fn orbiter_transform(i: usize) -> Transform {
    let angle = TAU * i as f32 / ORBITER_COUNT as f32;
    Transform::from_position(Vec3::new(angle.cos() * ORBIT_RADIUS, 0.0, angle.sin() * ORBIT_RADIUS))
        .with_uniform_scale(0.35)
}

fn load_model(path: &str) -> MeshData {
    match ObjLoader::load(path) {
        Ok(mut meshes) => {
            let mut mesh = meshes.swap_remove(0);
            mesh.normalize_to_unit_cube();
            log::info!("Using model '{}' from {}", mesh.name, path);
            mesh
        }
        Err(e) => {
            log::warn!("Could not load {} ({}), using the built-in cube", path, e);
            MeshData::cube()
        }
    }
}

fn build_scene(scene: &mut SceneGraph, model: MeshHandle, cube: MeshHandle) -> Result<Rig, SceneError> {
    let spinner = scene.add_node(scene.root(), "spinner", Transform::identity())?;
    let centerpiece = scene.add_node(spinner, "centerpiece", Transform::identity().with_uniform_scale(1.2))?;
    scene.set_mesh(centerpiece, Some(model))?;

    let orbiters = (0..ORBITER_COUNT)
        .map(|i| {
            let node = scene.add_node(spinner, format!("orbiter_{i}"), orbiter_transform(i))?;
            scene.set_mesh(node, Some(cube))?;
            Ok(node)
        })
        .collect::<Result<Vec<_>, SceneError>>()?;

    Ok(Rig { spinner, orbiters })
}

fn main() {
    let config = match ToolkitConfig::load_or_default(CONFIG_PATH).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            logging::init();
            log::error!("Invalid {}: {}", CONFIG_PATH, e);
            std::process::exit(1);
        }
    };
    logging::init_with_level(&config.log_level);
    log::info!("Starting scene_app");

    let result = SceneApp::new(&config).and_then(|mut app| app.run());
    if let Err(e) = result {
        log::error!("scene_app failed: {}", e);
        std::process::exit(1);
    }
}
