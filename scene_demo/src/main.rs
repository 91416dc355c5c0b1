//! Scene demo
//!
//! A field of spinning cubes and spheres, a moon orbiting a planet through a
//! parent reference frame, and a quad whose corner is edited every frame.
//!
//! Run from the workspace root so the default shader directory resolves:
//! `cargo run -p scene_demo`. Tab cycles the shaded, wireframe and unshaded
//! pipelines, P toggles between perspective and isometric projection and
//! Escape quits.

use std::time::Instant;

use render_framework::config::{Config, ConfigError};
use render_framework::foundation::collections::{MeshHandle, ObjectKey};
use render_framework::foundation::logging::{self, LevelFilter};
use render_framework::prelude::*;
use render_framework::render::backends::vulkan::{VulkanContext, VulkanDevice, VulkanError};
use render_framework::render::primitives::shapes;
use render_framework::render::window::{Key, WindowError};
use thiserror::Error;

const CONFIG_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scene_demo.toml");

/// Pipelines Tab cycles through
const PIPELINE_CYCLE: [usize; 3] = [PIPELINE_SHADED, PIPELINE_WIREFRAME, PIPELINE_UNSHADED];

const GRID_SIZE: i32 = 5;
const GRID_SPACING: f32 = 6.0;

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

struct SpinningObject {
    key: ObjectKey,
    axis: Vec3,
    speed: f32,
}

// Fields drop in order: the renderer and its surface go before the window
struct SceneDemo {
    renderer: Renderer<VulkanDevice>,
    objects: WorldObjects,
    camera: Camera,
    spinners: Vec<SpinningObject>,
    planet: ObjectKey,
    moon: ObjectKey,
    flag: ObjectKey,
    flag_mesh: MeshHandle,
    pipeline_index: usize,
    start: Instant,
    last_frame: Instant,
    window: Window,
}

impl SceneDemo {
    fn new(config: RendererConfig) -> Result<Self, DemoError> {
        let mut window = Window::new(&config.window)?;
        let context = VulkanContext::new(&mut window, &config.application_name, config.enable_validation)?;
        log::info!("Running on {}", context.physical_device().name());

        let shaders = FileShaderProvider::new(&config.shader_dir);
        let mut renderer = Renderer::new(VulkanDevice::new(context), config, shaders)?;

        let cube = renderer.add_mesh(shapes::cube());
        renderer.load_mesh(cube, false)?;
        let sphere = renderer.add_mesh(shapes::icosphere(2));
        renderer.load_mesh(sphere, false)?;
        let flag_mesh = renderer.add_mesh(shapes::quad());
        renderer.load_mesh(flag_mesh, true)?;

        let mut objects = WorldObjects::new();
        let mut spinners = Vec::new();
        for row in -GRID_SIZE / 2..=GRID_SIZE / 2 {
            for column in -GRID_SIZE / 2..=GRID_SIZE / 2 {
                let mesh = if (row + column) % 2 == 0 { cube } else { sphere };
                let mut object = WorldObject::with_mesh(mesh);
                object.set_position(Vec3::new(column as f32 * GRID_SPACING, row as f32 * GRID_SPACING, 20.0));
                let shade = (row + GRID_SIZE) as f32 / (2 * GRID_SIZE) as f32;
                *object.material_mut() = Material::with_colour(Vec4::new(0.3 + shade * 0.6, 0.4, 1.0 - shade * 0.6, 1.0));

                let key = objects.insert(object);
                spinners.push(SpinningObject {
                    key,
                    axis: Vec3::new(row as f32, column as f32, 1.0).normalize(),
                    speed: 0.5 + ((row * GRID_SIZE + column).rem_euclid(7)) as f32 * 0.2,
                });
            }
        }

        let mut planet = WorldObject::with_mesh(sphere);
        planet.set_position(Vec3::new(0.0, 0.0, 5.0));
        planet.set_scale(3.0, 3.0, 3.0);
        *planet.material_mut() = Material::with_colour(Vec4::new(0.9, 0.6, 0.2, 1.0));
        let planet = objects.insert(planet);

        let mut moon = WorldObject::with_mesh(sphere);
        moon.set_position(Vec3::new(6.0, 0.0, 0.0));
        *moon.material_mut() = Material::with_colour(Vec4::new(0.8, 0.8, 0.8, 1.0));
        let moon = objects.insert(moon);
        objects.attach_reference_frame(moon, planet)?;

        let mut flag = WorldObject::with_mesh(flag_mesh);
        flag.set_position(Vec3::new(0.0, 9.0, 5.0));
        flag.set_scale(4.0, 2.5, 1.0);
        flag.set_backface_culling(false);
        *flag.material_mut() = Material::with_colour(Vec4::new(0.2, 0.9, 0.3, 0.8));
        let flag = objects.insert(flag);

        let extent = window.framebuffer_extent();
        let mut camera = Camera::new(
            ViewPort::new(extent.width as f32, extent.height as f32),
            ProjectionMode::Perspective,
        );
        camera.set_position(Vec3::new(0.0, 0.0, -40.0));

        let now = Instant::now();
        Ok(Self {
            window,
            renderer,
            objects,
            camera,
            spinners,
            planet,
            moon,
            flag,
            flag_mesh,
            pipeline_index: 0,
            start: now,
            last_frame: now,
        })
    }

    fn run(&mut self) -> Result<(), DemoError> {
        while !self.window.should_close() {
            self.window.poll_events();
            self.handle_events();

            let now = Instant::now();
            let delta = (now - self.last_frame).as_secs_f32();
            self.last_frame = now;
            self.update(delta, (now - self.start).as_secs_f32())?;

            if let Err(e) = self.draw() {
                log::error!("Frame failed: {e}");
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn handle_events(&mut self) {
        for event in self.window.drain_events() {
            match event {
                WindowEvent::Resized(mut extent) => {
                    if extent.is_empty() {
                        extent = self.window.wait_while_minimized();
                    }
                    log::debug!("Framebuffer resized to {}x{}", extent.width, extent.height);
                    self.renderer.notify_resized(extent);
                    self.camera
                        .set_viewport(ViewPort::new(extent.width as f32, extent.height as f32));
                }
                WindowEvent::KeyPressed(Key::Tab) => {
                    self.pipeline_index = (self.pipeline_index + 1) % PIPELINE_CYCLE.len();
                    log::info!("Drawing with pipeline {}", PIPELINE_CYCLE[self.pipeline_index]);
                }
                WindowEvent::KeyPressed(Key::P) => {
                    let next = match self.camera.projection_mode() {
                        ProjectionMode::Perspective => ProjectionMode::Isometric,
                        ProjectionMode::Isometric => ProjectionMode::Perspective,
                    };
                    self.camera.set_projection_mode(next);
                    log::info!("Projection mode {next:?}");
                }
                WindowEvent::KeyPressed(Key::Escape) | WindowEvent::CloseRequested => {
                    self.window.set_should_close(true);
                }
                WindowEvent::KeyPressed(_) => {}
            }
        }
    }

    fn update(&mut self, delta: f32, elapsed: f32) -> Result<(), DemoError> {
        for spinner in &self.spinners {
            if let Some(object) = self.objects.get_mut(spinner.key) {
                object.rotate(spinner.axis, spinner.speed * delta);
            }
        }
        if let Some(planet) = self.objects.get_mut(self.planet) {
            planet.rotate(Vec3::new(0.0, 1.0, 0.0), 0.8 * delta);
        }
        if let Some(moon) = self.objects.get_mut(self.moon) {
            moon.rotate(Vec3::new(1.0, 1.0, 0.0).normalize(), 2.0 * delta);
        }

        // Flap the quad's top-right corner
        let wave = (elapsed * 3.0).sin() * 0.3;
        self.renderer
            .set_mesh_vertex(self.flag_mesh, 0, Vec4::new(0.5, 0.5, wave, 1.0))?;
        Ok(())
    }

    fn draw(&mut self) -> RenderResult<()> {
        let pipeline = PIPELINE_CYCLE[self.pipeline_index];
        for spinner in &self.spinners {
            self.renderer
                .draw_object(&self.objects, spinner.key, &mut self.camera, pipeline)?;
        }
        for key in [self.planet, self.moon, self.flag] {
            self.renderer.draw_object(&self.objects, key, &mut self.camera, pipeline)?;
        }
        self.renderer.present_frame()
    }
}

fn main() {
    logging::init_with_level(LevelFilter::Info);

    let result = RendererConfig::load_or_default(CONFIG_PATH)
        .map_err(DemoError::from)
        .and_then(SceneDemo::new)
        .and_then(|mut demo| demo.run());

    if let Err(e) = result {
        log::error!("Scene demo failed: {e}");
        std::process::exit(1);
    }
}
