//! # Render Framework
//!
//! A thin 3D rendering framework over an explicit graphics API.
//!
//! ## Features
//!
//! - **Declarative pipelines**: vertex layout, uniform blocks and raster state
//!   described as data, compiled into device objects
//! - **Per-draw uniforms**: pooled descriptor sets refilled for every draw and
//!   recycled at present
//! - **Minimal state changes**: cull mode, viewport and pipeline are only
//!   recorded when they change
//! - **Vulkan backend** plus a headless recording device for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_framework::prelude::*;
//! use render_framework::render::backends::vulkan::{VulkanContext, VulkanDevice};
//! use render_framework::render::primitives::shapes;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_framework::foundation::logging::init();
//!
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let context = VulkanContext::new(&mut window, &config.application_name, config.enable_validation)?;
//!     let shaders = FileShaderProvider::new(&config.shader_dir);
//!     let mut renderer = Renderer::new(VulkanDevice::new(context), config, shaders)?;
//!
//!     let cube = renderer.add_mesh(shapes::cube());
//!     renderer.load_mesh(cube, false)?;
//!
//!     let mut objects = WorldObjects::new();
//!     let mut object = WorldObject::new();
//!     object.set_mesh(cube);
//!     let key = objects.insert(object);
//!
//!     let mut camera = Camera::new(ViewPort::new(800.0, 600.0), ProjectionMode::Perspective);
//!     camera.set_position(Vec3::new(0.0, 0.0, -50.0));
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_object(&objects, key, &mut camera, PIPELINE_SHADED)?;
//!         renderer.present_frame()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for framework users
pub mod prelude {
    pub use crate::{
        config::{Config, RendererConfig, WindowConfig},
        foundation::math::{Mat3, Mat4, Vec3, Vec4},
        render::{
            api::{Extent2D, FileShaderProvider, RenderDevice, ShaderProvider},
            pipeline::{PipelineConfig, PrimitiveType, ShaderSource},
            primitives::{Camera, Material, Mesh, ProjectionMode, ViewPort, WorldObject, WorldObjects},
            window::{Window, WindowEvent},
            RenderError, RenderResult, Renderer, PIPELINE_LINKED_LINES, PIPELINE_SHADED,
            PIPELINE_UNSHADED, PIPELINE_WIREFRAME,
        },
    };
}
