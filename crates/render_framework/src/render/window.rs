//! Window management using GLFW
//!
//! Provides the window the Vulkan backend presents to: instance extensions,
//! surface creation, the framebuffer extent and resize notifications.

use ash::vk;
use thiserror::Error;

use crate::config::WindowConfig;
use crate::render::api::Extent2D;

pub use glfw::Key;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    Glfw(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Events the application reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The framebuffer changed size
    Resized(Extent2D),
    /// A key was pressed
    KeyPressed(Key),
    /// The user asked to close the window
    CloseRequested,
}

/// GLFW window without a client API
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window").field("extent", &self.framebuffer_extent()).finish_non_exhaustive()
    }
}

impl Window {
    /// Open a window for Vulkan rendering
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Opened window '{}' ({}x{})", config.title, config.width, config.height);
        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending window system events
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain the events received since the last call
    pub fn drain_events(&mut self) -> Vec<WindowEvent> {
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| match event {
                glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowEvent::Resized(Extent2D::new(
                    width.max(0) as u32,
                    height.max(0) as u32,
                ))),
                glfw::WindowEvent::Key(key, _, glfw::Action::Press, _) => Some(WindowEvent::KeyPressed(key)),
                glfw::WindowEvent::Close => Some(WindowEvent::CloseRequested),
                _ => None,
            })
            .collect()
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_extent(&self) -> Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        Extent2D::new(width.max(0) as u32, height.max(0) as u32)
    }

    /// Block until the framebuffer has a non-zero size, as after a minimize
    pub fn wait_while_minimized(&mut self) -> Extent2D {
        let mut extent = self.framebuffer_extent();
        while extent.is_empty() && !self.window.should_close() {
            self.glfw.wait_events();
            extent = self.framebuffer_extent();
        }
        extent
    }

    /// Instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::Glfw("Vulkan is not available to GLFW".to_string()))
    }

    /// Create a Vulkan surface for this window
    pub fn create_vulkan_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::Glfw(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}
