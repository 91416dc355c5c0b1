//! Rendering system
//!
//! The frame engine ([`Renderer`]) sits on top of a [`RenderDevice`] capability
//! provider. Each frame the application issues any number of
//! [`Renderer::draw_object`] calls followed by one [`Renderer::present_frame`].
//! The renderer opens the render pass lazily on the first draw, emits only the
//! state transitions a draw actually needs, allocates and fills a fresh
//! per-object uniform set for every draw, and returns all uniform sets to their
//! pools once the frame is presented.
//!
//! # Module map
//!
//! - [`api`]: the device capability trait and shader provider
//! - [`pipeline`]: declarative pipeline configuration and its compiled form
//! - [`resources`]: the pooled uniform-set allocator
//! - [`state`]: swapchain ownership and draw-state tracking
//! - [`primitives`]: camera, meshes, built-in shapes and world objects
//! - [`backends`]: the Vulkan device and a headless recording device
//! - [`window`]: glfw window provider

use thiserror::Error;

use crate::config::ConfigError;

pub mod api;
pub mod backends;
pub mod pipeline;
pub mod primitives;
pub mod renderer;
pub mod resources;
pub mod state;
pub mod window;

pub use api::{RenderDevice, ShaderProvider, FileShaderProvider};
pub use pipeline::{
    Pipeline, PipelineConfig, PrimitiveType, ShaderSource, UniformLayout, VertDataLayout,
};
pub use primitives::{Camera, Material, Mesh, ProjectionMode, ViewPort, WorldObject, WorldObjects};
pub use renderer::{
    Renderer, PIPELINE_LINKED_LINES, PIPELINE_SHADED, PIPELINE_UNSHADED, PIPELINE_WIREFRAME,
};

/// Rendering errors
///
/// Device failures abort the call that hit them. Logical precondition
/// failures (a bad pipeline id, a mesh that was never loaded) are reported
/// the same way and leave the renderer usable.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The graphics device reported a failure
    #[error("Device error: {0}")]
    Device(String),

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// No memory type satisfies the buffer's requirements
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A multi-step initialization failed part way through
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Pipeline id does not name a pipeline slot
    #[error("Invalid pipeline id {id}")]
    InvalidPipeline {
        /// The offending pipeline id
        id: usize,
    },

    /// Pipeline slot exists but holds no initialized pipeline
    #[error("Pipeline {id} is not initialized")]
    PipelineNotReady {
        /// The offending pipeline id
        id: usize,
    },

    /// The object's mesh has not been uploaded to the device
    #[error("Mesh is not loaded")]
    MeshNotLoaded,

    /// Mesh handle is stale or the object has no mesh
    #[error("Mesh not found")]
    MeshNotFound,

    /// Object key is stale
    #[error("World object not found")]
    ObjectNotFound,

    /// Uniform set id is out of range or not currently allocated
    #[error("Uniform set {id} is not in use")]
    UniformSetUnused {
        /// The offending uniform set id
        id: u32,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// The swapchain stayed stale after a rebuild
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// A shader binary could not be read
    #[error("Failed to load shader {path}: {source}")]
    ShaderLoad {
        /// Path that was read
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
