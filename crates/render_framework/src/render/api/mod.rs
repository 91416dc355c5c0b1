//! Public rendering API
//!
//! The device capability trait the engine is written against, and the shader
//! provider pipelines load their binaries through.

pub mod device;
pub mod shader;

pub use device::*;
pub use shader::{
    DefaultFragmentShader, DefaultVertexShader, FileShaderProvider, ShaderProvider, ShaderRef,
    ShaderSource,
};
