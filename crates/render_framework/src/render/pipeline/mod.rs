//! Graphics pipelines
//!
//! A pipeline is described by a [`PipelineConfig`]: its vertex layout, its
//! two tiers of uniform blocks, the primitive type and the shaders. The
//! `layout` and `uniform_schema` modules turn that description into vertex
//! attributes, descriptor bindings and byte offsets; [`Pipeline`] builds the
//! device objects and feeds the uniform blocks at draw time.

pub mod layout;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod pipeline_config;
pub mod uniform_schema;

pub use crate::render::api::ShaderSource;
pub use layout::InterleavedLayout;
pub use pipeline::Pipeline;
pub use pipeline_config::{
    CustomUniformInput, CustomVertexInput, GlobalInputs, GlslType, ObjectInputs, PipelineConfig, PrimitiveType,
    StageUse, UniformLayout, VertDataLayout,
};
