//! Pipeline configuration and type definitions
//!
//! A [`PipelineConfig`] declares what a pipeline draws and which data it feeds
//! its shaders: the primitive type, blending, the interleaved vertex layout and
//! a two-tier uniform layout. Object-tier blocks live in descriptor set 0 and
//! are refilled for every draw; global-tier blocks live in set 1 and are shared
//! by every draw of the pipeline.
//!
//! Configurations derive serde so custom pipelines can be described in RON or
//! TOML files and loaded through [`Config`](crate::config::Config).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::render::api::{ShaderSource, ShaderStages};
use crate::render::{RenderError, RenderResult};

/// Scalar type of a custom vertex attribute, as declared in GLSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlslType {
    /// `bool` (stored as 32-bit unsigned)
    Bool,
    /// `int`
    Int,
    /// `uint`
    Uint,
    /// `float`
    Float,
    /// `double`
    Double,
}

/// A custom per-vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomVertexInput {
    /// `layout(location = N)` in the vertex shader
    pub slot: u32,
    /// Scalar type
    pub glsl_type: GlslType,
    /// Component count, clamped to 1..=4
    pub components: u32,
}

/// Which vertex streams a mesh provides and where the shader reads them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertDataLayout {
    /// Whether positions (4 floats) are present
    pub use_vert_buffer: bool,
    /// Position input location
    pub vert_input_slot: u32,
    /// Whether normals (3 floats) are present
    pub use_norm_buffer: bool,
    /// Normal input location
    pub norm_input_slot: u32,
    /// Custom attributes, interleaved after position and normal in slot order
    pub custom_inputs: Vec<CustomVertexInput>,
}

impl Default for VertDataLayout {
    fn default() -> Self {
        Self {
            use_vert_buffer: true,
            vert_input_slot: 0,
            use_norm_buffer: true,
            norm_input_slot: 1,
            custom_inputs: Vec::new(),
        }
    }
}

impl VertDataLayout {
    /// Add a custom attribute
    pub fn with_custom_input(mut self, slot: u32, glsl_type: GlslType, components: u32) -> Self {
        self.custom_inputs.push(CustomVertexInput { slot, glsl_type, components });
        self
    }

    /// Custom attributes sorted by slot
    pub fn sorted_custom_inputs(&self) -> Vec<CustomVertexInput> {
        let mut sorted = self.custom_inputs.clone();
        sorted.sort_by_key(|input| input.slot);
        sorted
    }
}

/// Shader stages a uniform block is visible to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUse {
    /// Visible to the vertex shader
    pub vertex: bool,
    /// Visible to the fragment shader
    pub fragment: bool,
}

impl StageUse {
    /// Vertex stage only
    pub const VERTEX: Self = Self { vertex: true, fragment: false };
    /// Fragment stage only
    pub const FRAGMENT: Self = Self { vertex: false, fragment: true };
    /// Both stages
    pub const BOTH: Self = Self { vertex: true, fragment: true };

    /// As device stage flags
    pub fn stages(self) -> ShaderStages {
        let mut stages = ShaderStages::empty();
        if self.vertex {
            stages |= ShaderStages::VERTEX;
        }
        if self.fragment {
            stages |= ShaderStages::FRAGMENT;
        }
        stages
    }
}

/// An application-defined uniform block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomUniformInput {
    /// Stages the block is visible to
    pub stages: StageUse,
    /// Block size in bytes
    pub size: u32,
    /// Binding slot inside its set
    pub bind_slot: u32,
}

/// Object-tier uniform blocks (set 0), refilled on every draw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectInputs {
    /// Object to screen matrix
    pub use_obj_to_screen: bool,
    /// Object to world matrix
    pub use_obj_to_world: bool,
    /// World to camera matrix
    pub use_world_to_cam: bool,
    /// Camera to screen matrix
    pub use_cam_to_screen: bool,
    /// Object scale vector, appended to the transform block
    pub use_object_scale: bool,
    /// Transform block binding
    pub transform_bind_slot: u32,
    /// Transform block stages
    pub transform_stages: StageUse,

    /// Material block (colour, diffuse, specular, shininess)
    pub use_material: bool,
    /// Material block binding
    pub material_bind_slot: u32,
    /// Material block stages
    pub material_stages: StageUse,

    /// Camera transform block
    pub use_cam_transform: bool,
    /// Camera block binding
    pub cam_bind_slot: u32,
    /// Camera block stages
    pub cam_stages: StageUse,

    /// Application-defined blocks, filled from the object's custom data
    pub custom: Vec<CustomUniformInput>,
}

impl Default for ObjectInputs {
    fn default() -> Self {
        Self {
            use_obj_to_screen: true,
            use_obj_to_world: true,
            use_world_to_cam: false,
            use_cam_to_screen: false,
            use_object_scale: true,
            transform_bind_slot: 0,
            transform_stages: StageUse::VERTEX,
            use_material: true,
            material_bind_slot: 1,
            material_stages: StageUse::FRAGMENT,
            use_cam_transform: true,
            cam_bind_slot: 2,
            cam_stages: StageUse::FRAGMENT,
            custom: Vec::new(),
        }
    }
}

impl ObjectInputs {
    /// Whether any transform matrix is enabled, which is what creates the
    /// transform block
    pub fn uses_transform_block(&self) -> bool {
        self.use_obj_to_screen || self.use_obj_to_world || self.use_world_to_cam || self.use_cam_to_screen
    }
}

/// Global-tier uniform blocks (set 1), shared by every draw of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalInputs {
    /// Directional light block
    pub use_directional_light: bool,
    /// Directional light binding
    pub dir_light_bind_slot: u32,
    /// Directional light stages
    pub dir_light_stages: StageUse,
    /// Application-defined blocks, written through the renderer
    pub custom: Vec<CustomUniformInput>,
}

impl Default for GlobalInputs {
    fn default() -> Self {
        Self {
            use_directional_light: true,
            dir_light_bind_slot: 0,
            dir_light_stages: StageUse::FRAGMENT,
            custom: Vec::new(),
        }
    }
}

/// Both uniform tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniformLayout {
    /// Set 0
    pub object: ObjectInputs,
    /// Set 1
    pub global: GlobalInputs,
}

impl UniformLayout {
    /// Check that binding slots are unique within each tier
    pub fn validate(&self) -> RenderResult<()> {
        let object = &self.object;
        let mut slots = Vec::new();
        if object.uses_transform_block() {
            slots.push(object.transform_bind_slot);
        }
        if object.use_material {
            slots.push(object.material_bind_slot);
        }
        if object.use_cam_transform {
            slots.push(object.cam_bind_slot);
        }
        slots.extend(object.custom.iter().map(|c| c.bind_slot));
        check_unique("object", &slots)?;

        let global = &self.global;
        let mut slots = Vec::new();
        if global.use_directional_light {
            slots.push(global.dir_light_bind_slot);
        }
        slots.extend(global.custom.iter().map(|c| c.bind_slot));
        check_unique("global", &slots)
    }
}

fn check_unique(tier: &str, slots: &[u32]) -> RenderResult<()> {
    let mut seen = HashSet::new();
    for slot in slots {
        if !seen.insert(slot) {
            return Err(RenderError::invalid(format!(
                "binding slot {slot} used twice in the {tier} uniform tier"
            )));
        }
    }
    Ok(())
}

/// What a pipeline rasterizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// Filled triangle list
    FilledTriangles,
    /// Triangle list drawn as edges
    WireframeTriangles,
    /// Line strip
    LinkedLines,
    /// Independent line segments
    UnlinkedLines,
}

/// Configuration for a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ignore `vert_layout` and use position at slot 0 plus normal at slot 1
    pub use_default_vert_data: bool,
    /// Vertex layout when `use_default_vert_data` is off
    pub vert_layout: VertDataLayout,
    /// Uniform blocks
    pub uniform_layout: UniformLayout,
    /// Enable alpha blending
    pub alpha_blend: bool,
    /// Primitive type
    pub primitive_type: PrimitiveType,
    /// Shader binaries
    pub shaders: ShaderSource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_default_vert_data: true,
            vert_layout: VertDataLayout::default(),
            uniform_layout: UniformLayout::default(),
            alpha_blend: true,
            primitive_type: PrimitiveType::FilledTriangles,
            shaders: ShaderSource::LIT,
        }
    }
}

impl PipelineConfig {
    /// Lit, filled triangles
    pub fn shaded() -> Self {
        Self::default()
    }

    /// Flat-coloured filled triangles
    pub fn unshaded() -> Self {
        let mut config = Self { shaders: ShaderSource::UNLIT, ..Self::default() };
        config.uniform_layout.object.use_obj_to_world = false;
        config
    }

    /// Flat-coloured triangle edges
    pub fn wireframe() -> Self {
        Self::unshaded().with_primitive_type(PrimitiveType::WireframeTriangles)
    }

    /// Flat-coloured line strip
    pub fn linked_lines() -> Self {
        Self::unshaded().with_primitive_type(PrimitiveType::LinkedLines)
    }

    /// Set the primitive type
    pub fn with_primitive_type(mut self, primitive_type: PrimitiveType) -> Self {
        self.primitive_type = primitive_type;
        self
    }

    /// Set the shader binaries
    pub fn with_shaders(mut self, shaders: ShaderSource) -> Self {
        self.shaders = shaders;
        self
    }

    /// Use a custom vertex layout
    pub fn with_vert_layout(mut self, layout: VertDataLayout) -> Self {
        self.use_default_vert_data = false;
        self.vert_layout = layout;
        self
    }

    /// Enable or disable alpha blending
    pub fn with_alpha_blend(mut self, enable: bool) -> Self {
        self.alpha_blend = enable;
        self
    }

    /// The vertex layout actually used
    pub fn effective_vert_layout(&self) -> VertDataLayout {
        if self.use_default_vert_data {
            VertDataLayout::default()
        } else {
            self.vert_layout.clone()
        }
    }

    /// Check invariants that must hold before the pipeline is built
    pub fn validate(&self) -> RenderResult<()> {
        self.uniform_layout.validate()?;

        let layout = self.effective_vert_layout();
        let mut locations = Vec::new();
        if layout.use_vert_buffer {
            locations.push(layout.vert_input_slot);
        }
        if layout.use_norm_buffer {
            locations.push(layout.norm_input_slot);
        }
        locations.extend(layout.custom_inputs.iter().map(|c| c.slot));
        if locations.is_empty() {
            return Err(RenderError::invalid("vertex layout has no inputs"));
        }
        let mut seen = HashSet::new();
        if let Some(slot) = locations.iter().find(|slot| !seen.insert(**slot)) {
            return Err(RenderError::invalid(format!("vertex input location {slot} used twice")));
        }
        Ok(())
    }
}

impl Config for PipelineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_uniform_layout() {
        let layout = UniformLayout::default();
        assert!(layout.object.use_obj_to_screen);
        assert!(layout.object.use_obj_to_world);
        assert!(!layout.object.use_world_to_cam);
        assert!(!layout.object.use_cam_to_screen);
        assert!(layout.object.use_object_scale);
        assert_eq!(layout.object.transform_bind_slot, 0);
        assert_eq!(layout.object.material_bind_slot, 1);
        assert_eq!(layout.object.cam_bind_slot, 2);
        assert!(layout.global.use_directional_light);
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn test_duplicate_object_slot_rejected() {
        let mut config = PipelineConfig::default();
        config.uniform_layout.object.custom.push(CustomUniformInput {
            stages: StageUse::VERTEX,
            size: 16,
            bind_slot: 1,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_block_frees_its_slot() {
        let mut config = PipelineConfig::default();
        config.uniform_layout.object.use_material = false;
        config.uniform_layout.object.custom.push(CustomUniformInput {
            stages: StageUse::BOTH,
            size: 16,
            bind_slot: 1,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_global_tier_checked_separately() {
        let mut config = PipelineConfig::default();
        // Collides with the directional light block
        config.uniform_layout.global.custom.push(CustomUniformInput {
            stages: StageUse::FRAGMENT,
            size: 64,
            bind_slot: 0,
        });
        assert!(config.validate().is_err());

        config.uniform_layout.global.custom[0].bind_slot = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_vertex_location_rejected() {
        let layout = VertDataLayout::default().with_custom_input(1, GlslType::Float, 2);
        let config = PipelineConfig::default().with_vert_layout(layout);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_presets() {
        assert!(!PipelineConfig::unshaded().uniform_layout.object.use_obj_to_world);
        assert_eq!(PipelineConfig::wireframe().primitive_type, PrimitiveType::WireframeTriangles);
        assert_eq!(PipelineConfig::linked_lines().shaders, ShaderSource::UNLIT);
        // The unlit presets share one vertex shader, so their transform blocks agree
        assert_eq!(PipelineConfig::wireframe().uniform_layout, PipelineConfig::unshaded().uniform_layout);
        assert_eq!(PipelineConfig::linked_lines().uniform_layout, PipelineConfig::unshaded().uniform_layout);
        assert_eq!(PipelineConfig::shaded().shaders, ShaderSource::LIT);
    }

    #[test]
    fn test_stage_use_flags() {
        assert_eq!(StageUse::VERTEX.stages(), ShaderStages::VERTEX);
        assert_eq!(StageUse::BOTH.stages(), ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    }

    #[test]
    fn test_ron_description_of_custom_pipeline() {
        let text = r#"(
            use_default_vert_data: false,
            vert_layout: (
                use_norm_buffer: false,
                custom_inputs: [(slot: 1, glsl_type: Float, components: 3)],
            ),
            primitive_type: UnlinkedLines,
            shaders: Files(vertex: "a.spv", fragment: "b.spv"),
        )"#;
        let config = PipelineConfig::from_str_as(text, ConfigFormat::Ron).unwrap();
        assert!(!config.use_default_vert_data);
        assert!(config.vert_layout.use_vert_buffer);
        assert!(!config.vert_layout.use_norm_buffer);
        assert_eq!(config.vert_layout.custom_inputs.len(), 1);
        assert_eq!(config.primitive_type, PrimitiveType::UnlinkedLines);
        assert!(config.alpha_blend);
        assert!(config.validate().is_ok());
    }
}
