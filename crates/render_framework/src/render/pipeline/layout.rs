//! Layout derivation
//!
//! Turns the declarative parts of a [`PipelineConfig`](super::PipelineConfig) into what the device
//! needs: interleaved vertex attributes with their stride, the descriptor
//! bindings of both uniform tiers, and the rasterizer topology.

use crate::render::api::{
    DescriptorBinding, PolygonMode, PrimitiveTopology, VertexAttribute, VertexFormat, VertexInputLayout,
};

use super::pipeline_config::{
    CustomVertexInput, GlobalInputs, GlslType, ObjectInputs, PrimitiveType, VertDataLayout,
};

/// Bytes of one position (4 floats)
pub const POSITION_SIZE: u32 = 16;

/// Bytes of one normal (3 floats)
pub const NORMAL_SIZE: u32 = 12;

/// Bytes one custom attribute occupies per vertex
pub fn vertex_data_size(glsl_type: GlslType, components: u32) -> u32 {
    let components = components.clamp(1, 4);
    match glsl_type {
        GlslType::Double => 8 * components,
        _ => 4 * components,
    }
}

/// Device format of a custom attribute
pub fn vertex_format(glsl_type: GlslType, components: u32) -> VertexFormat {
    use VertexFormat as F;
    let table = match glsl_type {
        GlslType::Bool | GlslType::Uint => [F::R32Uint, F::R32G32Uint, F::R32G32B32Uint, F::R32G32B32A32Uint],
        GlslType::Int => [F::R32Sint, F::R32G32Sint, F::R32G32B32Sint, F::R32G32B32A32Sint],
        GlslType::Float => [F::R32Sfloat, F::R32G32Sfloat, F::R32G32B32Sfloat, F::R32G32B32A32Sfloat],
        GlslType::Double => [F::R64Sfloat, F::R64G64Sfloat, F::R64G64B64Sfloat, F::R64G64B64A64Sfloat],
    };
    table[(components.clamp(1, 4) - 1) as usize]
}

/// Byte offsets of each stream inside one interleaved vertex.
///
/// Position comes first, then the normal, then custom attributes in slot
/// order. Meshes pack their vertex buffers with this and pipelines declare
/// their vertex input from it, so the two always match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedLayout {
    /// Position location and offset
    pub position: Option<(u32, u32)>,
    /// Normal location and offset
    pub normal: Option<(u32, u32)>,
    /// Custom attributes with their offsets, sorted by slot
    pub custom: Vec<(CustomVertexInput, u32)>,
    /// Bytes per vertex
    pub stride: u32,
}

impl InterleavedLayout {
    /// Lay out a vertex
    pub fn new(layout: &VertDataLayout) -> Self {
        let mut stride = 0;
        let mut position = None;
        let mut normal = None;

        if layout.use_vert_buffer {
            position = Some((layout.vert_input_slot, stride));
            stride += POSITION_SIZE;
        }
        if layout.use_norm_buffer {
            normal = Some((layout.norm_input_slot, stride));
            stride += NORMAL_SIZE;
        }
        let custom = layout
            .sorted_custom_inputs()
            .into_iter()
            .map(|input| {
                let offset = stride;
                stride += vertex_data_size(input.glsl_type, input.components);
                (input, offset)
            })
            .collect();

        Self { position, normal, custom, stride }
    }

    /// Offset of the custom attribute at `slot`, with its per-vertex size
    pub fn custom_offset(&self, slot: u32) -> Option<(u32, u32)> {
        self.custom
            .iter()
            .find(|(input, _)| input.slot == slot)
            .map(|(input, offset)| (*offset, vertex_data_size(input.glsl_type, input.components)))
    }

    /// The device-facing vertex input description
    pub fn vertex_input(&self) -> VertexInputLayout {
        let mut attributes = Vec::with_capacity(self.custom.len() + 2);
        if let Some((location, offset)) = self.position {
            attributes.push(VertexAttribute { location, format: VertexFormat::R32G32B32A32Sfloat, offset });
        }
        if let Some((location, offset)) = self.normal {
            attributes.push(VertexAttribute { location, format: VertexFormat::R32G32B32Sfloat, offset });
        }
        for (input, offset) in &self.custom {
            attributes.push(VertexAttribute {
                location: input.slot,
                format: vertex_format(input.glsl_type, input.components),
                offset: *offset,
            });
        }
        attributes.sort_by_key(|a| a.location);
        VertexInputLayout { stride: self.stride, attributes }
    }
}

/// Descriptor bindings of the object tier (set 0)
pub fn object_set_bindings(inputs: &ObjectInputs) -> Vec<DescriptorBinding> {
    let mut bindings = Vec::new();
    if inputs.uses_transform_block() {
        bindings.push(DescriptorBinding {
            binding: inputs.transform_bind_slot,
            stages: inputs.transform_stages.stages(),
        });
    }
    if inputs.use_material {
        bindings.push(DescriptorBinding {
            binding: inputs.material_bind_slot,
            stages: inputs.material_stages.stages(),
        });
    }
    if inputs.use_cam_transform {
        bindings.push(DescriptorBinding {
            binding: inputs.cam_bind_slot,
            stages: inputs.cam_stages.stages(),
        });
    }
    bindings.extend(inputs.custom.iter().map(|custom| DescriptorBinding {
        binding: custom.bind_slot,
        stages: custom.stages.stages(),
    }));
    bindings
}

/// Descriptor bindings of the global tier (set 1)
pub fn global_set_bindings(inputs: &GlobalInputs) -> Vec<DescriptorBinding> {
    let mut bindings = Vec::new();
    if inputs.use_directional_light {
        bindings.push(DescriptorBinding {
            binding: inputs.dir_light_bind_slot,
            stages: inputs.dir_light_stages.stages(),
        });
    }
    bindings.extend(inputs.custom.iter().map(|custom| DescriptorBinding {
        binding: custom.bind_slot,
        stages: custom.stages.stages(),
    }));
    bindings
}

/// Topology and polygon mode of a primitive type
pub fn rasterization(primitive: PrimitiveType) -> (PrimitiveTopology, PolygonMode) {
    match primitive {
        PrimitiveType::FilledTriangles => (PrimitiveTopology::TriangleList, PolygonMode::Fill),
        PrimitiveType::WireframeTriangles => (PrimitiveTopology::TriangleList, PolygonMode::Line),
        PrimitiveType::LinkedLines => (PrimitiveTopology::LineStrip, PolygonMode::Fill),
        PrimitiveType::UnlinkedLines => (PrimitiveTopology::LineList, PolygonMode::Fill),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::ShaderStages;
    use crate::render::pipeline::pipeline_config::{CustomUniformInput, StageUse};

    #[test]
    fn test_default_vertex_layout() {
        let layout = InterleavedLayout::new(&VertDataLayout::default());
        let input = layout.vertex_input();
        assert_eq!(input.stride, 28);
        assert_eq!(input.attributes.len(), 2);
        assert_eq!(input.attributes[0].location, 0);
        assert_eq!(input.attributes[0].format, VertexFormat::R32G32B32A32Sfloat);
        assert_eq!(input.attributes[0].offset, 0);
        assert_eq!(input.attributes[1].location, 1);
        assert_eq!(input.attributes[1].format, VertexFormat::R32G32B32Sfloat);
        assert_eq!(input.attributes[1].offset, 16);
    }

    #[test]
    fn test_custom_inputs_sorted_before_stride() {
        let layout = VertDataLayout {
            use_norm_buffer: false,
            ..VertDataLayout::default()
        }
        .with_custom_input(5, GlslType::Double, 2)
        .with_custom_input(2, GlslType::Int, 1)
        .with_custom_input(3, GlslType::Float, 9);

        let interleaved = InterleavedLayout::new(&layout);
        assert_eq!(interleaved.custom_offset(2), Some((16, 4)));
        assert_eq!(interleaved.custom_offset(3), Some((20, 16)));
        assert_eq!(interleaved.custom_offset(5), Some((36, 16)));
        assert_eq!(interleaved.stride, 52);

        let input = interleaved.vertex_input();
        let locations: Vec<u32> = input.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 2, 3, 5]);
        assert_eq!(input.attributes[1].format, VertexFormat::R32Sint);
        assert_eq!(input.attributes[2].format, VertexFormat::R32G32B32A32Sfloat);
        assert_eq!(input.attributes[3].format, VertexFormat::R64G64Sfloat);
    }

    #[test]
    fn test_vertex_data_size_clamps_components() {
        assert_eq!(vertex_data_size(GlslType::Float, 0), 4);
        assert_eq!(vertex_data_size(GlslType::Double, 7), 32);
        assert_eq!(vertex_format(GlslType::Bool, 3), VertexFormat::R32G32B32Uint);
    }

    #[test]
    fn test_object_bindings_follow_flags() {
        let mut inputs = ObjectInputs::default();
        let bindings = object_set_bindings(&inputs);
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0], DescriptorBinding { binding: 0, stages: ShaderStages::VERTEX });
        assert_eq!(bindings[1], DescriptorBinding { binding: 1, stages: ShaderStages::FRAGMENT });
        assert_eq!(bindings[2], DescriptorBinding { binding: 2, stages: ShaderStages::FRAGMENT });

        inputs.use_obj_to_screen = false;
        inputs.use_obj_to_world = false;
        inputs.use_cam_transform = false;
        inputs.custom.push(CustomUniformInput { stages: StageUse::BOTH, size: 32, bind_slot: 4 });
        let bindings = object_set_bindings(&inputs);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 1);
        assert_eq!(bindings[1].binding, 4);
        assert_eq!(bindings[1].stages, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
    }

    #[test]
    fn test_global_bindings() {
        let mut inputs = GlobalInputs::default();
        assert_eq!(global_set_bindings(&inputs).len(), 1);
        inputs.use_directional_light = false;
        assert!(global_set_bindings(&inputs).is_empty());
    }

    #[test]
    fn test_rasterization_per_primitive() {
        assert_eq!(rasterization(PrimitiveType::FilledTriangles), (PrimitiveTopology::TriangleList, PolygonMode::Fill));
        assert_eq!(rasterization(PrimitiveType::WireframeTriangles), (PrimitiveTopology::TriangleList, PolygonMode::Line));
        assert_eq!(rasterization(PrimitiveType::LinkedLines).0, PrimitiveTopology::LineStrip);
        assert_eq!(rasterization(PrimitiveType::UnlinkedLines).0, PrimitiveTopology::LineList);
    }
}
