//! Byte layout of the built-in uniform blocks
//!
//! The allocator sizes buffers from these constants and the pipeline writes
//! through them, so both sides always agree. Every value is a byte offset or
//! size; floats are 4 bytes and matrices are 16 floats in column-major order.
//! The GLSL declarations in the default shaders follow the same layout.

use crate::foundation::math::Mat4;

use super::pipeline_config::ObjectInputs;

/// Bytes in one `mat4`
pub const MAT4_SIZE: usize = 64;

/// Bytes in one `vec4`
pub const VEC4_SIZE: usize = 16;

/// Material block: `vec4 colour; float diffuse; float specular; float shininess;`
pub mod material {
    /// Block size, padded to two `vec4`s
    pub const SIZE: usize = 32;
    /// RGBA colour
    pub const COLOUR: usize = 0;
    /// Diffuse constant
    pub const DIFFUSE: usize = 16;
    /// Specular constant
    pub const SPECULAR: usize = 20;
    /// Shininess exponent
    pub const SHININESS: usize = 24;
}

/// Camera block: the camera's world transform
pub mod camera {
    /// Block size
    pub const SIZE: usize = super::MAT4_SIZE;
}

/// Directional light block (36 floats).
///
/// Colour sits at float 0, direction at float 4, intensity at float 7 and
/// ambient at float 8. The rest of the block is reserved.
pub mod dir_light {
    /// Block size
    pub const SIZE: usize = 36 * 4;
    /// RGBA colour
    pub const COLOUR: usize = 0;
    /// Light direction (3 floats)
    pub const DIRECTION: usize = 16;
    /// Light intensity
    pub const INTENSITY: usize = 28;
    /// Ambient intensity
    pub const AMBIENT: usize = 32;
}

/// Where each enabled sub-block sits inside the transform block.
///
/// Matrices appear in the fixed order object to world, world to camera,
/// camera to screen, object to screen, followed by the object scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformBlockLayout {
    /// Object to world matrix offset
    pub obj_to_world: Option<usize>,
    /// World to camera matrix offset
    pub world_to_cam: Option<usize>,
    /// Camera to screen matrix offset
    pub cam_to_screen: Option<usize>,
    /// Object to screen matrix offset
    pub obj_to_screen: Option<usize>,
    /// Object scale offset
    pub scale: Option<usize>,
    /// Total block size, zero when the block does not exist
    pub size: usize,
}

impl TransformBlockLayout {
    /// Lay out the transform block for the enabled object inputs
    pub fn new(inputs: &ObjectInputs) -> Self {
        if !inputs.uses_transform_block() {
            return Self::default();
        }

        let mut offset = 0;
        let mut next = |enabled: bool, size: usize| {
            enabled.then(|| {
                let at = offset;
                offset += size;
                at
            })
        };
        let obj_to_world = next(inputs.use_obj_to_world, MAT4_SIZE);
        let world_to_cam = next(inputs.use_world_to_cam, MAT4_SIZE);
        let cam_to_screen = next(inputs.use_cam_to_screen, MAT4_SIZE);
        let obj_to_screen = next(inputs.use_obj_to_screen, MAT4_SIZE);
        let scale = next(inputs.use_object_scale, VEC4_SIZE);

        Self { obj_to_world, world_to_cam, cam_to_screen, obj_to_screen, scale, size: offset }
    }
}

/// Copy `values` into `dst` at `offset`. Returns false when it does not fit.
pub fn write_f32s(dst: &mut [u8], offset: usize, values: &[f32]) -> bool {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    match dst.get_mut(offset..offset + bytes.len()) {
        Some(target) => {
            target.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

/// Copy a matrix into `dst` at `offset` in column-major order
pub fn write_mat4(dst: &mut [u8], offset: usize, matrix: &Mat4) -> bool {
    write_f32s(dst, offset, matrix.as_slice())
}

/// Read one float back out of a block
pub fn read_f32(src: &[u8], offset: usize) -> Option<f32> {
    src.get(offset..offset + 4).map(bytemuck::pod_read_unaligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transform_layout() {
        let layout = TransformBlockLayout::new(&ObjectInputs::default());
        assert_eq!(layout.obj_to_world, Some(0));
        assert_eq!(layout.world_to_cam, None);
        assert_eq!(layout.cam_to_screen, None);
        assert_eq!(layout.obj_to_screen, Some(64));
        assert_eq!(layout.scale, Some(128));
        assert_eq!(layout.size, 144);
    }

    #[test]
    fn test_all_matrices_in_fixed_order() {
        let inputs = ObjectInputs {
            use_world_to_cam: true,
            use_cam_to_screen: true,
            use_object_scale: false,
            ..ObjectInputs::default()
        };
        let layout = TransformBlockLayout::new(&inputs);
        assert_eq!(layout.obj_to_world, Some(0));
        assert_eq!(layout.world_to_cam, Some(64));
        assert_eq!(layout.cam_to_screen, Some(128));
        assert_eq!(layout.obj_to_screen, Some(192));
        assert_eq!(layout.scale, None);
        assert_eq!(layout.size, 256);
    }

    #[test]
    fn test_scale_alone_creates_no_block() {
        let inputs = ObjectInputs {
            use_obj_to_screen: false,
            use_obj_to_world: false,
            ..ObjectInputs::default()
        };
        assert_eq!(TransformBlockLayout::new(&inputs), TransformBlockLayout::default());
    }

    #[test]
    fn test_dir_light_offsets() {
        assert_eq!(dir_light::COLOUR, 0);
        assert_eq!(dir_light::DIRECTION, 4 * 4);
        assert_eq!(dir_light::INTENSITY, 7 * 4);
        assert_eq!(dir_light::AMBIENT, 8 * 4);
        assert_eq!(dir_light::SIZE, 144);
    }

    #[test]
    fn test_write_f32s_bounds() {
        let mut block = [0u8; 8];
        assert!(write_f32s(&mut block, 4, &[2.5]));
        assert_eq!(read_f32(&block, 4), Some(2.5));
        assert!(!write_f32s(&mut block, 6, &[1.0]));
        assert_eq!(read_f32(&block, 6), None);
    }

    #[test]
    fn test_write_mat4_column_major() {
        let mut block = [0u8; MAT4_SIZE];
        let mut m = Mat4::identity();
        m[(0, 3)] = 7.0;
        assert!(write_mat4(&mut block, 0, &m));
        // Translation column starts at float 12
        assert_eq!(read_f32(&block, 12 * 4), Some(7.0));
    }
}
