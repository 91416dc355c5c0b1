//! World objects and their arena
//!
//! A [`WorldObject`] is one drawable instance: a mesh handle, a local
//! transform, a per-axis scale, a material and optional custom uniform data.
//! Objects live in a [`WorldObjects`] arena and may name another object of
//! the same arena as their reference frame. The parent's world transform
//! left-multiplies the child's local transform whenever the world transform
//! is queried. The link is weak: removing the parent leaves the child in
//! place, and a dangling link reads as "no parent".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::foundation::collections::{MeshHandle, ObjectKey, SlotMap};
use crate::foundation::math::{
    axis_angle_rotation, euler_xyz_rotation, rotate_in_place, set_rotation, set_translation,
    translation_of, Mat3, Mat4, Vec3, Vec4,
};
use crate::render::{RenderError, RenderResult};

/// Surface constants written to the material uniform block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// RGBA colour
    pub colour: Vec4,
    /// Diffuse reflection constant
    pub diffuse: f32,
    /// Specular reflection constant
    pub specular: f32,
    /// Specular exponent
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            colour: Vec4::zeros(),
            diffuse: 0.8,
            specular: 1.8,
            shininess: 50.0,
        }
    }
}

impl Material {
    /// Material with the given colour and default lighting constants
    pub fn with_colour(colour: Vec4) -> Self {
        Self { colour, ..Self::default() }
    }
}

/// A drawable instance in the scene
#[derive(Debug, Clone)]
pub struct WorldObject {
    mesh: Option<MeshHandle>,
    transform: Mat4,
    scale: Vec4,
    material: Material,
    custom_data: HashMap<u32, Vec<u8>>,
    max_indices: u32,
    backface_culling: bool,
    parent: Option<ObjectKey>,
}

impl Default for WorldObject {
    fn default() -> Self {
        Self {
            mesh: None,
            transform: Mat4::identity(),
            scale: Vec4::new(1.0, 1.0, 1.0, 1.0),
            material: Material::default(),
            custom_data: HashMap::new(),
            max_indices: 0,
            backface_culling: true,
            parent: None,
        }
    }
}

impl WorldObject {
    /// An object without a mesh at the origin
    pub fn new() -> Self {
        Self::default()
    }

    /// An object drawing `mesh`
    pub fn with_mesh(mesh: MeshHandle) -> Self {
        Self { mesh: Some(mesh), ..Self::default() }
    }

    /// Change the mesh this object draws
    pub fn set_mesh(&mut self, mesh: MeshHandle) {
        self.mesh = Some(mesh);
    }

    /// Mesh handle, if any
    pub fn mesh(&self) -> Option<MeshHandle> {
        self.mesh
    }

    /// Limit the number of indices drawn. Zero draws the whole mesh.
    pub fn set_max_indices(&mut self, count: u32) {
        self.max_indices = count;
    }

    /// Index limit, zero for the whole mesh
    pub fn max_indices(&self) -> u32 {
        self.max_indices
    }

    /// Enable or disable back-face culling for this object
    pub fn set_backface_culling(&mut self, enable: bool) {
        self.backface_culling = enable;
    }

    /// Whether back faces are culled
    pub fn backface_culling(&self) -> bool {
        self.backface_culling
    }

    /// Place the object at `position` relative to its reference frame
    pub fn set_position(&mut self, position: Vec3) {
        set_translation(&mut self.transform, &position);
    }

    /// Translate the object by `displacement`
    pub fn move_by(&mut self, displacement: Vec3) {
        let position = translation_of(&self.transform) + displacement;
        set_translation(&mut self.transform, &position);
    }

    /// Replace the orientation with X, then Y, then Z Euler angles in radians
    pub fn set_orientation_euler_xyz(&mut self, angles: Vec3) {
        set_rotation(&mut self.transform, &euler_xyz_rotation(&angles));
    }

    /// Replace the orientation with a rotation matrix
    pub fn set_rotation_matrix(&mut self, rotation: &Mat3) {
        set_rotation(&mut self.transform, rotation);
    }

    /// Rotate about `axis` through the object's position
    pub fn rotate(&mut self, axis: Vec3, radians: f32) {
        rotate_in_place(&mut self.transform, &axis_angle_rotation(&axis, radians));
    }

    /// Set the per-axis scale
    pub fn set_scale(&mut self, x: f32, y: f32, z: f32) {
        self.scale = Vec4::new(x, y, z, 1.0);
    }

    /// Set the X scale
    pub fn set_scale_x(&mut self, x: f32) {
        self.scale.x = x;
    }

    /// Set the Y scale
    pub fn set_scale_y(&mut self, y: f32) {
        self.scale.y = y;
    }

    /// Set the Z scale
    pub fn set_scale_z(&mut self, z: f32) {
        self.scale.z = z;
    }

    /// Scale as written to the transform block, `w` is always 1
    pub fn scale(&self) -> &Vec4 {
        &self.scale
    }

    /// Material
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Mutable material
    pub fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }

    /// Copy `bytes` into the custom uniform blob for `slot` at `offset`.
    ///
    /// The blob grows to fit. Pipelines with a custom object block at `slot`
    /// upload it on every draw once it is at least the block's size.
    pub fn set_custom_uniform_data(&mut self, slot: u32, bytes: &[u8], offset: usize) {
        let blob = self.custom_data.entry(slot).or_default();
        let end = offset + bytes.len();
        if blob.len() < end {
            blob.resize(end, 0);
        }
        blob[offset..end].copy_from_slice(bytes);
    }

    /// Custom uniform blob for `slot`
    pub fn custom_data(&self, slot: u32) -> Option<&[u8]> {
        self.custom_data.get(&slot).map(Vec::as_slice)
    }

    /// Transform relative to the reference frame
    pub fn local_transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Position relative to the reference frame
    pub fn local_position(&self) -> Vec3 {
        translation_of(&self.transform)
    }

    /// Reference frame, possibly dangling
    pub fn parent(&self) -> Option<ObjectKey> {
        self.parent
    }
}

/// Arena of world objects with weak parent links
#[derive(Debug, Default)]
pub struct WorldObjects {
    objects: SlotMap<ObjectKey, WorldObject>,
}

impl WorldObjects {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object
    pub fn insert(&mut self, object: WorldObject) -> ObjectKey {
        self.objects.insert(object)
    }

    /// Remove an object. Children that used it as a frame keep their local
    /// transform and behave as if detached.
    pub fn remove(&mut self, key: ObjectKey) -> Option<WorldObject> {
        self.objects.remove(key)
    }

    /// Borrow an object
    pub fn get(&self, key: ObjectKey) -> Option<&WorldObject> {
        self.objects.get(key)
    }

    /// Mutably borrow an object
    pub fn get_mut(&mut self, key: ObjectKey) -> Option<&mut WorldObject> {
        self.objects.get_mut(key)
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over all objects
    pub fn iter(&self) -> impl Iterator<Item = (ObjectKey, &WorldObject)> {
        self.objects.iter()
    }

    /// Make `parent` the reference frame of `child`
    pub fn attach_reference_frame(&mut self, child: ObjectKey, parent: ObjectKey) -> RenderResult<()> {
        if !self.objects.contains_key(parent) {
            return Err(RenderError::ObjectNotFound);
        }
        let object = self.objects.get_mut(child).ok_or(RenderError::ObjectNotFound)?;
        object.parent = Some(parent);
        Ok(())
    }

    /// Drop the reference frame of `child`
    pub fn detach_reference_frame(&mut self, child: ObjectKey) -> RenderResult<()> {
        let object = self.objects.get_mut(child).ok_or(RenderError::ObjectNotFound)?;
        object.parent = None;
        Ok(())
    }

    /// World transform: every live ancestor's local transform composed onto
    /// the object's own. A chain longer than the arena is a cycle and stops
    /// composing there.
    pub fn world_transform(&self, key: ObjectKey) -> Option<Mat4> {
        let object = self.objects.get(key)?;
        let mut transform = object.transform;
        let mut parent = object.parent;
        let mut depth = 0;
        while let Some(parent_key) = parent {
            if depth >= self.objects.len() {
                log::warn!("Reference frame cycle detected, ignoring the rest of the chain");
                break;
            }
            let Some(frame) = self.objects.get(parent_key) else {
                break;
            };
            transform = frame.transform * transform;
            parent = frame.parent;
            depth += 1;
        }
        Some(transform)
    }

    /// World position: the local position carried through the parent's
    /// world transform in homogeneous coordinates
    pub fn position(&self, key: ObjectKey) -> Option<Vec3> {
        self.world_transform(key).map(|transform| translation_of(&transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::constants::PI;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let object = WorldObject::new();
        assert_eq!(object.material().colour, Vec4::zeros());
        assert_relative_eq!(object.material().diffuse, 0.8);
        assert_relative_eq!(object.material().specular, 1.8);
        assert_relative_eq!(object.material().shininess, 50.0);
        assert_eq!(*object.scale(), Vec4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(object.max_indices(), 0);
        assert!(object.backface_culling());
        assert!(object.mesh().is_none());
    }

    #[test]
    fn test_position_round_trip_without_parent() {
        let mut objects = WorldObjects::new();
        let key = objects.insert(WorldObject::new());
        let p = Vec3::new(3.0, -4.5, 12.0);
        objects.get_mut(key).unwrap().set_position(p);

        assert_relative_eq!(objects.position(key).unwrap(), p);
        assert_relative_eq!(objects.get(key).unwrap().local_position(), p);
    }

    #[test]
    fn test_position_through_parent_frame() {
        let mut objects = WorldObjects::new();
        let parent = objects.insert(WorldObject::new());
        let child = objects.insert(WorldObject::new());
        {
            let frame = objects.get_mut(parent).unwrap();
            frame.set_position(Vec3::new(10.0, 0.0, 0.0));
            frame.rotate(Vec3::new(0.0, 0.0, 1.0), PI / 2.0);
        }
        let p = Vec3::new(1.0, 0.0, 0.0);
        objects.get_mut(child).unwrap().set_position(p);
        objects.attach_reference_frame(child, parent).unwrap();

        let parent_transform = objects.world_transform(parent).unwrap();
        let expected = parent_transform * Vec4::new(p.x, p.y, p.z, 1.0);
        let position = objects.position(child).unwrap();
        assert_relative_eq!(position, expected.xyz(), epsilon = 1e-5);
        assert_relative_eq!(position, Vec3::new(10.0, 1.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_removed_parent_reads_as_no_parent() {
        let mut objects = WorldObjects::new();
        let parent = objects.insert(WorldObject::new());
        let child = objects.insert(WorldObject::new());
        objects.get_mut(parent).unwrap().set_position(Vec3::new(5.0, 5.0, 5.0));
        objects.get_mut(child).unwrap().set_position(Vec3::new(1.0, 2.0, 3.0));
        objects.attach_reference_frame(child, parent).unwrap();

        objects.remove(parent);
        assert_relative_eq!(objects.position(child).unwrap(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut objects = WorldObjects::new();
        let a = objects.insert(WorldObject::new());
        let b = objects.insert(WorldObject::new());
        objects.attach_reference_frame(a, b).unwrap();
        objects.attach_reference_frame(b, a).unwrap();
        assert!(objects.world_transform(a).is_some());
    }

    #[test]
    fn test_attach_requires_live_keys() {
        let mut objects = WorldObjects::new();
        let a = objects.insert(WorldObject::new());
        let gone = objects.insert(WorldObject::new());
        objects.remove(gone);
        assert!(matches!(objects.attach_reference_frame(a, gone), Err(RenderError::ObjectNotFound)));
        assert!(matches!(objects.detach_reference_frame(gone), Err(RenderError::ObjectNotFound)));
    }

    #[test]
    fn test_custom_data_grows_to_fit() {
        let mut object = WorldObject::new();
        object.set_custom_uniform_data(3, &[1, 2], 0);
        object.set_custom_uniform_data(3, &[9, 9, 9], 4);
        assert_eq!(object.custom_data(3), Some(&[1u8, 2, 0, 0, 9, 9, 9][..]));
        assert!(object.custom_data(4).is_none());
    }

    #[test]
    fn test_rotate_preserves_position() {
        let mut object = WorldObject::new();
        object.set_position(Vec3::new(2.0, 0.0, 0.0));
        object.rotate(Vec3::new(0.0, 1.0, 0.0), 1.0);
        assert_relative_eq!(object.local_position(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_scale_setters() {
        let mut object = WorldObject::new();
        object.set_scale(2.0, 3.0, 4.0);
        object.set_scale_y(7.0);
        assert_eq!(*object.scale(), Vec4::new(2.0, 7.0, 4.0, 1.0));
    }
}
