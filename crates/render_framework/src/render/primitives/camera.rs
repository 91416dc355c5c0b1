//! # Camera
//!
//! A camera is a homogeneous world transform (position in column 3,
//! orientation in the upper-left 3x3 block) plus the parameters of its
//! projection onto a viewport.
//!
//! Two matrices are derived from that state and cached:
//! - `world_to_camera`: the inverse of the rigid transform, `Rᵀ` with
//!   translation `-Rᵀp`
//! - `camera_to_screen`: the perspective or isometric projection
//!
//! Every mutator only raises a dirty flag. The matrices are rebuilt on the
//! next getter call, so a camera moved many times in one frame pays for a
//! single recomputation.
//!
//! ## Projection
//! Camera space looks down `+Z`. Screen `Y` grows downward, which is why the
//! `(1,1)` entry of both projections is negative. The viewport size scales
//! the projection so one world unit covers a fixed number of pixels at the
//! near plane, and `zoom` divides that further.

use serde::{Deserialize, Serialize};

use crate::foundation::math::{
    axis_angle_rotation, euler_xyz_rotation, rotate_in_place, set_rotation, set_translation,
    translation_of, Mat3, Mat4, Vec3,
};

/// Pixels per world unit at the near plane, perspective mode
const PERSPECTIVE_BASE_SCALE: f32 = 0.02;

/// Pixels per world unit, isometric mode
const ISOMETRIC_BASE_SCALE: f32 = 0.1;

/// How camera space is projected onto the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProjectionMode {
    /// Perspective divide by camera-space depth
    #[default]
    Perspective,
    /// Parallel projection
    Isometric,
}

/// Viewport rectangle in framebuffer pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewPort {
    /// Left edge
    pub pos_x: f32,
    /// Top edge
    pub pos_y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl ViewPort {
    /// Viewport covering `width` x `height` from the origin
    pub fn new(width: f32, height: f32) -> Self {
        Self { pos_x: 0.0, pos_y: 0.0, width, height }
    }
}

/// 3D camera with lazily derived view and projection matrices
#[derive(Debug, Clone)]
pub struct Camera {
    transform: Mat4,
    world_to_cam: Mat4,
    cam_to_screen: Mat4,
    viewport: ViewPort,
    projection: ProjectionMode,
    zoom: f32,
    zmin: f32,
    zmax: f32,
    world_to_cam_dirty: bool,
    cam_to_screen_dirty: bool,
}

impl Camera {
    /// Default near plane distance
    pub const DEFAULT_NEAR: f32 = 6.0;
    /// Default far plane distance
    pub const DEFAULT_FAR: f32 = 1000.0;

    /// Create a camera at the origin, looking down `+Z`
    ///
    /// # Arguments
    /// * `viewport` - Region of the framebuffer the camera draws into
    /// * `projection` - Perspective or isometric projection
    pub fn new(viewport: ViewPort, projection: ProjectionMode) -> Self {
        Self {
            transform: Mat4::identity(),
            world_to_cam: Mat4::identity(),
            cam_to_screen: Mat4::identity(),
            viewport,
            projection,
            zoom: 1.0,
            zmin: Self::DEFAULT_NEAR,
            zmax: Self::DEFAULT_FAR,
            world_to_cam_dirty: true,
            cam_to_screen_dirty: true,
        }
    }

    /// Place the camera at `position` in world space
    pub fn set_position(&mut self, position: Vec3) {
        set_translation(&mut self.transform, &position);
        self.world_to_cam_dirty = true;
        log::trace!("Camera position set to {:?}", position);
    }

    /// Translate the camera by `displacement`
    pub fn move_by(&mut self, displacement: Vec3) {
        let position = translation_of(&self.transform) + displacement;
        set_translation(&mut self.transform, &position);
        self.world_to_cam_dirty = true;
    }

    /// Replace the orientation with X, then Y, then Z Euler angles in radians
    pub fn set_orientation_euler_xyz(&mut self, angles: Vec3) {
        set_rotation(&mut self.transform, &euler_xyz_rotation(&angles));
        self.world_to_cam_dirty = true;
    }

    /// Replace the orientation with a rotation matrix
    pub fn set_rotation_matrix(&mut self, rotation: &Mat3) {
        set_rotation(&mut self.transform, rotation);
        self.world_to_cam_dirty = true;
    }

    /// Rotate about a world-space `axis` through the camera's position
    pub fn rotate(&mut self, axis: Vec3, radians: f32) {
        rotate_in_place(&mut self.transform, &axis_angle_rotation(&axis, radians));
        self.world_to_cam_dirty = true;
    }

    /// Switch projection mode
    pub fn set_projection_mode(&mut self, projection: ProjectionMode) {
        self.projection = projection;
        self.cam_to_screen_dirty = true;
    }

    /// Change the viewport, usually after a resize
    pub fn set_viewport(&mut self, viewport: ViewPort) {
        self.viewport = viewport;
        self.cam_to_screen_dirty = true;
    }

    /// Set the zoom factor. Larger values show less of the scene.
    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom;
        self.cam_to_screen_dirty = true;
    }

    /// Set the near and far plane distances
    pub fn set_clip_distance(&mut self, near: f32, far: f32) {
        self.zmin = near;
        self.zmax = far;
        self.cam_to_screen_dirty = true;
    }

    /// Current projection mode
    pub fn projection_mode(&self) -> ProjectionMode {
        self.projection
    }

    /// Current viewport
    pub fn viewport(&self) -> &ViewPort {
        &self.viewport
    }

    /// Near plane distance
    pub fn near_plane(&self) -> f32 {
        self.zmin
    }

    /// Far plane distance
    pub fn far_plane(&self) -> f32 {
        self.zmax
    }

    /// Zoom factor
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Camera to world transform
    pub fn transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Camera X axis in world space
    pub fn axis_x(&self) -> Vec3 {
        self.transform.fixed_view::<3, 1>(0, 0).into_owned()
    }

    /// Camera Y axis in world space
    pub fn axis_y(&self) -> Vec3 {
        self.transform.fixed_view::<3, 1>(0, 1).into_owned()
    }

    /// Camera Z (view) axis in world space
    pub fn axis_z(&self) -> Vec3 {
        self.transform.fixed_view::<3, 1>(0, 2).into_owned()
    }

    /// Camera position in world space
    pub fn position(&self) -> Vec3 {
        translation_of(&self.transform)
    }

    /// World to camera transform, recomputed if the camera moved
    pub fn world_to_camera(&mut self) -> &Mat4 {
        if self.world_to_cam_dirty {
            self.world_to_cam_dirty = false;
            self.update_world_to_camera();
        }
        &self.world_to_cam
    }

    /// Camera to screen transform, recomputed if the projection changed
    pub fn camera_to_screen(&mut self) -> &Mat4 {
        if self.cam_to_screen_dirty {
            self.cam_to_screen_dirty = false;
            self.update_camera_to_screen();
        }
        &self.cam_to_screen
    }

    fn update_world_to_camera(&mut self) {
        let rotation_t: Mat3 = self.transform.fixed_view::<3, 3>(0, 0).transpose();
        let position = translation_of(&self.transform);

        let mut world_to_cam = rotation_t.to_homogeneous();
        set_translation(&mut world_to_cam, &(-(rotation_t * position)));
        self.world_to_cam = world_to_cam;
    }

    fn update_camera_to_screen(&mut self) {
        let ViewPort { width, height, .. } = self.viewport;
        let m = &mut self.cam_to_screen;
        match self.projection {
            ProjectionMode::Perspective => {
                let scale = PERSPECTIVE_BASE_SCALE * self.zoom;
                m[(0, 0)] = 2.0 * self.zmin / (width * scale);
                m[(1, 1)] = -2.0 * self.zmin / (height * scale);
                m[(2, 2)] = (self.zmin + self.zmax) / self.zmax;
                m[(2, 3)] = -self.zmin;
                m[(3, 2)] = 1.0;
                m[(3, 3)] = 0.0;
            }
            ProjectionMode::Isometric => {
                let scale = ISOMETRIC_BASE_SCALE * self.zoom;
                m[(0, 0)] = 2.0 / (width * scale);
                m[(1, 1)] = -2.0 / (height * scale);
                m[(2, 2)] = 1.0 / (self.zmax * self.zoom);
                m[(2, 3)] = 0.0;
                m[(3, 2)] = 0.0;
                m[(3, 3)] = 1.0;
            }
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(ViewPort::new(800.0, 600.0), ProjectionMode::Perspective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants::PI, Vec4};
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let camera = Camera::default();
        assert_eq!(camera.near_plane(), 6.0);
        assert_eq!(camera.far_plane(), 1000.0);
        assert_eq!(camera.zoom(), 1.0);
        assert_eq!(camera.projection_mode(), ProjectionMode::Perspective);
        assert_relative_eq!(*camera.transform(), Mat4::identity());
    }

    #[test]
    fn test_perspective_entries() {
        let mut camera = Camera::new(ViewPort::new(1000.0, 500.0), ProjectionMode::Perspective);
        let m = *camera.camera_to_screen();
        assert_relative_eq!(m[(0, 0)], 2.0 * 6.0 / (1000.0 * 0.02));
        assert_relative_eq!(m[(1, 1)], -2.0 * 6.0 / (500.0 * 0.02));
        assert_relative_eq!(m[(2, 2)], 1006.0 / 1000.0);
        assert_relative_eq!(m[(2, 3)], -6.0);
        assert_relative_eq!(m[(3, 2)], 1.0);
        assert_relative_eq!(m[(3, 3)], 0.0);
    }

    #[test]
    fn test_isometric_entries_after_switch() {
        let mut camera = Camera::new(ViewPort::new(1000.0, 500.0), ProjectionMode::Perspective);
        let _ = camera.camera_to_screen();

        camera.set_projection_mode(ProjectionMode::Isometric);
        camera.set_zoom(2.0);
        let m = *camera.camera_to_screen();
        assert_relative_eq!(m[(0, 0)], 2.0 / (1000.0 * 0.1 * 2.0));
        assert_relative_eq!(m[(1, 1)], -2.0 / (500.0 * 0.1 * 2.0));
        assert_relative_eq!(m[(2, 2)], 1.0 / 2000.0);
        assert_relative_eq!(m[(2, 3)], 0.0);
        assert_relative_eq!(m[(3, 2)], 0.0);
        assert_relative_eq!(m[(3, 3)], 1.0);
    }

    #[test]
    fn test_world_to_camera_inverts_transform() {
        let mut camera = Camera::default();
        camera.set_orientation_euler_xyz(Vec3::new(0.3, -0.7, 1.1));
        camera.set_position(Vec3::new(4.0, -2.0, 9.0));

        let world_to_cam = *camera.world_to_camera();
        let product = world_to_cam * camera.transform();
        assert_relative_eq!(product, Mat4::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_world_to_camera_follows_moves() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::new(0.0, 0.0, -10.0));
        let point = *camera.world_to_camera() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(point, Vec4::new(0.0, 0.0, 10.0, 1.0));

        // Cached matrix must be invalidated by the move
        camera.move_by(Vec3::new(0.0, 0.0, 5.0));
        let point = *camera.world_to_camera() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(point, Vec4::new(0.0, 0.0, 5.0, 1.0));
    }

    #[test]
    fn test_rotate_keeps_position() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::new(1.0, 2.0, 3.0));
        camera.rotate(Vec3::new(0.0, 1.0, 0.0), PI / 2.0);

        assert_relative_eq!(camera.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(camera.axis_z(), Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_viewport_change_invalidates_projection() {
        let mut camera = Camera::new(ViewPort::new(100.0, 100.0), ProjectionMode::Isometric);
        let before = camera.camera_to_screen()[(0, 0)];
        camera.set_viewport(ViewPort::new(200.0, 100.0));
        let after = camera.camera_to_screen()[(0, 0)];
        assert_relative_eq!(after, before / 2.0);
    }
}
