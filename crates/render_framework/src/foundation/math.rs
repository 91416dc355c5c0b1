//! Math utilities and types
//!
//! Provides the vector and matrix aliases used by the camera, world objects and
//! uniform writers, plus the handful of transform builders the scene primitives
//! share. Matrices are nalgebra column-major, which is also the byte order the
//! shaders expect when a matrix is copied into a uniform buffer.

pub use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Rotation matrix for intrinsic X, then Y, then Z Euler angles (radians).
pub fn euler_xyz_rotation(angles: &Vec3) -> Mat3 {
    let (sx, cx) = angles.x.sin_cos();
    let (sy, cy) = angles.y.sin_cos();
    let (sz, cz) = angles.z.sin_cos();

    Mat3::new(
        cy * cz,                 -cy * sz,                 sy,
        cx * sz + sx * sy * cz,  cx * cz - sx * sy * sz,   -sx * cy,
        sx * sz - cx * sy * cz,  sx * cz + cx * sy * sz,   cx * cy,
    )
}

/// Rodrigues rotation about `axis` by `radians`. The axis is normalized first;
/// a zero axis yields the identity.
pub fn axis_angle_rotation(axis: &Vec3, radians: f32) -> Mat3 {
    let norm = axis.norm();
    if norm <= f32::EPSILON {
        return Mat3::identity();
    }
    let u = axis / norm;
    let (s, c) = radians.sin_cos();
    let t = 1.0 - c;

    Mat3::new(
        c + u.x * u.x * t,        u.x * u.y * t - u.z * s,  u.x * u.z * t + u.y * s,
        u.y * u.x * t + u.z * s,  c + u.y * u.y * t,        u.y * u.z * t - u.x * s,
        u.z * u.x * t - u.y * s,  u.z * u.y * t + u.x * s,  c + u.z * u.z * t,
    )
}

/// Standard right-handed cross product.
pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

/// Translation column of a homogeneous transform.
pub fn translation_of(transform: &Mat4) -> Vec3 {
    Vec3::new(transform[(0, 3)], transform[(1, 3)], transform[(2, 3)])
}

/// Overwrite the translation column of a homogeneous transform.
pub fn set_translation(transform: &mut Mat4, position: &Vec3) {
    transform[(0, 3)] = position.x;
    transform[(1, 3)] = position.y;
    transform[(2, 3)] = position.z;
}

/// Overwrite the upper-left 3x3 block of a homogeneous transform.
pub fn set_rotation(transform: &mut Mat4, rotation: &Mat3) {
    transform.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
}

/// Left-multiply the rotation part of `transform` by `rotation`, keeping the
/// translation column where it was.
pub fn rotate_in_place(transform: &mut Mat4, rotation: &Mat3) {
    let position = translation_of(transform);
    let rotated = rotation.to_homogeneous() * *transform;
    *transform = rotated;
    set_translation(transform, &position);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cross_product_standard_formula() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(cross(&x, &y), Vec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(cross(&y, &x), Vec3::new(0.0, 0.0, -1.0));

        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(-4.0, 0.5, 2.0);
        assert_relative_eq!(cross(&a, &b), a.cross(&b), epsilon = 1e-6);
    }

    #[test]
    fn test_euler_zero_is_identity() {
        assert_relative_eq!(euler_xyz_rotation(&Vec3::zeros()), Mat3::identity());
    }

    #[test]
    fn test_euler_single_axis_matches_axis_angle() {
        let angle = 0.7;
        let ex = euler_xyz_rotation(&Vec3::new(angle, 0.0, 0.0));
        let ax = axis_angle_rotation(&Vec3::x(), angle);
        assert_relative_eq!(ex, ax, epsilon = 1e-6);

        let ez = euler_xyz_rotation(&Vec3::new(0.0, 0.0, angle));
        let az = axis_angle_rotation(&Vec3::z(), angle);
        assert_relative_eq!(ez, az, epsilon = 1e-6);
    }

    #[test]
    fn test_axis_angle_normalizes_axis() {
        let a = axis_angle_rotation(&Vec3::new(0.0, 5.0, 0.0), 1.0);
        let b = axis_angle_rotation(&Vec3::y(), 1.0);
        assert_relative_eq!(a, b, epsilon = 1e-6);
        assert_relative_eq!(axis_angle_rotation(&Vec3::zeros(), 1.0), Mat3::identity());
    }

    #[test]
    fn test_rotate_in_place_keeps_translation() {
        let mut m = Mat4::identity();
        set_translation(&mut m, &Vec3::new(1.0, 2.0, 3.0));
        rotate_in_place(&mut m, &axis_angle_rotation(&Vec3::z(), constants::PI / 2.0));

        assert_relative_eq!(translation_of(&m), Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(m[(0, 0)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(m[(1, 0)], 1.0, epsilon = 1e-6);
    }
}
