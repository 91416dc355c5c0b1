//! Built-in meshes
//!
//! Unloaded meshes with positions, normals and indices in the default vertex
//! layout. Triangles wind clockwise when seen from outside.

use std::collections::HashMap;

use crate::foundation::math::{Vec3, Vec4};
use crate::render::pipeline::pipeline_config::VertDataLayout;

use super::mesh::Mesh;

fn build(positions: Vec<Vec4>, normals: Vec<Vec3>, indices: Vec<u32>) -> Mesh {
    let mut mesh = Mesh::new(VertDataLayout::default(), positions.len() as u32, indices.len() as u32);
    mesh.set_vertices(positions);
    mesh.set_vertex_normals(normals);
    mesh.set_indices(indices);
    mesh
}

fn point(x: f32, y: f32, z: f32) -> Vec4 {
    Vec4::new(x, y, z, 1.0)
}

/// Unit quad in the XY plane facing `-Z`
pub fn quad() -> Mesh {
    let positions = vec![
        point(0.5, 0.5, 0.0),
        point(0.5, -0.5, 0.0),
        point(-0.5, -0.5, 0.0),
        point(-0.5, 0.5, 0.0),
    ];
    let normals = vec![Vec3::new(0.0, 0.0, -1.0); 4];
    build(positions, normals, vec![0, 1, 2, 0, 2, 3])
}

/// Cube spanning -1..1 on every axis, four vertices per face
pub fn cube() -> Mesh {
    let faces: [(Vec3, [[f32; 3]; 4]); 6] = [
        (Vec3::new(0.0, 1.0, 0.0), [[1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0]]),
        (Vec3::new(0.0, 0.0, 1.0), [[1.0, 1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, -1.0, 1.0], [1.0, -1.0, 1.0]]),
        (Vec3::new(1.0, 0.0, 0.0), [[1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [1.0, 1.0, -1.0]]),
        (Vec3::new(-1.0, 0.0, 0.0), [[-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0]]),
        (Vec3::new(0.0, -1.0, 0.0), [[-1.0, -1.0, 1.0], [-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0]]),
        (Vec3::new(0.0, 0.0, -1.0), [[1.0, 1.0, -1.0], [1.0, -1.0, -1.0], [-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0]]),
    ];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, corners)) in faces.iter().enumerate() {
        let base = face as u32 * 4;
        for [x, y, z] in corners {
            positions.push(point(*x, *y, *z));
            normals.push(*normal);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    build(positions, normals, indices)
}

/// Unit sphere from a subdivided icosahedron. Each subdivision splits every
/// triangle into four; normals equal the normalized positions.
pub fn icosphere(subdivisions: u32) -> Mesh {
    let t = (1.0 + 5.0f32.sqrt()) / 2.0;
    let seed = [
        [-1.0, t, 0.0], [1.0, t, 0.0], [-1.0, -t, 0.0], [1.0, -t, 0.0],
        [0.0, -1.0, t], [0.0, 1.0, t], [0.0, -1.0, -t], [0.0, 1.0, -t],
        [t, 0.0, -1.0], [t, 0.0, 1.0], [-t, 0.0, -1.0], [-t, 0.0, 1.0],
    ];
    let mut points: Vec<Vec3> = seed.iter().map(|[x, y, z]| Vec3::new(*x, *y, *z).normalize()).collect();

    let mut triangles: Vec<[u32; 3]> = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];

    let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
    let mut midpoint = |a: u32, b: u32, points: &mut Vec<Vec3>| -> u32 {
        let key = (a.min(b), a.max(b));
        *midpoints.entry(key).or_insert_with(|| {
            let mid = ((points[a as usize] + points[b as usize]) * 0.5).normalize();
            points.push(mid);
            points.len() as u32 - 1
        })
    };

    for _ in 0..subdivisions {
        let mut next = Vec::with_capacity(triangles.len() * 4);
        for [v0, v1, v2] in triangles {
            let a = midpoint(v0, v1, &mut points);
            let b = midpoint(v1, v2, &mut points);
            let c = midpoint(v2, v0, &mut points);
            next.extend_from_slice(&[[v0, a, c], [v1, b, a], [v2, c, b], [a, b, c]]);
        }
        triangles = next;
    }

    let positions = points.iter().map(|p| point(p.x, p.y, p.z)).collect();
    let indices = triangles.into_iter().flatten().collect();
    build(positions, points, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quad_and_cube_counts() {
        let quad = quad();
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.index_count(), 6);

        let cube = cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices().iter().all(|&i| i < 24));
    }

    #[test]
    fn test_icosphere_counts_per_subdivision() {
        // V = 10 * 4^n + 2, F = 20 * 4^n
        for (n, vertices) in [(0u32, 12u32), (1, 42), (2, 162)] {
            let sphere = icosphere(n);
            assert_eq!(sphere.vertex_count(), vertices);
            assert_eq!(sphere.index_count(), 60 * 4u32.pow(n));
        }
    }

    #[test]
    fn test_icosphere_points_on_unit_sphere() {
        let sphere = icosphere(2);
        for (p, n) in sphere.vertices().iter().zip(sphere.vertex_normals()) {
            assert_relative_eq!(p.xyz().norm(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(p.xyz(), *n, epsilon = 1e-5);
            assert_eq!(p.w, 1.0);
        }
    }
}
