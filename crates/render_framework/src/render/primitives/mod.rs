//! Scene primitives
//!
//! The thin data holders a frame is built from: the camera, meshes with their
//! table, a few built-in shapes and world objects.

pub mod camera;
pub mod mesh;
pub mod shapes;
pub mod world_object;

pub use camera::{Camera, ProjectionMode, ViewPort};
pub use mesh::{Mesh, MeshTable};
pub use world_object::{Material, WorldObject, WorldObjects};
