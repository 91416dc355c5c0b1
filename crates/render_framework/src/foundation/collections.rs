//! Handle types for arena-owned scene resources

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Generational handle into the renderer's mesh table
    pub struct MeshHandle;

    /// Generational handle into a [`WorldObjects`](crate::render::primitives::WorldObjects) arena
    pub struct ObjectKey;
}
