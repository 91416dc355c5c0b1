//! Resource management
//!
//! Passive GPU resource pools shared by the pipelines. The uniform allocator
//! owns every per-draw descriptor set and its persistently mapped buffers.

pub mod ubo_allocator;

pub use ubo_allocator::{GlobalBlock, ObjectBlock, UniformBufferAllocator, DEFAULT_POOL_SIZE};
