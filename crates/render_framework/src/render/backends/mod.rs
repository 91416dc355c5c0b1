//! Device backends
//!
//! [`vulkan`] drives a real GPU. [`headless`] records every call instead and
//! backs the crate's tests.

pub mod headless;
pub mod vulkan;
