//! Vulkan backend
//!
//! [`VulkanContext`] owns the instance, surface, physical and logical device,
//! the per-queue fences and the command pool. [`VulkanDevice`] implements
//! [`RenderDevice`](crate::render::RenderDevice) on top of it, handing out raw
//! Vulkan handles as the opaque `u64` handles of the device API.

use ash::vk;
use thiserror::Error;

use crate::render::RenderError;

pub mod buffer;
pub mod context;
pub mod device;
pub mod sync;

pub use context::{PhysicalDeviceInfo, VulkanContext};
pub use device::VulkanDevice;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// A handle that this device never created, or already destroyed
    #[error("Unknown {kind} handle {handle:#x}")]
    UnknownHandle {
        /// Kind of object
        kind: &'static str,
        /// The raw handle
        handle: u64,
    },

    /// A shader binary is not valid SPIR-V
    #[error("Invalid SPIR-V: {0}")]
    InvalidShader(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::OutOfMemory { requested: 0 }
            }
            other => Self::Api(other),
        }
    }
}

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::InitializationFailed(reason) => Self::InitializationFailed(reason),
            VulkanError::NoSuitableMemoryType => Self::NoSuitableMemoryType,
            VulkanError::OutOfMemory { requested } => Self::OutOfMemory { requested },
            VulkanError::UnknownHandle { .. } | VulkanError::InvalidShader(_) => Self::invalid(error.to_string()),
            VulkanError::Api(_) => Self::Device(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_results_map_to_out_of_memory() {
        assert!(matches!(
            VulkanError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            VulkanError::OutOfMemory { .. }
        ));
        assert!(matches!(VulkanError::from(vk::Result::ERROR_DEVICE_LOST), VulkanError::Api(_)));
    }

    #[test]
    fn test_conversion_to_render_error() {
        assert!(matches!(RenderError::from(VulkanError::NoSuitableMemoryType), RenderError::NoSuitableMemoryType));
        assert!(matches!(
            RenderError::from(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
            RenderError::Device(_)
        ));
        assert!(matches!(
            RenderError::from(VulkanError::UnknownHandle { kind: "buffer", handle: 7 }),
            RenderError::InvalidOperation { .. }
        ));
    }
}
