//! Frame state owned by the renderer

pub mod draw_state;
pub mod swapchain_manager;

pub use draw_state::DrawState;
pub use swapchain_manager::SwapchainManager;
