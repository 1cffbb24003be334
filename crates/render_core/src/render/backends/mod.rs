//! Backend implementations for the render module
//!
//! - [`headless`]: in-memory device used by tests and offscreen tooling
//! - [`vulkan`]: ash-based device presenting to a window surface

pub mod headless;

/// Vulkan rendering backend implementation
pub mod vulkan;

pub use headless::{DeviceCall, HeadlessDevice, HeadlessFaults};
pub use vulkan::{VulkanDevice, VulkanError};
