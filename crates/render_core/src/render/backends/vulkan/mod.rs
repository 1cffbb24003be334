//! Vulkan backend implementation
//!
//! Organized into context setup, swapchain, memory and the device that
//! implements the backend traits on top of them.

pub mod context;
pub mod conversions;
mod device;
pub mod memory;
mod pipeline;
mod resources;
pub mod swapchain;

pub use context::{PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanResult};
pub use device::VulkanDevice;
pub use swapchain::Swapchain;

use crate::render::api::RenderError;

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::ResourceNotFound { kind, id } => RenderError::NotFound {
                kind,
                name: id.to_string(),
            },
            VulkanError::InvalidOperation { reason } => RenderError::InvalidState(reason),
            VulkanError::InitializationFailed(reason) => RenderError::InitializationFailed(reason),
            other => RenderError::BackendError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_error_mapping() {
        let err: RenderError = VulkanError::ResourceNotFound { kind: "buffer", id: 9 }.into();
        assert!(matches!(err, RenderError::NotFound { kind: "buffer", ref name } if name == "9"));

        let err: RenderError = VulkanError::invalid("no command buffer is recording").into();
        assert!(matches!(err, RenderError::InvalidState(_)));

        let err: RenderError = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, RenderError::BackendError(ref msg) if msg.contains("ERROR_DEVICE_LOST")));
    }
}
