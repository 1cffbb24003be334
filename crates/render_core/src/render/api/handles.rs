//! Opaque handles to backend-owned GPU objects
//!
//! The core never sees backend object types. Every device object is referred to
//! through one of these `u64` newtypes, issued and interpreted by the backend.

macro_rules! device_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }
        )*
    };
}

device_handle! {
    /// Handle to a device buffer
    BufferHandle,
    /// Handle to a device image plus its view
    TextureHandle,
    /// Handle to a sampler object
    SamplerHandle,
    /// Handle to a graphics pipeline and its layout
    PipelineHandle,
    /// Handle to a descriptor pool
    DescriptorPoolHandle,
    /// Handle to a descriptor set layout
    DescriptorSetLayoutHandle,
    /// Handle to an allocated descriptor set
    DescriptorSetHandle,
    /// Handle to a render pass
    RenderPassHandle,
    /// Handle to a framebuffer (render target)
    RenderTargetHandle,
    /// Handle to a fence
    FenceHandle,
    /// Handle to a semaphore
    SemaphoreHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(BufferHandle(7).to_string(), "BufferHandle(7)");
        assert_ne!(FenceHandle(1), FenceHandle(2));
    }
}
