//! # Core Module
//!
//! Shared configuration for every renderer subsystem.
//!
//! ## Organization
//!
//! - **Config**: Unified configuration tree (engine, backend, resources, shaders, passes, views)

pub mod config;

pub use crate::foundation;

// Re-export commonly used config types
pub use config::{
    Config,
    ConfigError,
    EngineConfig,
    RenderPassConfig,
    RenderViewConfig,
    RendererConfig,
    ResourceConfig,
    ShaderSystemConfig,
    VulkanRendererConfig,
};
