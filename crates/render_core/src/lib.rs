//! # Render Core
//!
//! GPU resource lifecycle and frame coordination for a Vulkan renderer.
//!
//! ## Features
//!
//! - **Frame Coordination**: frames in flight, swapchain acquire/present, resize recovery
//! - **Resource Caches**: reference-counted textures, materials and geometries with defaults
//! - **Shader System**: pipelines, uniform layouts and per-instance descriptor state
//! - **Render Views**: world, UI, skybox and mouse-pick views over a configurable pass graph
//! - **Backends**: ash-based Vulkan device plus a headless device for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//! use render_core::render::backends::HeadlessDevice;
//!
//! fn main() -> Result<(), RenderError> {
//!     render_core::foundation::logging::init();
//!
//!     let config = RendererConfig::default().with_resource_root("assets");
//!     let mut renderer = Renderer::new(config, HeadlessDevice::new(1280, 720))?;
//!
//!     let camera = Camera::default();
//!     renderer.draw_frame(&SceneData::empty(&camera))?;
//!
//!     renderer.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        core::config::{Config, EngineConfig, RendererConfig, ResourceConfig, VulkanRendererConfig},
        foundation::math::{Mat4, Transform, Vec3},
        render::{
            api::{RenderDevice, RenderError, RenderResult},
            views::{Mesh, SceneData, Skybox},
            Camera, Renderer,
        },
    };
}
