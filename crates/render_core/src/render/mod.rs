//! # Rendering System
//!
//! GPU resource lifecycle and frame coordination for a Vulkan renderer.
//!
//! ## Architecture
//!
//! - **Renderer**: the frontend that owns every system and draws frames
//! - **Frame coordinator**: frames in flight, swapchain acquire/present, resize
//! - **Resource systems**: reference-counted textures, materials and geometry
//! - **Shader system**: pipelines, uniform layouts and per-instance state
//! - **Render views**: world, UI, skybox and pick views that turn scene data into draws
//! - **Backends**: the ash-based Vulkan device and a headless device for tests
//!
//! Every system drives the GPU through the [`api::RenderDevice`] trait, so the
//! lifecycle logic is identical on both backends.

pub mod api;
pub mod arena;
pub mod backends;
pub mod camera;
pub mod frame;
pub mod frontend;
pub mod passes;
pub mod resources;
pub mod shaders;
pub mod views;

pub use api::{BackendResult, RenderDevice, RenderError, RenderResult};
pub use camera::Camera;
pub use frame::{FrameCoordinator, FrameInfo, FrameState};
pub use frontend::Renderer;
pub use passes::{RenderPass, RenderPassRegistry};
pub use resources::{GeometrySystem, MaterialSystem, TextureSystem};
pub use shaders::ShaderSystem;
pub use views::{Mesh, RenderView, RenderViewKind, RenderViewSystem, SceneData, Skybox};
