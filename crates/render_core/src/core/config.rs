//! # Unified Configuration System
//!
//! Every tunable of the renderer lives in one serde tree rooted at
//! [`RendererConfig`]. It can be loaded from TOML or RON through the
//! [`Config`] trait and validated before the renderer starts.
//!
//! ## Configuration Categories
//!
//! - **Engine Config**: logging and debug switches
//! - **Vulkan Renderer Config**: instance metadata, frames in flight, arena sizes
//! - **Resource Config**: asset root and cache capacities
//! - **Shader System Config**: shader registry limits
//! - **Passes / Views**: the render pass graph and the views drawing into it

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::config::{Config, ConfigError};
use crate::render::api::ClearFlags;
use crate::render::views::RenderViewKind;

/// # Engine Configuration
///
/// Logging and debug behaviour shared by every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log filter handed to `env_logger` (e.g. `"info"`, `"render_core=debug"`)
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Vulkan Renderer Configuration
///
/// Backend-facing settings: application metadata for instance creation, the
/// number of frames in flight and the sizes of the shared geometry arenas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulkanRendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Maximum frames in flight
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (auto-detected when `None`)
    pub enable_validation: Option<bool>,
    /// Background clear color [R, G, B, A]
    pub clear_color: [f32; 4],
    /// Size in bytes of the shared vertex arena
    pub vertex_buffer_size: u64,
    /// Size in bytes of the shared index arena
    pub index_buffer_size: u64,
}

impl VulkanRendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            max_frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.0, 0.0, 0.2, 1.0],
            vertex_buffer_size: 64 * 1024 * 1024,
            index_buffer_size: 16 * 1024 * 1024,
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set maximum frames in flight, clamped to `1..=8`
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames.clamp(1, 8);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the shared geometry arena sizes in bytes
    pub fn with_geometry_buffers(mut self, vertex_bytes: u64, index_bytes: u64) -> Self {
        self.vertex_buffer_size = vertex_bytes;
        self.index_buffer_size = index_bytes;
        self
    }

    /// Resolve the validation setting (debug builds enable it by default)
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.max_frames_in_flight == 0 {
            return Err("Max frames in flight must be at least 1".to_string());
        }
        if self.max_frames_in_flight > 8 {
            return Err("Max frames in flight should not exceed 8".to_string());
        }
        if self.vertex_buffer_size == 0 || self.index_buffer_size == 0 {
            return Err("Geometry buffer sizes must be non-zero".to_string());
        }
        Ok(())
    }
}

impl Default for VulkanRendererConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

/// # Resource Configuration
///
/// Asset root and the fixed capacities of the texture, material and geometry caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Root directory holding `textures/`, `materials/`, `shaders/` and `models/`
    pub root_path: PathBuf,
    /// Texture cache capacity
    pub max_texture_count: usize,
    /// Material cache capacity
    pub max_material_count: usize,
    /// Geometry cache capacity
    pub max_geometry_count: usize,
}

impl ResourceConfig {
    /// Set the asset root directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_path = root.into();
        self
    }

    /// Validate cache capacities
    pub fn validate(&self) -> Result<(), String> {
        if self.max_texture_count == 0 {
            return Err("max_texture_count must be greater than 0".to_string());
        }
        if self.max_material_count == 0 {
            return Err("max_material_count must be greater than 0".to_string());
        }
        if self.max_geometry_count == 0 {
            return Err("max_geometry_count must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("assets"),
            max_texture_count: 65536,
            max_material_count: 4096,
            max_geometry_count: 4096,
        }
    }
}

/// # Shader System Configuration
///
/// Limits enforced by the shader registry when shaders are created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderSystemConfig {
    /// Number of registry slots
    pub max_shader_count: usize,
    /// Maximum uniforms (including samplers) per shader
    pub max_uniform_count: usize,
    /// Maximum global-scope textures per shader
    pub max_global_textures: usize,
    /// Maximum instance-scope textures per shader
    pub max_instance_textures: usize,
}

impl ShaderSystemConfig {
    /// Registry sizes below this are accepted but reported
    pub const RECOMMENDED_MIN_SHADERS: usize = 512;

    /// Validate the limits. Small registries are allowed with a warning.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_shader_count == 0 {
            return Err("max_shader_count must be greater than 0".to_string());
        }
        if self.max_shader_count < Self::RECOMMENDED_MIN_SHADERS {
            log::warn!(
                "Shader system configured with {} slots; at least {} is recommended",
                self.max_shader_count,
                Self::RECOMMENDED_MIN_SHADERS
            );
        }
        if self.max_uniform_count == 0 {
            return Err("max_uniform_count must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ShaderSystemConfig {
    fn default() -> Self {
        Self {
            max_shader_count: 1024,
            max_uniform_count: 128,
            max_global_textures: 31,
            max_instance_textures: 31,
        }
    }
}

/// A named render pass and how it is cleared
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPassConfig {
    /// Unique pass name referenced by views
    pub name: String,
    /// Clear colour used when `clear_color` is set
    pub clear_value: [f32; 4],
    /// Clear the colour attachment at pass begin
    pub clear_color: bool,
    /// Clear the depth attachment at pass begin
    pub clear_depth: bool,
    /// Clear the stencil attachment at pass begin
    pub clear_stencil: bool,
    /// The pass owns a depth attachment
    pub depth_attachment: bool,
    /// Transition the colour attachment for presentation when the pass ends
    pub present_after: bool,
    /// Targets are supplied by the owning view instead of the swapchain
    pub view_targets: bool,
}

impl RenderPassConfig {
    /// Create a pass drawing into the swapchain with nothing cleared
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clear_value: [0.0, 0.0, 0.0, 1.0],
            clear_color: false,
            clear_depth: false,
            clear_stencil: false,
            depth_attachment: false,
            present_after: false,
            view_targets: false,
        }
    }

    /// Clear colour at pass begin with the given value
    pub fn with_clear_color(mut self, value: [f32; 4]) -> Self {
        self.clear_color = true;
        self.clear_value = value;
        self
    }

    /// Attach and clear depth/stencil
    pub fn with_depth(mut self) -> Self {
        self.depth_attachment = true;
        self.clear_depth = true;
        self.clear_stencil = true;
        self
    }

    /// Present the colour attachment after this pass
    pub fn presenting(mut self) -> Self {
        self.present_after = true;
        self
    }

    /// Let the owning view provide the attachments
    pub fn with_view_targets(mut self) -> Self {
        self.view_targets = true;
        self
    }

    /// Clear flags derived from the boolean switches
    pub fn clear_flags(&self) -> ClearFlags {
        let mut flags = ClearFlags::empty();
        flags.set(ClearFlags::COLOR, self.clear_color);
        flags.set(ClearFlags::DEPTH, self.clear_depth);
        flags.set(ClearFlags::STENCIL, self.clear_stencil);
        flags
    }
}

/// A render view and the passes it draws with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderViewConfig {
    /// Unique view name
    pub name: String,
    /// Which built-in view implementation to instantiate
    pub kind: RenderViewKind,
    /// Names of the passes the view renders, in order
    pub passes: Vec<String>,
    /// Shader override for the view's main shader
    pub custom_shader_name: Option<String>,
}

impl RenderViewConfig {
    /// Create a view configuration
    pub fn new(name: impl Into<String>, kind: RenderViewKind, passes: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            passes: passes.iter().map(|p| (*p).to_string()).collect(),
            custom_shader_name: None,
        }
    }
}

/// # Complete Renderer Configuration
///
/// Top-level configuration that encompasses all renderer subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Backend configuration
    pub renderer: VulkanRendererConfig,
    /// Resource cache configuration
    pub resources: ResourceConfig,
    /// Shader registry limits
    pub shaders: ShaderSystemConfig,
    /// Render pass graph, in execution order
    pub passes: Vec<RenderPassConfig>,
    /// Render views, in render order
    pub views: Vec<RenderViewConfig>,
}

impl RendererConfig {
    /// Built-in pass names
    pub const SKYBOX_PASS: &'static str = "Renderpass.Builtin.Skybox";
    /// World pass name
    pub const WORLD_PASS: &'static str = "Renderpass.Builtin.World";
    /// UI pass name
    pub const UI_PASS: &'static str = "Renderpass.Builtin.UI";
    /// World pick pass name
    pub const WORLD_PICK_PASS: &'static str = "Renderpass.Builtin.WorldPick";
    /// UI pick pass name
    pub const UI_PICK_PASS: &'static str = "Renderpass.Builtin.UIPick";

    /// Create a configuration with the built-in pass graph and views
    pub fn new(app_name: impl Into<String>) -> Self {
        let renderer = VulkanRendererConfig::new(app_name);
        let clear = renderer.clear_color;
        Self {
            engine: EngineConfig::default(),
            renderer,
            resources: ResourceConfig::default(),
            shaders: ShaderSystemConfig::default(),
            passes: vec![
                RenderPassConfig::new(Self::SKYBOX_PASS).with_clear_color(clear),
                RenderPassConfig::new(Self::WORLD_PASS).with_depth(),
                RenderPassConfig::new(Self::UI_PASS).presenting(),
                RenderPassConfig::new(Self::WORLD_PICK_PASS)
                    .with_clear_color([1.0, 1.0, 1.0, 1.0])
                    .with_depth()
                    .with_view_targets(),
                RenderPassConfig::new(Self::UI_PICK_PASS).with_view_targets(),
            ],
            views: vec![
                RenderViewConfig::new("skybox", RenderViewKind::Skybox, &[Self::SKYBOX_PASS]),
                RenderViewConfig::new("world", RenderViewKind::World, &[Self::WORLD_PASS]),
                RenderViewConfig::new("ui", RenderViewKind::Ui, &[Self::UI_PASS]),
                RenderViewConfig::new("pick", RenderViewKind::Pick, &[Self::WORLD_PICK_PASS, Self::UI_PICK_PASS]),
            ],
        }
    }

    /// Set the resource root directory
    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resources.root_path = root.into();
        self
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), String> {
        self.renderer.validate()?;
        self.resources.validate()?;
        self.shaders.validate()?;

        let mut names = std::collections::HashSet::new();
        for pass in &self.passes {
            if !names.insert(pass.name.as_str()) {
                return Err(format!("Duplicate render pass name '{}'", pass.name));
            }
        }
        for view in &self.views {
            if view.passes.is_empty() {
                return Err(format!("View '{}' has no render passes", view.name));
            }
            if let Some(missing) = view.passes.iter().find(|p| !names.contains(p.as_str())) {
                return Err(format!("View '{}' references unknown pass '{}'", view.name, missing));
            }
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.max_frames_in_flight, 2);
        assert_eq!(config.views.len(), 4);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        let config = VulkanRendererConfig::default().with_max_frames_in_flight(42);
        assert_eq!(config.max_frames_in_flight, 8);
        let config = VulkanRendererConfig::default().with_max_frames_in_flight(0);
        assert_eq!(config.max_frames_in_flight, 1);
    }

    #[test]
    fn test_zero_shader_count_rejected() {
        let mut config = RendererConfig::default();
        config.shaders.max_shader_count = 0;
        assert!(config.validate().is_err());

        config.shaders.max_shader_count = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_pass_reference_rejected() {
        let mut config = RendererConfig::default();
        config.views[0].passes = vec!["Renderpass.Missing".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.contains("Renderpass.Missing"));
    }

    #[test]
    fn test_clear_flags() {
        let pass = RenderPassConfig::new("p").with_depth();
        assert_eq!(pass.clear_flags(), ClearFlags::DEPTH | ClearFlags::STENCIL);
    }

    #[test]
    fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");

        let config = RendererConfig::new("Round Trip").with_resource_root("/tmp/assets");
        config.save_to_file(&path).unwrap();

        let loaded = RendererConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.renderer.application_name, "Round Trip");
        assert_eq!(loaded.resources.root_path, PathBuf::from("/tmp/assets"));
        assert_eq!(loaded.passes.len(), config.passes.len());
        assert_eq!(loaded.views[3].kind, RenderViewKind::Pick);
    }
}
