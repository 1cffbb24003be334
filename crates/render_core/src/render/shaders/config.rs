//! Shader configuration
//!
//! Declarative description of a shader: its compiled stages, vertex attributes
//! and uniforms. Configurations are loaded from `<root>/shaders/<name>.{toml,ron}`;
//! the builtin shaders fall back to the definitions below when no file exists.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{find_named_config, Config};
use crate::render::api::{AttributeType, FaceCullMode, RenderError, RenderResult, ShaderStage};

/// Name of the builtin lit material shader
pub const BUILTIN_WORLD_SHADER: &str = "Shader.Builtin.World";
/// Name of the builtin UI shader
pub const BUILTIN_UI_SHADER: &str = "Shader.Builtin.UI";
/// Name of the builtin skybox shader
pub const BUILTIN_SKYBOX_SHADER: &str = "Shader.Builtin.Skybox";
/// Name of the builtin world id-colour shader
pub const BUILTIN_WORLD_PICK_SHADER: &str = "Shader.Builtin.WorldPick";
/// Name of the builtin UI id-colour shader
pub const BUILTIN_UI_PICK_SHADER: &str = "Shader.Builtin.UIPick";

/// How often a uniform changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformScope {
    /// Once per frame, shared by every draw
    Global,
    /// Once per material or object class
    Instance,
    /// Per draw, through push constants
    Local,
}

/// Data type of a uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformType {
    /// f32
    Float32,
    /// 2 x f32
    Float32x2,
    /// 3 x f32
    Float32x3,
    /// 4 x f32
    Float32x4,
    /// i8
    Int8,
    /// u8
    UInt8,
    /// i16
    Int16,
    /// u16
    UInt16,
    /// i32
    Int32,
    /// u32
    UInt32,
    /// 4x4 f32 matrix
    Matrix4,
    /// Texture sampler
    Sampler,
    /// Opaque block of the given size
    Custom(u32),
}

impl UniformType {
    /// Size in bytes (samplers occupy no uniform-block space)
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Matrix4 => 64,
            Self::Sampler => 0,
            Self::Custom(size) => size,
        }
    }

    /// Whether this is a texture sampler
    pub fn is_sampler(self) -> bool {
        matches!(self, Self::Sampler)
    }
}

/// A compiled stage and the file holding its SPIR-V
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderStageConfig {
    /// Pipeline stage
    pub stage: ShaderStage,
    /// File name under `<root>/shaders/`
    pub file: String,
}

/// A vertex input attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Attribute name
    pub name: String,
    /// Data type
    pub kind: AttributeType,
}

/// A uniform declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformConfig {
    /// Uniform name, unique within the shader
    pub name: String,
    /// Data type
    pub kind: UniformType,
    /// Update frequency
    pub scope: UniformScope,
}

impl UniformConfig {
    /// Create a uniform declaration
    pub fn new(name: impl Into<String>, kind: UniformType, scope: UniformScope) -> Self {
        Self { name: name.into(), kind, scope }
    }
}

/// Complete shader definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Unique shader name
    pub name: String,
    /// Render pass the pipeline targets
    pub renderpass: String,
    /// Compiled stages
    pub stages: Vec<ShaderStageConfig>,
    /// Vertex attributes in location order
    pub attributes: Vec<AttributeConfig>,
    /// Uniforms in declaration order
    pub uniforms: Vec<UniformConfig>,
    /// Face culling
    pub cull_mode: FaceCullMode,
    /// Depth testing
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            renderpass: String::new(),
            stages: Vec::new(),
            attributes: Vec::new(),
            uniforms: Vec::new(),
            cull_mode: FaceCullMode::Back,
            depth_test: true,
            depth_write: true,
        }
    }
}

impl Config for ShaderConfig {}

impl ShaderConfig {
    /// Start a definition with the default pipeline state
    pub fn new(name: impl Into<String>, renderpass: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            renderpass: renderpass.into(),
            ..Self::default()
        }
    }

    /// Add a vertex and fragment stage pair named `<base>.vert.spv` / `<base>.frag.spv`
    pub fn with_stages(mut self, base: &str) -> Self {
        self.stages.push(ShaderStageConfig { stage: ShaderStage::Vertex, file: format!("{base}.vert.spv") });
        self.stages.push(ShaderStageConfig { stage: ShaderStage::Fragment, file: format!("{base}.frag.spv") });
        self
    }

    /// Append a vertex attribute
    pub fn with_attribute(mut self, name: &str, kind: AttributeType) -> Self {
        self.attributes.push(AttributeConfig { name: name.to_string(), kind });
        self
    }

    /// Append a uniform
    pub fn with_uniform(mut self, name: &str, kind: UniformType, scope: UniformScope) -> Self {
        self.uniforms.push(UniformConfig::new(name, kind, scope));
        self
    }

    /// Disable depth testing and writes
    pub fn without_depth(mut self) -> Self {
        self.depth_test = false;
        self.depth_write = false;
        self
    }

    /// Load `<root>/shaders/<name>` if present, otherwise the builtin of that name
    pub fn resolve(root: &Path, name: &str) -> RenderResult<Self> {
        if let Some(path) = find_named_config(&root.join("shaders"), name) {
            log::debug!("Loading shader config '{}' from {}", name, path.display());
            return Ok(Self::load_from_file(path)?);
        }
        Self::builtin(name).ok_or_else(|| RenderError::not_found("shader config", name))
    }

    /// Builtin definition for one of the engine's shader names
    pub fn builtin(name: &str) -> Option<Self> {
        use crate::core::config::RendererConfig as R;
        use UniformScope::{Global, Instance, Local};
        use UniformType as U;

        let config = match name {
            BUILTIN_WORLD_SHADER => with_vertex3d(Self::new(name, R::WORLD_PASS).with_stages("Builtin.MaterialShader"))
                .with_uniform("projection", U::Matrix4, Global)
                .with_uniform("view", U::Matrix4, Global)
                .with_uniform("ambient_colour", U::Float32x4, Global)
                .with_uniform("view_position", U::Float32x3, Global)
                .with_uniform("mode", U::UInt32, Global)
                .with_uniform("diffuse_colour", U::Float32x4, Instance)
                .with_uniform("diffuse_texture", U::Sampler, Instance)
                .with_uniform("specular_texture", U::Sampler, Instance)
                .with_uniform("normal_texture", U::Sampler, Instance)
                .with_uniform("shininess", U::Float32, Instance)
                .with_uniform("model", U::Matrix4, Local),
            BUILTIN_UI_SHADER => with_vertex2d(Self::new(name, R::UI_PASS).with_stages("Builtin.UIShader"))
                .with_uniform("projection", U::Matrix4, Global)
                .with_uniform("view", U::Matrix4, Global)
                .with_uniform("diffuse_colour", U::Float32x4, Instance)
                .with_uniform("diffuse_texture", U::Sampler, Instance)
                .with_uniform("model", U::Matrix4, Local)
                .without_depth(),
            BUILTIN_SKYBOX_SHADER => {
                let mut config = with_vertex3d(Self::new(name, R::SKYBOX_PASS).with_stages("Builtin.SkyboxShader"))
                    .with_uniform("projection", U::Matrix4, Global)
                    .with_uniform("view", U::Matrix4, Global)
                    .with_uniform("cube_texture", U::Sampler, Instance)
                    .without_depth();
                config.cull_mode = FaceCullMode::Front;
                config
            }
            BUILTIN_WORLD_PICK_SHADER => {
                with_vertex3d(Self::new(name, R::WORLD_PICK_PASS).with_stages("Builtin.WorldPickShader"))
                    .with_uniform("projection", U::Matrix4, Global)
                    .with_uniform("view", U::Matrix4, Global)
                    .with_uniform("id_colour", U::Float32x3, Instance)
                    .with_uniform("model", U::Matrix4, Local)
            }
            BUILTIN_UI_PICK_SHADER => with_vertex2d(Self::new(name, R::UI_PICK_PASS).with_stages("Builtin.UIPickShader"))
                .with_uniform("projection", U::Matrix4, Global)
                .with_uniform("view", U::Matrix4, Global)
                .with_uniform("id_colour", U::Float32x3, Instance)
                .with_uniform("model", U::Matrix4, Local)
                .without_depth(),
            _ => return None,
        };
        Some(config)
    }
}

fn with_vertex3d(config: ShaderConfig) -> ShaderConfig {
    config
        .with_attribute("in_position", AttributeType::Float32x3)
        .with_attribute("in_normal", AttributeType::Float32x3)
        .with_attribute("in_texcoord", AttributeType::Float32x2)
        .with_attribute("in_colour", AttributeType::Float32x4)
        .with_attribute("in_tangent", AttributeType::Float32x4)
}

fn with_vertex2d(config: ShaderConfig) -> ShaderConfig {
    config
        .with_attribute("in_position", AttributeType::Float32x2)
        .with_attribute("in_texcoord", AttributeType::Float32x2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_world_layout() {
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let stride: u32 = config.attributes.iter().map(|a| a.kind.size()).sum();
        assert_eq!(stride, 64);
        assert_eq!(config.uniforms.len(), 11);
        assert!(ShaderConfig::builtin("Shader.Unknown").is_none());
    }

    #[test]
    fn test_resolve_prefers_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shaders")).unwrap();

        let custom = ShaderConfig::new(BUILTIN_UI_SHADER, "Renderpass.Custom")
            .with_uniform("tint", UniformType::Custom(32), UniformScope::Instance);
        custom.save_to_file(dir.path().join("shaders").join("Shader.Builtin.UI.ron")).unwrap();

        let resolved = ShaderConfig::resolve(dir.path(), BUILTIN_UI_SHADER).unwrap();
        assert_eq!(resolved, custom);

        let fallback = ShaderConfig::resolve(dir.path(), BUILTIN_SKYBOX_SHADER).unwrap();
        assert_eq!(fallback.cull_mode, FaceCullMode::Front);
        assert!(ShaderConfig::resolve(dir.path(), "Shader.Missing").is_err());
    }
}
