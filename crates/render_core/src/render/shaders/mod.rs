//! Shader system
//!
//! Shader configuration, per-shader device objects with instance slots, and the
//! registry that binds shaders and uploads uniforms during a frame.

pub mod config;
pub mod instance;
pub mod shader;
pub mod system;

pub use config::{
    AttributeConfig, ShaderConfig, ShaderStageConfig, UniformConfig, UniformScope, UniformType, BUILTIN_SKYBOX_SHADER,
    BUILTIN_UI_PICK_SHADER, BUILTIN_UI_SHADER, BUILTIN_WORLD_PICK_SHADER, BUILTIN_WORLD_SHADER,
};
pub use instance::{InstanceId, InstanceSlot, MAX_INSTANCES};
pub use shader::{Shader, ShaderAttribute, ShaderId, ShaderState, ShaderUniform, UniformIndex};
pub use system::{ShaderSystem, UniformValue};
