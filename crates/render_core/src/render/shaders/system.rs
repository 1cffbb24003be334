//! Shader registry
//!
//! The [`ShaderSystem`] owns every shader in a fixed table of slots, looks
//! shaders and uniforms up by name, tracks the bound shader and scope, and
//! pushes uniform values and descriptor writes to the device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::config::{ShaderConfig, UniformConfig, UniformScope};
use super::instance::{InstanceId, InstanceResources};
use super::shader::{BoundScope, Shader, ShaderId, ShaderState, UniformIndex, SAMPLER_BINDING, UBO_BINDING};
use crate::core::config::ShaderSystemConfig;
use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::api::*;

/// A value handed to [`ShaderSystem::set_uniform`]
#[derive(Debug, Clone, Copy)]
pub enum UniformValue<'a> {
    /// Raw bytes for a block or push-constant uniform
    Bytes(&'a [u8]),
    /// Texture and sampler for a sampler uniform
    Texture(TextureBinding),
}

impl<'a> UniformValue<'a> {
    /// Bytes of any plain-old-data value
    pub fn pod<T: bytemuck::Pod>(value: &'a T) -> Self {
        Self::Bytes(bytemuck::bytes_of(value))
    }

    /// Column-major matrix bytes
    pub fn matrix(value: &'a Mat4) -> Self {
        Self::Bytes(bytemuck::cast_slice(value.as_slice()))
    }

    /// Three-component vector bytes
    pub fn vec3(value: &'a Vec3) -> Self {
        Self::Bytes(bytemuck::cast_slice(value.as_slice()))
    }

    /// Four-component vector bytes
    pub fn vec4(value: &'a Vec4) -> Self {
        Self::Bytes(bytemuck::cast_slice(value.as_slice()))
    }
}

/// Registry of shaders and their per-frame binding state
#[derive(Debug)]
pub struct ShaderSystem {
    config: ShaderSystemConfig,
    resource_root: PathBuf,
    shader_dir: PathBuf,
    frames_in_flight: usize,
    frame_index: usize,
    shaders: Vec<Option<Shader>>,
    lookup: HashMap<String, ShaderId>,
    current: Option<ShaderId>,
    default_texture: Option<TextureBinding>,
}

impl ShaderSystem {
    /// Create an empty registry
    ///
    /// `resource_root` locates compiled stages under `<root>/shaders/`.
    pub fn new(config: ShaderSystemConfig, resource_root: &Path, frames_in_flight: usize) -> RenderResult<Self> {
        config.validate().map_err(|e| {
            log::error!("Shader system configuration rejected: {}", e);
            RenderError::InvalidConfig(e)
        })?;
        if frames_in_flight == 0 {
            return Err(RenderError::InvalidConfig("frames in flight must be at least 1".to_string()));
        }

        let mut shaders = Vec::with_capacity(config.max_shader_count);
        shaders.resize_with(config.max_shader_count, || None);
        log::info!("Shader system initialized with {} slots", config.max_shader_count);

        Ok(Self {
            config,
            resource_root: resource_root.to_path_buf(),
            shader_dir: resource_root.join("shaders"),
            frames_in_flight,
            frame_index: 0,
            shaders,
            lookup: HashMap::new(),
            current: None,
            default_texture: None,
        })
    }

    /// Create and initialize a shader from its configuration
    ///
    /// An existing shader of the same name is destroyed and replaced. On any
    /// failure nothing is registered.
    pub fn create(
        &mut self,
        device: &mut dyn RenderDevice,
        renderpass: RenderPassHandle,
        config: &ShaderConfig,
    ) -> RenderResult<ShaderId> {
        if config.name.is_empty() {
            log::error!("Shader configuration has no name");
            return Err(RenderError::InvalidConfig("shader name cannot be empty".to_string()));
        }
        if self.lookup.contains_key(&config.name) {
            log::warn!("Shader '{}' already exists and will be replaced", config.name);
            self.destroy(device, &config.name);
        }

        let Some(slot) = self.shaders.iter().position(Option::is_none) else {
            log::error!("Shader registry is full ({} slots)", self.shaders.len());
            return Err(RenderError::ResourceExhausted { kind: "shader", capacity: self.shaders.len() });
        };

        let id = ShaderId(slot as u32);
        let mut shader = Shader::new(id, config.name.clone(), self.config.clone());
        for attribute in &config.attributes {
            shader.add_attribute(attribute)?;
        }
        for uniform in &config.uniforms {
            shader.add_uniform(uniform)?;
        }
        shader.initialize(device, renderpass, config, &self.shader_dir, self.frames_in_flight)?;

        log::info!("Created shader '{}' in slot {}", config.name, slot);
        self.shaders[slot] = Some(shader);
        self.lookup.insert(config.name.clone(), id);
        Ok(id)
    }

    /// Definition for `name` from the resource root, falling back to the builtin
    pub fn resolve_config(&self, name: &str) -> RenderResult<ShaderConfig> {
        ShaderConfig::resolve(&self.resource_root, name)
    }

    /// Add a uniform to a registered shader
    ///
    /// Registered shaders are always initialized, so this only succeeds for
    /// shaders that have not finished creation.
    pub fn add_uniform(&mut self, id: ShaderId, uniform: &UniformConfig) -> RenderResult<UniformIndex> {
        self.shader_mut(id)?.add_uniform(uniform)
    }

    /// Destroy a shader by name
    pub fn destroy(&mut self, device: &mut dyn RenderDevice, name: &str) {
        let Some(id) = self.lookup.remove(name) else {
            log::warn!("Cannot destroy unknown shader '{}'", name);
            return;
        };
        if let Some(mut shader) = self.shaders[id.0 as usize].take() {
            shader.destroy(device);
        }
        if self.current == Some(id) {
            self.current = None;
        }
        log::debug!("Destroyed shader '{}'", name);
    }

    /// Destroy every shader
    pub fn shutdown(&mut self, device: &mut dyn RenderDevice) {
        for mut shader in self.shaders.iter_mut().filter_map(Option::take) {
            shader.destroy(device);
        }
        self.lookup.clear();
        self.current = None;
    }

    /// Set the frame slot used for descriptor sets; the bound pipeline resets
    pub fn begin_frame(&mut self, frame_index: usize) {
        self.frame_index = frame_index % self.frames_in_flight;
        self.current = None;
    }

    /// Texture substituted for unset sampler slots at apply time
    pub fn set_default_texture(&mut self, binding: TextureBinding) {
        self.default_texture = Some(binding);
    }

    /// Shader id by name
    pub fn get_id(&self, name: &str) -> Option<ShaderId> {
        self.lookup.get(name).copied()
    }

    /// Shader by id
    pub fn get(&self, id: ShaderId) -> Option<&Shader> {
        self.shaders.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Shader by name
    pub fn get_by_name(&self, name: &str) -> Option<&Shader> {
        self.get_id(name).and_then(|id| self.get(id))
    }

    fn shader_mut(&mut self, id: ShaderId) -> RenderResult<&mut Shader> {
        self.shaders
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| RenderError::not_found("shader", id.0.to_string()))
    }

    fn current_mut(&mut self) -> RenderResult<&mut Shader> {
        let id = self
            .current
            .ok_or_else(|| RenderError::InvalidState("no shader is in use".to_string()))?;
        self.shader_mut(id)
    }

    /// Number of registered shaders
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Whether no shader is registered
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Shader currently bound for drawing
    pub fn current(&self) -> Option<ShaderId> {
        self.current
    }

    /// Uniform index by name; logs and returns `None` on a miss
    pub fn uniform_index(&self, id: ShaderId, name: &str) -> Option<UniformIndex> {
        let Some(shader) = self.get(id) else {
            log::warn!("uniform_index: shader {} does not exist", id.0);
            return None;
        };
        let index = shader.uniform_index(name);
        if index.is_none() {
            log::warn!("Shader '{}' has no uniform named '{}'", shader.name(), name);
        }
        index
    }

    /// Bind a shader's pipeline unless it is already current
    pub fn use_shader(&mut self, device: &mut dyn RenderDevice, id: ShaderId) -> RenderResult<()> {
        if self.current == Some(id) {
            return Ok(());
        }
        let shader = self.shader_mut(id)?;
        if shader.state() != ShaderState::Initialized {
            return Err(RenderError::InvalidState(format!("shader '{}' is not initialized", shader.name())));
        }
        let pipeline = shader.gpu()?.pipeline;
        device.bind_pipeline(pipeline)?;
        self.current = Some(id);
        Ok(())
    }

    /// [`ShaderSystem::use_shader`] by name
    pub fn use_by_name(&mut self, device: &mut dyn RenderDevice, name: &str) -> RenderResult<()> {
        let id = self.get_id(name).ok_or_else(|| RenderError::not_found("shader", name))?;
        self.use_shader(device, id)
    }

    /// Direct subsequent `set_uniform` calls at the global block
    pub fn bind_global(&mut self) -> RenderResult<()> {
        let shader = self.current_mut()?;
        shader.bound_scope = BoundScope::Global;
        shader.bound_ubo_offset = shader.global_ubo_offset;
        Ok(())
    }

    /// Direct subsequent `set_uniform` calls at an instance slot
    pub fn bind_instance(&mut self, instance: InstanceId) -> RenderResult<()> {
        let shader = self.current_mut()?;
        let offset = shader
            .instances
            .get(instance)
            .map(|slot| slot.ubo_offset)
            .ok_or_else(|| RenderError::not_found("instance slot", instance.0.to_string()))?;
        shader.bound_scope = BoundScope::Instance(instance);
        shader.bound_ubo_offset = offset;
        Ok(())
    }

    /// Set a uniform on the current shader
    ///
    /// Samplers record a texture map for the bound scope, local uniforms become
    /// push constants, everything else is copied into the uniform buffer at the
    /// bound block's offset. Setting a uniform of another scope rebinds first.
    pub fn set_uniform(
        &mut self,
        device: &mut dyn RenderDevice,
        index: UniformIndex,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let shader = self.current_mut()?;
        let uniform = shader
            .uniform(index)
            .cloned()
            .ok_or_else(|| RenderError::not_found("uniform", index.0.to_string()))?;

        match (uniform.scope, shader.bound_scope) {
            (UniformScope::Global, BoundScope::Global)
            | (UniformScope::Instance, BoundScope::Instance(_))
            | (UniformScope::Local, BoundScope::Local) => {}
            (UniformScope::Global, _) => {
                shader.bound_scope = BoundScope::Global;
                shader.bound_ubo_offset = shader.global_ubo_offset;
            }
            (UniformScope::Instance, _) => {
                return Err(RenderError::InvalidState(format!(
                    "instance uniform '{}' set with no instance bound",
                    uniform.name
                )));
            }
            (UniformScope::Local, _) => shader.bound_scope = BoundScope::Local,
        }

        match value {
            UniformValue::Texture(binding) => {
                if !uniform.kind.is_sampler() {
                    return Err(RenderError::InvalidState(format!("uniform '{}' is not a sampler", uniform.name)));
                }
                let location = usize::from(uniform.location);
                let map = match shader.bound_scope {
                    BoundScope::Instance(instance) => shader
                        .instances
                        .get_mut(instance)
                        .and_then(|slot| slot.texture_maps.get_mut(location)),
                    _ => shader.global_texture_maps.get_mut(location),
                };
                let map = map.ok_or_else(|| RenderError::not_found("sampler slot", uniform.name.clone()))?;
                *map = Some(binding);
                Ok(())
            }
            UniformValue::Bytes(data) => {
                if uniform.kind.is_sampler() {
                    return Err(RenderError::InvalidState(format!("uniform '{}' is a sampler", uniform.name)));
                }
                if data.len() > uniform.size as usize {
                    return Err(RenderError::OutOfRange {
                        offset: uniform.offset,
                        size: data.len() as u64,
                        capacity: u64::from(uniform.size),
                    });
                }
                let offset = shader.bound_ubo_offset + uniform.offset;
                let gpu = shader.gpu()?;
                if uniform.scope == UniformScope::Local {
                    let range = shader.push_constant_ranges[usize::from(uniform.location)];
                    device.push_constants(gpu.pipeline, range.offset, data)
                } else {
                    gpu.uniform_buffer.load_range(device, offset, data)
                }
            }
        }
    }

    /// [`ShaderSystem::set_uniform`] by uniform name
    pub fn set_uniform_by_name(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let id = self
            .current
            .ok_or_else(|| RenderError::InvalidState("no shader is in use".to_string()))?;
        let index = self.uniform_index(id, name).ok_or_else(|| RenderError::not_found("uniform", name))?;
        self.set_uniform(device, index, value)
    }

    fn resolve_maps(&self, maps: &[Option<TextureBinding>], shader: &str) -> RenderResult<Vec<TextureBinding>> {
        maps.iter()
            .map(|map| {
                map.or(self.default_texture).ok_or_else(|| {
                    RenderError::InvalidState(format!("shader '{shader}' has an unset sampler and no default texture"))
                })
            })
            .collect()
    }

    /// Bind the global descriptor set of the current shader
    ///
    /// With `need_update`, the uniform block descriptor is written if this
    /// frame's set has not seen it yet and the sampler array is rewritten.
    pub fn apply_global(&mut self, device: &mut dyn RenderDevice, need_update: bool) -> RenderResult<()> {
        let frame = self.frame_index;
        let id = self
            .current
            .ok_or_else(|| RenderError::InvalidState("no shader is in use".to_string()))?;
        let shader = self.get(id).ok_or_else(|| RenderError::not_found("shader", id.0.to_string()))?;
        let gpu = shader.gpu()?;
        let Some((set_index, _)) = gpu.global_layout else {
            return Ok(());
        };
        let set = gpu.global_sets[frame];
        let pipeline = gpu.pipeline;

        let mut writes = Vec::new();
        let mut stamp = false;
        if need_update {
            if shader.global_ubo_size > 0 && gpu.global_ubo_generations[frame].is_none() {
                writes.push(DescriptorWrite::UniformBuffer {
                    binding: UBO_BINDING,
                    buffer: gpu.uniform_buffer.gpu_buffer().handle,
                    offset: shader.global_ubo_offset,
                    range: shader.global_ubo_stride,
                });
                stamp = true;
            }
            if !shader.global_texture_maps.is_empty() {
                let images = self.resolve_maps(&shader.global_texture_maps, shader.name())?;
                writes.push(DescriptorWrite::Samplers { binding: SAMPLER_BINDING, images });
            }
        }

        if !writes.is_empty() {
            device.write_descriptor_set(set, &writes)?;
        }
        if stamp {
            self.shader_mut(id)?.gpu_mut()?.global_ubo_generations[frame] = Some(0);
        }
        device.bind_descriptor_set(pipeline, set_index, set)
    }

    /// Bind the bound instance's descriptor set of the current shader
    ///
    /// With `need_update`, the instance's uniform block descriptor is written if
    /// this frame's set is stale and the sampler array is rewritten. Fails on a
    /// shader without instance uniforms.
    pub fn apply_instance(&mut self, device: &mut dyn RenderDevice, need_update: bool) -> RenderResult<()> {
        let frame = self.frame_index;
        let id = self
            .current
            .ok_or_else(|| RenderError::InvalidState("no shader is in use".to_string()))?;
        let shader = self.get(id).ok_or_else(|| RenderError::not_found("shader", id.0.to_string()))?;
        if !shader.has_instance_uniforms() {
            log::error!("apply_instance called on shader '{}' which has no instance uniforms", shader.name());
            return Err(RenderError::InvalidState(format!(
                "shader '{}' has no instance uniforms",
                shader.name()
            )));
        }
        let BoundScope::Instance(instance) = shader.bound_scope else {
            return Err(RenderError::InvalidState("no instance is bound".to_string()));
        };
        let gpu = shader.gpu()?;
        let Some((set_index, _)) = gpu.instance_layout else {
            return Ok(());
        };
        let slot = shader
            .instances
            .get(instance)
            .ok_or_else(|| RenderError::not_found("instance slot", instance.0.to_string()))?;
        let set = slot.descriptor_sets[frame];
        let pipeline = gpu.pipeline;

        let mut writes = Vec::new();
        let mut stamp = None;
        if need_update {
            if shader.ubo_size > 0 && slot.ubo_generations[frame] != Some(slot.generation) {
                writes.push(DescriptorWrite::UniformBuffer {
                    binding: UBO_BINDING,
                    buffer: gpu.uniform_buffer.gpu_buffer().handle,
                    offset: slot.ubo_offset,
                    range: shader.ubo_stride,
                });
                stamp = Some(slot.generation);
            }
            if !slot.texture_maps.is_empty() {
                let images = self.resolve_maps(&slot.texture_maps, shader.name())?;
                writes.push(DescriptorWrite::Samplers { binding: SAMPLER_BINDING, images });
            }
        }

        if !writes.is_empty() {
            device.write_descriptor_set(set, &writes)?;
        }
        if let Some(generation) = stamp {
            if let Some(slot) = self.shader_mut(id)?.instances.get_mut(instance) {
                slot.ubo_generations[frame] = Some(generation);
            }
        }
        device.bind_descriptor_set(pipeline, set_index, set)
    }

    /// Claim an instance slot on a shader
    ///
    /// `texture_maps` fills the instance sampler slots in location order; unset
    /// slots fall back to the default texture when applied.
    pub fn acquire_instance_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        id: ShaderId,
        texture_maps: &[Option<TextureBinding>],
    ) -> RenderResult<InstanceId> {
        let frames_in_flight = self.frames_in_flight;
        let shader = self.shader_mut(id)?;
        let texture_count = shader.instance_texture_count;
        let ubo_stride = shader.ubo_stride;
        let Some(gpu) = shader.gpu.as_mut() else {
            return Err(RenderError::InvalidState(format!("shader '{}' is not initialized", shader.name)));
        };
        let resources = InstanceResources {
            uniform_buffer: &mut gpu.uniform_buffer,
            ubo_stride,
            descriptor_pool: gpu.descriptor_pool,
            layout: gpu.instance_layout.map(|(_, layout)| layout),
            frames_in_flight,
            texture_count,
        };
        let instance = shader.instances.acquire(device, resources, texture_maps)?;
        log::debug!("Acquired instance {} on shader '{}'", instance.0, shader.name);
        Ok(instance)
    }

    /// Return an instance slot; blocks until the device is idle
    pub fn release_instance_resources(
        &mut self,
        device: &mut dyn RenderDevice,
        id: ShaderId,
        instance: InstanceId,
    ) -> RenderResult<()> {
        let shader = self.shader_mut(id)?;
        let ubo_stride = shader.ubo_stride;
        let Some(gpu) = shader.gpu.as_mut() else {
            return Err(RenderError::InvalidState(format!("shader '{}' is not initialized", shader.name)));
        };
        shader
            .instances
            .release(device, instance, &mut gpu.uniform_buffer, ubo_stride, gpu.descriptor_pool)?;
        if shader.bound_scope == BoundScope::Instance(instance) {
            shader.bound_scope = BoundScope::Global;
            shader.bound_ubo_offset = shader.global_ubo_offset;
        }
        Ok(())
    }

    /// Bump an instance's generation so its uniform descriptors are rewritten
    pub fn invalidate_instance(&mut self, id: ShaderId, instance: InstanceId) -> RenderResult<()> {
        let slot = self
            .shader_mut(id)?
            .instances
            .get_mut(instance)
            .ok_or_else(|| RenderError::not_found("instance slot", instance.0.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    /// Record that a shader's globals were applied on `frame_number`
    pub fn set_render_frame_number(&mut self, id: ShaderId, frame_number: u64) -> RenderResult<()> {
        self.shader_mut(id)?.set_render_frame_number(frame_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{RenderPassDesc, TextureDesc};
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};
    use crate::render::shaders::config::{UniformType, BUILTIN_WORLD_SHADER};
    use crate::render::shaders::instance::MAX_INSTANCES;

    fn setup(frames: usize) -> (HeadlessDevice, RenderPassHandle, ShaderSystem) {
        let mut device = HeadlessDevice::new(640, 480);
        let pass = device
            .create_renderpass(&RenderPassDesc {
                name: "test".to_string(),
                clear_color: [0.0; 4],
                clear_flags: ClearFlags::empty(),
                depth_attachment: false,
                has_prev_pass: false,
                has_next_pass: false,
                present_after: true,
            })
            .unwrap();
        let config = ShaderSystemConfig { max_shader_count: 4, ..ShaderSystemConfig::default() };
        let system = ShaderSystem::new(config, Path::new("assets"), frames).unwrap();
        (device, pass, system)
    }

    fn default_binding(device: &mut HeadlessDevice) -> TextureBinding {
        let texture = device.create_texture(&TextureDesc::rgba(1, 1), &[255; 4]).unwrap();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();
        TextureBinding { texture, sampler }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ShaderSystemConfig { max_shader_count: 0, ..ShaderSystemConfig::default() };
        assert!(matches!(ShaderSystem::new(config, Path::new("."), 2), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_create_world_shader() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();

        let shader = system.get(id).unwrap();
        assert_eq!(shader.state(), ShaderState::Initialized);
        assert_eq!(shader.attribute_stride(), 64);
        // projection + view + ambient + view_position + mode = 64+64+16+12+4 bytes
        assert_eq!(shader.global_ubo_stride(), 256);
        assert_eq!(shader.ubo_stride(), 256);
        assert_eq!(shader.instance_texture_count(), 3);
        assert_eq!(system.get_id(BUILTIN_WORLD_SHADER), Some(id));
        assert!(system.uniform_index(id, "model").is_some());
        assert!(system.uniform_index(id, "missing").is_none());
    }

    #[test]
    fn test_uniform_after_initialize_fails() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();
        let extra = UniformConfig::new("extra", UniformType::Float32, UniformScope::Global);
        assert!(matches!(system.add_uniform(id, &extra), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_failed_create_registers_nothing() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::new("broken", "pass")
            .with_uniform("a", UniformType::Float32, UniformScope::Global)
            .with_uniform("a", UniformType::Float32, UniformScope::Global);
        assert!(system.create(&mut device, pass, &config).is_err());
        assert!(system.get_id("broken").is_none());
        assert!(system.is_empty());

        let bad_pass = ShaderConfig::new("bad_pass", "pass").with_uniform("a", UniformType::Float32, UniformScope::Global);
        assert!(system.create(&mut device, RenderPassHandle(9999), &bad_pass).is_err());
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_registry_full() {
        let (mut device, pass, mut system) = setup(1);
        for i in 0..4 {
            let config = ShaderConfig::new(format!("s{i}"), "pass");
            system.create(&mut device, pass, &config).unwrap();
        }
        let result = system.create(&mut device, pass, &ShaderConfig::new("s4", "pass"));
        assert!(matches!(result, Err(RenderError::ResourceExhausted { kind: "shader", capacity: 4 })));
    }

    #[test]
    fn test_replace_existing_shader() {
        let (mut device, pass, mut system) = setup(1);
        let config = ShaderConfig::new("dup", "pass").with_uniform("a", UniformType::Float32, UniformScope::Global);
        system.create(&mut device, pass, &config).unwrap();
        system.create(&mut device, pass, &config).unwrap();
        assert_eq!(system.len(), 1);
        assert_eq!(device.live_buffer_count(), 1);
    }

    #[test]
    fn test_use_only_rebinds_on_change() {
        let (mut device, pass, mut system) = setup(2);
        let a = system.create(&mut device, pass, &ShaderConfig::new("a", "pass")).unwrap();
        let b = system.create(&mut device, pass, &ShaderConfig::new("b", "pass")).unwrap();
        device.clear_calls();

        system.use_shader(&mut device, a).unwrap();
        system.use_shader(&mut device, a).unwrap();
        system.use_shader(&mut device, b).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::BindPipeline(_))), 2);
    }

    #[test]
    fn test_set_uniform_writes_global_block() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::new("g", "pass")
            .with_uniform("first", UniformType::Float32, UniformScope::Global)
            .with_uniform("second", UniformType::Float32x2, UniformScope::Global);
        let id = system.create(&mut device, pass, &config).unwrap();
        system.use_shader(&mut device, id).unwrap();
        system.bind_global().unwrap();

        let value = [1.5f32, 2.5];
        system.set_uniform_by_name(&mut device, "second", UniformValue::pod(&value)).unwrap();

        let shader = system.get(id).unwrap();
        let gpu = shader.gpu().unwrap();
        let bytes = gpu.uniform_buffer.read_range(&mut device, shader.global_ubo_offset + 4, 8).unwrap();
        assert_eq!(bytes, bytemuck::bytes_of(&value));
    }

    #[test]
    fn test_local_uniform_uses_push_constants() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::new("l", "pass")
            .with_uniform("tint", UniformType::Float32x4, UniformScope::Local)
            .with_uniform("model", UniformType::Matrix4, UniformScope::Local);
        let id = system.create(&mut device, pass, &config).unwrap();
        system.use_shader(&mut device, id).unwrap();
        device.clear_calls();

        let model = Mat4::identity();
        system.set_uniform_by_name(&mut device, "model", UniformValue::matrix(&model)).unwrap();
        assert_eq!(device.calls(), &[DeviceCall::PushConstants { offset: 16, size: 64 }]);
    }

    #[test]
    fn test_apply_global_writes_ubo_once_per_frame_slot() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();
        device.clear_calls();

        for frame in 0..4 {
            system.begin_frame(frame);
            system.use_shader(&mut device, id).unwrap();
            system.apply_global(&mut device, true).unwrap();
        }
        // Two frame slots, each written once.
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::WriteDescriptorSet { .. })), 2);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::BindDescriptorSet { set_index: 0, .. })), 4);
    }

    #[test]
    fn test_instance_lifecycle() {
        let (mut device, pass, mut system) = setup(3);
        let binding = default_binding(&mut device);
        system.set_default_texture(binding);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();

        let sets_before = device.live_descriptor_set_count();
        let instance = system.acquire_instance_resources(&mut device, id, &[]).unwrap();
        assert_eq!(device.live_descriptor_set_count(), sets_before + 3);
        assert_eq!(system.get(id).unwrap().live_instance_count(), 1);

        system.use_shader(&mut device, id).unwrap();
        system.bind_instance(instance).unwrap();
        let colour = Vec4::new(1.0, 0.0, 0.0, 1.0);
        system.set_uniform_by_name(&mut device, "diffuse_colour", UniformValue::vec4(&colour)).unwrap();
        device.clear_calls();

        system.apply_instance(&mut device, true).unwrap();
        system.apply_instance(&mut device, true).unwrap();
        let writes: Vec<_> = device
            .calls()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::WriteDescriptorSet { bindings, .. } => Some(bindings.clone()),
                _ => None,
            })
            .collect();
        // Uniform block written once, samplers on every update.
        assert_eq!(writes, vec![vec![0, 1], vec![1]]);

        device.clear_calls();
        system.release_instance_resources(&mut device, id, instance).unwrap();
        assert_eq!(device.calls()[0], DeviceCall::WaitIdle);
        assert_eq!(device.live_descriptor_set_count(), sets_before);
        assert_eq!(system.get(id).unwrap().live_instance_count(), 0);
        assert!(system.release_instance_resources(&mut device, id, instance).is_err());
    }

    #[test]
    fn test_instance_release_retried_after_idle_failure() {
        let (mut device, pass, mut system) = setup(2);
        let binding = default_binding(&mut device);
        system.set_default_texture(binding);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();

        let sets_before = device.live_descriptor_set_count();
        let instance = system.acquire_instance_resources(&mut device, id, &[]).unwrap();

        device.faults.wait_idle_failure = true;
        assert!(system.release_instance_resources(&mut device, id, instance).is_err());
        assert_eq!(system.get(id).unwrap().live_instance_count(), 1);
        assert_eq!(device.live_descriptor_set_count(), sets_before + 2);

        system.release_instance_resources(&mut device, id, instance).unwrap();
        assert_eq!(system.get(id).unwrap().live_instance_count(), 0);
        assert_eq!(device.live_descriptor_set_count(), sets_before);
        // The uniform range went back too, so the same slot and offset are reused
        let again = system.acquire_instance_resources(&mut device, id, &[]).unwrap();
        assert_eq!(again, instance);
    }

    #[test]
    fn test_descriptor_pool_outlasts_half_the_slots() {
        let (mut device, pass, mut system) = setup(2);
        let binding = default_binding(&mut device);
        system.set_default_texture(binding);
        let config = ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap();
        let id = system.create(&mut device, pass, &config).unwrap();

        for _ in 0..=MAX_INSTANCES / 2 {
            system.acquire_instance_resources(&mut device, id, &[]).unwrap();
        }
        assert_eq!(system.get(id).unwrap().live_instance_count(), MAX_INSTANCES / 2 + 1);
    }

    #[test]
    fn test_apply_instance_without_instance_uniforms() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::new("globals_only", "pass").with_uniform("a", UniformType::Float32, UniformScope::Global);
        let id = system.create(&mut device, pass, &config).unwrap();
        system.use_shader(&mut device, id).unwrap();
        assert!(matches!(system.apply_instance(&mut device, true), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_unset_sampler_without_default_fails() {
        let (mut device, pass, mut system) = setup(2);
        let config = ShaderConfig::new("textured", "pass").with_uniform("tex", UniformType::Sampler, UniformScope::Instance);
        let id = system.create(&mut device, pass, &config).unwrap();
        let instance = system.acquire_instance_resources(&mut device, id, &[]).unwrap();
        system.use_shader(&mut device, id).unwrap();
        system.bind_instance(instance).unwrap();
        assert!(system.apply_instance(&mut device, true).is_err());

        let binding = default_binding(&mut device);
        system.set_uniform_by_name(&mut device, "tex", UniformValue::Texture(binding)).unwrap();
        system.apply_instance(&mut device, true).unwrap();
    }
}
