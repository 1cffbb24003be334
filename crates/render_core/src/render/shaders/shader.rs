//! Shader objects
//!
//! A [`Shader`] collects attribute and uniform metadata while `Uninitialized`,
//! then [`Shader::initialize`] turns it into device objects: descriptor set
//! layouts, a descriptor pool, the graphics pipeline and a uniform buffer sized
//! for the global block plus every instance slot.

use std::collections::HashMap;
use std::path::Path;

use super::config::{AttributeConfig, ShaderConfig, UniformConfig, UniformScope, UniformType};
use super::instance::{InstanceId, InstanceSlotPool, MAX_INSTANCES};
use crate::core::config::ShaderSystemConfig;
use crate::render::api::*;
use crate::render::arena::RenderBuffer;

/// Push-constant bytes available to local uniforms
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Minimum uniform-buffer descriptors per shader pool
pub const POOL_UNIFORM_BUFFERS: u32 = 1024;
/// Minimum sampler descriptors per shader pool
pub const POOL_SAMPLERS: u32 = 4096;
/// Minimum descriptor sets per shader pool
pub const POOL_MAX_SETS: u32 = 1024;

/// Descriptor pool sized for the global sets plus every instance slot
///
/// Each frame in flight needs one global set and one set per instance.
pub fn descriptor_pool_desc(frames_in_flight: usize, textures_per_set: usize) -> DescriptorPoolDesc {
    let sets = u32::try_from((MAX_INSTANCES + 1) * frames_in_flight).unwrap_or(u32::MAX);
    let samplers = sets.saturating_mul(u32::try_from(textures_per_set).unwrap_or(u32::MAX));
    DescriptorPoolDesc {
        uniform_buffers: POOL_UNIFORM_BUFFERS.max(sets),
        samplers: POOL_SAMPLERS.max(samplers),
        max_sets: POOL_MAX_SETS.max(sets),
    }
}

/// Binding of the uniform block in each set
pub const UBO_BINDING: u32 = 0;
/// Binding of the sampler array in each set
pub const SAMPLER_BINDING: u32 = 1;

/// Registry slot of a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Index into a shader's uniform array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformIndex(pub u16);

/// Shader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderState {
    /// No device objects; the registry slot is free
    NotCreated,
    /// Metadata may still be added
    Uninitialized,
    /// Device objects built, ready to draw
    Initialized,
}

/// A vertex attribute with its computed layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderAttribute {
    /// Attribute name
    pub name: String,
    /// Data type
    pub kind: AttributeType,
    /// Size in bytes
    pub size: u32,
    /// Offset within the vertex
    pub offset: u32,
}

/// A uniform with its computed layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderUniform {
    /// Uniform name
    pub name: String,
    /// Position in the uniform array
    pub index: UniformIndex,
    /// Data type
    pub kind: UniformType,
    /// Update frequency
    pub scope: UniformScope,
    /// Byte offset within its block or push-constant range
    pub offset: u64,
    /// Size in bytes
    pub size: u32,
    /// Sampler array slot for samplers, push range index for locals, uniform index otherwise
    pub location: u16,
}

/// Device objects owned by an initialized shader
#[derive(Debug)]
pub(crate) struct ShaderGpu {
    pub pipeline: PipelineHandle,
    pub descriptor_pool: DescriptorPoolHandle,
    pub global_layout: Option<(u32, DescriptorSetLayoutHandle)>,
    pub instance_layout: Option<(u32, DescriptorSetLayoutHandle)>,
    pub uniform_buffer: RenderBuffer,
    pub global_sets: Vec<DescriptorSetHandle>,
    pub global_ubo_generations: Vec<Option<u32>>,
}

impl ShaderGpu {
    fn destroy(self, device: &mut dyn RenderDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_descriptor_pool(self.descriptor_pool);
        for (_, layout) in self.global_layout.into_iter().chain(self.instance_layout) {
            device.destroy_descriptor_set_layout(layout);
        }
        self.uniform_buffer.destroy(device);
    }
}

/// Device objects created so far during initialization, torn down on failure
#[derive(Default)]
struct PartialGpu {
    layouts: Vec<DescriptorSetLayoutHandle>,
    pool: Option<DescriptorPoolHandle>,
    pipeline: Option<PipelineHandle>,
    buffer: Option<RenderBuffer>,
}

impl PartialGpu {
    fn rollback(self, device: &mut dyn RenderDevice) {
        if let Some(pipeline) = self.pipeline {
            device.destroy_pipeline(pipeline);
        }
        if let Some(pool) = self.pool {
            device.destroy_descriptor_pool(pool);
        }
        for layout in self.layouts {
            device.destroy_descriptor_set_layout(layout);
        }
        if let Some(buffer) = self.buffer {
            buffer.destroy(device);
        }
    }
}

/// Which descriptor set `set_uniform` writes target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundScope {
    /// The global set
    Global,
    /// An instance slot's set
    Instance(InstanceId),
    /// Push constants
    Local,
}

/// A shader and its per-instance state
#[derive(Debug)]
pub struct Shader {
    pub(crate) id: ShaderId,
    pub(crate) name: String,
    pub(crate) state: ShaderState,
    limits: ShaderSystemConfig,

    pub(crate) attributes: Vec<ShaderAttribute>,
    pub(crate) attribute_stride: u32,
    pub(crate) uniforms: Vec<ShaderUniform>,
    uniform_lookup: HashMap<String, UniformIndex>,
    pub(crate) push_constant_ranges: Vec<PushConstantRange>,
    push_constant_size: u32,

    pub(crate) global_ubo_size: u64,
    pub(crate) global_ubo_stride: u64,
    pub(crate) global_ubo_offset: u64,
    pub(crate) ubo_size: u64,
    pub(crate) ubo_stride: u64,
    pub(crate) global_texture_maps: Vec<Option<TextureBinding>>,
    pub(crate) instance_texture_count: usize,

    pub(crate) bound_scope: BoundScope,
    pub(crate) bound_ubo_offset: u64,
    render_frame_number: Option<u64>,

    pub(crate) gpu: Option<ShaderGpu>,
    pub(crate) instances: InstanceSlotPool,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

impl Shader {
    /// Create an empty, uninitialized shader
    pub fn new(id: ShaderId, name: impl Into<String>, limits: ShaderSystemConfig) -> Self {
        Self {
            id,
            name: name.into(),
            state: ShaderState::Uninitialized,
            limits,
            attributes: Vec::new(),
            attribute_stride: 0,
            uniforms: Vec::new(),
            uniform_lookup: HashMap::new(),
            push_constant_ranges: Vec::new(),
            push_constant_size: 0,
            global_ubo_size: 0,
            global_ubo_stride: 0,
            global_ubo_offset: 0,
            ubo_size: 0,
            ubo_stride: 0,
            global_texture_maps: Vec::new(),
            instance_texture_count: 0,
            bound_scope: BoundScope::Global,
            bound_ubo_offset: 0,
            render_frame_number: None,
            gpu: None,
            instances: InstanceSlotPool::new(MAX_INSTANCES),
        }
    }

    fn ensure_uninitialized(&self, what: &str) -> RenderResult<()> {
        if self.state == ShaderState::Uninitialized {
            Ok(())
        } else {
            log::error!("Cannot add {} to shader '{}' in state {:?}", what, self.name, self.state);
            Err(RenderError::InvalidState(format!(
                "shader '{}' accepts {what} only while uninitialized",
                self.name
            )))
        }
    }

    /// Append a vertex attribute, extending the vertex stride
    pub fn add_attribute(&mut self, config: &AttributeConfig) -> RenderResult<()> {
        self.ensure_uninitialized("attributes")?;
        let size = config.kind.size();
        self.attributes.push(ShaderAttribute {
            name: config.name.clone(),
            kind: config.kind,
            size,
            offset: self.attribute_stride,
        });
        self.attribute_stride += size;
        Ok(())
    }

    /// Register a uniform and assign its offset and location
    pub fn add_uniform(&mut self, config: &UniformConfig) -> RenderResult<UniformIndex> {
        self.ensure_uninitialized("uniforms")?;

        if self.uniforms.len() >= self.limits.max_uniform_count {
            log::error!("Shader '{}' exceeds {} uniforms", self.name, self.limits.max_uniform_count);
            return Err(RenderError::ResourceExhausted { kind: "uniform", capacity: self.limits.max_uniform_count });
        }
        if self.uniform_lookup.contains_key(&config.name) {
            log::error!("Shader '{}' already has a uniform named '{}'", self.name, config.name);
            return Err(RenderError::InvalidConfig(format!(
                "duplicate uniform '{}' in shader '{}'",
                config.name, self.name
            )));
        }

        let index = UniformIndex(self.uniforms.len() as u16);
        let size = config.kind.size();
        let (offset, location) = if config.kind.is_sampler() {
            (0, self.add_sampler_slot(config)?)
        } else {
            if size == 0 {
                return Err(RenderError::InvalidConfig(format!("uniform '{}' has zero size", config.name)));
            }
            match config.scope {
                UniformScope::Local => self.add_push_constant(config, size)?,
                UniformScope::Global => {
                    let offset = self.global_ubo_size;
                    self.global_ubo_size += u64::from(size);
                    (offset, index.0)
                }
                UniformScope::Instance => {
                    let offset = self.ubo_size;
                    self.ubo_size += u64::from(size);
                    (offset, index.0)
                }
            }
        };

        self.uniforms.push(ShaderUniform {
            name: config.name.clone(),
            index,
            kind: config.kind,
            scope: config.scope,
            offset,
            size,
            location,
        });
        self.uniform_lookup.insert(config.name.clone(), index);
        Ok(index)
    }

    fn add_sampler_slot(&mut self, config: &UniformConfig) -> RenderResult<u16> {
        match config.scope {
            UniformScope::Local => {
                log::error!("Sampler '{}' cannot have local scope", config.name);
                Err(RenderError::InvalidConfig(format!("sampler '{}' cannot be local", config.name)))
            }
            UniformScope::Global => {
                let location = self.global_texture_maps.len();
                if location >= self.limits.max_global_textures {
                    log::error!("Shader '{}' exceeds {} global textures", self.name, self.limits.max_global_textures);
                    return Err(RenderError::ResourceExhausted {
                        kind: "global texture",
                        capacity: self.limits.max_global_textures,
                    });
                }
                self.global_texture_maps.push(None);
                Ok(location as u16)
            }
            UniformScope::Instance => {
                let location = self.instance_texture_count;
                if location >= self.limits.max_instance_textures {
                    log::error!(
                        "Shader '{}' exceeds {} instance textures",
                        self.name,
                        self.limits.max_instance_textures
                    );
                    return Err(RenderError::ResourceExhausted {
                        kind: "instance texture",
                        capacity: self.limits.max_instance_textures,
                    });
                }
                self.instance_texture_count += 1;
                Ok(location as u16)
            }
        }
    }

    fn add_push_constant(&mut self, config: &UniformConfig, size: u32) -> RenderResult<(u64, u16)> {
        let range = PushConstantRange {
            offset: self.push_constant_size,
            size: size.next_multiple_of(4),
        };
        if range.offset + range.size > MAX_PUSH_CONSTANT_SIZE {
            log::error!(
                "Local uniform '{}' overflows the {}-byte push constant budget of shader '{}'",
                config.name,
                MAX_PUSH_CONSTANT_SIZE,
                self.name
            );
            return Err(RenderError::ResourceExhausted {
                kind: "push constant byte",
                capacity: MAX_PUSH_CONSTANT_SIZE as usize,
            });
        }
        self.push_constant_size += range.size;
        let location = self.push_constant_ranges.len() as u16;
        self.push_constant_ranges.push(range);
        Ok((0, location))
    }

    fn set_bindings(&self, ubo_size: u64, texture_count: usize) -> Vec<DescriptorBinding> {
        let stages = ShaderStages::VERTEX | ShaderStages::FRAGMENT;
        let mut bindings = Vec::new();
        if ubo_size > 0 {
            bindings.push(DescriptorBinding { binding: UBO_BINDING, kind: DescriptorKind::UniformBuffer, count: 1, stages });
        }
        if texture_count > 0 {
            bindings.push(DescriptorBinding {
                binding: SAMPLER_BINDING,
                kind: DescriptorKind::CombinedImageSampler,
                count: texture_count as u32,
                stages,
            });
        }
        bindings
    }

    fn create_layout(
        device: &mut dyn RenderDevice,
        bindings: &[DescriptorBinding],
        next_set: &mut u32,
        partial: &mut PartialGpu,
    ) -> RenderResult<Option<(u32, DescriptorSetLayoutHandle)>> {
        if bindings.is_empty() {
            return Ok(None);
        }
        let layout = device.create_descriptor_set_layout(bindings)?;
        partial.layouts.push(layout);
        let set_index = *next_set;
        *next_set += 1;
        Ok(Some((set_index, layout)))
    }

    /// Build every device object and move to `Initialized`
    pub fn initialize(
        &mut self,
        device: &mut dyn RenderDevice,
        renderpass: RenderPassHandle,
        config: &ShaderConfig,
        shader_dir: &Path,
        frames_in_flight: usize,
    ) -> RenderResult<()> {
        self.ensure_uninitialized("initialization")?;
        let mut partial = PartialGpu::default();
        match self.build_gpu(device, renderpass, config, shader_dir, frames_in_flight, &mut partial) {
            Ok(gpu) => {
                self.gpu = Some(gpu);
                self.state = ShaderState::Initialized;
                log::debug!(
                    "Shader '{}' initialized (stride {}, global stride {}, instance stride {})",
                    self.name,
                    self.attribute_stride,
                    self.global_ubo_stride,
                    self.ubo_stride
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize shader '{}': {}", self.name, e);
                partial.rollback(device);
                Err(e)
            }
        }
    }

    fn build_gpu(
        &mut self,
        device: &mut dyn RenderDevice,
        renderpass: RenderPassHandle,
        config: &ShaderConfig,
        shader_dir: &Path,
        frames_in_flight: usize,
        partial: &mut PartialGpu,
    ) -> RenderResult<ShaderGpu> {
        let alignment = device.min_uniform_alignment();
        self.global_ubo_stride = align_up(self.global_ubo_size, alignment);
        self.ubo_stride = align_up(self.ubo_size, alignment);

        let mut next_set = 0;
        let global_bindings = self.set_bindings(self.global_ubo_size, self.global_texture_maps.len());
        let global_layout = Self::create_layout(device, &global_bindings, &mut next_set, partial)?;
        let instance_bindings = self.set_bindings(self.ubo_size, self.instance_texture_count);
        let instance_layout = Self::create_layout(device, &instance_bindings, &mut next_set, partial)?;

        let textures_per_set = self.global_texture_maps.len().max(self.instance_texture_count);
        let descriptor_pool = device.create_descriptor_pool(&descriptor_pool_desc(frames_in_flight, textures_per_set))?;
        partial.pool = Some(descriptor_pool);

        let pipeline = device.create_pipeline(&PipelineDesc {
            name: self.name.clone(),
            renderpass,
            stages: config
                .stages
                .iter()
                .map(|stage| ShaderModuleDesc { stage: stage.stage, path: shader_dir.join(&stage.file) })
                .collect(),
            attributes: self
                .attributes
                .iter()
                .enumerate()
                .map(|(location, attr)| VertexAttributeDesc { location: location as u32, kind: attr.kind, offset: attr.offset })
                .collect(),
            stride: self.attribute_stride,
            set_layouts: global_layout.iter().chain(instance_layout.iter()).map(|(_, layout)| *layout).collect(),
            push_constant_ranges: self.push_constant_ranges.clone(),
            cull_mode: config.cull_mode,
            depth_test: config.depth_test,
            depth_write: config.depth_write,
        })?;
        partial.pipeline = Some(pipeline);

        let buffer_size = (self.global_ubo_stride + self.ubo_stride * MAX_INSTANCES as u64).max(alignment);
        let uniform_buffer = partial.buffer.insert(RenderBuffer::create(
            device,
            format!("{}.uniforms", self.name),
            BufferKind::Uniform,
            buffer_size,
            true,
        )?);
        uniform_buffer.map(device)?;
        if self.global_ubo_stride > 0 {
            self.global_ubo_offset = uniform_buffer.allocate(self.global_ubo_stride)?;
        }
        self.bound_ubo_offset = self.global_ubo_offset;

        let global_sets = match global_layout {
            Some((_, layout)) => device.allocate_descriptor_sets(descriptor_pool, layout, frames_in_flight as u32)?,
            None => Vec::new(),
        };

        // Every object is now owned by the result; nothing left to roll back.
        let uniform_buffer = std::mem::take(partial)
            .buffer
            .ok_or_else(|| RenderError::InvalidState("uniform buffer missing".to_string()))?;

        Ok(ShaderGpu {
            pipeline,
            descriptor_pool,
            global_layout,
            instance_layout,
            uniform_buffer,
            global_sets,
            global_ubo_generations: vec![None; frames_in_flight],
        })
    }

    /// Release every device object; the shader returns to `NotCreated`
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy(device);
        }
        self.instances = InstanceSlotPool::new(MAX_INSTANCES);
        self.state = ShaderState::NotCreated;
    }

    pub(crate) fn gpu(&self) -> RenderResult<&ShaderGpu> {
        self.gpu
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState(format!("shader '{}' is not initialized", self.name)))
    }

    pub(crate) fn gpu_mut(&mut self) -> RenderResult<&mut ShaderGpu> {
        let name = &self.name;
        self.gpu
            .as_mut()
            .ok_or_else(|| RenderError::InvalidState(format!("shader '{name}' is not initialized")))
    }

    /// Uniform lookup by name
    pub fn uniform_index(&self, name: &str) -> Option<UniformIndex> {
        self.uniform_lookup.get(name).copied()
    }

    /// Registry slot
    pub fn id(&self) -> ShaderId {
        self.id
    }

    /// Shader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state
    pub fn state(&self) -> ShaderState {
        self.state
    }

    /// Vertex attributes
    pub fn attributes(&self) -> &[ShaderAttribute] {
        &self.attributes
    }

    /// Vertex stride in bytes
    pub fn attribute_stride(&self) -> u32 {
        self.attribute_stride
    }

    /// Uniforms in declaration order
    pub fn uniforms(&self) -> &[ShaderUniform] {
        &self.uniforms
    }

    /// A uniform by index
    pub fn uniform(&self, index: UniformIndex) -> Option<&ShaderUniform> {
        self.uniforms.get(usize::from(index.0))
    }

    /// Push-constant ranges of local uniforms
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Aligned size of the global uniform block
    pub fn global_ubo_stride(&self) -> u64 {
        self.global_ubo_stride
    }

    /// Aligned size of one instance uniform block
    pub fn ubo_stride(&self) -> u64 {
        self.ubo_stride
    }

    /// Number of global samplers
    pub fn global_texture_count(&self) -> usize {
        self.global_texture_maps.len()
    }

    /// Number of instance samplers
    pub fn instance_texture_count(&self) -> usize {
        self.instance_texture_count
    }

    /// Whether any instance-scope uniform exists
    pub fn has_instance_uniforms(&self) -> bool {
        self.ubo_size > 0 || self.instance_texture_count > 0
    }

    /// Frame on which globals were last applied
    pub fn render_frame_number(&self) -> Option<u64> {
        self.render_frame_number
    }

    /// Record the frame on which globals were applied
    pub fn set_render_frame_number(&mut self, frame_number: u64) {
        self.render_frame_number = Some(frame_number);
    }

    /// The graphics pipeline, once initialized
    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.gpu.as_ref().map(|gpu| gpu.pipeline)
    }

    /// Number of live instance slots
    pub fn live_instance_count(&self) -> usize {
        self.instances.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ShaderSystemConfig {
        ShaderSystemConfig {
            max_shader_count: 4,
            max_uniform_count: 8,
            max_global_textures: 1,
            max_instance_textures: 2,
        }
    }

    #[test]
    fn test_uniform_offsets_by_scope() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        shader.add_uniform(&UniformConfig::new("projection", UniformType::Matrix4, UniformScope::Global)).unwrap();
        shader.add_uniform(&UniformConfig::new("tint", UniformType::Float32x4, UniformScope::Global)).unwrap();
        let colour = shader
            .add_uniform(&UniformConfig::new("colour", UniformType::Float32x3, UniformScope::Instance))
            .unwrap();
        let model = shader.add_uniform(&UniformConfig::new("model", UniformType::Matrix4, UniformScope::Local)).unwrap();
        let flag = shader.add_uniform(&UniformConfig::new("flag", UniformType::UInt8, UniformScope::Local)).unwrap();

        assert_eq!(shader.uniform(colour).unwrap().offset, 0);
        assert_eq!(shader.global_ubo_size, 80);
        assert_eq!(shader.ubo_size, 12);
        assert_eq!(shader.uniform(model).unwrap().location, 0);
        assert_eq!(shader.uniform(flag).unwrap().location, 1);
        assert_eq!(shader.push_constant_ranges()[1], PushConstantRange { offset: 64, size: 4 });
    }

    #[test]
    fn test_duplicate_uniform_rejected() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        let uniform = UniformConfig::new("view", UniformType::Matrix4, UniformScope::Global);
        shader.add_uniform(&uniform).unwrap();
        assert!(matches!(shader.add_uniform(&uniform), Err(RenderError::InvalidConfig(_))));
        assert_eq!(shader.uniforms().len(), 1);
    }

    #[test]
    fn test_sampler_rules() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        assert!(shader
            .add_uniform(&UniformConfig::new("local_tex", UniformType::Sampler, UniformScope::Local))
            .is_err());

        let a = shader.add_uniform(&UniformConfig::new("a", UniformType::Sampler, UniformScope::Instance)).unwrap();
        let b = shader.add_uniform(&UniformConfig::new("b", UniformType::Sampler, UniformScope::Instance)).unwrap();
        assert_eq!(shader.uniform(a).unwrap().location, 0);
        assert_eq!(shader.uniform(b).unwrap().location, 1);
        assert!(matches!(
            shader.add_uniform(&UniformConfig::new("c", UniformType::Sampler, UniformScope::Instance)),
            Err(RenderError::ResourceExhausted { kind: "instance texture", capacity: 2 })
        ));

        shader.add_uniform(&UniformConfig::new("g", UniformType::Sampler, UniformScope::Global)).unwrap();
        assert!(shader
            .add_uniform(&UniformConfig::new("h", UniformType::Sampler, UniformScope::Global))
            .is_err());
    }

    #[test]
    fn test_push_constant_budget() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        shader.add_uniform(&UniformConfig::new("a", UniformType::Matrix4, UniformScope::Local)).unwrap();
        shader.add_uniform(&UniformConfig::new("b", UniformType::Matrix4, UniformScope::Local)).unwrap();
        assert!(matches!(
            shader.add_uniform(&UniformConfig::new("c", UniformType::Float32, UniformScope::Local)),
            Err(RenderError::ResourceExhausted { kind: "push constant byte", .. })
        ));
    }

    #[test]
    fn test_descriptor_pool_covers_every_instance() {
        let desc = descriptor_pool_desc(3, 2);
        assert_eq!(desc.max_sets, 1025 * 3);
        assert_eq!(desc.uniform_buffers, 1025 * 3);
        assert_eq!(desc.samplers, 1025 * 3 * 2);

        let small = descriptor_pool_desc(1, 0);
        assert_eq!(small.max_sets, 1025);
        assert_eq!(small.samplers, POOL_SAMPLERS);
    }

    #[test]
    fn test_attribute_stride() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        for (name, kind) in [("pos", AttributeType::Float32x3), ("uv", AttributeType::Float32x2)] {
            shader.add_attribute(&AttributeConfig { name: name.to_string(), kind }).unwrap();
        }
        assert_eq!(shader.attribute_stride(), 20);
        assert_eq!(shader.attributes()[1].offset, 12);
    }

    #[test]
    fn test_uniform_limit() {
        let mut shader = Shader::new(ShaderId(0), "test", limits());
        for i in 0..8 {
            shader
                .add_uniform(&UniformConfig::new(format!("u{i}"), UniformType::Float32, UniformScope::Global))
                .unwrap();
        }
        assert!(matches!(
            shader.add_uniform(&UniformConfig::new("u8", UniformType::Float32, UniformScope::Global)),
            Err(RenderError::ResourceExhausted { kind: "uniform", .. })
        ));
    }
}
