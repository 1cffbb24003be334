//! Material system
//!
//! A material pairs a shader with its instance-level state: a diffuse colour,
//! shininess and three texture maps. Each resident material owns one instance
//! slot on its shader. Definitions are read from
//! `<root>/materials/<name>.{toml,ron}`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::cache::{Release, ResourceCache};
use super::textures::{TextureMap, TextureSystem};
use crate::config::{find_named_config, Config};
use crate::core::config::ResourceConfig;
use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::api::*;
use crate::render::shaders::{
    InstanceId, ShaderId, ShaderSystem, UniformIndex, UniformValue, BUILTIN_UI_SHADER, BUILTIN_WORLD_SHADER,
};

slotmap::new_key_type! {
    /// Handle to a cached material
    pub struct MaterialId;
}

/// Name of the default material
pub const DEFAULT_MATERIAL: &str = "default";

const DEFAULT_MATERIAL_SHININESS: f32 = 8.0;

/// On-disk material definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialConfig {
    /// Material name
    pub name: String,
    /// Shader the material draws with
    pub shader_name: String,
    /// Base colour, RGBA
    pub diffuse_colour: [f32; 4],
    /// Specular exponent
    pub shininess: f32,
    /// Diffuse texture name
    pub diffuse_map_name: Option<String>,
    /// Specular texture name
    pub specular_map_name: Option<String>,
    /// Normal texture name
    pub normal_map_name: Option<String>,
    /// Destroy once no geometry references the material
    pub auto_release: bool,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            shader_name: BUILTIN_WORLD_SHADER.to_string(),
            diffuse_colour: [1.0; 4],
            shininess: 32.0,
            diffuse_map_name: None,
            specular_map_name: None,
            normal_map_name: None,
            auto_release: true,
        }
    }
}

impl Config for MaterialConfig {}

impl MaterialConfig {
    /// A white material with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style shader override
    pub fn with_shader(mut self, shader_name: impl Into<String>) -> Self {
        self.shader_name = shader_name.into();
        self
    }

    /// Builder-style diffuse texture
    pub fn with_diffuse_map(mut self, texture: impl Into<String>) -> Self {
        self.diffuse_map_name = Some(texture.into());
        self
    }
}

/// A resident material
#[derive(Debug, Clone)]
pub struct Material {
    /// Cache name
    pub name: String,
    /// Shader the material draws with
    pub shader: ShaderId,
    /// Instance slot on `shader`
    pub instance: InstanceId,
    /// Base colour
    pub diffuse_colour: Vec4,
    /// Specular exponent
    pub shininess: f32,
    /// Diffuse map
    pub diffuse_map: TextureMap,
    /// Specular map
    pub specular_map: TextureMap,
    /// Normal map
    pub normal_map: TextureMap,
    /// Any map or the base colour is translucent
    pub has_transparency: bool,
    /// Frame on which the instance uniforms were last written
    pub render_frame_number: Option<u64>,
    texture_names: Vec<String>,
}

impl Material {
    /// Whether the instance uniforms still need writing on `frame_number`
    pub fn needs_update(&self, frame_number: u64) -> bool {
        self.render_frame_number != Some(frame_number)
    }
}

/// Per-frame values for the global uniforms of the material shaders
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalUniforms {
    /// Projection matrix
    pub projection: Mat4,
    /// View matrix
    pub view: Mat4,
    /// Ambient light colour
    pub ambient_colour: Vec4,
    /// Camera position
    pub view_position: Vec3,
    /// Debug render mode
    pub mode: u32,
}

impl Default for GlobalUniforms {
    fn default() -> Self {
        Self {
            projection: Mat4::identity(),
            view: Mat4::identity(),
            ambient_colour: Vec4::new(0.25, 0.25, 0.25, 1.0),
            view_position: Vec3::zeros(),
            mode: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WorldLocations {
    projection: Option<UniformIndex>,
    view: Option<UniformIndex>,
    ambient_colour: Option<UniformIndex>,
    view_position: Option<UniformIndex>,
    mode: Option<UniformIndex>,
    diffuse_colour: Option<UniformIndex>,
    diffuse_texture: Option<UniformIndex>,
    specular_texture: Option<UniformIndex>,
    normal_texture: Option<UniformIndex>,
    shininess: Option<UniformIndex>,
    model: Option<UniformIndex>,
}

#[derive(Debug, Clone, Copy, Default)]
struct UiLocations {
    projection: Option<UniformIndex>,
    view: Option<UniformIndex>,
    diffuse_colour: Option<UniformIndex>,
    diffuse_texture: Option<UniformIndex>,
    model: Option<UniformIndex>,
}

/// Which known uniform table a shader uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownShader {
    World,
    Ui,
}

fn set(
    shaders: &mut ShaderSystem,
    device: &mut dyn RenderDevice,
    index: Option<UniformIndex>,
    name: &str,
    value: UniformValue<'_>,
) -> RenderResult<()> {
    let index = index.ok_or_else(|| RenderError::not_found("uniform", name))?;
    shaders.set_uniform(device, index, value)
}

/// Material cache with an always-resident default
#[derive(Debug)]
pub struct MaterialSystem {
    materials_dir: PathBuf,
    cache: ResourceCache<MaterialId, Material>,
    default_material: MaterialId,
    world_shader: Option<ShaderId>,
    world: WorldLocations,
    ui_shader: Option<ShaderId>,
    ui: UiLocations,
}

impl MaterialSystem {
    /// Create the cache and the default material
    ///
    /// The builtin world shader must already exist.
    pub fn new(
        device: &mut dyn RenderDevice,
        config: &ResourceConfig,
        shaders: &mut ShaderSystem,
        textures: &mut TextureSystem,
    ) -> RenderResult<Self> {
        let mut system = Self {
            materials_dir: config.root_path.join("materials"),
            cache: ResourceCache::new("material", config.max_material_count),
            default_material: MaterialId::default(),
            world_shader: None,
            world: WorldLocations::default(),
            ui_shader: None,
            ui: UiLocations::default(),
        };
        system.bind_builtin_shaders(shaders);

        let Some(shader) = system.world_shader else {
            log::error!("Default material requires shader '{}'", BUILTIN_WORLD_SHADER);
            return Err(RenderError::not_found("shader", BUILTIN_WORLD_SHADER));
        };
        let default = MaterialConfig {
            name: DEFAULT_MATERIAL.to_string(),
            shininess: DEFAULT_MATERIAL_SHININESS,
            ..MaterialConfig::default()
        };
        let material = Self::load(device, shaders, textures, shader, &default)?;
        system.default_material = system.cache.register_default(DEFAULT_MATERIAL, material)?;
        log::info!("Material system initialized with {} slots", config.max_material_count);
        Ok(system)
    }

    /// Refresh the cached uniform indices of the builtin world and UI shaders
    ///
    /// Call again whenever either shader is recreated.
    pub fn bind_builtin_shaders(&mut self, shaders: &ShaderSystem) {
        self.world_shader = shaders.get_id(BUILTIN_WORLD_SHADER);
        self.world = match self.world_shader {
            Some(id) => WorldLocations {
                projection: shaders.uniform_index(id, "projection"),
                view: shaders.uniform_index(id, "view"),
                ambient_colour: shaders.uniform_index(id, "ambient_colour"),
                view_position: shaders.uniform_index(id, "view_position"),
                mode: shaders.uniform_index(id, "mode"),
                diffuse_colour: shaders.uniform_index(id, "diffuse_colour"),
                diffuse_texture: shaders.uniform_index(id, "diffuse_texture"),
                specular_texture: shaders.uniform_index(id, "specular_texture"),
                normal_texture: shaders.uniform_index(id, "normal_texture"),
                shininess: shaders.uniform_index(id, "shininess"),
                model: shaders.uniform_index(id, "model"),
            },
            None => WorldLocations::default(),
        };

        self.ui_shader = shaders.get_id(BUILTIN_UI_SHADER);
        self.ui = match self.ui_shader {
            Some(id) => UiLocations {
                projection: shaders.uniform_index(id, "projection"),
                view: shaders.uniform_index(id, "view"),
                diffuse_colour: shaders.uniform_index(id, "diffuse_colour"),
                diffuse_texture: shaders.uniform_index(id, "diffuse_texture"),
                model: shaders.uniform_index(id, "model"),
            },
            None => UiLocations::default(),
        };
    }

    fn ensure_current(shaders: &ShaderSystem, shader: ShaderId) -> RenderResult<()> {
        if shaders.current() == Some(shader) {
            Ok(())
        } else {
            Err(RenderError::InvalidState(format!("shader {} is not in use", shader.0)))
        }
    }

    fn known(&self, shader: ShaderId) -> RenderResult<KnownShader> {
        if Some(shader) == self.world_shader {
            Ok(KnownShader::World)
        } else if Some(shader) == self.ui_shader {
            Ok(KnownShader::Ui)
        } else {
            log::error!("Shader {} has no known material uniform table", shader.0);
            Err(RenderError::InvalidState(format!("shader {} is not a material shader", shader.0)))
        }
    }

    fn acquire_map(
        device: &mut dyn RenderDevice,
        textures: &mut TextureSystem,
        material: &str,
        texture: Option<&str>,
        usage: TextureUse,
        acquired: &mut Vec<String>,
    ) -> RenderResult<TextureMap> {
        let id = match texture {
            Some(name) if !name.is_empty() => match textures.acquire(device, name, true) {
                Ok(id) => {
                    acquired.push(name.to_string());
                    id
                }
                Err(e) => {
                    log::warn!("Unable to load texture '{}' for material '{}', using default: {}", name, material, e);
                    textures.default_for(usage)
                }
            },
            _ => textures.default_for(usage),
        };
        textures.acquire_map(device, id, usage, SamplerDesc::default())
    }

    fn load(
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        textures: &mut TextureSystem,
        shader: ShaderId,
        config: &MaterialConfig,
    ) -> RenderResult<Material> {
        let mut texture_names = Vec::new();
        let mut maps = Vec::with_capacity(3);
        let requested = [
            (config.diffuse_map_name.as_deref(), TextureUse::Diffuse),
            (config.specular_map_name.as_deref(), TextureUse::Specular),
            (config.normal_map_name.as_deref(), TextureUse::Normal),
        ];
        for (texture, usage) in requested {
            match Self::acquire_map(device, textures, &config.name, texture, usage, &mut texture_names) {
                Ok(map) => maps.push(map),
                Err(e) => {
                    Self::release_textures(device, textures, &maps, &texture_names);
                    return Err(e);
                }
            }
        }

        let bindings: Vec<_> = maps.iter().map(|map| Some(textures.binding(map))).collect();
        let instance = match shaders.acquire_instance_resources(device, shader, &bindings) {
            Ok(instance) => instance,
            Err(e) => {
                log::error!("Failed to acquire instance resources for material '{}': {}", config.name, e);
                Self::release_textures(device, textures, &maps, &texture_names);
                return Err(e);
            }
        };

        let diffuse_colour = Vec4::from(config.diffuse_colour);
        let has_transparency = diffuse_colour.w < 1.0
            || textures.get(maps[0].texture).is_some_and(|texture| texture.has_transparency());

        Ok(Material {
            name: config.name.clone(),
            shader,
            instance,
            diffuse_colour,
            shininess: config.shininess,
            diffuse_map: maps[0],
            specular_map: maps[1],
            normal_map: maps[2],
            has_transparency,
            render_frame_number: None,
            texture_names,
        })
    }

    fn release_textures(
        device: &mut dyn RenderDevice,
        textures: &mut TextureSystem,
        maps: &[TextureMap],
        names: &[String],
    ) {
        for map in maps {
            textures.release_map(device, map);
        }
        for name in names {
            textures.release(device, name);
        }
    }

    fn unload(device: &mut dyn RenderDevice, shaders: &mut ShaderSystem, textures: &mut TextureSystem, material: Material) {
        if let Err(e) = shaders.release_instance_resources(device, material.shader, material.instance) {
            log::warn!("Failed to release instance resources of material '{}': {}", material.name, e);
        }
        let maps = [material.diffuse_map, material.specular_map, material.normal_map];
        Self::release_textures(device, textures, &maps, &material.texture_names);
        log::debug!("Unloaded material '{}'", material.name);
    }

    /// Acquire a material by name, loading its definition file on first use
    pub fn acquire(
        &mut self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        textures: &mut TextureSystem,
        name: &str,
    ) -> RenderResult<MaterialId> {
        if self.cache.handle(name).is_some() {
            return self.acquire_from_config(device, shaders, textures, &MaterialConfig::new(name));
        }
        let path = find_named_config(&self.materials_dir, name).ok_or_else(|| {
            log::error!("No material definition for '{}' in {}", name, self.materials_dir.display());
            RenderError::not_found("material", name)
        })?;
        let mut config = MaterialConfig::load_from_file(&path)?;
        if config.name.is_empty() {
            config.name = name.to_string();
        }
        self.acquire_from_config(device, shaders, textures, &config)
    }

    /// Acquire a material from an in-memory definition
    pub fn acquire_from_config(
        &mut self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        textures: &mut TextureSystem,
        config: &MaterialConfig,
    ) -> RenderResult<MaterialId> {
        let shader = shaders.get_id(&config.shader_name);
        let known = shader.map(|shader| self.known(shader));
        self.cache.acquire(&config.name, config.auto_release, || {
            let shader = shader.ok_or_else(|| RenderError::not_found("shader", config.shader_name.clone()))?;
            if let Some(Err(e)) = known {
                return Err(e);
            }
            Self::load(device, shaders, textures, shader, config)
        })
    }

    /// Drop a reference; the material unloads once unreferenced if auto-released
    pub fn release(
        &mut self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        textures: &mut TextureSystem,
        name: &str,
    ) {
        if let Release::Evicted(material) = self.cache.release(name) {
            Self::unload(device, shaders, textures, material);
        }
    }

    /// Write and bind the global uniforms of a material shader
    ///
    /// Runs at most once per shader per `frame_number`. The shader must be in use.
    pub fn apply_global(
        &self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        shader: ShaderId,
        frame_number: u64,
        globals: &GlobalUniforms,
    ) -> RenderResult<()> {
        let current = shaders
            .get(shader)
            .ok_or_else(|| RenderError::not_found("shader", shader.0.to_string()))?;
        if current.render_frame_number() == Some(frame_number) {
            return Ok(());
        }
        Self::ensure_current(shaders, shader)?;

        shaders.bind_global()?;
        match self.known(shader)? {
            KnownShader::World => {
                let l = self.world;
                set(shaders, device, l.projection, "projection", UniformValue::matrix(&globals.projection))?;
                set(shaders, device, l.view, "view", UniformValue::matrix(&globals.view))?;
                set(shaders, device, l.ambient_colour, "ambient_colour", UniformValue::vec4(&globals.ambient_colour))?;
                set(shaders, device, l.view_position, "view_position", UniformValue::vec3(&globals.view_position))?;
                set(shaders, device, l.mode, "mode", UniformValue::pod(&globals.mode))?;
            }
            KnownShader::Ui => {
                let l = self.ui;
                set(shaders, device, l.projection, "projection", UniformValue::matrix(&globals.projection))?;
                set(shaders, device, l.view, "view", UniformValue::matrix(&globals.view))?;
            }
        }
        shaders.apply_global(device, true)?;
        shaders.set_render_frame_number(shader, frame_number)
    }

    /// Bind a material's instance slot, writing its uniforms when `need_update`
    pub fn apply_instance(
        &self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        textures: &TextureSystem,
        id: MaterialId,
        need_update: bool,
    ) -> RenderResult<()> {
        let material = self.get(id).ok_or_else(|| RenderError::not_found("material", format!("{id:?}")))?;
        Self::ensure_current(shaders, material.shader)?;
        shaders.bind_instance(material.instance)?;
        if need_update {
            match self.known(material.shader)? {
                KnownShader::World => {
                    let l = self.world;
                    set(shaders, device, l.diffuse_colour, "diffuse_colour", UniformValue::vec4(&material.diffuse_colour))?;
                    for (index, name, map) in [
                        (l.diffuse_texture, "diffuse_texture", &material.diffuse_map),
                        (l.specular_texture, "specular_texture", &material.specular_map),
                        (l.normal_texture, "normal_texture", &material.normal_map),
                    ] {
                        set(shaders, device, index, name, UniformValue::Texture(textures.binding(map)))?;
                    }
                    set(shaders, device, l.shininess, "shininess", UniformValue::pod(&material.shininess))?;
                }
                KnownShader::Ui => {
                    let l = self.ui;
                    set(shaders, device, l.diffuse_colour, "diffuse_colour", UniformValue::vec4(&material.diffuse_colour))?;
                    let diffuse = UniformValue::Texture(textures.binding(&material.diffuse_map));
                    set(shaders, device, l.diffuse_texture, "diffuse_texture", diffuse)?;
                }
            }
        }
        shaders.apply_instance(device, need_update)
    }

    /// Set the model matrix for one draw
    pub fn apply_local(
        &self,
        device: &mut dyn RenderDevice,
        shaders: &mut ShaderSystem,
        id: MaterialId,
        model: &Mat4,
    ) -> RenderResult<()> {
        let material = self.get(id).ok_or_else(|| RenderError::not_found("material", format!("{id:?}")))?;
        let index = match self.known(material.shader)? {
            KnownShader::World => self.world.model,
            KnownShader::Ui => self.ui.model,
        };
        set(shaders, device, index, "model", UniformValue::matrix(model))
    }

    /// Record that a material's instance uniforms were written on `frame_number`
    pub fn mark_applied(&mut self, id: MaterialId, frame_number: u64) {
        if let Some(material) = self.cache.get_mut(id) {
            material.render_frame_number = Some(frame_number);
        }
    }

    /// A resident material
    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.cache.get(id)
    }

    /// Handle of a resident material by name
    pub fn id(&self, name: &str) -> Option<MaterialId> {
        self.cache.handle(name)
    }

    /// The default material
    pub fn default_material(&self) -> MaterialId {
        self.default_material
    }

    /// Reference count of a cached material
    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.cache.reference_count(name)
    }

    /// Unload every material, the default included
    pub fn shutdown(&mut self, device: &mut dyn RenderDevice, shaders: &mut ShaderSystem, textures: &mut TextureSystem) {
        for material in self.cache.drain() {
            Self::unload(device, shaders, textures, material);
        }
        log::debug!("Material system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};
    use crate::render::shaders::ShaderConfig;
    use crate::core::config::ShaderSystemConfig;
    use std::path::Path;

    struct Fixture {
        root: tempfile::TempDir,
        device: HeadlessDevice,
        shaders: ShaderSystem,
        textures: TextureSystem,
        materials: MaterialSystem,
    }

    fn fixture(capacity: usize) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut device = HeadlessDevice::new(64, 64);
        let pass = device
            .create_renderpass(&RenderPassDesc {
                name: "world".to_string(),
                clear_color: [0.0; 4],
                clear_flags: ClearFlags::empty(),
                depth_attachment: false,
                has_prev_pass: false,
                has_next_pass: false,
                present_after: true,
            })
            .unwrap();
        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default(), Path::new("."), 2).unwrap();
        for name in [BUILTIN_WORLD_SHADER, BUILTIN_UI_SHADER] {
            shaders.create(&mut device, pass, &ShaderConfig::builtin(name).unwrap()).unwrap();
        }
        let config = ResourceConfig {
            max_material_count: capacity,
            ..ResourceConfig::default()
        }
        .with_root(root.path());
        let mut textures = TextureSystem::new(&mut device, &config).unwrap();
        let materials = MaterialSystem::new(&mut device, &config, &mut shaders, &mut textures).unwrap();
        Fixture { root, device, shaders, textures, materials }
    }

    #[test]
    fn test_default_material() {
        let f = fixture(4);
        let material = f.materials.get(f.materials.default_material()).unwrap();
        assert_eq!(material.diffuse_colour, Vec4::new(1.0, 1.0, 1.0, 1.0));
        assert_eq!(material.shininess, 8.0);
        assert_eq!(material.diffuse_map.texture, f.textures.default_diffuse());
        assert_eq!(material.normal_map.texture, f.textures.default_normal());
        let world = f.shaders.get_id(BUILTIN_WORLD_SHADER).unwrap();
        assert_eq!(f.shaders.get(world).unwrap().live_instance_count(), 1);
    }

    #[test]
    fn test_requires_world_shader() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default(), Path::new("."), 2).unwrap();
        let config = ResourceConfig::default();
        let mut textures = TextureSystem::new(&mut device, &config).unwrap();
        let result = MaterialSystem::new(&mut device, &config, &mut shaders, &mut textures);
        assert!(matches!(result, Err(RenderError::NotFound { kind: "shader", .. })));
    }

    #[test]
    fn test_acquire_from_file_and_release() {
        let mut f = fixture(4);
        let dir = f.root.path().join("materials");
        std::fs::create_dir_all(&dir).unwrap();
        MaterialConfig {
            diffuse_colour: [0.5, 0.5, 0.5, 1.0],
            ..MaterialConfig::new("stone")
        }
        .save_to_file(dir.join("stone.toml"))
        .unwrap();

        let id = f.materials.acquire(&mut f.device, &mut f.shaders, &mut f.textures, "stone").unwrap();
        let again = f.materials.acquire(&mut f.device, &mut f.shaders, &mut f.textures, "stone").unwrap();
        assert_eq!(id, again);
        assert_eq!(f.materials.reference_count("stone"), Some(2));
        assert_eq!(f.materials.get(id).unwrap().diffuse_colour.x, 0.5);

        let world = f.shaders.get_id(BUILTIN_WORLD_SHADER).unwrap();
        assert_eq!(f.shaders.get(world).unwrap().live_instance_count(), 2);
        f.materials.release(&mut f.device, &mut f.shaders, &mut f.textures, "stone");
        f.materials.release(&mut f.device, &mut f.shaders, &mut f.textures, "stone");
        assert!(f.materials.get(id).is_none());
        assert_eq!(f.shaders.get(world).unwrap().live_instance_count(), 1);
    }

    #[test]
    fn test_missing_texture_uses_default() {
        let mut f = fixture(4);
        let config = MaterialConfig::new("rusty").with_diffuse_map("does_not_exist");
        let id = f.materials.acquire_from_config(&mut f.device, &mut f.shaders, &mut f.textures, &config).unwrap();
        assert_eq!(f.materials.get(id).unwrap().diffuse_map.texture, f.textures.default_diffuse());
    }

    #[test]
    fn test_material_textures_released_with_material() {
        let mut f = fixture(4);
        let dir = f.root.path().join("textures");
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 128])).save(dir.join("glass.png")).unwrap();

        let config = MaterialConfig::new("window").with_diffuse_map("glass");
        let id = f.materials.acquire_from_config(&mut f.device, &mut f.shaders, &mut f.textures, &config).unwrap();
        assert!(f.materials.get(id).unwrap().has_transparency);
        assert_eq!(f.textures.reference_count("glass"), Some(1));

        f.materials.release(&mut f.device, &mut f.shaders, &mut f.textures, "window");
        assert!(f.textures.id("glass").is_none());
    }

    #[test]
    fn test_unknown_shader_fails_cleanly() {
        let mut f = fixture(4);
        let config = MaterialConfig::new("odd").with_shader("Shader.Missing");
        let result = f.materials.acquire_from_config(&mut f.device, &mut f.shaders, &mut f.textures, &config);
        assert!(result.is_err());
        assert!(f.materials.id("odd").is_none());
    }

    #[test]
    fn test_cache_full() {
        let mut f = fixture(2);
        f.materials
            .acquire_from_config(&mut f.device, &mut f.shaders, &mut f.textures, &MaterialConfig::new("a"))
            .unwrap();
        let result = f.materials.acquire_from_config(&mut f.device, &mut f.shaders, &mut f.textures, &MaterialConfig::new("b"));
        assert!(matches!(result, Err(RenderError::ResourceExhausted { kind: "material", capacity: 2 })));
    }

    #[test]
    fn test_apply_global_once_per_frame() {
        let mut f = fixture(4);
        let world = f.shaders.get_id(BUILTIN_WORLD_SHADER).unwrap();
        let globals = GlobalUniforms::default();
        f.shaders.use_shader(&mut f.device, world).unwrap();
        f.device.clear_calls();

        for _ in 0..3 {
            f.materials.apply_global(&mut f.device, &mut f.shaders, world, 7, &globals).unwrap();
        }
        assert_eq!(f.device.count_calls(|c| matches!(c, DeviceCall::BindDescriptorSet { .. })), 1);

        f.materials.apply_global(&mut f.device, &mut f.shaders, world, 8, &globals).unwrap();
        assert_eq!(f.device.count_calls(|c| matches!(c, DeviceCall::BindDescriptorSet { .. })), 2);
    }

    #[test]
    fn test_apply_instance_and_local() {
        let mut f = fixture(4);
        let world = f.shaders.get_id(BUILTIN_WORLD_SHADER).unwrap();
        let id = f.materials.default_material();
        f.shaders.use_shader(&mut f.device, world).unwrap();
        f.device.clear_calls();

        f.materials.apply_instance(&mut f.device, &mut f.shaders, &f.textures, id, true).unwrap();
        f.materials.mark_applied(id, 3);
        assert!(!f.materials.get(id).unwrap().needs_update(3));
        f.materials.apply_local(&mut f.device, &mut f.shaders, id, &Mat4::identity()).unwrap();

        assert_eq!(f.device.count_calls(|c| matches!(c, DeviceCall::WriteDescriptorSet { .. })), 1);
        assert_eq!(f.device.count_calls(|c| matches!(c, DeviceCall::PushConstants { offset: 0, size: 64 })), 1);
    }

    #[test]
    fn test_release_default_is_ignored() {
        let mut f = fixture(4);
        f.materials.release(&mut f.device, &mut f.shaders, &mut f.textures, DEFAULT_MATERIAL);
        assert!(f.materials.get(f.materials.default_material()).is_some());
    }
}
