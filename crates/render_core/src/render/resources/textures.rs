//! Texture system
//!
//! Name-keyed texture cache over [`ResourceCache`]. Images are read from
//! `<root>/textures/<name>.png`; cube maps from six face images named with the
//! [`CUBE_FACE_SUFFIXES`]. Three procedural defaults are always resident and
//! stand in for any map a material leaves unset.

use std::path::{Path, PathBuf};

use super::cache::{Release, ResourceCache};
use crate::assets::image_loader::{image_path, ImageData};
use crate::core::config::ResourceConfig;
use crate::render::api::*;

slotmap::new_key_type! {
    /// Handle to a cached texture
    pub struct TextureId;
}

/// Name of the default diffuse texture (blue and white checkerboard)
pub const DEFAULT_DIFFUSE_TEXTURE: &str = "default_diffuse";
/// Name of the default specular texture (black, no specular)
pub const DEFAULT_SPECULAR_TEXTURE: &str = "default_specular";
/// Name of the default normal texture (flat, +Z)
pub const DEFAULT_NORMAL_TEXTURE: &str = "default_normal";

/// Face suffixes of a cube map, in +X, -X, +Y, -Y, +Z, -Z order
pub const CUBE_FACE_SUFFIXES: [&str; 6] = ["_r", "_l", "_u", "_d", "_f", "_b"];

const DEFAULT_DIFFUSE_DIMENSION: u32 = 256;
const DEFAULT_MAP_DIMENSION: u32 = 16;

/// A resident texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    /// Cache name
    pub name: String,
    /// Dimensions and flags
    pub desc: TextureDesc,
    /// Device texture
    pub handle: TextureHandle,
    /// Bumped whenever the device texture changes shape
    pub generation: u32,
}

impl Texture {
    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Whether any pixel is translucent
    pub fn has_transparency(&self) -> bool {
        self.desc.has_transparency
    }

    /// Whether the texture can be rendered into and resized
    pub fn is_writeable(&self) -> bool {
        self.desc.writeable
    }
}

/// A texture bound to a sampler for one material slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMap {
    /// Sampled texture
    pub texture: TextureId,
    /// Slot the map fills
    pub usage: TextureUse,
    /// Device sampler
    pub sampler: SamplerHandle,
    /// Sampler parameters
    pub desc: SamplerDesc,
}

/// Texture cache with always-resident defaults
#[derive(Debug)]
pub struct TextureSystem {
    textures_dir: PathBuf,
    cache: ResourceCache<TextureId, Texture>,
    default_diffuse: TextureId,
    default_specular: TextureId,
    default_normal: TextureId,
    default_binding: TextureBinding,
}

fn create_from_image(
    device: &mut dyn RenderDevice,
    name: &str,
    image: &ImageData,
    kind: TextureKind,
) -> RenderResult<Texture> {
    let desc = TextureDesc {
        width: image.width,
        height: image.height,
        channel_count: image.channels,
        kind,
        format: TextureFormat::Rgba8,
        has_transparency: image.has_transparency(),
        writeable: false,
    };
    let handle = device.create_texture(&desc, &image.data)?;
    Ok(Texture {
        name: name.to_string(),
        desc,
        handle,
        generation: 0,
    })
}

fn load_2d(device: &mut dyn RenderDevice, dir: &Path, name: &str) -> RenderResult<Texture> {
    let image = ImageData::from_file(image_path(dir, name), true)?;
    let texture = create_from_image(device, name, &image, TextureKind::Texture2D)?;
    log::info!("Loaded texture '{}' ({}x{})", name, image.width, image.height);
    Ok(texture)
}

fn load_cube(device: &mut dyn RenderDevice, dir: &Path, name: &str) -> RenderResult<Texture> {
    let mut faces: Option<ImageData> = None;
    for suffix in CUBE_FACE_SUFFIXES {
        let face = ImageData::from_file(image_path(dir, &format!("{name}{suffix}")), false)?;
        match faces.as_mut() {
            None => faces = Some(face),
            Some(combined) => {
                if face.width != combined.width || face.height != combined.height || face.channels != combined.channels {
                    log::error!("Cube map '{}': every face must share one resolution and depth", name);
                    return Err(RenderError::ResourceCreationFailed(format!(
                        "cube map '{name}' face '{suffix}' is {}x{}, expected {}x{}",
                        face.width, face.height, combined.width, combined.height
                    )));
                }
                combined.data.extend_from_slice(&face.data);
            }
        }
    }
    let image = faces.ok_or_else(|| RenderError::ResourceCreationFailed(format!("cube map '{name}' has no faces")))?;
    let texture = create_from_image(device, name, &image, TextureKind::Cube)?;
    log::info!("Loaded cube map '{}' ({}x{} per face)", name, image.width, image.height);
    Ok(texture)
}

impl TextureSystem {
    /// Create the cache and upload the default textures
    pub fn new(device: &mut dyn RenderDevice, config: &ResourceConfig) -> RenderResult<Self> {
        let mut cache = ResourceCache::new("texture", config.max_texture_count);

        let defaults = [
            (DEFAULT_DIFFUSE_TEXTURE, ImageData::checkerboard(DEFAULT_DIFFUSE_DIMENSION)),
            (DEFAULT_SPECULAR_TEXTURE, ImageData::solid_color(DEFAULT_MAP_DIMENSION, DEFAULT_MAP_DIMENSION, [0, 0, 0, 255])),
            (
                DEFAULT_NORMAL_TEXTURE,
                ImageData::solid_color(DEFAULT_MAP_DIMENSION, DEFAULT_MAP_DIMENSION, [128, 128, 255, 255]),
            ),
        ];
        let mut ids = Vec::with_capacity(defaults.len());
        for (name, image) in &defaults {
            let texture = create_from_image(device, name, image, TextureKind::Texture2D)?;
            ids.push(cache.register_default(*name, texture)?);
        }
        let default_texture = cache
            .get(ids[0])
            .map(|texture: &Texture| texture.handle)
            .ok_or_else(|| RenderError::InitializationFailed("default texture missing".to_string()))?;
        let default_binding = TextureBinding {
            texture: default_texture,
            sampler: device.create_sampler(&SamplerDesc::default())?,
        };
        log::info!("Texture system initialized with {} slots", config.max_texture_count);

        Ok(Self {
            textures_dir: config.root_path.join("textures"),
            cache,
            default_diffuse: ids[0],
            default_specular: ids[1],
            default_normal: ids[2],
            default_binding,
        })
    }

    /// Acquire a 2D texture, loading `<root>/textures/<name>.png` on first use
    pub fn acquire(&mut self, device: &mut dyn RenderDevice, name: &str, auto_release: bool) -> RenderResult<TextureId> {
        if self.cache.is_default(name) {
            log::warn!("Texture '{}' is a default; prefer the default accessors", name);
        }
        let dir = &self.textures_dir;
        self.cache.acquire(name, auto_release, || load_2d(device, dir, name))
    }

    /// Acquire a cube map built from the six images `<name>_r` .. `<name>_b`
    pub fn acquire_cube(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        auto_release: bool,
    ) -> RenderResult<TextureId> {
        let dir = &self.textures_dir;
        self.cache.acquire(name, auto_release, || load_cube(device, dir, name))
    }

    /// Acquire a writeable texture usable as a render attachment
    ///
    /// Writeable textures are never auto-released; remove them with
    /// [`TextureSystem::destroy`].
    pub fn acquire_writeable(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        width: u32,
        height: u32,
        channel_count: u8,
        has_transparency: bool,
    ) -> RenderResult<TextureId> {
        self.cache.acquire(name, false, || {
            let desc = TextureDesc {
                width,
                height,
                channel_count,
                kind: TextureKind::Texture2D,
                format: TextureFormat::Rgba8,
                has_transparency,
                writeable: true,
            };
            let handle = device.create_writeable_texture(&desc)?;
            log::debug!("Created writeable texture '{}' ({}x{})", name, width, height);
            Ok(Texture {
                name: name.to_string(),
                desc,
                handle,
                generation: 0,
            })
        })
    }

    /// Drop a reference; the texture is destroyed once unreferenced if auto-released
    pub fn release(&mut self, device: &mut dyn RenderDevice, name: &str) {
        if let Release::Evicted(texture) = self.cache.release(name) {
            device.destroy_texture(texture.handle);
        }
    }

    /// Destroy a texture regardless of references
    pub fn destroy(&mut self, device: &mut dyn RenderDevice, name: &str) {
        if let Some(texture) = self.cache.remove(name) {
            device.destroy_texture(texture.handle);
            log::debug!("Destroyed texture '{}'", name);
        }
    }

    fn texture_mut(&mut self, id: TextureId) -> RenderResult<&mut Texture> {
        self.cache
            .get_mut(id)
            .ok_or_else(|| RenderError::not_found("texture", format!("{id:?}")))
    }

    /// Resize a writeable texture
    ///
    /// With `regenerate`, the device storage is recreated at the new size.
    pub fn resize(
        &mut self,
        device: &mut dyn RenderDevice,
        id: TextureId,
        width: u32,
        height: u32,
        regenerate: bool,
    ) -> RenderResult<()> {
        let texture = self.texture_mut(id)?;
        if !texture.is_writeable() {
            log::warn!("Texture '{}' is not writeable and cannot be resized", texture.name);
            return Err(RenderError::InvalidState(format!("texture '{}' is not writeable", texture.name)));
        }
        if regenerate {
            device.resize_texture(texture.handle, width, height)?;
        }
        texture.desc.width = width;
        texture.desc.height = height;
        texture.generation = texture.generation.wrapping_add(1);
        Ok(())
    }

    /// Upload bytes into a texture at a byte offset
    pub fn write_data(&mut self, device: &mut dyn RenderDevice, id: TextureId, offset: u32, data: &[u8]) -> RenderResult<()> {
        let handle = self.texture_mut(id)?.handle;
        device.write_texture(handle, offset, data)
    }

    /// Read one RGBA pixel back from the device
    pub fn read_pixel(&mut self, device: &mut dyn RenderDevice, id: TextureId, x: u32, y: u32) -> RenderResult<[u8; 4]> {
        let handle = self.texture_mut(id)?.handle;
        device.read_texture_pixel(handle, x, y)
    }

    /// Create a sampler for a texture
    pub fn acquire_map(
        &self,
        device: &mut dyn RenderDevice,
        texture: TextureId,
        usage: TextureUse,
        desc: SamplerDesc,
    ) -> RenderResult<TextureMap> {
        let sampler = device.create_sampler(&desc)?;
        Ok(TextureMap {
            texture,
            usage,
            sampler,
            desc,
        })
    }

    /// Destroy a map's sampler
    pub fn release_map(&self, device: &mut dyn RenderDevice, map: &TextureMap) {
        device.destroy_sampler(map.sampler);
    }

    /// Texture and sampler for a map; a stale texture resolves to the default of its use
    pub fn binding(&self, map: &TextureMap) -> TextureBinding {
        let texture = self
            .cache
            .get(map.texture)
            .or_else(|| self.cache.get(self.default_for(map.usage)))
            .map(|texture| texture.handle);
        match texture {
            Some(texture) => TextureBinding { texture, sampler: map.sampler },
            None => TextureBinding { sampler: map.sampler, ..self.default_binding() },
        }
    }

    /// Default texture for a material slot
    pub fn default_for(&self, usage: TextureUse) -> TextureId {
        match usage {
            TextureUse::Specular => self.default_specular,
            TextureUse::Normal => self.default_normal,
            TextureUse::Unknown | TextureUse::Diffuse | TextureUse::Cubemap => self.default_diffuse,
        }
    }

    /// Default diffuse texture with the default sampler
    pub fn default_binding(&self) -> TextureBinding {
        self.default_binding
    }

    /// Default diffuse texture
    pub fn default_diffuse(&self) -> TextureId {
        self.default_diffuse
    }

    /// Default specular texture
    pub fn default_specular(&self) -> TextureId {
        self.default_specular
    }

    /// Default normal texture
    pub fn default_normal(&self) -> TextureId {
        self.default_normal
    }

    /// A resident texture
    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.cache.get(id)
    }

    /// Handle of a resident texture by name
    pub fn id(&self, name: &str) -> Option<TextureId> {
        self.cache.handle(name)
    }

    /// Reference count of a cached texture
    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.cache.reference_count(name)
    }

    /// Number of resident textures, defaults included
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no texture is resident
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Destroy every texture and the default sampler
    pub fn shutdown(&mut self, device: &mut dyn RenderDevice) {
        for texture in self.cache.drain() {
            device.destroy_texture(texture.handle);
        }
        device.destroy_sampler(self.default_binding.sampler);
        log::debug!("Texture system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32, rgba: [u8; 4]) {
        std::fs::create_dir_all(dir).unwrap();
        image::RgbaImage::from_pixel(width, height, image::Rgba(rgba))
            .save(image_path(dir, name))
            .unwrap();
    }

    fn setup(capacity: usize) -> (tempfile::TempDir, HeadlessDevice, TextureSystem) {
        let root = tempfile::tempdir().unwrap();
        let mut device = HeadlessDevice::new(64, 64);
        let config = ResourceConfig {
            max_texture_count: capacity,
            ..ResourceConfig::default()
        }
        .with_root(root.path());
        let system = TextureSystem::new(&mut device, &config).unwrap();
        (root, device, system)
    }

    #[test]
    fn test_defaults_resident() {
        let (_root, device, system) = setup(8);
        assert_eq!(system.len(), 3);
        // Three defaults on top of the swapchain images and depth attachment.
        assert_eq!(device.live_texture_count(), 7);

        let diffuse = system.get(system.default_diffuse()).unwrap();
        assert_eq!((diffuse.width(), diffuse.height()), (256, 256));
        let normal = system.get(system.default_normal()).unwrap();
        assert_eq!(&device.texture_data(normal.handle).unwrap()[0..4], &[128, 128, 255, 255]);
        assert!(!system.get(system.default_specular()).unwrap().has_transparency());
    }

    #[test]
    fn test_acquire_release_cycle() {
        let (root, mut device, mut system) = setup(8);
        write_png(&root.path().join("textures"), "brick", 4, 2, [10, 20, 30, 255]);

        let id = system.acquire(&mut device, "brick", true).unwrap();
        assert_eq!(system.acquire(&mut device, "brick", true).unwrap(), id);
        assert_eq!(system.reference_count("brick"), Some(2));
        let handle = system.get(id).unwrap().handle;

        system.release(&mut device, "brick");
        assert!(system.get(id).is_some());
        device.clear_calls();
        system.release(&mut device, "brick");
        assert_eq!(device.calls(), &[DeviceCall::DestroyTexture(handle)]);
        assert!(system.get(id).is_none());
    }

    #[test]
    fn test_transparency_detected() {
        let (root, mut device, mut system) = setup(8);
        write_png(&root.path().join("textures"), "glass", 2, 2, [200, 200, 255, 100]);
        let id = system.acquire(&mut device, "glass", true).unwrap();
        assert!(system.get(id).unwrap().has_transparency());
    }

    #[test]
    fn test_missing_texture_rolls_back() {
        let (_root, mut device, mut system) = setup(8);
        assert!(system.acquire(&mut device, "missing", true).is_err());
        assert!(system.id("missing").is_none());
        assert_eq!(system.len(), 3);
    }

    #[test]
    fn test_full_cache() {
        let (root, mut device, mut system) = setup(4);
        let dir = root.path().join("textures");
        write_png(&dir, "a", 1, 1, [255; 4]);
        write_png(&dir, "b", 1, 1, [255; 4]);
        system.acquire(&mut device, "a", true).unwrap();
        let result = system.acquire(&mut device, "b", true);
        assert!(matches!(result, Err(RenderError::ResourceExhausted { kind: "texture", capacity: 4 })));
    }

    #[test]
    fn test_cube_faces_must_match() {
        let (root, mut device, mut system) = setup(8);
        let dir = root.path().join("textures");
        for suffix in CUBE_FACE_SUFFIXES {
            write_png(&dir, &format!("sky{suffix}"), 2, 2, [0, 0, 255, 255]);
            let size = if suffix == "_b" { 4 } else { 2 };
            write_png(&dir, &format!("odd{suffix}"), size, size, [0, 0, 255, 255]);
        }

        let sky = system.acquire_cube(&mut device, "sky", true).unwrap();
        let texture = system.get(sky).unwrap();
        assert_eq!(texture.desc.kind, TextureKind::Cube);
        assert_eq!(device.texture_data(texture.handle).unwrap().len(), 2 * 2 * 4 * 6);

        assert!(system.acquire_cube(&mut device, "odd", true).is_err());
        assert!(system.id("odd").is_none());
    }

    #[test]
    fn test_writeable_resize_and_readback() {
        let (_root, mut device, mut system) = setup(8);
        let id = system.acquire_writeable(&mut device, "target", 8, 8, 4, false).unwrap();
        system.release(&mut device, "target");
        assert!(system.get(id).is_some());

        system.write_data(&mut device, id, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(system.read_pixel(&mut device, id, 0, 0).unwrap(), [1, 2, 3, 4]);

        system.resize(&mut device, id, 16, 4, true).unwrap();
        let texture = system.get(id).unwrap();
        assert_eq!((texture.width(), texture.height(), texture.generation), (16, 4, 1));
        assert_eq!(device.texture_desc(texture.handle).unwrap().width, 16);

        system.destroy(&mut device, "target");
        assert!(system.get(id).is_none());
    }

    #[test]
    fn test_resize_rejects_sampled_texture() {
        let (_root, mut device, mut system) = setup(8);
        let id = system.default_diffuse();
        assert!(matches!(system.resize(&mut device, id, 4, 4, true), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_release_default_is_ignored() {
        let (_root, mut device, mut system) = setup(8);
        device.clear_calls();
        system.release(&mut device, DEFAULT_DIFFUSE_TEXTURE);
        assert!(device.calls().is_empty());
        assert!(system.get(system.default_diffuse()).is_some());
    }

    #[test]
    fn test_stale_map_falls_back_to_default() {
        let (root, mut device, mut system) = setup(8);
        write_png(&root.path().join("textures"), "spec", 1, 1, [255; 4]);
        let id = system.acquire(&mut device, "spec", true).unwrap();
        let map = system.acquire_map(&mut device, id, TextureUse::Specular, SamplerDesc::default()).unwrap();
        system.release(&mut device, "spec");

        let binding = system.binding(&map);
        let default = system.get(system.default_specular()).unwrap().handle;
        assert_eq!(binding, TextureBinding { texture: default, sampler: map.sampler });
        system.release_map(&mut device, &map);
    }
}
