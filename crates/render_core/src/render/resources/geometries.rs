//! Geometry system
//!
//! Geometries are vertex and index ranges carved out of two shared render
//! buffers. Both buffers grow on demand when a new geometry does not fit.

use bytemuck::{Pod, Zeroable};

use super::cache::{Release, ResourceCache};
use super::materials::{MaterialId, MaterialSystem, DEFAULT_MATERIAL};
use super::textures::TextureSystem;
use crate::core::config::ResourceConfig;
use crate::foundation::math::Vec3;
use crate::render::api::*;
use crate::render::arena::RenderBuffer;
use crate::render::shaders::ShaderSystem;

slotmap::new_key_type! {
    /// Handle to a cached geometry
    pub struct GeometryId;
}

/// Name of the default 3D geometry
pub const DEFAULT_GEOMETRY: &str = "default";

/// Name of the default 2D geometry
pub const DEFAULT_GEOMETRY_2D: &str = "default_2d";

/// World-space vertex layout (64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex3D {
    /// Position
    pub position: [f32; 3],
    /// Normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub texcoord: [f32; 2],
    /// Vertex colour
    pub colour: [f32; 4],
    /// Tangent, handedness in `w`
    pub tangent: [f32; 4],
}

impl Vertex3D {
    fn at(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            texcoord,
            colour: [1.0; 4],
            tangent: [0.0; 4],
        }
    }
}

/// Screen-space vertex layout (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex2D {
    /// Position in pixels
    pub position: [f32; 2],
    /// Texture coordinate
    pub texcoord: [f32; 2],
}

/// Everything needed to upload one geometry
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    /// Cache name
    pub name: String,
    /// Bytes per vertex
    pub vertex_size: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// Raw vertex data, `vertex_size * vertex_count` bytes
    pub vertices: Vec<u8>,
    /// Bytes per index
    pub index_size: u32,
    /// Number of indices
    pub index_count: u32,
    /// Raw index data, `index_size * index_count` bytes
    pub indices: Vec<u8>,
    /// Centre of the bounding box
    pub center: Vec3,
    /// Bounding box minimum
    pub min_extents: Vec3,
    /// Bounding box maximum
    pub max_extents: Vec3,
    /// Material to draw with; empty for the default material
    pub material_name: String,
    /// Destroy once unreferenced
    pub auto_release: bool,
}

impl GeometryConfig {
    /// Build a config from typed vertices and 32-bit indices
    pub fn from_vertices<V: Pod>(
        name: impl Into<String>,
        material_name: impl Into<String>,
        vertices: &[V],
        indices: &[u32],
    ) -> Self {
        Self {
            name: name.into(),
            vertex_size: std::mem::size_of::<V>() as u32,
            vertex_count: vertices.len() as u32,
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            index_size: std::mem::size_of::<u32>() as u32,
            index_count: indices.len() as u32,
            indices: bytemuck::cast_slice(indices).to_vec(),
            center: Vec3::zeros(),
            min_extents: Vec3::zeros(),
            max_extents: Vec3::zeros(),
            material_name: material_name.into(),
            auto_release: true,
        }
    }

    /// Set the bounding box from 3D vertex positions
    pub fn with_extents_of(mut self, vertices: &[Vertex3D]) -> Self {
        let mut min = Vec3::repeat(f32::MAX);
        let mut max = Vec3::repeat(f32::MIN);
        for vertex in vertices {
            let p = Vec3::from(vertex.position);
            min = min.inf(&p);
            max = max.sup(&p);
        }
        if !vertices.is_empty() {
            self.min_extents = min;
            self.max_extents = max;
            self.center = (min + max) * 0.5;
        }
        self
    }

    fn validate(&self) -> RenderResult<()> {
        if self.vertex_count == 0 || self.vertex_size == 0 {
            return Err(RenderError::InvalidConfig(format!("geometry '{}' has no vertices", self.name)));
        }
        let vertex_bytes = u64::from(self.vertex_size) * u64::from(self.vertex_count);
        let index_bytes = u64::from(self.index_size) * u64::from(self.index_count);
        if self.vertices.len() as u64 != vertex_bytes || self.indices.len() as u64 != index_bytes {
            return Err(RenderError::InvalidConfig(format!(
                "geometry '{}' data does not match its element sizes and counts",
                self.name
            )));
        }
        Ok(())
    }
}

fn nonzero(value: f32, what: &str) -> f32 {
    if value == 0.0 {
        log::warn!("{} must be non-zero, defaulting to 1", what);
        1.0
    } else {
        value
    }
}

/// Generate a segmented plane in the XY plane, facing +Z
#[allow(clippy::too_many_arguments)]
pub fn generate_plane_config(
    width: f32,
    height: f32,
    x_segments: u32,
    y_segments: u32,
    tile_x: f32,
    tile_y: f32,
    name: &str,
    material_name: &str,
) -> GeometryConfig {
    let width = nonzero(width, "width");
    let height = nonzero(height, "height");
    let tile_x = nonzero(tile_x, "tile_x");
    let tile_y = nonzero(tile_y, "tile_y");
    let x_segments = x_segments.max(1);
    let y_segments = y_segments.max(1);

    let seg_width = width / x_segments as f32;
    let seg_height = height / y_segments as f32;
    let half_width = width * 0.5;
    let half_height = height * 0.5;
    let normal = [0.0, 0.0, 1.0];

    let mut vertices = Vec::with_capacity((x_segments * y_segments * 4) as usize);
    let mut indices = Vec::with_capacity((x_segments * y_segments * 6) as usize);
    for y in 0..y_segments {
        for x in 0..x_segments {
            let min_x = x as f32 * seg_width - half_width;
            let min_y = y as f32 * seg_height - half_height;
            let max_x = min_x + seg_width;
            let max_y = min_y + seg_height;
            let min_u = x as f32 / x_segments as f32 * tile_x;
            let min_v = y as f32 / y_segments as f32 * tile_y;
            let max_u = (x + 1) as f32 / x_segments as f32 * tile_x;
            let max_v = (y + 1) as f32 / y_segments as f32 * tile_y;

            let base = vertices.len() as u32;
            vertices.push(Vertex3D::at([min_x, min_y, 0.0], normal, [min_u, min_v]));
            vertices.push(Vertex3D::at([max_x, max_y, 0.0], normal, [max_u, max_v]));
            vertices.push(Vertex3D::at([min_x, max_y, 0.0], normal, [min_u, max_v]));
            vertices.push(Vertex3D::at([max_x, min_y, 0.0], normal, [max_u, min_v]));
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
        }
    }

    let name = if name.is_empty() { DEFAULT_GEOMETRY } else { name };
    let material_name = if material_name.is_empty() { DEFAULT_MATERIAL } else { material_name };
    GeometryConfig::from_vertices(name, material_name, &vertices, &indices).with_extents_of(&vertices)
}

/// Generate an axis-aligned box centred on the origin
pub fn generate_cube_config(
    width: f32,
    height: f32,
    depth: f32,
    tile_x: f32,
    tile_y: f32,
    name: &str,
    material_name: &str,
) -> GeometryConfig {
    let hw = nonzero(width, "width") * 0.5;
    let hh = nonzero(height, "height") * 0.5;
    let hd = nonzero(depth, "depth") * 0.5;
    let tx = nonzero(tile_x, "tile_x");
    let ty = nonzero(tile_y, "tile_y");

    // Each face: normal, then corners ordered (min uv, max uv, min-max, max-min).
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, 1.0], [[-hw, -hh, hd], [hw, hh, hd], [-hw, hh, hd], [hw, -hh, hd]]),
        ([0.0, 0.0, -1.0], [[hw, -hh, -hd], [-hw, hh, -hd], [hw, hh, -hd], [-hw, -hh, -hd]]),
        ([-1.0, 0.0, 0.0], [[-hw, -hh, -hd], [-hw, hh, hd], [-hw, hh, -hd], [-hw, -hh, hd]]),
        ([1.0, 0.0, 0.0], [[hw, -hh, hd], [hw, hh, -hd], [hw, hh, hd], [hw, -hh, -hd]]),
        ([0.0, -1.0, 0.0], [[hw, -hh, hd], [-hw, -hh, -hd], [hw, -hh, -hd], [-hw, -hh, hd]]),
        ([0.0, 1.0, 0.0], [[-hw, hh, hd], [hw, hh, -hd], [-hw, hh, -hd], [hw, hh, hd]]),
    ];
    let uvs = [[0.0, 0.0], [tx, ty], [0.0, ty], [tx, 0.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, corners) in faces {
        let base = vertices.len() as u32;
        for (corner, uv) in corners.into_iter().zip(uvs) {
            vertices.push(Vertex3D::at(corner, normal, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
    }

    let name = if name.is_empty() { DEFAULT_GEOMETRY } else { name };
    let material_name = if material_name.is_empty() { DEFAULT_MATERIAL } else { material_name };
    GeometryConfig::from_vertices(name, material_name, &vertices, &indices).with_extents_of(&vertices)
}

/// A resident geometry
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Cache name
    pub name: String,
    /// Material drawn with
    pub material: MaterialId,
    /// Number of vertices
    pub vertex_count: u32,
    /// Bytes per vertex
    pub vertex_element_size: u32,
    /// Offset into the vertex buffer
    pub vertex_offset: u64,
    /// Number of indices
    pub index_count: u32,
    /// Bytes per index
    pub index_element_size: u32,
    /// Offset into the index buffer
    pub index_offset: u64,
    /// Centre of the bounding box
    pub center: Vec3,
    /// Bounding box minimum
    pub min_extents: Vec3,
    /// Bounding box maximum
    pub max_extents: Vec3,
    /// Bumped on every reupload
    pub generation: u32,
    acquired_material: Option<String>,
}

impl Geometry {
    fn vertex_bytes(&self) -> u64 {
        u64::from(self.vertex_count) * u64::from(self.vertex_element_size)
    }

    fn index_bytes(&self) -> u64 {
        u64::from(self.index_count) * u64::from(self.index_element_size)
    }
}

/// Material collaborators a geometry load needs
pub struct MaterialContext<'a> {
    /// Shader registry
    pub shaders: &'a mut ShaderSystem,
    /// Texture cache
    pub textures: &'a mut TextureSystem,
    /// Material cache
    pub materials: &'a mut MaterialSystem,
}

/// Geometry cache backed by shared vertex and index buffers
#[derive(Debug)]
pub struct GeometrySystem {
    cache: ResourceCache<GeometryId, Geometry>,
    vertex_buffer: RenderBuffer,
    index_buffer: RenderBuffer,
    default_geometry: GeometryId,
    default_geometry_2d: GeometryId,
}

impl GeometrySystem {
    /// Create the shared buffers and the default plane and quad
    pub fn new(
        device: &mut dyn RenderDevice,
        config: &ResourceConfig,
        vertex_buffer_size: u64,
        index_buffer_size: u64,
        default_material: MaterialId,
    ) -> RenderResult<Self> {
        let vertex_buffer = RenderBuffer::create(device, "geometry vertices", BufferKind::Vertex, vertex_buffer_size, true)?;
        let index_buffer = match RenderBuffer::create(device, "geometry indices", BufferKind::Index, index_buffer_size, true) {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_buffer.destroy(device);
                return Err(e);
            }
        };

        let mut system = Self {
            cache: ResourceCache::new("geometry", config.max_geometry_count),
            vertex_buffer,
            index_buffer,
            default_geometry: GeometryId::default(),
            default_geometry_2d: GeometryId::default(),
        };
        if let Err(e) = system.create_defaults(device, default_material) {
            log::error!("Failed to create default geometries: {}", e);
            let Self { vertex_buffer, index_buffer, .. } = system;
            vertex_buffer.destroy(device);
            index_buffer.destroy(device);
            return Err(e);
        }
        log::info!("Geometry system initialized with {} slots", config.max_geometry_count);
        Ok(system)
    }

    fn create_defaults(&mut self, device: &mut dyn RenderDevice, material: MaterialId) -> RenderResult<()> {
        let plane = generate_plane_config(5.0, 5.0, 1, 1, 1.0, 1.0, DEFAULT_GEOMETRY, DEFAULT_MATERIAL);
        let geometry = self.upload(device, &plane, material, None)?;
        self.default_geometry = self.cache.register_default(DEFAULT_GEOMETRY, geometry)?;

        let half = 50.0;
        let quad = [
            Vertex2D { position: [-half, -half], texcoord: [0.0, 0.0] },
            Vertex2D { position: [half, half], texcoord: [1.0, 1.0] },
            Vertex2D { position: [-half, half], texcoord: [0.0, 1.0] },
            Vertex2D { position: [half, -half], texcoord: [1.0, 0.0] },
        ];
        let quad = GeometryConfig::from_vertices(DEFAULT_GEOMETRY_2D, DEFAULT_MATERIAL, &quad, &[2, 1, 0, 3, 0, 1]);
        let geometry = self.upload(device, &quad, material, None)?;
        self.default_geometry_2d = self.cache.register_default(DEFAULT_GEOMETRY_2D, geometry)?;
        Ok(())
    }

    fn upload(
        &mut self,
        device: &mut dyn RenderDevice,
        config: &GeometryConfig,
        material: MaterialId,
        acquired_material: Option<String>,
    ) -> RenderResult<Geometry> {
        upload_geometry(device, &mut self.vertex_buffer, &mut self.index_buffer, config, material, acquired_material)
    }

    /// Acquire a geometry by name, uploading `config` on first use
    ///
    /// The named material is acquired alongside; when it cannot be loaded the
    /// default material is used instead.
    pub fn acquire_from_config(
        &mut self,
        device: &mut dyn RenderDevice,
        materials: MaterialContext<'_>,
        config: &GeometryConfig,
    ) -> RenderResult<GeometryId> {
        let vertex_buffer = &mut self.vertex_buffer;
        let index_buffer = &mut self.index_buffer;
        self.cache.acquire(&config.name, config.auto_release, || {
            config.validate()?;
            let MaterialContext { shaders, textures, materials } = materials;
            let (material, acquired) = acquire_material(device, shaders, textures, materials, &config.material_name);
            match upload_geometry(device, vertex_buffer, index_buffer, config, material, acquired) {
                Ok(geometry) => Ok(geometry),
                Err(e) => {
                    if config.material_name != DEFAULT_MATERIAL && !config.material_name.is_empty() {
                        materials.release(device, shaders, textures, &config.material_name);
                    }
                    Err(e)
                }
            }
        })
    }

    /// Drop a reference; an auto-released geometry is unloaded once unreferenced
    pub fn release(&mut self, device: &mut dyn RenderDevice, materials: MaterialContext<'_>, name: &str) {
        if let Release::Evicted(geometry) = self.cache.release(name) {
            self.unload(device, materials, geometry);
        }
    }

    fn unload(&mut self, device: &mut dyn RenderDevice, materials: MaterialContext<'_>, geometry: Geometry) {
        self.free_ranges(&geometry);
        if let Some(material) = &geometry.acquired_material {
            materials.materials.release(device, materials.shaders, materials.textures, material);
        }
        log::debug!("Unloaded geometry '{}'", geometry.name);
    }

    fn free_ranges(&mut self, geometry: &Geometry) {
        if let Err(e) = self.vertex_buffer.free(geometry.vertex_offset, geometry.vertex_bytes()) {
            log::warn!("Failed to free vertex range of '{}': {}", geometry.name, e);
        }
        if geometry.index_count > 0 {
            if let Err(e) = self.index_buffer.free(geometry.index_offset, geometry.index_bytes()) {
                log::warn!("Failed to free index range of '{}': {}", geometry.name, e);
            }
        }
    }

    /// Record the draw of a geometry, indexed when it has indices
    pub fn draw(&self, device: &mut dyn RenderDevice, id: GeometryId) -> RenderResult<()> {
        let geometry = self.get(id).ok_or_else(|| RenderError::not_found("geometry", format!("{id:?}")))?;
        let indexed = geometry.index_count > 0;
        self.vertex_buffer.draw(device, geometry.vertex_offset, geometry.vertex_count, indexed)?;
        if indexed {
            self.index_buffer.draw(device, geometry.index_offset, geometry.index_count, false)?;
        }
        Ok(())
    }

    /// A resident geometry
    pub fn get(&self, id: GeometryId) -> Option<&Geometry> {
        self.cache.get(id)
    }

    /// Handle of a resident geometry by name
    pub fn id(&self, name: &str) -> Option<GeometryId> {
        self.cache.handle(name)
    }

    /// Reference count of a cached geometry
    pub fn reference_count(&self, name: &str) -> Option<u32> {
        self.cache.reference_count(name)
    }

    /// The default 3D plane
    pub fn default_geometry(&self) -> GeometryId {
        self.default_geometry
    }

    /// The default 2D quad
    pub fn default_geometry_2d(&self) -> GeometryId {
        self.default_geometry_2d
    }

    /// Shared vertex buffer
    pub fn vertex_buffer(&self) -> &RenderBuffer {
        &self.vertex_buffer
    }

    /// Shared index buffer
    pub fn index_buffer(&self) -> &RenderBuffer {
        &self.index_buffer
    }

    /// Unload every geometry and destroy the shared buffers
    pub fn shutdown(mut self, device: &mut dyn RenderDevice, materials: MaterialContext<'_>) {
        let MaterialContext { shaders, textures, materials } = materials;
        for geometry in self.cache.drain() {
            if let Some(material) = &geometry.acquired_material {
                materials.release(device, shaders, textures, material);
            }
        }
        self.vertex_buffer.destroy(device);
        self.index_buffer.destroy(device);
        log::debug!("Geometry system shut down");
    }
}

fn acquire_material(
    device: &mut dyn RenderDevice,
    shaders: &mut ShaderSystem,
    textures: &mut TextureSystem,
    materials: &mut MaterialSystem,
    name: &str,
) -> (MaterialId, Option<String>) {
    if name.is_empty() || name == DEFAULT_MATERIAL {
        return (materials.default_material(), None);
    }
    match materials.acquire(device, shaders, textures, name) {
        Ok(id) => (id, Some(name.to_string())),
        Err(e) => {
            log::warn!("Material '{}' unavailable, using default: {}", name, e);
            (materials.default_material(), None)
        }
    }
}

/// Reserve a range, growing the buffer when nothing fits, and fill it
fn upload_range(device: &mut dyn RenderDevice, buffer: &mut RenderBuffer, data: &[u8]) -> RenderResult<u64> {
    let size = data.len() as u64;
    let offset = match buffer.allocate(size) {
        Ok(offset) => offset,
        Err(RenderError::ResourceExhausted { .. }) => {
            let new_size = (buffer.total_size() * 2).max(buffer.total_size() + size);
            log::info!("Growing {} from {} to {} bytes", buffer.name(), buffer.total_size(), new_size);
            buffer.resize(device, new_size)?;
            buffer.allocate(size)?
        }
        Err(e) => return Err(e),
    };
    if let Err(e) = buffer.load_range(device, offset, data) {
        if let Err(free) = buffer.free(offset, size) {
            log::warn!("Failed to return range after upload failure: {}", free);
        }
        return Err(e);
    }
    Ok(offset)
}

fn upload_geometry(
    device: &mut dyn RenderDevice,
    vertex_buffer: &mut RenderBuffer,
    index_buffer: &mut RenderBuffer,
    config: &GeometryConfig,
    material: MaterialId,
    acquired_material: Option<String>,
) -> RenderResult<Geometry> {
    let vertex_offset = upload_range(device, vertex_buffer, &config.vertices)?;
    let index_offset = if config.index_count > 0 {
        match upload_range(device, index_buffer, &config.indices) {
            Ok(offset) => offset,
            Err(e) => {
                if let Err(free) = vertex_buffer.free(vertex_offset, config.vertices.len() as u64) {
                    log::warn!("Failed to return vertex range of '{}': {}", config.name, free);
                }
                return Err(e);
            }
        }
    } else {
        0
    };
    log::debug!(
        "Uploaded geometry '{}' ({} vertices at {}, {} indices at {})",
        config.name,
        config.vertex_count,
        vertex_offset,
        config.index_count,
        index_offset
    );

    Ok(Geometry {
        name: config.name.clone(),
        material,
        vertex_count: config.vertex_count,
        vertex_element_size: config.vertex_size,
        vertex_offset,
        index_count: config.index_count,
        index_element_size: config.index_size,
        index_offset,
        center: config.center,
        min_extents: config.min_extents,
        max_extents: config.max_extents,
        generation: 0,
        acquired_material,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ShaderSystemConfig;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};
    use crate::render::shaders::{ShaderConfig, BUILTIN_WORLD_SHADER};
    use approx::assert_relative_eq;
    use std::path::Path;

    struct Fixture {
        device: HeadlessDevice,
        shaders: ShaderSystem,
        textures: TextureSystem,
        materials: MaterialSystem,
        geometries: GeometrySystem,
    }

    impl Fixture {
        fn context(&mut self) -> (&mut HeadlessDevice, &mut GeometrySystem, MaterialContext<'_>) {
            (
                &mut self.device,
                &mut self.geometries,
                MaterialContext {
                    shaders: &mut self.shaders,
                    textures: &mut self.textures,
                    materials: &mut self.materials,
                },
            )
        }
    }

    fn fixture(vertex_bytes: u64, capacity: usize) -> Fixture {
        let mut device = HeadlessDevice::new(64, 64);
        let pass = device
            .create_renderpass(&RenderPassDesc {
                name: "world".to_string(),
                clear_color: [0.0; 4],
                clear_flags: ClearFlags::empty(),
                depth_attachment: true,
                has_prev_pass: false,
                has_next_pass: false,
                present_after: true,
            })
            .unwrap();
        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default(), Path::new("."), 2).unwrap();
        shaders
            .create(&mut device, pass, &ShaderConfig::builtin(BUILTIN_WORLD_SHADER).unwrap())
            .unwrap();
        let config = ResourceConfig { max_geometry_count: capacity, ..ResourceConfig::default() };
        let mut textures = TextureSystem::new(&mut device, &config).unwrap();
        let materials = MaterialSystem::new(&mut device, &config, &mut shaders, &mut textures).unwrap();
        let geometries =
            GeometrySystem::new(&mut device, &config, vertex_bytes, 4096, materials.default_material()).unwrap();
        Fixture { device, shaders, textures, materials, geometries }
    }

    #[test]
    fn test_vertex_layout_sizes() {
        assert_eq!(std::mem::size_of::<Vertex3D>(), 64);
        assert_eq!(std::mem::size_of::<Vertex2D>(), 16);
    }

    #[test]
    fn test_plane_config() {
        let config = generate_plane_config(2.0, 4.0, 2, 2, 1.0, 1.0, "floor", "");
        assert_eq!(config.vertex_count, 16);
        assert_eq!(config.index_count, 24);
        assert_eq!(config.vertices.len(), 16 * 64);
        assert_eq!(config.material_name, DEFAULT_MATERIAL);
        assert_relative_eq!(config.min_extents, Vec3::new(-1.0, -2.0, 0.0));
        assert_relative_eq!(config.max_extents, Vec3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(config.center, Vec3::zeros());
    }

    #[test]
    fn test_plane_config_zero_arguments_default() {
        let config = generate_plane_config(0.0, 0.0, 0, 0, 0.0, 0.0, "", "");
        assert_eq!(config.name, DEFAULT_GEOMETRY);
        assert_eq!(config.vertex_count, 4);
        assert_relative_eq!(config.max_extents, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_cube_config() {
        let config = generate_cube_config(2.0, 2.0, 2.0, 1.0, 1.0, "box", "");
        assert_eq!(config.vertex_count, 24);
        assert_eq!(config.index_count, 36);
        assert_relative_eq!(config.min_extents, Vec3::new(-1.0, -1.0, -1.0));
        assert_relative_eq!(config.max_extents, Vec3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_defaults_resident() {
        let f = fixture(64 * 1024, 8);
        let plane = f.geometries.get(f.geometries.default_geometry()).unwrap();
        assert_eq!(plane.vertex_count, 4);
        assert_eq!(plane.index_count, 6);
        let quad = f.geometries.get(f.geometries.default_geometry_2d()).unwrap();
        assert_eq!(quad.vertex_element_size, 16);
        assert_eq!(quad.material, f.materials.default_material());
    }

    #[test]
    fn test_acquire_release_frees_ranges() {
        let mut f = fixture(64 * 1024, 8);
        let free_before = f.geometries.vertex_buffer().free_space();
        let config = generate_plane_config(1.0, 1.0, 4, 4, 1.0, 1.0, "grid", "");

        let (device, geometries, ctx) = f.context();
        let id = geometries.acquire_from_config(device, ctx, &config).unwrap();
        assert_eq!(geometries.get(id).unwrap().vertex_count, 64);
        assert_eq!(geometries.vertex_buffer().free_space(), free_before - 64 * 64);

        let (device, geometries, ctx) = f.context();
        geometries.release(device, ctx, "grid");
        assert!(f.geometries.get(id).is_none());
        assert_eq!(f.geometries.vertex_buffer().free_space(), free_before);
    }

    #[test]
    fn test_vertex_buffer_grows() {
        let mut f = fixture(1024, 8);
        let config = generate_plane_config(1.0, 1.0, 4, 4, 1.0, 1.0, "grid", "");
        let (device, geometries, ctx) = f.context();
        let id = geometries.acquire_from_config(device, ctx, &config).unwrap();

        // 1024 bytes cannot double to fit 4096 more, so the buffer grows by exactly that
        assert_eq!(f.geometries.vertex_buffer().total_size(), 1024 + 64 * 64);
        let offset = f.geometries.get(id).unwrap().vertex_offset;
        let stored = f.geometries.vertex_buffer().read_range(&mut f.device, offset, 64).unwrap();
        assert_eq!(stored, config.vertices[..64].to_vec());
    }

    #[test]
    fn test_missing_material_falls_back() {
        let mut f = fixture(64 * 1024, 8);
        let config = generate_plane_config(1.0, 1.0, 1, 1, 1.0, 1.0, "tile", "no_such_material");
        let (device, geometries, ctx) = f.context();
        let id = geometries.acquire_from_config(device, ctx, &config).unwrap();
        assert_eq!(f.geometries.get(id).unwrap().material, f.materials.default_material());
    }

    #[test]
    fn test_invalid_config_rolls_back() {
        let mut f = fixture(64 * 1024, 8);
        let mut config = generate_plane_config(1.0, 1.0, 1, 1, 1.0, 1.0, "broken", "");
        config.vertices.truncate(10);
        let (device, geometries, ctx) = f.context();
        assert!(matches!(
            geometries.acquire_from_config(device, ctx, &config),
            Err(RenderError::InvalidConfig(_))
        ));
        assert!(f.geometries.id("broken").is_none());
    }

    #[test]
    fn test_draw_indexed_and_plain() {
        let mut f = fixture(64 * 1024, 8);
        let points = [Vertex2D::default(); 3];
        let config = GeometryConfig::from_vertices("tri", "", &points, &[]);
        let (device, geometries, ctx) = f.context();
        let tri = geometries.acquire_from_config(device, ctx, &config).unwrap();
        f.device.clear_calls();

        f.geometries.draw(&mut f.device, f.geometries.default_geometry()).unwrap();
        f.geometries.draw(&mut f.device, tri).unwrap();
        let draws: Vec<_> = f
            .device
            .calls()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::Draw { kind, element_count, .. } => Some((*kind, *element_count)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(BufferKind::Index, 6), (BufferKind::Vertex, 3)]);
    }

    #[test]
    fn test_release_default_is_ignored() {
        let mut f = fixture(64 * 1024, 8);
        let (device, geometries, ctx) = f.context();
        geometries.release(device, ctx, DEFAULT_GEOMETRY);
        assert!(f.geometries.get(f.geometries.default_geometry()).is_some());
    }
}
