//! Resource management
//!
//! Name-keyed, reference-counted caches for textures, materials and
//! geometries, all built on [`cache::ResourceCache`].

pub mod cache;
pub mod geometries;
pub mod materials;
pub mod textures;

pub use cache::{Release, ResourceCache};
pub use geometries::{
    generate_cube_config, generate_plane_config, Geometry, GeometryConfig, GeometryId, GeometrySystem,
    MaterialContext, Vertex2D, Vertex3D, DEFAULT_GEOMETRY, DEFAULT_GEOMETRY_2D,
};
pub use materials::{GlobalUniforms, Material, MaterialConfig, MaterialId, MaterialSystem, DEFAULT_MATERIAL};
pub use textures::{
    Texture, TextureId, TextureMap, TextureSystem, DEFAULT_DIFFUSE_TEXTURE, DEFAULT_NORMAL_TEXTURE,
    DEFAULT_SPECULAR_TEXTURE,
};
