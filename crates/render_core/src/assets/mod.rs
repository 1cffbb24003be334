//! Asset loading
//!
//! Decoders for the files the resource systems read from disk: PNG images
//! for textures and binary mesh caches for geometry.

pub mod image_loader;
pub mod mesh_cache;
pub mod mesh_loader;

pub use image_loader::ImageData;
pub use mesh_cache::{read_mesh_cache, write_mesh_cache, MeshCache, MeshCacheError};
pub use mesh_loader::MeshLoader;
