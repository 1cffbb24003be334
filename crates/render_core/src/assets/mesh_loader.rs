//! Named mesh loading
//!
//! Meshes live under `<root>/models/` as binary mesh caches.

use std::path::{Path, PathBuf};

use super::mesh_cache::{load_mesh_cache, MeshCache, MeshCacheError};

/// Directory under the resource root that holds meshes
pub const MODELS_DIR: &str = "models";

/// File extension of a mesh cache
pub const MESH_CACHE_EXTENSION: &str = "dsm";

/// Loads meshes by name from a resource root
#[derive(Debug, Clone)]
pub struct MeshLoader;

impl MeshLoader {
    /// Path of the mesh called `name`
    pub fn path(root: &Path, name: &str) -> PathBuf {
        root.join(MODELS_DIR).join(format!("{name}.{MESH_CACHE_EXTENSION}"))
    }

    /// Read `<root>/models/<name>.dsm`
    pub fn load(root: &Path, name: &str) -> Result<MeshCache, MeshCacheError> {
        let path = Self::path(root, name);
        log::debug!("Loading mesh '{}' from {}", name, path.display());

        let cache = load_mesh_cache(&path).map_err(|e| {
            log::error!("Failed to load mesh '{}': {}", name, e);
            e
        })?;
        log::info!("Loaded mesh '{}' with {} geometries", cache.name, cache.geometries.len());
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::mesh_cache::save_mesh_cache;
    use crate::render::resources::generate_plane_config;

    #[test]
    fn test_load_from_models_dir() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join(MODELS_DIR)).unwrap();
        let plane = generate_plane_config(4.0, 4.0, 2, 2, 1.0, 1.0, "floor", "stone");
        save_mesh_cache(MeshLoader::path(root.path(), "floor"), "floor", &[plane.clone()]).unwrap();

        let mesh = MeshLoader::load(root.path(), "floor").unwrap();
        assert_eq!(mesh.name, "floor");
        assert_eq!(mesh.geometries[0].vertices, plane.vertices);
        assert_eq!(mesh.geometries[0].index_count, plane.index_count);
    }

    #[test]
    fn test_missing_mesh() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(MeshLoader::load(root.path(), "nothing"), Err(MeshCacheError::Io(_))));
    }
}
