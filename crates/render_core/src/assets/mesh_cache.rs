//! Binary mesh cache (`.dsm`)
//!
//! Little-endian, unpadded layout:
//!
//! ```text
//! version: u16
//! name_length: u32, name bytes (NUL included)
//! geometry_count: u32
//! per geometry:
//!     vertex_size: u32, vertex_count: u32, vertex bytes
//!     index_size: u32, index_count: u32, index bytes
//!     name_length: u32, name bytes
//!     material_name_length: u32, material name bytes
//!     center: 3 x f32, min_extents: 3 x f32, max_extents: 3 x f32
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::foundation::math::Vec3;
use crate::render::resources::GeometryConfig;

/// Version written by [`write_mesh_cache`]
pub const MESH_CACHE_VERSION: u16 = 1;

/// Mesh cache decoding errors
#[derive(Debug, thiserror::Error)]
pub enum MeshCacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// File ended inside a field
    #[error("Mesh cache truncated while reading {context}")]
    UnexpectedEof {
        /// Field being read
        context: &'static str,
    },

    /// A name field is not UTF-8
    #[error("Mesh cache {context} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field being read
        context: &'static str,
    },

    /// Version this reader does not understand
    #[error("Unsupported mesh cache version {0}")]
    UnsupportedVersion(u16),

    /// A length field does not fit in memory
    #[error("Mesh cache {context} of {size} bytes is too large")]
    TooLarge {
        /// Field being read
        context: &'static str,
        /// Declared size
        size: u64,
    },
}

/// A decoded mesh cache
#[derive(Debug, Clone, PartialEq)]
pub struct MeshCache {
    /// Mesh name
    pub name: String,
    /// Geometries in file order
    pub geometries: Vec<GeometryConfig>,
}

struct CacheReader<R> {
    inner: R,
}

impl<R: Read> CacheReader<R> {
    fn bytes(&mut self, len: u64, context: &'static str) -> Result<Vec<u8>, MeshCacheError> {
        let len = usize::try_from(len).map_err(|_| MeshCacheError::TooLarge { context, size: len })?;
        let mut buf = Vec::new();
        // Declared lengths are untrusted; let `take` bound the allocation
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(MeshCacheError::UnexpectedEof { context });
        }
        Ok(buf)
    }

    fn array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N], MeshCacheError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => MeshCacheError::UnexpectedEof { context },
            _ => MeshCacheError::Io(e),
        })?;
        Ok(buf)
    }

    fn u16(&mut self, context: &'static str) -> Result<u16, MeshCacheError> {
        Ok(u16::from_le_bytes(self.array(context)?))
    }

    fn u32(&mut self, context: &'static str) -> Result<u32, MeshCacheError> {
        Ok(u32::from_le_bytes(self.array(context)?))
    }

    fn vec3(&mut self, context: &'static str) -> Result<Vec3, MeshCacheError> {
        let x = f32::from_le_bytes(self.array(context)?);
        let y = f32::from_le_bytes(self.array(context)?);
        let z = f32::from_le_bytes(self.array(context)?);
        Ok(Vec3::new(x, y, z))
    }

    /// Length-prefixed string with an optional trailing NUL
    fn string(&mut self, context: &'static str) -> Result<String, MeshCacheError> {
        let len = self.u32(context)?;
        let mut bytes = self.bytes(u64::from(len), context)?;
        if let Some(end) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(end);
        }
        String::from_utf8(bytes).map_err(|_| MeshCacheError::InvalidUtf8 { context })
    }

    /// Element size, element count, then `size * count` bytes
    fn blob(&mut self, context: &'static str) -> Result<(u32, u32, Vec<u8>), MeshCacheError> {
        let size = self.u32(context)?;
        let count = self.u32(context)?;
        let data = self.bytes(u64::from(size) * u64::from(count), context)?;
        Ok((size, count, data))
    }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len() + 1).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name too long"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0])
}

fn write_vec3<W: Write>(writer: &mut W, value: &Vec3) -> io::Result<()> {
    for component in value.iter() {
        writer.write_all(&component.to_le_bytes())?;
    }
    Ok(())
}

/// Serialize a mesh's geometries
pub fn write_mesh_cache<W: Write>(writer: &mut W, name: &str, geometries: &[GeometryConfig]) -> io::Result<()> {
    let count =
        u32::try_from(geometries.len()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many geometries"))?;

    writer.write_all(&MESH_CACHE_VERSION.to_le_bytes())?;
    write_string(writer, name)?;
    writer.write_all(&count.to_le_bytes())?;

    for geometry in geometries {
        writer.write_all(&geometry.vertex_size.to_le_bytes())?;
        writer.write_all(&geometry.vertex_count.to_le_bytes())?;
        writer.write_all(&geometry.vertices)?;
        writer.write_all(&geometry.index_size.to_le_bytes())?;
        writer.write_all(&geometry.index_count.to_le_bytes())?;
        writer.write_all(&geometry.indices)?;
        write_string(writer, &geometry.name)?;
        write_string(writer, &geometry.material_name)?;
        write_vec3(writer, &geometry.center)?;
        write_vec3(writer, &geometry.min_extents)?;
        write_vec3(writer, &geometry.max_extents)?;
    }
    Ok(())
}

/// Deserialize a mesh cache
///
/// Geometries come back with `auto_release` set.
pub fn read_mesh_cache<R: Read>(reader: R) -> Result<MeshCache, MeshCacheError> {
    let mut reader = CacheReader { inner: reader };

    let version = reader.u16("version")?;
    if version != MESH_CACHE_VERSION {
        return Err(MeshCacheError::UnsupportedVersion(version));
    }
    let name = reader.string("mesh name")?;
    let count = reader.u32("geometry count")?;

    let mut geometries = Vec::new();
    for _ in 0..count {
        let (vertex_size, vertex_count, vertices) = reader.blob("vertices")?;
        let (index_size, index_count, indices) = reader.blob("indices")?;
        let geometry_name = reader.string("geometry name")?;
        let material_name = reader.string("material name")?;
        geometries.push(GeometryConfig {
            name: geometry_name,
            vertex_size,
            vertex_count,
            vertices,
            index_size,
            index_count,
            indices,
            center: reader.vec3("center")?,
            min_extents: reader.vec3("min extents")?,
            max_extents: reader.vec3("max extents")?,
            material_name,
            auto_release: true,
        });
    }

    Ok(MeshCache { name, geometries })
}

/// Write a mesh cache file
pub fn save_mesh_cache(path: impl AsRef<Path>, name: &str, geometries: &[GeometryConfig]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_mesh_cache(&mut writer, name, geometries)?;
    writer.flush()
}

/// Read a mesh cache file
pub fn load_mesh_cache(path: impl AsRef<Path>) -> Result<MeshCache, MeshCacheError> {
    read_mesh_cache(BufReader::new(File::open(path)?))
}
