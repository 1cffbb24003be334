//! Image loading utilities for texture data
//!
//! Decodes PNG files into tightly packed RGBA8 pixels for the texture system,
//! and generates the procedural images used by the default textures.

use std::path::{Path, PathBuf};

use crate::render::api::{RenderError, RenderResult};

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of color channels (always 4 for RGBA)
    pub channels: u8,
}

impl ImageData {
    /// Load an image from a file path, optionally flipping it vertically
    pub fn from_file<P: AsRef<Path>>(path: P, flip_y: bool) -> RenderResult<Self> {
        let path_ref = path.as_ref();

        log::debug!("Loading image from: {:?}", path_ref);

        let img = image::open(path_ref).map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to load image {}: {}", path_ref.display(), e))
        })?;
        let img = if flip_y { img.flipv() } else { img };

        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();

        log::debug!("Loaded image {}x{} from {:?}", width, height, path_ref);

        Ok(Self {
            data: rgba_img.into_raw(),
            width,
            height,
            channels: 4,
        })
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width * height) as usize;
        let mut data = Vec::with_capacity(pixel_count * 4);

        for _ in 0..pixel_count {
            data.extend_from_slice(&color);
        }

        Self {
            data,
            width,
            height,
            channels: 4,
        }
    }

    /// Blue and white single-pixel checkerboard
    pub fn checkerboard(dimension: u32) -> Self {
        let mut img = Self::solid_color(dimension, dimension, [255; 4]);
        for row in 0..dimension {
            for col in 0..dimension {
                if (row % 2) == (col % 2) {
                    let index = ((row * dimension + col) * 4) as usize;
                    img.data[index] = 0;
                    img.data[index + 1] = 0;
                }
            }
        }
        img
    }

    /// Whether any pixel has alpha below 255
    pub fn has_transparency(&self) -> bool {
        self.data.chunks_exact(usize::from(self.channels)).any(|pixel| pixel[3] < 255)
    }

    /// Get the size of the image data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Path of a named image under `dir`
pub fn image_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.channels, 4);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
        assert!(!img.has_transparency());
    }

    #[test]
    fn test_checkerboard_alternates() {
        let img = ImageData::checkerboard(4);
        assert_eq!(&img.data[0..4], &[0, 0, 255, 255]);
        assert_eq!(&img.data[4..8], &[255, 255, 255, 255]);
        assert_eq!(&img.data[16..20], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_load_flips_vertically() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), "stripe");
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 128]));
        img.put_pixel(0, 1, image::Rgba([0, 255, 0, 255]));
        img.save(&path).unwrap();

        let upright = ImageData::from_file(&path, false).unwrap();
        let flipped = ImageData::from_file(&path, true).unwrap();
        assert_eq!(&upright.data[0..4], &[255, 0, 0, 128]);
        assert_eq!(&flipped.data[0..4], &[0, 255, 0, 255]);
        assert!(flipped.has_transparency());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageData::from_file(image_path(dir.path(), "absent"), true);
        assert!(matches!(result, Err(RenderError::ResourceCreationFailed(_))));
    }
}
