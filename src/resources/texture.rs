//! Texture loading

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};

use crate::backend::TextureFormat;
use crate::error::TextureError;

/// Decoded RGBA8 texture data
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let img = image::open(path).map_err(|e| TextureError::Decode {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Wrap raw RGBA8 pixels.
    pub fn from_rgba8(
        width: u32,
        height: u32,
        data: Vec<u8>,
        name: &str,
    ) -> Result<Self, TextureError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected || expected == 0 {
            return Err(TextureError::SizeMismatch {
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        })
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a checkerboard texture
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// Where a material texture comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    File(PathBuf),
    /// Pixels supplied in memory, identified by name
    Buffer { name: String, data: Arc<TextureData> },
}

impl TextureSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        TextureSource::File(path.into())
    }

    pub fn buffer(name: impl Into<String>, data: TextureData) -> Self {
        TextureSource::Buffer {
            name: name.into(),
            data: Arc::new(data),
        }
    }

    /// Stable cache key: the file path, or `fromBuffer:<name>`.
    pub fn key(&self) -> String {
        match self {
            TextureSource::File(path) => path.display().to_string(),
            TextureSource::Buffer { name, .. } => format!("fromBuffer:{name}"),
        }
    }
}

/// Turns a texture source into pixels.
pub trait TextureLoader: Send + Sync {
    fn load(&self, source: &TextureSource) -> Result<TextureData, TextureError>;
}

/// Default loader: decodes files with the `image` crate and passes buffers through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileLoader;

impl TextureLoader for ImageFileLoader {
    fn load(&self, source: &TextureSource) -> Result<TextureData, TextureError> {
        match source {
            TextureSource::File(path) => TextureData::from_file(path),
            TextureSource::Buffer { data, .. } => Ok(data.as_ref().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keys() {
        assert_eq!(TextureSource::file("textures/a.png").key(), "textures/a.png");
        let buffer = TextureSource::buffer("atlas", TextureData::solid_color([0; 4], "atlas"));
        assert_eq!(buffer.key(), "fromBuffer:atlas");
    }

    #[test]
    fn test_from_rgba8_checks_size() {
        assert!(TextureData::from_rgba8(2, 2, vec![0; 16], "ok").is_ok());
        assert!(matches!(
            TextureData::from_rgba8(2, 2, vec![0; 3], "bad"),
            Err(TextureError::SizeMismatch { expected: 16, .. })
        ));
    }

    #[test]
    fn test_missing_file_fails_to_decode() {
        let result = ImageFileLoader.load(&TextureSource::file("does/not/exist.png"));
        assert!(matches!(result, Err(TextureError::Decode { .. })));
    }
}
