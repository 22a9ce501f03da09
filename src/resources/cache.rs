//! Renderer-owned texture cache.

use std::collections::HashMap;

use crate::backend::{
    BackendResult, GraphicsBackend, TextureDescriptor, TextureHandle, TextureUsage,
    TextureViewHandle,
};
use crate::resources::{TextureData, TextureLoader, TextureSource};

/// Key of the shared fallback texture.
pub const DEFAULT_TEXTURE_KEY: &str = "default";

/// A texture uploaded to the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedTexture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// GPU textures keyed by [`TextureSource::key`], plus the shared default texture.
///
/// Every node referencing the same identifier gets the same handle, and a source is decoded at
/// most once.
#[derive(Debug, Default)]
pub struct TextureCache {
    textures: HashMap<String, CachedTexture>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the default texture if it does not exist yet.
    pub fn ensure_default<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> BackendResult<CachedTexture> {
        if let Some(texture) = self.textures.get(DEFAULT_TEXTURE_KEY) {
            return Ok(*texture);
        }
        let data = TextureData::checkerboard(16, [255, 255, 255, 255], [255, 0, 255, 255]);
        let texture = upload(backend, &data, DEFAULT_TEXTURE_KEY)?;
        self.textures.insert(DEFAULT_TEXTURE_KEY.to_string(), texture);
        Ok(texture)
    }

    /// The shared default texture, once created.
    pub fn default_texture(&self) -> Option<CachedTexture> {
        self.textures.get(DEFAULT_TEXTURE_KEY).copied()
    }

    /// Resolve `source` to a GPU texture.
    ///
    /// Returns the texture and whether the default texture was substituted because loading or
    /// uploading failed. Failed sources are retried on the next request.
    pub fn resolve<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        loader: &dyn TextureLoader,
        source: &TextureSource,
    ) -> BackendResult<(CachedTexture, bool)> {
        let key = source.key();
        if let Some(texture) = self.textures.get(&key) {
            return Ok((*texture, false));
        }

        let uploaded = loader
            .load(source)
            .map_err(|e| e.to_string())
            .and_then(|data| upload(backend, &data, &key).map_err(|e| e.to_string()));

        match uploaded {
            Ok(texture) => {
                log::debug!("Cached texture {key} ({}x{})", texture.width, texture.height);
                self.textures.insert(key, texture);
                Ok((texture, false))
            }
            Err(message) => {
                log::warn!("Texture {key} could not be loaded, using default: {message}");
                Ok((self.ensure_default(backend)?, true))
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.textures.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Destroy every cached texture, the default one included.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, texture) in self.textures.drain() {
            backend.destroy_texture(texture.texture);
        }
    }
}

fn upload<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    data: &TextureData,
    label: &str,
) -> BackendResult<CachedTexture> {
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some(label.to_string()),
        width: data.width,
        height: data.height,
        depth: 1,
        mip_levels: 1,
        format: data.format,
        usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
    })?;
    backend.write_texture(texture, &data.data, data.width, data.height);
    let view = backend.create_texture_view(texture)?;
    Ok(CachedTexture {
        texture,
        view,
        width: data.width,
        height: data.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::error::TextureError;

    struct FailingLoader;

    impl TextureLoader for FailingLoader {
        fn load(&self, source: &TextureSource) -> Result<TextureData, TextureError> {
            Err(TextureError::Decode {
                name: source.key(),
                message: "broken".to_string(),
            })
        }
    }

    #[test]
    fn test_failed_load_substitutes_default() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut cache = TextureCache::new();

        let (texture, substituted) = cache
            .resolve(&mut backend, &FailingLoader, &TextureSource::file("missing.png"))
            .unwrap();

        assert!(substituted);
        assert_eq!(Some(texture), cache.default_texture());
        assert!(!cache.contains("missing.png"));
    }

    #[test]
    fn test_release_destroys_textures() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut cache = TextureCache::new();
        cache.ensure_default(&mut backend).unwrap();
        let source = TextureSource::buffer("white", TextureData::solid_color([255; 4], "white"));
        cache
            .resolve(&mut backend, &crate::resources::ImageFileLoader, &source)
            .unwrap();
        assert_eq!(backend.live_textures(), 2);

        cache.release(&mut backend);
        assert_eq!(backend.live_textures(), 0);
        assert!(cache.is_empty());
    }
}
