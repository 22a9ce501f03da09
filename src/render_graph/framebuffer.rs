//! Off-screen framebuffers backing render targets, and their per-build registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{
    BackendResult, GraphicsBackend, Rect2D, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage, TextureViewHandle,
};
use crate::render_graph::descriptor::{
    AttachmentConfig, AttachmentFormat, RenderTargetConfig, VIEWPORT_TARGET,
};
use crate::render_graph::validate::VIEWPORT_ATTACHMENT;

/// One typed image of a framebuffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferAttachment {
    pub name: String,
    pub format: TextureFormat,
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
}

impl FramebufferAttachment {
    pub fn is_depth(&self) -> bool {
        self.format.is_depth()
    }
}

/// Which attachments a blit copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitMask {
    Color,
    Depth,
    Both,
}

impl BlitMask {
    fn includes(&self, attachment: &FramebufferAttachment) -> bool {
        match self {
            BlitMask::Color => !attachment.is_depth(),
            BlitMask::Depth => attachment.is_depth(),
            BlitMask::Both => true,
        }
    }
}

/// A realized render target at concrete pixel dimensions.
#[derive(Debug)]
pub struct Framebuffer {
    name: String,
    width: u32,
    height: u32,
    attachments: Vec<FramebufferAttachment>,
}

impl Framebuffer {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
            height: height.max(1),
            attachments: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn attachments(&self) -> &[FramebufferAttachment] {
        &self.attachments
    }

    pub fn attachment(&self, name: &str) -> Option<&FramebufferAttachment> {
        self.attachments.iter().find(|a| a.name == name)
    }

    pub fn has_attachment(&self, name: &str) -> bool {
        self.attachment(name).is_some()
    }

    pub fn color_attachments(&self) -> impl Iterator<Item = &FramebufferAttachment> {
        self.attachments.iter().filter(|a| !a.is_depth())
    }

    pub fn depth_attachment(&self) -> Option<&FramebufferAttachment> {
        self.attachments.iter().find(|a| a.is_depth())
    }

    /// Create the attachment described by `config`.
    pub fn add_attachment<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        config: &AttachmentConfig,
    ) -> BackendResult<()> {
        match config.format {
            AttachmentFormat::RGBA_Float32 => self.add_float_rgba_buffer(backend, &config.name, 32),
            AttachmentFormat::RGBA_Float16 => self.add_float_rgba_buffer(backend, &config.name, 16),
            AttachmentFormat::RGB_Float32 => self.add_float_rgb_buffer(backend, &config.name, 32),
            AttachmentFormat::RGB_Float16 => self.add_float_rgb_buffer(backend, &config.name, 16),
            AttachmentFormat::RG_Float32 => self.add_float_rg_buffer(backend, &config.name, 32),
            AttachmentFormat::RG_Float16 => self.add_float_rg_buffer(backend, &config.name, 16),
            AttachmentFormat::R_Float32 => self.add_float_r_buffer(backend, &config.name, 32),
            AttachmentFormat::R_Float16 => self.add_float_r_buffer(backend, &config.name, 16),
            AttachmentFormat::RGBA_UInt8 => self.add_unorm_rgba_buffer(backend, &config.name, 8),
            AttachmentFormat::RGBA_UInt16 => self.add_unorm_rgba_buffer(backend, &config.name, 16),
            AttachmentFormat::R_UInt8 => self.add_unorm_r_buffer(backend, &config.name, 8),
            AttachmentFormat::R_UInt16 => self.add_unorm_r_buffer(backend, &config.name, 16),
            AttachmentFormat::Depth24 => self.add_depth_buffer(backend, &config.name, 24),
            AttachmentFormat::Depth32 => self.add_depth_buffer(backend, &config.name, 32),
        }
    }

    pub fn add_float_rgba_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 32 {
            TextureFormat::Rgba32Float
        } else {
            TextureFormat::Rgba16Float
        };
        self.push_attachment(backend, name, format)
    }

    /// Three-channel float targets are stored with an unused alpha channel.
    pub fn add_float_rgb_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        self.add_float_rgba_buffer(backend, name, bits)
    }

    pub fn add_float_rg_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 32 {
            TextureFormat::Rg32Float
        } else {
            TextureFormat::Rg16Float
        };
        self.push_attachment(backend, name, format)
    }

    pub fn add_float_r_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 32 {
            TextureFormat::R32Float
        } else {
            TextureFormat::R16Float
        };
        self.push_attachment(backend, name, format)
    }

    pub fn add_unorm_rgba_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 16 {
            TextureFormat::Rgba16Unorm
        } else {
            TextureFormat::Rgba8Unorm
        };
        self.push_attachment(backend, name, format)
    }

    pub fn add_unorm_r_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 16 {
            TextureFormat::R16Unorm
        } else {
            TextureFormat::R8Unorm
        };
        self.push_attachment(backend, name, format)
    }

    pub fn add_depth_buffer<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        bits: u32,
    ) -> BackendResult<()> {
        let format = if bits == 32 {
            TextureFormat::Depth32Float
        } else {
            TextureFormat::Depth24Plus
        };
        self.push_attachment(backend, name, format)
    }

    fn push_attachment<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        format: TextureFormat,
    ) -> BackendResult<()> {
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(format!("{}.{}", self.name, name)),
            width: self.width,
            height: self.height,
            depth: 1,
            mip_levels: 1,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
        })?;
        let view = backend.create_texture_view(texture)?;
        self.attachments.push(FramebufferAttachment {
            name: name.to_string(),
            format,
            texture,
            view,
        });
        Ok(())
    }

    /// Copy attachments selected by `mask` into the matching attachments of `target`.
    ///
    /// Attachments are paired by name, falling back to the first unpaired attachment of the same
    /// format. The overlapping extent is copied without scaling. Returns the number of copies.
    pub fn blit_to<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        target: &Framebuffer,
        mask: BlitMask,
    ) -> usize {
        let region = Rect2D::new(
            0,
            0,
            self.width.min(target.width),
            self.height.min(target.height),
        );
        let mut used = Vec::new();
        let mut copies = 0;

        for source in self.attachments.iter().filter(|a| mask.includes(a)) {
            let destination = target
                .attachments
                .iter()
                .enumerate()
                .find(|(_, d)| d.name == source.name && d.format == source.format)
                .or_else(|| {
                    target
                        .attachments
                        .iter()
                        .enumerate()
                        .find(|(i, d)| d.format == source.format && !used.contains(i))
                });

            let Some((index, destination)) = destination else {
                log::debug!(
                    "No attachment in {} matches {}.{} ({:?}), skipping blit",
                    target.name,
                    self.name,
                    source.name,
                    source.format
                );
                continue;
            };
            if !source.format.is_copyable() {
                log::debug!(
                    "Attachment {}.{} has non-copyable format {:?}, skipping blit",
                    self.name,
                    source.name,
                    source.format
                );
                continue;
            }

            used.push(index);
            backend.copy_texture(source.texture, destination.texture, region);
            copies += 1;
        }
        copies
    }

    /// Destroy every attachment texture.
    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for attachment in &self.attachments {
            backend.destroy_texture(attachment.texture);
        }
    }
}

/// Creates framebuffers and memoizes them by target name for the duration of one graph build.
#[derive(Debug, Default)]
pub struct FramebufferRegistry {
    framebuffers: BTreeMap<String, Arc<Framebuffer>>,
    created: Vec<String>,
}

impl FramebufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the framebuffer for `name`, creating it on first request.
    ///
    /// Its size is `size_factor * window_size * supersampling`. The viewport target always gets a
    /// single 8-bit RGBA attachment regardless of what was declared.
    pub fn get_or_create<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        config: Option<&RenderTargetConfig>,
        window_size: (u32, u32),
        supersampling: f32,
    ) -> BackendResult<Arc<Framebuffer>> {
        if let Some(existing) = self.framebuffers.get(name) {
            log::info!("Reusing already created framebuffer {}", name);
            return Ok(existing.clone());
        }

        let size_factor = config.map(|c| c.size).unwrap_or((1.0, 1.0));
        let width = (size_factor.0 * window_size.0 as f32 * supersampling) as u32;
        let height = (size_factor.1 * window_size.1 as f32 * supersampling) as u32;
        let mut framebuffer = Framebuffer::new(name, width, height);

        if name == VIEWPORT_TARGET {
            framebuffer.add_unorm_rgba_buffer(backend, VIEWPORT_ATTACHMENT, 8)?;
        } else if let Some(config) = config {
            for attachment in &config.attachments {
                framebuffer.add_attachment(backend, attachment)?;
            }
        }

        log::info!(
            "Created framebuffer {} ({}x{}, {} attachments)",
            name,
            framebuffer.width,
            framebuffer.height,
            framebuffer.attachments.len()
        );

        let framebuffer = Arc::new(framebuffer);
        self.framebuffers.insert(name.to_string(), framebuffer.clone());
        self.created.push(name.to_string());
        Ok(framebuffer)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Framebuffer>> {
        self.framebuffers.get(name)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Framebuffers in creation order.
    pub fn into_framebuffers(mut self) -> Vec<Arc<Framebuffer>> {
        self.created
            .iter()
            .filter_map(|name| self.framebuffers.remove(name))
            .collect()
    }
}
