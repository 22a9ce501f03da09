//! Headless GPU backend for testing and offscreen use.
//!
//! No GPU work is performed. Buffer and texture contents live in memory, copies and presents move
//! real bytes, and every recorded command is appended to an inspectable log.

use std::collections::HashMap;
use std::ops::Range;

use crate::backend::traits::*;
use crate::backend::types::*;

/// A command recorded by [`HeadlessBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    BeginRenderPass {
        label: Option<String>,
        color_views: Vec<TextureViewHandle>,
        color_loads: Vec<LoadOp>,
        depth_view: Option<TextureViewHandle>,
        depth_load: Option<LoadOp>,
    },
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindings {
        pipeline: RenderPipelineHandle,
        bindings: Vec<ResourceBinding>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer(BufferHandle),
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    SetScissor(Rect2D),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        instances: Range<u32>,
    },
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
        region: Rect2D,
    },
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    Present(TextureHandle),
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDescriptor,
    data: Vec<u8>,
}

/// Headless backend that records commands instead of executing them.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    alignment: u64,
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, HeadlessTexture>,
    views: HashMap<u64, u64>,
    shader_modules: HashMap<u64, String>,
    pipelines: HashMap<u64, Option<String>>,
    commands: Vec<RecordedCommand>,
    pending_errors: Vec<String>,
    presented: Option<(u32, u32, Vec<u8>)>,
    frames: u64,
}

impl HeadlessBackend {
    /// Create a headless backend with a `width` x `height` surface and a 256 byte uniform offset
    /// alignment.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alignment: 256,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            shader_modules: HashMap::new(),
            pipelines: HashMap::new(),
            commands: Vec::new(),
            pending_errors: Vec::new(),
            presented: None,
            frames: 0,
        }
    }

    /// Override the reported uniform offset alignment.
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Recorded commands since creation or the last [`Self::clear_commands`].
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Number of frames submitted via `end_frame`.
    pub fn frames_submitted(&self) -> u64 {
        self.frames
    }

    /// Make the next `poll_errors` report `message` as a driver error.
    pub fn inject_error(&mut self, message: impl Into<String>) {
        self.pending_errors.push(message.into());
    }

    /// Contents of a buffer.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    /// Contents of a texture.
    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.data.as_slice())
    }

    /// Descriptor a texture was created with.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    /// Texture a view was created from.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.views.get(&view.0).copied().map(TextureHandle)
    }

    /// Last image handed to `present` as `(width, height, bytes)`.
    pub fn presented(&self) -> Option<&(u32, u32, Vec<u8>)> {
        self.presented.as_ref()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Number of draw commands currently in the log.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. })
            })
            .count()
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn surface_format(&self) -> TextureFormat {
        TextureFormat::Rgba8Unorm
    }

    fn min_uniform_offset_alignment(&self) -> u64 {
        self.alignment
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        self.commands.push(RecordedCommand::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.commands.push(RecordedCommand::EndFrame);
        self.frames += 1;
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.allocate_id();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            label: desc.label.clone(),
            size: desc.size.max(data.len() as u64),
            usage: desc.usage,
        })?;
        if let Some(buffer) = self.buffers.get_mut(&handle.0) {
            buffer[..data.len()].copy_from_slice(data);
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(&buffer.0) else {
            log::error!("HeadlessBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > target.len() {
            log::error!(
                "HeadlessBackend: write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                target.len()
            );
            return;
        }
        target[start..end].copy_from_slice(data);
        self.commands.push(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.allocate_id();
        let size = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
        self.textures.insert(
            id,
            HeadlessTexture {
                desc: desc.clone(),
                data: vec![0; size],
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", texture)));
        }
        let id = self.allocate_id();
        self.views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(target) = self.textures.get_mut(&texture.0) else {
            log::error!("HeadlessBackend: write to unknown texture {:?}", texture);
            return;
        };
        let row = (width * target.desc.format.bytes_per_pixel()) as usize;
        let dst_row = (target.desc.width * target.desc.format.bytes_per_pixel()) as usize;
        for y in 0..height.min(target.desc.height) as usize {
            if y * row >= data.len() {
                break;
            }
            let src =&data[y * row..((y + 1) * row).min(data.len())];
            let len = src.len().min(dst_row);
            target.data[y * dst_row..y * dst_row + len].copy_from_slice(&src[..len]);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn create_shader_module(
        &mut self,
        desc: &ShaderModuleDescriptor,
    ) -> BackendResult<ShaderModuleHandle> {
        let id = self.allocate_id();
        self.shader_modules.insert(id, desc.source.clone());
        Ok(ShaderModuleHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        for module in [desc.vertex_module, desc.fragment_module] {
            if !self.shader_modules.contains_key(&module.0) {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "unknown shader module {:?}",
                    module
                )));
            }
        }
        let id = self.allocate_id();
        self.pipelines.insert(id, desc.label.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle, region: Rect2D) {
        self.commands
            .push(RecordedCommand::CopyTexture { src, dst, region });

        let Some(source) = self.textures.get(&src.0) else {
            return;
        };
        let (src_width, format, bytes) = (
            source.desc.width,
            source.desc.format,
            source.data.clone(),
        );
        let Some(target) = self.textures.get_mut(&dst.0) else {
            return;
        };
        if target.desc.format != format {
            log::warn!(
                "HeadlessBackend: copy between {:?} and {:?} ignored",
                format,
                target.desc.format
            );
            return;
        }
        let bpp = format.bytes_per_pixel() as usize;
        let dst_width = target.desc.width as usize;
        for y in region.y..region.y + region.height {
            let src_start = (y as usize * src_width as usize + region.x as usize) * bpp;
            let dst_start = (y as usize * dst_width + region.x as usize) * bpp;
            let len = region.width as usize * bpp;
            if src_start + len <= bytes.len() && dst_start + len <= target.data.len() {
                target.data[dst_start..dst_start + len]
                    .copy_from_slice(&bytes[src_start..src_start + len]);
            }
        }
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        for attachment in &desc.color_attachments {
            if let LoadOp::Clear(color) = attachment.load_op {
                if let Some(texture) = self
                    .views
                    .get(&attachment.view.0)
                    .and_then(|t| self.textures.get_mut(t))
                {
                    if texture.desc.format == TextureFormat::Rgba8Unorm {
                        let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                        for chunk in texture.data.chunks_exact_mut(4) {
                            chunk.copy_from_slice(&texel);
                        }
                    }
                }
            }
        }
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_views: desc.color_attachments.iter().map(|a| a.view).collect(),
            color_loads: desc.color_attachments.iter().map(|a| a.load_op.clone()).collect(),
            depth_view: desc.depth_stencil_attachment.as_ref().map(|d| d.view),
            depth_load: desc
                .depth_stencil_attachment
                .as_ref()
                .map(|d| d.depth_load_op.clone()),
        });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.commands.push(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bindings(
        &mut self,
        pipeline: RenderPipelineHandle,
        bindings: &[ResourceBinding],
    ) -> BackendResult<()> {
        if !self.pipelines.contains_key(&pipeline.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", pipeline)));
        }
        self.commands.push(RecordedCommand::SetBindings {
            pipeline,
            bindings: bindings.to_vec(),
        });
        Ok(())
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.commands
            .push(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, _format: IndexFormat) {
        self.commands.push(RecordedCommand::SetIndexBuffer(buffer));
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, _min: f32, _max: f32) {
        self.commands.push(RecordedCommand::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.commands
            .push(RecordedCommand::SetScissor(Rect2D::new(x, y, width, height)));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands
            .push(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        self.commands
            .push(RecordedCommand::DrawIndexed { indices, instances });
    }

    fn present(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let source = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        self.presented = Some((source.desc.width, source.desc.height, source.data.clone()));
        self.commands.push(RecordedCommand::Present(texture));
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        self.textures
            .get(&texture.0)
            .map(|t| t.data.clone())
            .ok_or_else(|| BackendError::ReadbackFailed(format!("unknown texture {:?}", texture)))
    }

    fn poll_errors(&mut self) -> BackendResult<()> {
        if self.pending_errors.is_empty() {
            return Ok(());
        }
        Err(BackendError::DriverError(self.pending_errors.remove(0)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.views.retain(|_, t| *t != texture.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_texture_moves_region_bytes() {
        let mut backend = HeadlessBackend::new(4, 4);
        let desc = TextureDescriptor {
            width: 2,
            height: 2,
            ..Default::default()
        };
        let src = backend.create_texture(&desc).unwrap();
        let dst = backend.create_texture(&desc).unwrap();
        backend.write_texture(src, &[7u8; 16], 2, 2);

        backend.copy_texture(src, dst, Rect2D::new(0, 0, 1, 2));

        let data = backend.texture_data(dst).unwrap();
        assert_eq!(&data[0..4], &[7, 7, 7, 7]);
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
        assert_eq!(&data[8..12], &[7, 7, 7, 7]);
    }

    #[test]
    fn test_injected_error_is_reported_once() {
        let mut backend = HeadlessBackend::new(4, 4);
        backend.inject_error("validation failed");
        assert!(matches!(
            backend.poll_errors(),
            Err(BackendError::DriverError(msg)) if msg == "validation failed"
        ));
        assert!(backend.poll_errors().is_ok());
    }

    #[test]
    fn test_write_buffer_out_of_range_is_ignored() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 8,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        backend.write_buffer(buffer, 4, &[1; 8]);
        assert_eq!(backend.buffer_data(buffer).unwrap(), &[0; 8]);
    }
}
