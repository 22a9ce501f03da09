//! Screenshots and frame recording.

use std::path::Path;

use crate::backend::{GraphicsBackend, TextureFormat, TextureHandle};
use crate::error::{RendererError, Result};

/// One read-back frame, tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Receives every frame while a recording is active, e.g. an external video encoder.
pub trait FrameSink: Send {
    fn push_frame(&mut self, frame: CapturedFrame) -> Result<()>;

    /// Called once when the recording stops.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Read back `texture` as RGBA8.
///
/// BGRA surfaces are swizzled; other formats are rejected.
pub(crate) fn capture<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    texture: TextureHandle,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> Result<CapturedFrame> {
    let mut rgba = backend.read_texture(texture)?;
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {}
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
            for pixel in rgba.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }
        other => {
            return Err(RendererError::Capture(format!(
                "cannot capture {other:?} images"
            )))
        }
    }

    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(RendererError::Capture(format!(
            "read back {} bytes, expected {expected} for {width}x{height}",
            rgba.len()
        )));
    }
    Ok(CapturedFrame {
        width,
        height,
        rgba,
    })
}

/// Write `frame` as a PNG file.
pub(crate) fn write_png(frame: &CapturedFrame, path: &Path) -> Result<()> {
    image::save_buffer_with_format(
        path,
        &frame.rgba,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| RendererError::Capture(format!("{}: {e}", path.display())))?;
    log::info!(
        "Screenshot {}x{} written to {}",
        frame.width,
        frame.height,
        path.display()
    );
    Ok(())
}
