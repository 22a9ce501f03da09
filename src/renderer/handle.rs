//! Thread-safe control surface of a running renderer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::resize::ResizeDebouncer;

/// State shared between the renderer and its handles.
#[derive(Debug)]
pub(crate) struct Shared {
    pub debouncer: Mutex<ResizeDebouncer>,
    pub screenshot: Mutex<Option<PathBuf>>,
    pub must_recreate: AtomicBool,
    pub closing: AtomicBool,
}

impl Shared {
    pub fn new(window_size: (u32, u32), debounce: Duration) -> Self {
        Self {
            debouncer: Mutex::new(ResizeDebouncer::new(window_size, debounce)),
            screenshot: Mutex::new(None),
            must_recreate: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        }
    }
}

/// Cloneable handle for driving a [`Renderer`](super::Renderer) from other threads.
///
/// Requests are picked up at the start of the next frame.
#[derive(Debug, Clone)]
pub struct RendererHandle {
    shared: Arc<Shared>,
}

impl RendererHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Report a new window size. Bursts are collapsed into one graph rebuild.
    pub fn notify_resize(&self, width: u32, height: u32) {
        self.shared.debouncer.lock().on_resize_event(width, height);
    }

    /// Write the next presented frame to `path` as PNG.
    pub fn request_screenshot(&self, path: impl Into<PathBuf>) {
        *self.shared.screenshot.lock() = Some(path.into());
    }

    /// Rebuild the pass graph before the next frame.
    pub fn set_must_recreate(&self) {
        self.shared.must_recreate.store(true, Ordering::Release);
    }

    /// Stop rendering; every later frame is skipped.
    pub fn request_close(&self) {
        self.shared.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn is_resizing(&self) -> bool {
        self.shared.debouncer.lock().is_resizing()
    }
}
