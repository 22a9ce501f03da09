//! Backend abstraction layer
//!
//! Provides the handle-based [`GraphicsBackend`] trait with a wgpu implementation for on-screen
//! rendering and a headless implementation that records commands in memory.

pub mod headless;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{HeadlessBackend, RecordedCommand};
pub use traits::*;
pub use types::*;
pub use wgpu_backend::WgpuBackend;
