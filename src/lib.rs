//! Deferred Renderer - a render pass graph engine for deferred shading
//!
//! A pipeline descriptor (TOML or JSON) declares render targets, passes and the flow between them.
//! The renderer compiles it into a graph of framebuffers and passes and draws a shared [`Scene`]
//! through it every frame.
//!
//! # Features
//! - Declarative pass graph with validated flow, shared framebuffers and inter-pass blits
//! - Uniform blocks sub-allocated from a few large per-frame arenas, uploaded only when changed
//! - Per-node GPU state created lazily, never blocking on application threads
//! - Instanced drawing, shader reflection with named uniform blocks, texture caching
//! - wgpu backend for windows, headless backend for tests and offscreen rendering
//! - Debounced resizes, quality presets, screenshots and frame recording

pub mod backend;
pub mod error;
pub mod render_graph;
pub mod renderer;
pub mod resize;
pub mod resources;
pub mod scene;
pub mod settings;
pub mod shader;
pub mod uniform;

use std::time::Duration;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use error::{RendererError, Result};
pub use render_graph::{PassGraph, PipelineDescriptor};
pub use renderer::{FrameOutcome, FrameStats, Renderer, RendererHandle, SkipReason};
pub use scene::Scene;
pub use settings::{RenderingQuality, Settings};
pub use uniform::ArenaCapacities;

/// Configuration for creating a [`Renderer`]
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Name used in logs and window titles
    pub application_name: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Sleep applied when a frame is skipped
    pub idle_sleep: Duration,
    /// Quiet period before a burst of resizes is applied
    pub resize_debounce: Duration,
    pub arena_capacities: ArenaCapacities,
    /// Query the GPU for errors after every pass
    pub check_gpu_errors: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Deferred Renderer".to_string(),
            width: 1280,
            height: 720,
            idle_sleep: Duration::from_millis(200),
            resize_debounce: Duration::from_millis(200),
            arena_capacities: ArenaCapacities::default(),
            check_gpu_errors: false,
        }
    }
}
