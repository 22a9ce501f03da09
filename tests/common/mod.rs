//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use deferred_renderer::shader::ShaderSource;
use deferred_renderer::{
    ArenaCapacities, HeadlessBackend, PipelineDescriptor, Renderer, RendererConfig, Scene, Settings,
};

/// The pipeline the demo ships with: G-buffer, lighting into HDR, tone mapping to the viewport.
pub const DEFERRED: &str = include_str!("../../demos/deferred_shading.toml");

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config() -> RendererConfig {
    RendererConfig {
        application_name: "integration".to_string(),
        width: WIDTH,
        height: HEIGHT,
        idle_sleep: Duration::ZERO,
        resize_debounce: Duration::ZERO,
        arena_capacities: ArenaCapacities {
            object_data: 256 * 1024,
            light_parameters: 64 * 1024,
            vr_parameters: 2 * 1024,
            shader_properties: 64 * 1024,
            shader_parameters: 16 * 1024,
        },
        check_gpu_errors: false,
    }
}

pub fn deferred() -> PipelineDescriptor {
    PipelineDescriptor::from_toml_str(DEFERRED).unwrap()
}

pub fn renderer(scene: Arc<Scene>) -> Renderer<HeadlessBackend> {
    renderer_with(scene, deferred(), None, config())
}

pub fn renderer_with(
    scene: Arc<Scene>,
    descriptor: PipelineDescriptor,
    shaders: Option<Arc<dyn ShaderSource>>,
    config: RendererConfig,
) -> Renderer<HeadlessBackend> {
    init_logger();
    Renderer::new(
        HeadlessBackend::new(config.width, config.height),
        scene,
        Arc::new(Settings::new()),
        descriptor,
        shaders,
        config,
    )
    .unwrap()
}
