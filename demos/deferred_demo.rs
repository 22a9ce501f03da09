//! Deferred shading demo.
//!
//! Renders a small scene through `deferred_shading.toml`: a floor, a few spinning cubes, a ring
//! of instanced spheres and some point lights.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example deferred_demo
//! cargo run --example deferred_demo -- --quality low --no-vsync
//! # Offscreen: render 10 frames and write the last one to a PNG
//! cargo run --example deferred_demo -- --headless --frames 10 --screenshot frame.png
//! ```
//!
//! Keys: `1`-`4` switch quality presets, `F12` writes `screenshot.png`, `Escape` quits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::{Quat, Vec3};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use deferred_renderer::resources::Material;
use deferred_renderer::scene::{Camera, Geometry, Node, NodeId, PointLight, Transform};
use deferred_renderer::{
    FrameOutcome, GraphicsBackend, HeadlessBackend, PipelineDescriptor, Renderer, RendererConfig,
    RenderingQuality, Scene, Settings, WgpuBackend,
};

const DEFAULT_PIPELINE: &str = include_str!("deferred_shading.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum QualityArg {
    Low,
    Medium,
    High,
    Ultra,
}

impl From<QualityArg> for RenderingQuality {
    fn from(value: QualityArg) -> Self {
        match value {
            QualityArg::Low => RenderingQuality::Low,
            QualityArg::Medium => RenderingQuality::Medium,
            QualityArg::High => RenderingQuality::High,
            QualityArg::Ultra => RenderingQuality::Ultra,
        }
    }
}

/// Deferred shading demo
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Pipeline descriptor (.toml or .json); the bundled deferred pipeline when omitted
    #[arg(long)]
    pipeline: Option<PathBuf>,

    /// Directory searched for shaders before the built-in ones
    #[arg(long)]
    shaders: Option<PathBuf>,

    #[arg(long, value_enum)]
    quality: Option<QualityArg>,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    #[arg(long)]
    no_vsync: bool,

    /// Render without a window
    #[arg(long)]
    headless: bool,

    /// Frames to render in headless mode
    #[arg(long, default_value = "3")]
    frames: u32,

    /// Write the last frame to this PNG
    #[arg(long)]
    screenshot: Option<PathBuf>,
}

struct DemoScene {
    scene: Arc<Scene>,
    cubes: Vec<NodeId>,
}

fn build_scene() -> DemoScene {
    let scene = Arc::new(Scene::with_camera(Camera::new(
        Vec3::new(0.0, 4.0, 10.0),
        Vec3::ZERO,
    )));

    scene.add_node(
        Node::new("Floor", Geometry::plane(20.0, 20.0))
            .with_material(
                Material::new("Floor")
                    .with_diffuse(Vec3::splat(0.6))
                    .with_roughness(0.9),
            ),
    );

    let colors = [
        Vec3::new(0.9, 0.2, 0.2),
        Vec3::new(0.2, 0.9, 0.3),
        Vec3::new(0.2, 0.4, 0.9),
    ];
    let cubes = colors
        .iter()
        .enumerate()
        .map(|(i, color)| {
            let x = (i as f32 - 1.0) * 3.0;
            scene
                .add_node(
                    Node::new(format!("Cube{i}"), Geometry::cube())
                        .with_transform(Transform::from_position(Vec3::new(x, 1.0, 0.0)))
                        .with_material(
                            Material::new("Painted")
                                .with_diffuse(*color)
                                .with_roughness(0.4)
                                .with_metallic(0.1),
                        ),
                )
                .id()
        })
        .collect();

    let sphere = scene.add_node(
        Node::new("Sphere", Geometry::sphere(24, 16))
            .with_transform(Transform::from_position_scale(
                Vec3::new(0.0, 0.5, -4.0),
                Vec3::splat(0.5),
            ))
            .with_material(
                Material::new("Chrome")
                    .with_diffuse(Vec3::splat(0.8))
                    .with_metallic(0.9),
            ),
    );
    for i in 0..12 {
        let angle = i as f32 / 12.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 6.0, 0.5, angle.sin() * 6.0);
        scene.add_node(
            Node::instance(format!("Sphere{i}"), &sphere)
                .with_transform(Transform::from_position_scale(position, Vec3::splat(0.5))),
        );
    }

    for (i, color) in colors.iter().enumerate() {
        let x = (i as f32 - 1.0) * 4.0;
        scene.add_light(
            PointLight::new(Vec3::new(x, 3.0, 2.0), *color, 8.0).with_attenuation(0.14, 0.07),
        );
    }
    scene.add_light(PointLight::new(Vec3::new(0.0, 8.0, 0.0), Vec3::ONE, 4.0));

    DemoScene { scene, cubes }
}

fn animate(demo: &DemoScene, seconds: f32) {
    for (i, id) in demo.cubes.iter().enumerate() {
        if let Some(node) = demo.scene.node(*id) {
            let mut transform = node.transform();
            transform.rotation = Quat::from_rotation_y(seconds * (0.5 + i as f32 * 0.3));
            node.set_transform(transform);
        }
    }
}

fn load_descriptor(args: &Args) -> Result<PipelineDescriptor, Box<dyn std::error::Error>> {
    Ok(match &args.pipeline {
        Some(path) => PipelineDescriptor::load(path)?,
        None => PipelineDescriptor::from_toml_str(DEFAULT_PIPELINE)?,
    })
}

fn create_renderer<B: GraphicsBackend>(
    backend: B,
    demo: &DemoScene,
    args: &Args,
) -> Result<Renderer<B>, Box<dyn std::error::Error>> {
    let shaders = args.shaders.clone().map(|root| {
        Arc::new(deferred_renderer::shader::DirectoryShaders::new(root))
            as Arc<dyn deferred_renderer::shader::ShaderSource>
    });
    let config = RendererConfig {
        application_name: "Deferred Demo".to_string(),
        width: args.width,
        height: args.height,
        ..Default::default()
    };
    let mut renderer = Renderer::new(
        backend,
        demo.scene.clone(),
        Arc::new(Settings::new()),
        load_descriptor(args)?,
        shaders,
        config,
    )?;
    if let Some(quality) = args.quality {
        renderer.set_rendering_quality(quality.into());
    }
    Ok(renderer)
}

fn run_headless(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let demo = build_scene();
    let backend = HeadlessBackend::new(args.width, args.height);
    let mut renderer = create_renderer(backend, &demo, args)?;

    for frame in 0..args.frames {
        if frame + 1 == args.frames {
            if let Some(path) = &args.screenshot {
                renderer.handle().request_screenshot(path.clone());
            }
        }
        animate(&demo, frame as f32 / 60.0);
        match renderer.render_frame()? {
            FrameOutcome::Rendered(stats) => log::info!("Frame {frame}: {stats:?}"),
            FrameOutcome::Skipped(reason) => log::info!("Frame {frame} skipped: {reason:?}"),
        }
    }
    renderer.shutdown();
    Ok(())
}

fn run_windowed(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Deferred Demo")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)?,
    );

    let demo = build_scene();
    let backend = WgpuBackend::new(window.clone(), !args.no_vsync)?;
    let mut renderer = create_renderer(backend, &demo, &args)?;
    let handle = renderer.handle();
    let start = Instant::now();

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    handle.request_close();
                    elwt.exit();
                }
                WindowEvent::Resized(size) => handle.notify_resize(size.width, size.height),
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key,
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => match logical_key.as_ref() {
                    Key::Named(NamedKey::Escape) => {
                        handle.request_close();
                        elwt.exit();
                    }
                    Key::Named(NamedKey::F12) => handle.request_screenshot("screenshot.png"),
                    Key::Character("1") => renderer.set_rendering_quality(RenderingQuality::Low),
                    Key::Character("2") => renderer.set_rendering_quality(RenderingQuality::Medium),
                    Key::Character("3") => renderer.set_rendering_quality(RenderingQuality::High),
                    Key::Character("4") => renderer.set_rendering_quality(RenderingQuality::Ultra),
                    _ => {}
                },
                _ => {}
            },
            Event::AboutToWait => {
                animate(&demo, start.elapsed().as_secs_f32());
                match renderer.render_frame() {
                    Ok(FrameOutcome::Skipped(reason)) => log::trace!("Frame skipped: {reason:?}"),
                    Ok(FrameOutcome::Rendered(_)) => {}
                    Err(e) => {
                        log::error!("Rendering failed: {e}");
                        elwt.exit();
                    }
                }
                window.request_redraw();
            }
            Event::LoopExiting => renderer.shutdown(),
            _ => {}
        }
    })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.headless {
        run_headless(&args)
    } else {
        run_windowed(args)
    }
}
