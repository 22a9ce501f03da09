//! Frame orchestration against the headless backend.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use glam::{Vec3, Vec4};
use image::GenericImageView;
use parking_lot::Mutex;
use rstest::rstest;

use deferred_renderer::backend::{BackendError, LoadOp, RecordedCommand};
use deferred_renderer::error::TextureError;
use deferred_renderer::render_graph::CURRENT_EYE_MEMBER;
use deferred_renderer::renderer::{CapturedFrame, FrameSink};
use deferred_renderer::resources::{
    flags, ImageFileLoader, Material, TextureData, TextureLoader, TextureSlot, TextureSource,
};
use deferred_renderer::scene::{Geometry, Node, ShaderProperties, Transform};
use deferred_renderer::shader::InMemoryShaders;
use deferred_renderer::uniform::{ArenaKind, UniformValue};
use deferred_renderer::{
    FrameOutcome, PipelineDescriptor, RendererError, RenderingQuality, Scene, SkipReason,
};

fn cube_scene() -> (Arc<Scene>, Arc<Node>) {
    let scene = Arc::new(Scene::new());
    let cube = scene.add_node(Node::new("Cube", Geometry::cube()));
    (scene, cube)
}

fn rendered(outcome: FrameOutcome) -> deferred_renderer::FrameStats {
    match outcome {
        FrameOutcome::Rendered(stats) => stats,
        FrameOutcome::Skipped(reason) => panic!("frame skipped: {reason:?}"),
    }
}

#[test]
fn test_cube_renders_every_pass() {
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer(scene);

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.passes_executed, 3);
    // One geometry draw plus the two fullscreen passes
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.nodes_initialized, 1);
    assert!(renderer.has_object(cube.id()));
    assert!(renderer.backend().presented().is_some());

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.nodes_initialized, 0);
    assert_eq!(renderer.backend().frames_submitted(), 2);
}

#[rstest]
#[case::empty_scene(None)]
#[case::invisible(Some(false))]
fn test_frames_without_visible_geometry_are_skipped(#[case] visible: Option<bool>) {
    let scene = Arc::new(Scene::new());
    if let Some(visible) = visible {
        scene.add_node(Node::new("Hidden", Geometry::cube())).set_visible(visible);
    }
    let mut renderer = common::renderer(scene);

    assert_eq!(
        renderer.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::NoGeometry)
    );
    assert_eq!(renderer.backend().frames_submitted(), 0);
}

#[test]
fn test_empty_geometry_is_not_drawn() {
    let scene = Arc::new(Scene::new());
    scene.add_node(Node::new("Empty", Geometry::new(Vec::new())));
    let mut renderer = common::renderer(scene);

    assert_eq!(
        renderer.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::NoGeometry)
    );
}

#[test]
fn test_close_request_skips_frames() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    let handle = renderer.handle();

    handle.request_close();
    assert!(handle.is_closing());
    assert_eq!(
        renderer.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::Closing)
    );
}

#[test]
fn test_locked_geometry_keeps_previous_upload() {
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());

    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let writer = {
        let cube = cube.clone();
        thread::spawn(move || {
            let mut geometry = cube.lock_geometry();
            *geometry = Geometry::sphere(8, 6);
            cube.mark_dirty();
            locked_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
    };
    locked_rx.recv().unwrap();

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.geometry_updates_skipped, 1);
    assert!(cube.is_dirty());

    release_tx.send(()).unwrap();
    writer.join().unwrap();

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.geometry_updates_skipped, 0);
    assert!(!cube.is_dirty());
}

#[test]
fn test_resize_burst_rebuilds_once() {
    let (scene, _) = cube_scene();
    let config = deferred_renderer::RendererConfig {
        resize_debounce: Duration::from_millis(200),
        ..common::config()
    };
    let mut renderer = common::renderer_with(scene, common::deferred(), None, config);
    let handle = renderer.handle();

    let notifier = {
        let handle = handle.clone();
        thread::spawn(move || {
            for (width, height) in [(80, 60), (100, 75), (128, 96)] {
                handle.notify_resize(width, height);
            }
        })
    };
    notifier.join().unwrap();

    assert!(handle.is_resizing());
    assert_eq!(
        renderer.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::Recreating)
    );
    assert_eq!(renderer.graph_builds(), 1);

    thread::sleep(Duration::from_millis(250));
    rendered(renderer.render_frame().unwrap());
    assert_eq!(renderer.graph_builds(), 2);
    assert_eq!(renderer.window_size(), (128, 96));
    let viewport = renderer.graph().framebuffer("Viewport").unwrap();
    assert_eq!((viewport.width(), viewport.height()), (128, 96));

    rendered(renderer.render_frame().unwrap());
    assert_eq!(renderer.graph_builds(), 2);
}

#[test]
fn test_resize_without_debounce_applies_on_next_frame() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);

    renderer.handle().notify_resize(32, 16);
    rendered(renderer.render_frame().unwrap());
    assert_eq!(renderer.window_size(), (32, 16));
    assert_eq!(renderer.graph_builds(), 2);
}

#[derive(Clone, Default)]
struct CountingLoader {
    loads: Arc<AtomicUsize>,
}

impl TextureLoader for CountingLoader {
    fn load(&self, source: &TextureSource) -> Result<TextureData, TextureError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        ImageFileLoader.load(source)
    }
}

#[test]
fn test_shared_texture_is_loaded_once() {
    let scene = Arc::new(Scene::new());
    let bricks = TextureSource::buffer(
        "bricks",
        TextureData::solid_color([200, 80, 60, 255], "bricks"),
    );
    for (i, x) in [-1.0, 1.0].into_iter().enumerate() {
        scene.add_node(
            Node::new(format!("Wall{i}"), Geometry::cube())
                .with_transform(Transform::from_position(Vec3::new(x, 0.0, 0.0)))
                .with_material(
                    Material::new("Brick").with_texture(TextureSlot::Diffuse, bricks.clone()),
                ),
        );
    }
    let mut renderer = common::renderer(scene);
    let loader = CountingLoader::default();
    renderer.set_texture_loader(loader.clone());

    rendered(renderer.render_frame().unwrap());
    rendered(renderer.render_frame().unwrap());

    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert!(renderer.texture_cache().contains("fromBuffer:bricks"));
    // The bricks plus the default texture
    assert_eq!(renderer.texture_cache().len(), 2);
}

#[test]
fn test_missing_texture_is_left_out_of_material_flags() {
    let scene = Arc::new(Scene::new());
    let node = scene.add_node(
        Node::new("Textured", Geometry::cube()).with_material(
            Material::new("Partial")
                .with_texture(
                    TextureSlot::Diffuse,
                    TextureSource::buffer("white", TextureData::solid_color([255; 4], "white")),
                )
                .with_texture(TextureSlot::Normal, TextureSource::file("missing/normal.png")),
        ),
    );
    let mut renderer = common::renderer(scene);

    rendered(renderer.render_frame().unwrap());
    assert_eq!(renderer.material_flags(node.id()), Some(flags::DIFFUSE));
    assert!(!renderer.texture_cache().contains("missing/normal.png"));
}

#[test]
fn test_instances_are_drawn_with_their_master() {
    let scene = Arc::new(Scene::new());
    let master = scene.add_node(Node::new("Rock", Geometry::cube()));
    for i in 0..3 {
        scene.add_node(
            Node::instance(format!("Rock{i}"), &master)
                .with_transform(Transform::from_position(Vec3::new(i as f32 * 2.0, 0.0, 0.0))),
        );
    }
    let mut renderer = common::renderer(scene);

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.nodes_initialized, 1);
    assert_eq!(renderer.object_count(), 1);

    let instanced: Vec<_> = renderer
        .backend()
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::DrawIndexed { instances, .. } => Some(instances.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(instanced, vec![0..3]);
}

#[test]
fn test_node_with_missing_shaders_uses_pass_default() {
    let scene = Arc::new(Scene::new());
    scene.add_node(
        Node::new("Custom", Geometry::cube()).with_shaders(&["Missing.vert", "Missing.frag"]),
    );
    let mut renderer = common::renderer(scene);

    let stats = rendered(renderer.render_frame().unwrap());
    assert_eq!(stats.draw_calls, 3);
}

#[test]
fn test_node_shaders_from_application_source() {
    let application = InMemoryShaders::new("app").with_file(
        "Flat.frag",
        include_str!("../src/shader/builtin/DefaultDeferred.frag.wgsl"),
    );
    let scene = Arc::new(Scene::new());
    scene.add_node(
        Node::new("Flat", Geometry::cube()).with_shaders(&["DefaultDeferred.vert", "Flat.frag"]),
    );
    let mut renderer = common::renderer_with(
        scene,
        common::deferred(),
        Some(Arc::new(application)),
        common::config(),
    );
    let mut baseline = common::renderer(cube_scene().0);

    rendered(renderer.render_frame().unwrap());
    rendered(baseline.render_frame().unwrap());
    assert!(renderer.shaders().compilations() > baseline.shaders().compilations());
}

#[test]
fn test_removed_node_releases_its_state() {
    let (scene, cube) = cube_scene();
    let other = scene.add_node(Node::new("Other", Geometry::triangle()));
    let mut renderer = common::renderer(scene.clone());
    rendered(renderer.render_frame().unwrap());
    let buffers = renderer.backend().live_buffers();

    scene.remove_node(cube.id());
    rendered(renderer.render_frame().unwrap());

    assert!(!renderer.has_object(cube.id()));
    assert!(renderer.has_object(other.id()));
    assert!(renderer.backend().live_buffers() < buffers);
}

#[test]
fn test_quality_preset_rebuilds_with_new_supersampling() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());
    assert_eq!(renderer.graph().supersampling(), 1.0);

    renderer.set_rendering_quality(RenderingQuality::Low);
    rendered(renderer.render_frame().unwrap());

    assert_eq!(renderer.graph().supersampling(), 0.5);
    let gbuffer = renderer.graph().framebuffer("GeometryBuffers").unwrap();
    assert_eq!((gbuffer.width(), gbuffer.height()), (common::WIDTH / 2, common::HEIGHT / 2));
}

#[test]
fn test_invalid_reconfigure_keeps_current_graph() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    let invalid = PipelineDescriptor::from_toml_str(
        r#"
        name = "NoViewport"
        [render_targets.G]
        attachments = [{ name = "Albedo", format = "RGBA_UInt8" }]
        [render_passes.Scene]
        type = "geometry"
        output = "G"
        "#,
    )
    .unwrap();

    assert!(matches!(
        renderer.reconfigure(invalid),
        Err(RendererError::Descriptor(_))
    ));
    assert_eq!(renderer.descriptor().name, "Deferred Shading");
    assert_eq!(renderer.graph().len(), 3);
    rendered(renderer.render_frame().unwrap());
}

#[test]
fn test_gpu_errors_surface_when_checking() {
    let (scene, _) = cube_scene();
    let config = deferred_renderer::RendererConfig {
        check_gpu_errors: true,
        ..common::config()
    };
    let mut renderer = common::renderer_with(scene, common::deferred(), None, config);
    renderer.backend_mut().inject_error("device lost");

    match renderer.render_frame() {
        Err(RendererError::Backend(BackendError::DriverError(message))) => {
            assert_eq!(message, "device lost")
        }
        other => panic!("expected a driver error, got {other:?}"),
    }
}

#[test]
fn test_screenshot_is_written_as_png() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    let path = std::env::temp_dir().join(format!("deferred-screenshot-{}.png", std::process::id()));

    renderer.handle().request_screenshot(&path);
    rendered(renderer.render_frame().unwrap());

    let image = image::open(&path).unwrap();
    assert_eq!(image.dimensions(), (common::WIDTH, common::HEIGHT));
    std::fs::remove_file(&path).unwrap();
}

#[derive(Default)]
struct CountingSink {
    frames: Arc<Mutex<Vec<(u32, u32)>>>,
    finished: Arc<AtomicUsize>,
}

impl FrameSink for CountingSink {
    fn push_frame(&mut self, frame: CapturedFrame) -> deferred_renderer::Result<()> {
        assert_eq!(frame.rgba.len(), (frame.width * frame.height * 4) as usize);
        self.frames.lock().push((frame.width, frame.height));
        Ok(())
    }

    fn finish(&mut self) -> deferred_renderer::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_recording_receives_every_frame() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    let sink = CountingSink::default();
    let frames = sink.frames.clone();
    let finished = sink.finished.clone();

    renderer.start_recording(Box::new(sink));
    for _ in 0..3 {
        rendered(renderer.render_frame().unwrap());
    }
    renderer.stop_recording().unwrap();
    rendered(renderer.render_frame().unwrap());

    assert!(!renderer.is_recording());
    assert_eq!(*frames.lock(), vec![(common::WIDTH, common::HEIGHT); 3]);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_releases_everything() {
    let (scene, _) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());
    assert!(renderer.backend().live_pipelines() > 0);

    renderer.shutdown();

    assert_eq!(
        renderer.render_frame().unwrap(),
        FrameOutcome::Skipped(SkipReason::Closing)
    );
    let backend = renderer.backend();
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_pipelines(), 0);
}

#[rstest]
#[case::transparent(
    Node::new("Glass", Geometry::cube())
        .with_material(Material::new("Glass").with_transparency(true).with_opacity(0.3))
)]
#[case::light_volume(Node::new("Volume", Geometry::sphere(8, 6)).as_light_volume())]
fn test_geometry_pass_filters_nodes(#[case] extra: Node) {
    let (scene, _) = cube_scene();
    scene.add_node(extra);
    let mut renderer = common::renderer(scene);

    let stats = rendered(renderer.render_frame().unwrap());
    // Only the opaque cube reaches the geometry pass
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.nodes_initialized, 2);
    assert_eq!(renderer.backend().draw_count(), 3);
}

struct Pulse;

impl ShaderProperties for Pulse {
    fn property_names(&self) -> Vec<String> {
        vec!["Tint".to_string(), "Strength".to_string()]
    }

    fn property(&self, name: &str) -> Option<UniformValue> {
        match name {
            "Tint" => Some(UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0))),
            "Strength" => Some(UniformValue::Float(0.5)),
            _ => None,
        }
    }
}

#[test]
fn test_shader_properties_fill_their_arena() {
    let scene = Arc::new(Scene::new());
    scene.add_node(
        Node::new("Pulsing", Geometry::cube())
            .with_material(Material::new("Pulse").with_double_sided(true))
            .with_shader_properties(Arc::new(Pulse)),
    );
    let mut renderer = common::renderer(scene);

    rendered(renderer.render_frame().unwrap());
    assert!(renderer.arenas().get(ArenaKind::ShaderProperties).cursor() >= 32);
}

#[test]
fn test_shader_material_change_is_picked_up() {
    let application = InMemoryShaders::new("app").with_file(
        "Tinted.frag",
        include_str!("../src/shader/builtin/DefaultDeferred.frag.wgsl"),
    );
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer_with(
        scene,
        common::deferred(),
        Some(Arc::new(application)),
        common::config(),
    );
    rendered(renderer.render_frame().unwrap());
    let compiled = renderer.shaders().compilations();

    cube.set_shader_material(&["DefaultDeferred.vert", "Tinted.frag"]);
    let stats = rendered(renderer.render_frame().unwrap());

    assert_eq!(stats.draw_calls, 3);
    assert_eq!(renderer.shaders().compilations(), compiled + 1);
}

#[test]
fn test_handle_can_force_rebuild() {
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());

    renderer.handle().set_must_recreate();
    cube.update_material(|material| material.diffuse = Vec3::ONE);
    rendered(renderer.render_frame().unwrap());

    assert_eq!(renderer.graph_builds(), 2);
    assert!(renderer.pipeline_count() > 0);
}

#[test]
fn test_moving_a_node_uploads_object_data() {
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());
    let idle = rendered(renderer.render_frame().unwrap());

    let mut transform = cube.transform();
    transform.translate(Vec3::X);
    cube.set_transform(transform);
    let moved = rendered(renderer.render_frame().unwrap());

    assert!(moved.uploads > idle.uploads);
}

#[test]
fn test_node_reclaiming_an_arena_range_is_uploaded() {
    let scene = Arc::new(Scene::new());
    let left = Transform::from_position(Vec3::X);
    let right = Transform::from_position(Vec3::X * 9.0);
    let first = scene.add_node(Node::new("First", Geometry::cube()).with_transform(left));
    let second = scene.add_node(Node::new("Second", Geometry::cube()).with_transform(right));
    let mut renderer = common::renderer(scene);

    second.set_visible(false);
    rendered(renderer.render_frame().unwrap());
    first.set_visible(false);
    second.set_visible(true);
    rendered(renderer.render_frame().unwrap());
    first.set_visible(true);
    second.set_visible(false);
    let stats = rendered(renderer.render_frame().unwrap());

    assert!(stats.uploads > 0);
    let arena = renderer.arenas().get(ArenaKind::ObjectData);
    let uploaded = renderer.backend().buffer_data(arena.buffer().unwrap()).unwrap();
    assert_eq!(&uploaded[..arena.cursor()], arena.written());
}

#[test]
fn test_replaced_geometry_is_uploaded() {
    let (scene, cube) = cube_scene();
    let mut renderer = common::renderer(scene);
    rendered(renderer.render_frame().unwrap());

    cube.set_geometry(Geometry::triangle());
    renderer.backend_mut().clear_commands();
    rendered(renderer.render_frame().unwrap());

    let draws: Vec<_> = renderer
        .backend()
        .commands()
        .iter()
        .filter(|command| {
            matches!(command, RecordedCommand::Draw { vertices, .. } if *vertices == (0..3))
        })
        .collect();
    // The triangle plus both fullscreen passes
    assert_eq!(draws.len(), 3);
}

/// G-buffer fill, then a second geometry pass that starts from copies of the albedo and depth.
const BLITTING: &str = r#"
name = "Blitting"

[render_targets.GeometryBuffers]
attachments = [
    { name = "NormalsMaterial", format = "RGBA_Float16" },
    { name = "DiffuseAlbedo", format = "RGBA_UInt8" },
    { name = "WorldPosition", format = "RGBA_Float16" },
    { name = "Depth", format = "Depth32" },
]

[render_targets.Composite]
attachments = [
    { name = "NormalsMaterial", format = "RGBA_Float16" },
    { name = "DiffuseAlbedo", format = "RGBA_UInt8" },
    { name = "WorldPosition", format = "RGBA_Float16" },
    { name = "Depth", format = "Depth32" },
]

[render_targets.HDR]
attachments = [{ name = "HDRBuffer", format = "RGBA_Float16" }]

[render_passes.Scene]
type = "geometry"
output = "GeometryBuffers"

[render_passes.Overlay]
type = "geometry"
blit_inputs = true
inputs = ["GeometryBuffers.DiffuseAlbedo", "GeometryBuffers.Depth"]
output = "Composite"

[render_passes.DeferredLighting]
type = "quad"
shaders = ["FullscreenPass.vert", "DeferredLighting.frag"]
inputs = ["Composite"]
output = "HDR"

[render_passes.Tonemapping]
type = "quad"
shaders = ["FullscreenPass.vert", "HDR.frag"]
inputs = ["HDR.HDRBuffer"]
output = "Viewport"
"#;

fn begin_of<'a>(commands: &'a [RecordedCommand], pass: &str) -> (usize, &'a RecordedCommand) {
    commands
        .iter()
        .enumerate()
        .find(|(_, command)| {
            matches!(command, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == pass)
        })
        .unwrap()
}

#[test]
fn test_blitting_pass_copies_qualified_inputs_before_loading_its_output() {
    let (scene, _cube) = cube_scene();
    let descriptor = PipelineDescriptor::from_toml_str(BLITTING).unwrap();
    let mut renderer = common::renderer_with(scene, descriptor, None, common::config());
    renderer.backend_mut().clear_commands();
    rendered(renderer.render_frame().unwrap());

    let graph = renderer.graph();
    let texture = |target: &str, attachment: &str| {
        graph
            .framebuffer(target)
            .unwrap()
            .attachment(attachment)
            .unwrap()
            .texture
    };
    let commands = renderer.backend().commands();
    let (scene_start, scene_begin) = begin_of(commands, "Scene");
    let (overlay_start, overlay_begin) = begin_of(commands, "Overlay");

    let copies: Vec<_> = commands[scene_start..overlay_start]
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::CopyTexture { src, dst, .. } => Some((*src, *dst)),
            _ => None,
        })
        .collect();
    assert_eq!(
        copies,
        vec![
            (
                texture("GeometryBuffers", "DiffuseAlbedo"),
                texture("Composite", "DiffuseAlbedo")
            ),
            (texture("GeometryBuffers", "Depth"), texture("Composite", "Depth")),
        ]
    );

    match overlay_begin {
        RecordedCommand::BeginRenderPass {
            color_loads,
            depth_load,
            ..
        } => {
            assert_eq!(color_loads.len(), 3);
            assert!(color_loads.iter().all(|load| *load == LoadOp::Load));
            assert_eq!(depth_load, &Some(LoadOp::Load));
        }
        other => panic!("expected a render pass, got {other:?}"),
    }
    match scene_begin {
        RecordedCommand::BeginRenderPass {
            color_loads,
            depth_load,
            ..
        } => {
            assert!(color_loads.iter().all(|load| matches!(load, LoadOp::Clear(_))));
            assert!(matches!(depth_load, Some(LoadOp::Clear(_))));
        }
        other => panic!("expected a render pass, got {other:?}"),
    }
}

const EYE_SHADER: &str = r#"
struct EyeParametersBlock {
    currentEye: i32,
}

@group(1) @binding(2) var<uniform> ShaderParameters: EyeParametersBlock;

@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(f32(ShaderParameters.currentEye));
}
"#;

#[test]
fn test_stereo_passes_receive_their_eye() {
    let descriptor = PipelineDescriptor::from_toml_str(
        r#"
        name = "Stereo"
        stereo_enabled = true

        [render_targets.LeftImage]
        attachments = [{ name = "Color", format = "RGBA_UInt8" }]

        [render_passes.Left]
        type = "quad"
        shaders = ["FullscreenPass.vert", "Eye.frag"]
        eye = "LeftEye"
        output = "LeftImage"

        [render_passes.Right]
        type = "quad"
        shaders = ["FullscreenPass.vert", "Eye.frag"]
        eye = "RightEye"
        inputs = ["LeftImage"]
        output = "Viewport"
        "#,
    )
    .unwrap();
    let application = InMemoryShaders::new("app").with_file("Eye.frag", EYE_SHADER);
    let (scene, _cube) = cube_scene();
    let mut renderer =
        common::renderer_with(scene, descriptor, Some(Arc::new(application)), common::config());
    rendered(renderer.render_frame().unwrap());

    let arena = renderer.arenas().get(ArenaKind::ShaderParameters);
    let eye = |pass: &str| {
        let range = renderer
            .graph()
            .pass(pass)
            .unwrap()
            .parameters()
            .member_range(CURRENT_EYE_MEMBER)
            .unwrap();
        i32::from_le_bytes(arena.bytes(range).try_into().unwrap())
    };
    assert_eq!(eye("Left"), 0);
    assert_eq!(eye("Right"), 1);
}
