//! Frame orchestration.
//!
//! [`Renderer`] owns every GPU object of a scene rendering: the pass graph and its framebuffers,
//! the uniform arenas, the per-node GPU state side table, cached textures and pipelines. One call
//! to [`Renderer::render_frame`] runs one frame:
//!
//! 1. apply debounced resizes and rebuild the pass graph if requested
//! 2. discover visible nodes and tear down the state of removed ones
//! 3. refresh global, pass and object uniform blocks and upload the arenas that changed
//! 4. rebuild instance buffers of instanced nodes
//! 5. execute the passes in flow order and present the final image
//! 6. hand the frame to a pending screenshot or an active recording

mod capture;
mod execute;
mod globals;
mod handle;
mod instancing;
mod object_state;

pub use capture::{CapturedFrame, FrameSink};
pub use execute::NULL_UNIFORM_SIZE;
pub use globals::{LIGHT_PARAMETERS_BLOCK, MAX_LIGHTS, VR_PARAMETERS_BLOCK};
pub use handle::RendererHandle;
pub use instancing::{INSTANCE_LOCATIONS, INSTANCE_SLOT};
pub use object_state::{
    DEFAULT_INSTANCED_SHADERS, MATERIAL_BLOCK, MATRICES_BLOCK, SHADER_PROPERTIES_BLOCK,
};

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, SamplerDescriptor, SamplerHandle,
};
use crate::error::Result;
use crate::render_graph::{PassGraph, PassGraphBuilder, PipelineDescriptor};
use crate::resources::{ImageFileLoader, TextureCache, TextureLoader};
use crate::scene::{Node, NodeId, Scene};
use crate::settings::{RenderingQuality, Settings};
use crate::shader::{ShaderRepository, ShaderSource};
use crate::uniform::{ArenaKind, UniformArenas};
use crate::RendererConfig;

use execute::{execute_pass, BindingDiagnostics, DrawItem, FrameResources, PipelineCache};
use globals::{write_default_settings, FrameView, GlobalUniforms, SharedFrameView};
use handle::Shared;
use instancing::InstanceBuffers;
use object_state::{retain_live, GeometryRefresh, ObjectGpuState};

/// Arenas holding per-node blocks.
const OBJECT_ARENAS: [ArenaKind; 2] = [ArenaKind::ObjectData, ArenaKind::ShaderProperties];

/// The node owning each written range of an arena, in write order.
type Occupancy = Vec<(NodeId, Range<usize>)>;

/// Why a frame was not drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The renderer was asked to close or has shut down
    Closing,
    /// No visible node has geometry
    NoGeometry,
    /// The pass graph has no passes
    NoPasses,
    /// A resize is still being debounced
    Recreating,
}

/// Counters of one drawn frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes_executed: usize,
    pub draw_calls: usize,
    pub nodes_initialized: usize,
    /// Dirty geometry left stale because a writer held the node's lock
    pub geometry_updates_skipped: usize,
    /// Arena uploads issued
    pub uploads: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered(FrameStats),
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, FrameOutcome::Rendered(_))
    }

    pub fn stats(&self) -> Option<&FrameStats> {
        match self {
            FrameOutcome::Rendered(stats) => Some(stats),
            FrameOutcome::Skipped(_) => None,
        }
    }
}

/// Renders a [`Scene`] through the pass graph described by a [`PipelineDescriptor`].
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    scene: Arc<Scene>,
    settings: Arc<Settings>,
    descriptor: PipelineDescriptor,
    config: RendererConfig,
    shaders: ShaderRepository,
    arenas: UniformArenas,
    graph: PassGraph,
    textures: TextureCache,
    texture_loader: Box<dyn TextureLoader>,
    objects: HashMap<NodeId, ObjectGpuState>,
    /// Layout of each object arena as of its last upload
    uploaded: HashMap<ArenaKind, Occupancy>,
    view: SharedFrameView,
    globals: GlobalUniforms,
    pipelines: PipelineCache,
    diagnostics: BindingDiagnostics,
    default_sampler: SamplerHandle,
    null_buffer: BufferHandle,
    window_size: (u32, u32),
    shared: Arc<Shared>,
    recording: Option<Box<dyn FrameSink>>,
    graph_builds: usize,
    shut_down: bool,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Validate `descriptor`, create the renderer's GPU resources and build the pass graph.
    ///
    /// `shaders` is searched before the built-in shaders.
    pub fn new(
        mut backend: B,
        scene: Arc<Scene>,
        settings: Arc<Settings>,
        descriptor: PipelineDescriptor,
        shaders: Option<Arc<dyn ShaderSource>>,
        config: RendererConfig,
    ) -> Result<Self> {
        descriptor.validate()?;
        write_default_settings(&settings);
        if config.check_gpu_errors {
            settings.set("Renderer.CheckGPUErrors", true);
        }

        backend.resize(config.width.max(1), config.height.max(1));
        let window_size = backend.surface_size();
        scene.update_camera(|camera| camera.set_aspect(window_size.0 as f32, window_size.1 as f32));

        let arenas = UniformArenas::create(&mut backend, &config.arena_capacities)?;
        let mut textures = TextureCache::new();
        textures.ensure_default(&mut backend)?;
        let default_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("default".to_string()),
            ..Default::default()
        })?;
        let null_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("null uniforms".to_string()),
                size: NULL_UNIFORM_SIZE,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            },
            &vec![0; NULL_UNIFORM_SIZE as usize],
        )?;

        let view: SharedFrameView = Arc::new(RwLock::new(FrameView::default()));
        let shared = Arc::new(Shared::new(window_size, config.resize_debounce));
        log::info!(
            "Creating renderer for {} on {} at {}x{}",
            config.application_name,
            backend.name(),
            window_size.0,
            window_size.1
        );

        let mut renderer = Self {
            backend,
            scene,
            settings,
            descriptor,
            config,
            shaders: ShaderRepository::new(shaders),
            arenas,
            graph: PassGraph::default(),
            textures,
            texture_loader: Box::new(ImageFileLoader),
            objects: HashMap::new(),
            uploaded: HashMap::new(),
            globals: GlobalUniforms::new(view.clone()),
            view,
            pipelines: PipelineCache::default(),
            diagnostics: BindingDiagnostics::default(),
            default_sampler,
            null_buffer,
            window_size,
            shared,
            recording: None,
            graph_builds: 0,
            shut_down: false,
        };
        renderer.rebuild_graph()?;
        Ok(renderer)
    }

    /// Replace the loader used for textures not yet in the cache.
    pub fn set_texture_loader(&mut self, loader: impl TextureLoader + 'static) {
        self.texture_loader = Box::new(loader);
    }

    pub fn handle(&self) -> RendererHandle {
        RendererHandle::new(self.shared.clone())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn graph(&self) -> &PassGraph {
        &self.graph
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Number of pass graph builds, the initial one included.
    pub fn graph_builds(&self) -> usize {
        self.graph_builds
    }

    /// Nodes with live GPU state.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn has_object(&self, node: NodeId) -> bool {
        self.objects.contains_key(&node)
    }

    /// The `materialType` bits of a node, once its textures are resolved.
    pub fn material_flags(&self, node: NodeId) -> Option<i32> {
        self.objects.get(&node).map(ObjectGpuState::material_flags)
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.textures
    }

    pub fn shaders(&self) -> &ShaderRepository {
        &self.shaders
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn arenas(&self) -> &UniformArenas {
        &self.arenas
    }

    /// Apply a quality preset of the descriptor; the graph is rebuilt before the next frame.
    pub fn set_rendering_quality(&mut self, quality: RenderingQuality) {
        match self.descriptor.quality_preset(quality) {
            Some(preset) => {
                log::info!("Applying {} rendering quality", quality.name());
                self.settings.apply(preset);
            }
            None => log::warn!(
                "Pipeline {} has no {} quality preset",
                self.descriptor.name,
                quality.name()
            ),
        }
        self.shared.must_recreate.store(true, Ordering::Release);
    }

    /// Switch to another pipeline descriptor. It is validated before anything is released.
    pub fn reconfigure(&mut self, descriptor: PipelineDescriptor) -> Result<()> {
        descriptor.validate()?;
        log::info!(
            "Reconfiguring renderer from {} to {}",
            self.descriptor.name,
            descriptor.name
        );
        self.descriptor = descriptor;
        self.diagnostics = BindingDiagnostics::default();
        self.rebuild_graph()
    }

    /// Hand every following frame to `sink` until [`Self::stop_recording`].
    pub fn start_recording(&mut self, sink: Box<dyn FrameSink>) {
        if let Some(mut previous) = self.recording.replace(sink) {
            log::warn!("Replacing an active recording");
            if let Err(e) = previous.finish() {
                log::error!("Finishing the previous recording failed: {e}");
            }
        }
        log::info!("Recording started");
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        match self.recording.take() {
            Some(mut sink) => {
                log::info!("Recording stopped");
                sink.finish()
            }
            None => Ok(()),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Render one frame.
    pub fn render_frame(&mut self) -> Result<FrameOutcome> {
        if self.shut_down || self.shared.closing.load(Ordering::Acquire) {
            return Ok(FrameOutcome::Skipped(SkipReason::Closing));
        }

        let (released, resizing) = {
            let mut debouncer = self.shared.debouncer.lock();
            (debouncer.update(), debouncer.is_resizing())
        };
        if let Some(resize) = released {
            self.apply_resize(resize.width, resize.height);
        }
        if resizing {
            self.idle();
            return Ok(FrameOutcome::Skipped(SkipReason::Recreating));
        }
        if self.shared.must_recreate.swap(false, Ordering::AcqRel) {
            self.rebuild_graph()?;
        }

        let nodes = self.scene.nodes();
        let live: HashSet<NodeId> = nodes.iter().map(|n| n.id()).collect();
        let removed = retain_live(&mut self.backend, &mut self.objects, &live);
        if removed > 0 {
            log::debug!("Released GPU state of {removed} removed nodes");
        }

        let mut instances: HashMap<NodeId, Vec<Arc<Node>>> = HashMap::new();
        for node in nodes.iter().filter(|n| n.is_visible()) {
            if let Some(master) = node.instance_of() {
                instances.entry(master).or_default().push(node.clone());
            }
        }
        let visible: Vec<Arc<Node>> = nodes
            .into_iter()
            .filter(|n| n.is_visible() && !n.is_instance() && has_geometry(n))
            .collect();

        if self.graph.is_empty() {
            self.idle();
            return Ok(FrameOutcome::Skipped(SkipReason::NoPasses));
        }
        if visible.is_empty() {
            self.idle();
            return Ok(FrameOutcome::Skipped(SkipReason::NoGeometry));
        }

        self.backend.begin_frame()?;
        let recorded = self.record_frame(&visible, &instances);
        let ended = self.backend.end_frame();
        let stats = recorded?;
        ended?;

        self.capture_frame()?;
        if self.settings.get_or("Renderer.PrintGPUStats", false) {
            log::info!("Frame stats: {stats:?}");
        }
        Ok(FrameOutcome::Rendered(stats))
    }

    fn record_frame(
        &mut self,
        visible: &[Arc<Node>],
        instances: &HashMap<NodeId, Vec<Arc<Node>>>,
    ) -> Result<FrameStats> {
        let mut stats = FrameStats::default();
        let check_errors =
            self.config.check_gpu_errors || self.settings.get_or("Renderer.CheckGPUErrors", false);

        let stereo = self.descriptor.stereo_enabled && self.settings.get_or("vr.Active", false);
        *self.view.write() = FrameView::capture(&self.scene, &self.settings, stereo);
        stats.uploads += self.globals.update(&mut self.backend, &mut self.arenas)?;

        let arena = self.arenas.get_mut(ArenaKind::ShaderParameters);
        arena.reset();
        let mut changed = false;
        for pass in self.graph.passes_mut() {
            let offset = arena.advance_default()?;
            changed |= pass.parameters_mut().populate(arena, offset)?;
        }
        if changed && arena.copy_to_device(&mut self.backend) {
            stats.uploads += 1;
        }

        for kind in OBJECT_ARENAS {
            self.arenas.get_mut(kind).reset();
        }
        let mut changed = false;
        let mut occupancy: HashMap<ArenaKind, Occupancy> = HashMap::new();
        let mut ready = Vec::with_capacity(visible.len());
        for node in visible {
            let id = node.id();
            let instanced = instances.contains_key(&id);
            if !self.objects.contains_key(&id) {
                match ObjectGpuState::initialize(&mut self.backend, node, &self.view)? {
                    Some(state) => {
                        self.objects.insert(id, state);
                        stats.nodes_initialized += 1;
                    }
                    None => continue,
                }
            }
            let Some(state) = self.objects.get_mut(&id) else {
                continue;
            };

            if state.refresh_geometry(&mut self.backend, node)? == GeometryRefresh::Contended {
                stats.geometry_updates_skipped += 1;
            }
            state.refresh_program(&mut self.backend, &mut self.shaders, node, instanced);
            state.refresh_textures(
                &mut self.backend,
                &mut self.textures,
                self.texture_loader.as_ref(),
                node,
            )?;
            let starts = OBJECT_ARENAS.map(|kind| self.arenas.get(kind).cursor());
            changed |= state.populate(&mut self.arenas)?;
            for (kind, start) in OBJECT_ARENAS.into_iter().zip(starts) {
                let end = self.arenas.get(kind).cursor();
                if end > start {
                    occupancy.entry(kind).or_default().push((id, start..end));
                }
            }

            match instances.get(&id) {
                Some(copies) => {
                    let view = self.view.read();
                    let eye_view = if view.stereo { view.eye_views[0] } else { view.view };
                    let buffers = InstanceBuffers::update(
                        state.instances.take(),
                        &mut self.backend,
                        node.name(),
                        copies,
                        eye_view,
                        view.projection,
                    )?;
                    state.instances = Some(buffers);
                }
                None => {
                    if let Some(buffers) = state.instances.take() {
                        buffers.destroy(&mut self.backend);
                    }
                }
            }
            ready.push((node, instanced));
        }
        // A block only compares against its own last write, so a node returning to a range
        // another node filled meanwhile looks unchanged. The arena layout catches that.
        for kind in OBJECT_ARENAS {
            let layout = occupancy.remove(&kind).unwrap_or_default();
            let moved = self.uploaded.get(&kind) != Some(&layout);
            if (changed || moved) && self.arenas.get(kind).copy_to_device(&mut self.backend) {
                stats.uploads += 1;
                self.uploaded.insert(kind, layout);
            }
        }

        let camera = self.view.read().camera.position;
        let items: Vec<DrawItem<'_>> = ready
            .into_iter()
            .filter_map(|(node, instanced)| {
                let state = self.objects.get(&node.id())?;
                let material = node.read_material();
                Some(DrawItem {
                    node,
                    state,
                    transparent: material.transparent,
                    double_sided: material.double_sided,
                    instanced,
                    distance: node.transform().position.distance(camera),
                })
            })
            .collect();

        let default_texture = self.textures.ensure_default(&mut self.backend)?.view;
        let resources = FrameResources {
            arenas: &self.arenas,
            globals: &self.globals,
            default_texture,
            default_sampler: self.default_sampler,
            null_buffer: self.null_buffer,
        };
        for pass in self.graph.passes() {
            execute_pass(
                &mut self.backend,
                pass,
                &items,
                &resources,
                &mut self.pipelines,
                &mut self.diagnostics,
                &mut stats,
            )?;
            if check_errors {
                self.backend.poll_errors()?;
            }
        }

        match self
            .graph
            .final_output()
            .and_then(|output| output.color_attachments().next())
        {
            Some(image) => self.backend.present(image.texture)?,
            None => log::warn!("Final pass has no color attachment, nothing presented"),
        }
        Ok(stats)
    }

    /// Serve a pending screenshot and the active recording from the presented image.
    fn capture_frame(&mut self) -> Result<()> {
        let screenshot = self.shared.screenshot.lock().take();
        if screenshot.is_none() && self.recording.is_none() {
            return Ok(());
        }
        let Some((texture, format, width, height)) = self.graph.final_output().and_then(|output| {
            output
                .color_attachments()
                .next()
                .map(|image| (image.texture, image.format, output.width(), output.height()))
        }) else {
            return Ok(());
        };

        let frame = capture::capture(&mut self.backend, texture, width, height, format)?;
        if let Some(path) = screenshot {
            capture::write_png(&frame, &path)?;
        }
        if let Some(sink) = self.recording.as_mut() {
            sink.push_frame(frame)?;
        }
        Ok(())
    }

    fn apply_resize(&mut self, width: u32, height: u32) {
        self.backend.resize(width, height);
        self.window_size = self.backend.surface_size();
        let (width, height) = self.window_size;
        self.scene
            .update_camera(|camera| camera.set_aspect(width as f32, height as f32));
        self.shared.must_recreate.store(true, Ordering::Release);
        log::debug!("Window resized to {width}x{height}");
    }

    fn rebuild_graph(&mut self) -> Result<()> {
        self.pipelines.clear(&mut self.backend);
        self.graph.release(&mut self.backend);
        self.graph = PassGraphBuilder::new(&self.descriptor, &self.settings, self.window_size)
            .build(&mut self.backend, &mut self.shaders)?;
        self.graph_builds += 1;
        Ok(())
    }

    fn idle(&self) {
        if !self.config.idle_sleep.is_zero() {
            std::thread::sleep(self.config.idle_sleep);
        }
    }

    /// Release every GPU object. Later frames are skipped; calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.shared.closing.store(true, Ordering::Release);

        if let Err(e) = self.stop_recording() {
            log::error!("Finishing the recording failed: {e}");
        }
        for (_, mut state) in self.objects.drain() {
            state.release(&mut self.backend);
        }
        self.pipelines.clear(&mut self.backend);
        self.graph.release(&mut self.backend);
        self.textures.release(&mut self.backend);
        self.arenas.release(&mut self.backend);
        self.backend.destroy_buffer(self.null_buffer);
        self.shaders.clear();
        log::info!("Renderer for {} shut down", self.config.application_name);
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Nodes whose geometry is locked by a writer count as having geometry.
fn has_geometry(node: &Node) -> bool {
    node.try_read_geometry()
        .map_or(true, |geometry| !geometry.is_empty())
}
