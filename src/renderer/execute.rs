//! Executes the passes of a built graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{
    BackendResult, BlendComponent, BlendState, BoundResource, BufferHandle, ColorAttachment,
    ColorTargetState, ColorWrites, CompareFunction, CullMode, DepthStencilAttachment,
    DepthStencilState, FrontFace, GraphicsBackend, IndexFormat, LoadOp, PrimitiveTopology,
    RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle, ResourceBinding,
    SamplerHandle, StoreOp, TextureViewHandle, VertexBufferLayout, VertexFormat,
};
use crate::render_graph::{Pass, PassId, PassType, RenderOrder, SHADER_PARAMETERS_BLOCK};
use crate::renderer::globals::{GlobalUniforms, LIGHT_PARAMETERS_BLOCK, VR_PARAMETERS_BLOCK};
use crate::renderer::instancing::instance_layouts;
use crate::renderer::object_state::{
    ObjectGpuState, MATERIAL_BLOCK, MATRICES_BLOCK, SHADER_PROPERTIES_BLOCK,
};
use crate::renderer::FrameStats;
use crate::resources::TextureSlot;
use crate::scene::Node;
use crate::shader::{ShaderProgram, UniformBlockLayout};
use crate::uniform::{UniformArenas, UniformBlock};

/// Size of the zero-filled buffer bound to blocks the renderer does not provide.
pub const NULL_UNIFORM_SIZE: u64 = 16 * 1024;

/// Vertices of the fullscreen triangle drawn by quad passes.
const FULLSCREEN_VERTICES: u32 = 3;

/// Shared resources every draw of a frame binds from.
pub(crate) struct FrameResources<'a> {
    pub arenas: &'a UniformArenas,
    pub globals: &'a GlobalUniforms,
    pub default_texture: TextureViewHandle,
    pub default_sampler: SamplerHandle,
    pub null_buffer: BufferHandle,
}

/// A visible node ready to be drawn.
pub(crate) struct DrawItem<'a> {
    pub node: &'a Arc<Node>,
    pub state: &'a ObjectGpuState,
    pub transparent: bool,
    pub double_sided: bool,
    /// Whether the node is an instanced master drawn through its instance streams
    pub instanced: bool,
    /// Distance to the camera, used for draw ordering
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: String,
    pass: PassId,
    instanced: bool,
    double_sided: bool,
}

/// Render pipelines by program, pass and draw variant.
///
/// Pipelines depend on the pass output formats, so the cache is cleared with every graph rebuild.
#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    pipelines: HashMap<PipelineKey, Option<RenderPipelineHandle>>,
}

impl PipelineCache {
    pub fn len(&self) -> usize {
        self.pipelines.values().flatten().count()
    }

    /// The pipeline for drawing with `program` in `pass`. Failures are logged once and cached.
    fn get_or_create<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        pass: &Pass,
        program: &ShaderProgram,
        instanced: bool,
        double_sided: bool,
    ) -> Option<RenderPipelineHandle> {
        let key = PipelineKey {
            program: program.key(),
            pass: pass.id(),
            instanced,
            double_sided,
        };
        if let Some(pipeline) = self.pipelines.get(&key) {
            return *pipeline;
        }

        let desc = pipeline_descriptor(pass, program, instanced, double_sided);
        let pipeline = match backend.create_render_pipeline(&desc) {
            Ok(pipeline) => {
                log::debug!("Created pipeline {:?}", desc.label);
                Some(pipeline)
            }
            Err(e) => {
                log::error!("Pipeline {:?} could not be created: {e}", desc.label);
                None
            }
        };
        self.pipelines.insert(key, pipeline);
        pipeline
    }

    pub fn clear<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for pipeline in self.pipelines.drain().filter_map(|(_, p)| p) {
            backend.destroy_render_pipeline(pipeline);
        }
    }
}

/// Remembers which binding problems were already reported.
#[derive(Debug, Default)]
pub(crate) struct BindingDiagnostics {
    reported: HashSet<(String, String)>,
}

impl BindingDiagnostics {
    /// Log that `program` does not declare a block the renderer supplies.
    fn missing_in_shader(&mut self, program: &ShaderProgram, block: &str) {
        if self.reported.insert((program.key(), block.to_string())) {
            log::error!(
                "Shader {} does not declare uniform block {block}, binding skipped",
                program.key()
            );
        }
    }

    /// Log that `program` declares a block the renderer does not supply.
    fn unsupplied(&mut self, program: &ShaderProgram, block: &str) {
        if self.reported.insert((program.key(), format!("null:{block}"))) {
            log::warn!(
                "No uniform block {block} for shader {}, binding zeros",
                program.key()
            );
        }
    }
}

fn pipeline_descriptor(
    pass: &Pass,
    program: &ShaderProgram,
    instanced: bool,
    double_sided: bool,
) -> RenderPipelineDescriptor {
    let config = pass.config();
    let output = pass.output();

    let vertex_layouts = match pass.pass_type() {
        PassType::Quad => Vec::new(),
        PassType::Geometry | PassType::Lights => {
            let mut layouts = vec![
                VertexBufferLayout::single(0, VertexFormat::Float32x3),
                VertexBufferLayout::single(1, VertexFormat::Float32x3),
                VertexBufferLayout::single(2, VertexFormat::Float32x2),
            ];
            if instanced {
                layouts.extend(instance_layouts());
            }
            layouts
        }
    };

    let cull_mode = match pass.pass_type() {
        PassType::Quad => CullMode::None,
        _ if double_sided => CullMode::None,
        _ => CullMode::Back,
    };

    let depth_stencil = output.depth_attachment().map(|depth| DepthStencilState {
        format: depth.format,
        depth_write_enabled: config.depth_test_enabled && config.depth_write_enabled,
        depth_compare: if config.depth_test_enabled {
            CompareFunction::Less
        } else {
            CompareFunction::Always
        },
    });

    let blend = config.render_transparent.then(|| BlendState {
        color: BlendComponent {
            src_factor: config.src_color_blend_factor.into(),
            dst_factor: config.dst_color_blend_factor.into(),
            operation: config.color_blend_op.into(),
        },
        alpha: BlendComponent {
            src_factor: config.src_alpha_blend_factor.into(),
            dst_factor: config.dst_alpha_blend_factor.into(),
            operation: config.alpha_blend_op.into(),
        },
    });

    let written = &program.reflection().fragment_outputs;
    let color_targets = output
        .color_attachments()
        .enumerate()
        .map(|(location, attachment)| ColorTargetState {
            format: attachment.format,
            blend,
            write_mask: if written.contains(&(location as u32)) {
                ColorWrites::ALL
            } else {
                ColorWrites(0)
            },
        })
        .collect();

    RenderPipelineDescriptor {
        label: Some(format!(
            "{}:{}{}",
            pass.name(),
            program.key(),
            if instanced { ":instanced" } else { "" }
        )),
        vertex_module: program.vertex().module,
        vertex_entry: program.vertex().entry_point.clone(),
        fragment_module: program.fragment().module,
        fragment_entry: program.fragment().entry_point.clone(),
        vertex_layouts,
        primitive_topology: PrimitiveTopology::TriangleList,
        front_face: FrontFace::Ccw,
        cull_mode,
        depth_stencil,
        color_targets,
    }
}

/// Copy every input of `pass` into its output. Returns the number of attachment copies.
fn blit_inputs<B: GraphicsBackend + ?Sized>(backend: &mut B, pass: &Pass) -> usize {
    let mut copies = 0;
    for input in pass.inputs() {
        if Arc::ptr_eq(&input.framebuffer, pass.output()) {
            continue;
        }
        copies += input
            .framebuffer
            .blit_to(backend, pass.output(), input.blit_mask());
    }
    log::trace!("Pass {} blitted {copies} attachments", pass.name());
    copies
}

fn begin_pass<B: GraphicsBackend + ?Sized>(backend: &mut B, pass: &Pass) {
    let config = pass.config();
    let load = |clear: LoadOp| if config.blit_inputs { LoadOp::Load } else { clear };
    let output = pass.output();

    backend.begin_render_pass(&RenderPassDescriptor {
        label: Some(pass.name().to_string()),
        color_attachments: output
            .color_attachments()
            .map(|attachment| ColorAttachment {
                view: attachment.view,
                load_op: load(LoadOp::Clear(config.clear_color.to_array())),
                store_op: StoreOp::Store,
            })
            .collect(),
        depth_stencil_attachment: output.depth_attachment().map(|depth| DepthStencilAttachment {
            view: depth.view,
            depth_load_op: load(LoadOp::Clear([config.depth_clear_value, 0.0, 0.0, 0.0])),
            depth_store_op: StoreOp::Store,
            depth_clear_value: config.depth_clear_value,
        }),
    });

    let viewport = pass.viewport();
    backend.set_viewport(
        viewport.x as f32,
        viewport.y as f32,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
    let scissor = pass.scissor();
    let x = scissor.x.min(output.width().saturating_sub(1));
    let y = scissor.y.min(output.height().saturating_sub(1));
    backend.set_scissor_rect(
        x,
        y,
        scissor.width.min(output.width() - x).max(1),
        scissor.height.min(output.height() - y).max(1),
    );
}

/// Run one pass: blit its inputs if asked to, then clear and draw into its output.
///
/// Returns `false` for passes that are not usable and were skipped.
pub(crate) fn execute_pass<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    pass: &Pass,
    items: &[DrawItem<'_>],
    resources: &FrameResources<'_>,
    pipelines: &mut PipelineCache,
    diagnostics: &mut BindingDiagnostics,
    stats: &mut FrameStats,
) -> BackendResult<bool> {
    let Some(default_program) = pass.program() else {
        log::trace!("Skipping unusable pass {}", pass.name());
        return Ok(false);
    };

    if pass.config().blit_inputs {
        blit_inputs(backend, pass);
    }
    begin_pass(backend, pass);

    let result = match pass.pass_type() {
        PassType::Quad => draw_fullscreen(
            backend,
            pass,
            default_program,
            resources,
            pipelines,
            diagnostics,
            stats,
        ),
        PassType::Geometry | PassType::Lights => draw_nodes(
            backend,
            pass,
            default_program,
            items,
            resources,
            pipelines,
            diagnostics,
            stats,
        ),
    };

    backend.end_render_pass();
    result?;
    stats.passes_executed += 1;
    Ok(true)
}

fn draw_fullscreen<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    pass: &Pass,
    program: &ShaderProgram,
    resources: &FrameResources<'_>,
    pipelines: &mut PipelineCache,
    diagnostics: &mut BindingDiagnostics,
    stats: &mut FrameStats,
) -> BackendResult<()> {
    let Some(pipeline) = pipelines.get_or_create(backend, pass, program, false, false) else {
        return Ok(());
    };
    let Some(bindings) = bindings_for(pass, program, None, resources, diagnostics) else {
        return Ok(());
    };
    backend.set_render_pipeline(pipeline);
    backend.set_bindings(pipeline, &bindings)?;
    backend.draw(0..FULLSCREEN_VERTICES, 0..1);
    stats.draw_calls += 1;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draw_nodes<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    pass: &Pass,
    default_program: &Arc<ShaderProgram>,
    items: &[DrawItem<'_>],
    resources: &FrameResources<'_>,
    pipelines: &mut PipelineCache,
    diagnostics: &mut BindingDiagnostics,
    stats: &mut FrameStats,
) -> BackendResult<()> {
    let lights = pass.pass_type() == PassType::Lights;
    let mut drawn: Vec<&DrawItem<'_>> = items
        .iter()
        .filter(|item| item.node.is_light_volume() == lights && pass.accepts(item.transparent))
        .collect();
    match pass.config().order {
        RenderOrder::BackToFront => drawn.sort_by(|a, b| b.distance.total_cmp(&a.distance)),
        RenderOrder::FrontToBack => drawn.sort_by(|a, b| a.distance.total_cmp(&b.distance)),
        RenderOrder::DontCare => {}
    }

    for item in drawn {
        let state = item.state;
        let instance_count = match (&state.instances, item.instanced) {
            (Some(instances), true) => instances.count(),
            (None, true) => 0,
            (_, false) => 1,
        };
        if instance_count == 0 {
            continue;
        }

        let program = state.program.as_ref().unwrap_or(default_program);
        let Some(pipeline) =
            pipelines.get_or_create(backend, pass, program, item.instanced, item.double_sided)
        else {
            continue;
        };
        let Some(bindings) = bindings_for(pass, program, Some(state), resources, diagnostics)
        else {
            continue;
        };

        backend.set_render_pipeline(pipeline);
        backend.set_bindings(pipeline, &bindings)?;
        let geometry = &state.geometry;
        backend.set_vertex_buffer(0, geometry.positions, 0);
        backend.set_vertex_buffer(1, geometry.normals, 0);
        backend.set_vertex_buffer(2, geometry.texcoords, 0);
        if item.instanced {
            if let Some(instances) = &state.instances {
                instances.bind(backend);
            }
        }
        match geometry.indices {
            Some(indices) => {
                backend.set_index_buffer(indices, 0, IndexFormat::Uint32);
                backend.draw_indexed(0..geometry.index_count, 0, 0..instance_count);
            }
            None => backend.draw(0..geometry.vertex_count, 0..instance_count),
        }
        stats.draw_calls += 1;
    }
    Ok(())
}

/// The renderer-side block bound to a reflected block name.
fn supplied_block<'a>(
    name: &str,
    pass: &'a Pass,
    object: Option<&'a ObjectGpuState>,
    resources: &'a FrameResources<'_>,
) -> Option<&'a UniformBlock> {
    match name {
        MATRICES_BLOCK => object.map(|o| &o.matrices),
        MATERIAL_BLOCK => object.map(|o| &o.material),
        SHADER_PROPERTIES_BLOCK => object.and_then(|o| o.shader_properties.as_ref()),
        LIGHT_PARAMETERS_BLOCK => Some(resources.globals.lights()),
        VR_PARAMETERS_BLOCK => Some(resources.globals.vr()),
        SHADER_PARAMETERS_BLOCK => Some(pass.parameters()),
        _ => None,
    }
}

fn uniform_binding(
    layout: &UniformBlockLayout,
    block: Option<&UniformBlock>,
    program: &ShaderProgram,
    resources: &FrameResources<'_>,
    diagnostics: &mut BindingDiagnostics,
) -> Option<BoundResource> {
    let required = layout.size as u64;
    let populated = block.and_then(|block| {
        let arena = resources.arenas.get(block.arena());
        Some((block, block.offset()?, arena.buffer()?, arena.capacity()))
    });

    match populated {
        Some((block, offset, buffer, capacity)) => {
            let available = capacity.saturating_sub(offset) as u64;
            let size = (block.size() as u64).max(required).min(available);
            if size < required {
                log::error!(
                    "Block {} at offset {offset} leaves {available} bytes, shader {} needs {required}",
                    block.name(),
                    program.key()
                );
                return None;
            }
            Some(BoundResource::UniformBuffer {
                buffer,
                offset: offset as u64,
                size,
            })
        }
        None => {
            diagnostics.unsupplied(program, &layout.name);
            if required > NULL_UNIFORM_SIZE {
                log::error!(
                    "Block {} of shader {} needs {required} bytes, more than the null buffer holds",
                    layout.name,
                    program.key()
                );
                return None;
            }
            Some(BoundResource::UniformBuffer {
                buffer: resources.null_buffer,
                offset: 0,
                size: required.max(16),
            })
        }
    }
}

fn texture_for(
    name: &str,
    pass: &Pass,
    object: Option<&ObjectGpuState>,
    resources: &FrameResources<'_>,
) -> TextureViewHandle {
    if let Some(object) = object {
        if let Some(slot) = TextureSlot::ALL.iter().find(|s| s.binding_name() == name) {
            return object
                .textures
                .get(slot)
                .copied()
                .unwrap_or(resources.default_texture);
        }
    }
    pass.inputs()
        .iter()
        .filter_map(|input| input.framebuffer.attachment(name))
        .map(|attachment| attachment.view)
        .next()
        .unwrap_or(resources.default_texture)
}

/// Everything the program declares, bound for one draw.
///
/// Returns `None` when a block cannot be bound at its declared size; the draw is skipped.
fn bindings_for(
    pass: &Pass,
    program: &ShaderProgram,
    object: Option<&ObjectGpuState>,
    resources: &FrameResources<'_>,
    diagnostics: &mut BindingDiagnostics,
) -> Option<Vec<ResourceBinding>> {
    let reflection = program.reflection();

    if let Some(object) = object {
        let own = [
            Some(&object.matrices),
            Some(&object.material),
            object.shader_properties.as_ref(),
        ];
        for block in own.into_iter().flatten() {
            if !reflection.has_block(block.name()) {
                diagnostics.missing_in_shader(program, block.name());
            }
        }
    }

    let mut bindings = Vec::with_capacity(
        reflection.uniform_blocks.len() + reflection.textures.len() + reflection.samplers.len(),
    );
    for layout in &reflection.uniform_blocks {
        let block = supplied_block(&layout.name, pass, object, resources);
        let resource = uniform_binding(layout, block, program, resources, diagnostics)?;
        bindings.push(ResourceBinding {
            group: layout.group,
            binding: layout.binding,
            resource,
        });
    }
    for slot in &reflection.textures {
        bindings.push(ResourceBinding {
            group: slot.group,
            binding: slot.binding,
            resource: BoundResource::Texture(texture_for(&slot.name, pass, object, resources)),
        });
    }
    for slot in &reflection.samplers {
        bindings.push(ResourceBinding {
            group: slot.group,
            binding: slot.binding,
            resource: BoundResource::Sampler(resources.default_sampler),
        });
    }
    Some(bindings)
}
