//! Compiles a pipeline descriptor into an ordered pass graph.

use std::sync::Arc;

use crate::backend::{GraphicsBackend, Rect2D};
use crate::error::Result;
use crate::render_graph::descriptor::{ParameterKey, PassConfig, PassType, PipelineDescriptor};
use crate::render_graph::framebuffer::{Framebuffer, FramebufferRegistry};
use crate::render_graph::pass::{Pass, PassId, PassInput, PassShader};
use crate::settings::{SettingValue, Settings};
use crate::shader::ShaderRepository;
use crate::uniform::{ArenaKind, UniformBlock, UniformValue};

/// Settings key of the render target resolution multiplier.
pub const SUPERSAMPLING_KEY: &str = "Renderer.SupersamplingFactor";

/// Name of the per-pass parameter block as declared in shaders.
pub const SHADER_PARAMETERS_BLOCK: &str = "ShaderParameters";

/// Parameter member holding the pass's eye index in stereo pipelines.
pub const CURRENT_EYE_MEMBER: &str = "currentEye";

/// Shader set used by geometry passes that declare none.
pub const DEFAULT_GEOMETRY_SHADERS: [&str; 2] = ["DefaultDeferred.vert", "DefaultDeferred.frag"];

/// Passes in flow order together with the framebuffers they render to.
#[derive(Debug, Default)]
pub struct PassGraph {
    passes: Vec<Pass>,
    framebuffers: Vec<Arc<Framebuffer>>,
    window_size: (u32, u32),
    supersampling: f32,
}

impl PassGraph {
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub(crate) fn passes_mut(&mut self) -> &mut [Pass] {
        &mut self.passes
    }

    pub fn pass(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in execution order.
    pub fn flow(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    /// Every framebuffer of the graph, one per render target, in creation order.
    pub fn framebuffers(&self) -> &[Arc<Framebuffer>] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, target: &str) -> Option<&Arc<Framebuffer>> {
        self.framebuffers.iter().find(|f| f.name() == target)
    }

    /// Output of the last pass, the image that gets presented.
    pub fn final_output(&self) -> Option<&Arc<Framebuffer>> {
        self.passes.last().map(|p| &p.output)
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    pub fn supersampling(&self) -> f32 {
        self.supersampling
    }

    /// Destroy every framebuffer and drop the passes.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for framebuffer in self.framebuffers.drain(..) {
            framebuffer.destroy(backend);
        }
        self.passes.clear();
    }
}

/// Builds a [`PassGraph`] for one window size.
///
/// The graph is rebuilt from scratch whenever the window is resized or quality settings change.
pub struct PassGraphBuilder<'a> {
    descriptor: &'a PipelineDescriptor,
    settings: &'a Arc<Settings>,
    window_size: (u32, u32),
}

impl<'a> PassGraphBuilder<'a> {
    pub fn new(
        descriptor: &'a PipelineDescriptor,
        settings: &'a Arc<Settings>,
        window_size: (u32, u32),
    ) -> Self {
        Self {
            descriptor,
            settings,
            window_size,
        }
    }

    /// Validate the descriptor, then create framebuffers, wire inputs and resolve shaders.
    pub fn build<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        shaders: &mut ShaderRepository,
    ) -> Result<PassGraph> {
        self.descriptor.validate()?;

        let supersampling = self.supersampling();
        let mut registry = FramebufferRegistry::new();
        let result = self.build_passes(backend, shaders, &mut registry, supersampling);

        match result {
            Ok(passes) => {
                self.publish_display_size(&passes, supersampling);
                log::info!(
                    "Built pass graph '{}' with {} passes and {} framebuffers at {}x{} (supersampling {})",
                    self.descriptor.name,
                    passes.len(),
                    registry.len(),
                    self.window_size.0,
                    self.window_size.1,
                    supersampling
                );
                Ok(PassGraph {
                    passes,
                    framebuffers: registry.into_framebuffers(),
                    window_size: self.window_size,
                    supersampling,
                })
            }
            Err(e) => {
                for framebuffer in registry.into_framebuffers() {
                    framebuffer.destroy(backend);
                }
                Err(e)
            }
        }
    }

    fn supersampling(&self) -> f32 {
        let factor = self.settings.get_or(SUPERSAMPLING_KEY, 1.0f32);
        if factor.is_finite() && factor > 0.0 {
            factor
        } else {
            log::warn!("Ignoring invalid supersampling factor {factor}, using 1.0");
            1.0
        }
    }

    fn build_passes<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        shaders: &mut ShaderRepository,
        registry: &mut FramebufferRegistry,
        supersampling: f32,
    ) -> Result<Vec<Pass>> {
        let flow = self.descriptor.flow();
        let mut passes = Vec::with_capacity(flow.len());

        for (index, name) in flow.iter().enumerate() {
            let Some(config) = self.descriptor.pass(name) else {
                continue;
            };

            let output = registry.get_or_create(
                backend,
                &config.output,
                self.descriptor.target(&config.output),
                self.window_size,
                supersampling,
            )?;

            let viewport = Rect2D::from_fractions(
                config.viewport_size,
                config.viewport_offset,
                output.width(),
                output.height(),
            );
            let scissor = Rect2D::from_fractions(
                config.scissor,
                config.viewport_offset,
                output.width(),
                output.height(),
            );
            log::debug!(
                "Pass {name} renders to {} at {}x{}+{}+{}",
                config.output,
                viewport.width,
                viewport.height,
                viewport.x,
                viewport.y
            );

            let shader = resolve_pass_shader(backend, shaders, name, config);
            let parameters = self.parameter_block(name, config, &shader);

            passes.push(Pass {
                id: PassId(index as u32),
                name: name.clone(),
                config: config.clone(),
                output,
                inputs: Vec::new(),
                shader,
                viewport,
                scissor,
                parameters,
            });
        }

        wire_inputs(&mut passes);
        Ok(passes)
    }

    /// Build the pass's parameter block. Declared values seed the settings store, and every
    /// member reads its settings key when populated. Stereo pipelines also get the pass's eye
    /// as `currentEye`, -1 for passes bound to neither eye.
    fn parameter_block(
        &self,
        pass: &str,
        config: &PassConfig,
        shader: &PassShader,
    ) -> UniformBlock {
        let layout = match shader {
            PassShader::Ready(program) => program.reflection().block(SHADER_PARAMETERS_BLOCK),
            PassShader::Unusable(_) => None,
        };

        let mut block = UniformBlock::new(SHADER_PARAMETERS_BLOCK, ArenaKind::ShaderParameters);
        for (key, declared) in config.parameter_values() {
            let key = ParameterKey::resolve(pass, key);
            let Some(fallback) = UniformValue::from_setting(&declared) else {
                log::warn!(
                    "Parameter {} of pass {pass} has no uniform representation, skipping",
                    key.member
                );
                continue;
            };
            if key.writable {
                self.settings.set_if_unset(key.settings_key.clone(), declared);
            }

            let offset = match layout {
                Some(layout) => match layout.member(&key.member) {
                    Some(member) => Some(member.offset as usize),
                    None => {
                        log::debug!(
                            "Parameter {} is not used by the shader of pass {pass}",
                            key.member
                        );
                        continue;
                    }
                },
                None => None,
            };

            let settings = self.settings.clone();
            let settings_key = key.settings_key;
            let supplier = Arc::new(move || {
                settings
                    .get::<SettingValue>(&settings_key)
                    .map(|value| match value {
                        SettingValue::Int(v) => SettingValue::Float(v as f32),
                        other => other,
                    })
                    .and_then(|value| UniformValue::from_setting(&value))
                    .unwrap_or(fallback)
            });
            block.add_supplier(key.member, supplier, offset);
        }

        if self.descriptor.stereo_enabled {
            let eye = config.eye;
            match layout.map(|layout| layout.member(CURRENT_EYE_MEMBER)) {
                Some(Some(member)) => {
                    block.add_at(CURRENT_EYE_MEMBER, member.offset as usize, move || {
                        UniformValue::Int(eye)
                    });
                }
                Some(None) => {
                    log::debug!("Shader of pass {pass} does not read {CURRENT_EYE_MEMBER}");
                }
                None => {
                    block.add(CURRENT_EYE_MEMBER, move || UniformValue::Int(eye));
                }
            }
        }
        block
    }

    fn publish_display_size(&self, passes: &[Pass], supersampling: f32) {
        let width = (self.window_size.0 as f32 * supersampling) as i64;
        let height = (self.window_size.1 as f32 * supersampling) as i64;
        self.settings.set("Renderer.displayWidth", width);
        self.settings.set("Renderer.displayHeight", height);
        for pass in passes {
            self.settings.set(
                format!("Renderer.{}.displayWidth", pass.name),
                pass.viewport.width as i64,
            );
            self.settings.set(
                format!("Renderer.{}.displayHeight", pass.name),
                pass.viewport.height as i64,
            );
        }
    }
}

fn resolve_pass_shader<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    shaders: &mut ShaderRepository,
    pass: &str,
    config: &PassConfig,
) -> PassShader {
    let files: Vec<String> = if config.shaders.is_empty() && config.pass_type != PassType::Quad {
        DEFAULT_GEOMETRY_SHADERS.iter().map(|s| s.to_string()).collect()
    } else {
        config.shaders.clone()
    };
    if files.is_empty() {
        log::warn!("Pass {pass} declares no shaders and is not usable");
        return PassShader::Unusable("no shaders declared".to_string());
    }

    match shaders.program(backend, &files) {
        Ok(program) => PassShader::Ready(program),
        Err(e) => {
            log::warn!("Pass {pass} is not usable: {e}");
            PassShader::Unusable(e.to_string())
        }
    }
}

/// Bind every declared input to the first pass, in flow order, whose output provides it.
fn wire_inputs(passes: &mut [Pass]) {
    let outputs: Vec<(String, String, Arc<Framebuffer>)> = passes
        .iter()
        .map(|p| (p.name.clone(), p.config.output.clone(), p.output.clone()))
        .collect();

    for pass in passes.iter_mut() {
        let mut inputs = Vec::with_capacity(pass.config.inputs.len());
        for declared in &pass.config.inputs {
            let (target, attachment) = PassConfig::split_input(declared);
            let producer = outputs.iter().find(|(_, output, framebuffer)| {
                output == target && attachment.map_or(true, |a| framebuffer.has_attachment(a))
            });

            match producer {
                Some((producer, _, framebuffer)) => inputs.push(PassInput {
                    declared: declared.clone(),
                    target: target.to_string(),
                    attachment: attachment.map(str::to_string),
                    producer: producer.clone(),
                    framebuffer: framebuffer.clone(),
                }),
                None => log::warn!("Input {declared} of pass {} has no producer", pass.name),
            }
        }
        pass.inputs = inputs;
    }
}
