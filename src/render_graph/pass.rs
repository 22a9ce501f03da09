//! Passes of a built pass graph.

use std::sync::Arc;

use crate::backend::Rect2D;
use crate::render_graph::descriptor::{PassConfig, PassType, VIEWPORT_TARGET};
use crate::render_graph::framebuffer::{BlitMask, Framebuffer};
use crate::shader::ShaderProgram;
use crate::uniform::UniformBlock;

/// Index of a pass in flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The default shader of a pass.
#[derive(Debug, Clone)]
pub enum PassShader {
    Ready(Arc<ShaderProgram>),
    /// The declared shader set could not be resolved; the pass is skipped.
    Unusable(String),
}

/// A declared input bound to the framebuffer that produces it.
#[derive(Debug, Clone)]
pub struct PassInput {
    /// Input as declared, e.g. `GeometryBuffer.NormalsMaterial`
    pub declared: String,
    pub target: String,
    pub attachment: Option<String>,
    /// Pass whose output satisfied the input
    pub producer: String,
    pub framebuffer: Arc<Framebuffer>,
}

impl PassInput {
    /// Which attachments a blit of this input copies.
    pub fn blit_mask(&self) -> BlitMask {
        match &self.attachment {
            Some(name) => match self.framebuffer.attachment(name) {
                Some(attachment) if attachment.is_depth() => BlitMask::Depth,
                _ => BlitMask::Color,
            },
            None => BlitMask::Both,
        }
    }
}

/// One stage of the pipeline.
#[derive(Debug)]
pub struct Pass {
    pub(crate) id: PassId,
    pub(crate) name: String,
    pub(crate) config: PassConfig,
    pub(crate) output: Arc<Framebuffer>,
    pub(crate) inputs: Vec<PassInput>,
    pub(crate) shader: PassShader,
    pub(crate) viewport: Rect2D,
    pub(crate) scissor: Rect2D,
    pub(crate) parameters: UniformBlock,
}

impl Pass {
    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    pub fn pass_type(&self) -> PassType {
        self.config.pass_type
    }

    pub fn output(&self) -> &Arc<Framebuffer> {
        &self.output
    }

    pub fn renders_to_viewport(&self) -> bool {
        self.config.output == VIEWPORT_TARGET
    }

    pub fn inputs(&self) -> &[PassInput] {
        &self.inputs
    }

    pub fn input(&self, declared: &str) -> Option<&PassInput> {
        self.inputs.iter().find(|i| i.declared == declared)
    }

    pub fn shader(&self) -> &PassShader {
        &self.shader
    }

    /// The resolved default program, if the pass is usable.
    pub fn program(&self) -> Option<&Arc<ShaderProgram>> {
        match &self.shader {
            PassShader::Ready(program) => Some(program),
            PassShader::Unusable(_) => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.shader, PassShader::Ready(_))
    }

    pub fn viewport(&self) -> Rect2D {
        self.viewport
    }

    pub fn scissor(&self) -> Rect2D {
        self.scissor
    }

    /// The pass's `ShaderParameters` block.
    pub fn parameters(&self) -> &UniformBlock {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut UniformBlock {
        &mut self.parameters
    }

    /// Whether geometry passes of this kind draw transparent (`true`) or opaque nodes.
    ///
    /// Passes that render both, or neither, do not filter.
    pub fn accepts(&self, transparent: bool) -> bool {
        let config = &self.config;
        if config.render_opaque == config.render_transparent {
            return true;
        }
        if transparent {
            config.render_transparent
        } else {
            config.render_opaque
        }
    }
}
