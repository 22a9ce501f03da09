//! Render pass graph.
//!
//! A [`PipelineDescriptor`] declares render targets, passes and the flow between them. The
//! [`PassGraphBuilder`] validates it and compiles it into a [`PassGraph`]: passes in execution
//! order, each bound to its output [`Framebuffer`], its input framebuffers and its shader.

pub mod builder;
pub mod descriptor;
pub mod framebuffer;
pub mod pass;
pub mod validate;

pub use builder::*;
pub use descriptor::*;
pub use framebuffer::*;
pub use pass::*;
pub use validate::VIEWPORT_ATTACHMENT;
