//! Error types for the renderer.

use thiserror::Error;

use crate::uniform::ArenaKind;

pub use crate::backend::{BackendError, BackendResult};

/// Uniform arena errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArenaError {
    #[error("{arena:?} arena exhausted: requested {requested} bytes with capacity {capacity}")]
    Exhausted {
        arena: ArenaKind,
        requested: usize,
        capacity: usize,
    },
}

/// Shader resolution and compilation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("Shader file not found: {file}")]
    NotFound { file: String },
    #[error("Failed to compile {file}: {message}")]
    Compilation { file: String, message: String },
    #[error("No shader provides the required {stage} stage")]
    MissingStage { stage: String },
    #[error("Unsupported shader stage for {file}")]
    UnsupportedStage { file: String },
}

/// Texture loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TextureError {
    #[error("Failed to decode texture {name}: {message}")]
    Decode { name: String, message: String },
    #[error("Texture {name} has {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Pipeline descriptor parse and validation errors
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Failed to read pipeline descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML pipeline descriptor: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse JSON pipeline descriptor: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown pipeline descriptor format: {0}")]
    UnknownFormat(String),
    #[error("Pass '{pass}' references undeclared render target '{target}'")]
    UnknownTarget { pass: String, target: String },
    #[error("Flow references undeclared pass '{0}'")]
    UnknownPass(String),
    #[error("Pass '{pass}' references attachment '{attachment}' not declared on target '{target}'")]
    UnknownAttachment {
        pass: String,
        target: String,
        attachment: String,
    },
    #[error("Pass '{pass}' reads '{input}' but no pass in the flow produces it")]
    UnproducedInput { pass: String, input: String },
    #[error("No pass renders to the Viewport target")]
    MissingViewport,
    #[error("Pass inputs form a cycle: {}", passes.join(" -> "))]
    Cycle { passes: Vec<String> },
    #[error("Pass '{0}' appears more than once in the flow")]
    DuplicateFlowEntry(String),
    #[error("Flow is empty")]
    EmptyFlow,
    #[error("Invalid {field} fraction {value} on '{owner}'")]
    InvalidFraction {
        owner: String,
        field: &'static str,
        value: f32,
    },
}

/// Top-level renderer error
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error("Failed to capture frame: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, RendererError>;
