//! Shader namespaces, stage resolution and WGSL reflection.
//!
//! Shader files are looked up by name in up to two namespaces: the caller's
//! own [`ShaderSource`] and the renderer's built-in one. Stage files follow the
//! `<Name>.vert` / `<Name>.frag` convention and contain WGSL.

mod reflect;
mod repository;

pub use reflect::*;
pub use repository::*;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A namespace shader files can be read from.
pub trait ShaderSource: Send + Sync + fmt::Debug {
    /// Name used in log messages and cache keys
    fn name(&self) -> &str;

    /// Source text of `file`, or `None` if this namespace does not have it.
    fn read(&self, file: &str) -> Option<String>;
}

/// Shader files below a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryShaders {
    name: String,
    root: PathBuf,
}

impl DirectoryShaders {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: root.display().to_string(),
            root,
        }
    }
}

impl ShaderSource for DirectoryShaders {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, file: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(file)).ok()
    }
}

/// Shader files held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShaders {
    name: String,
    files: HashMap<String, String>,
}

impl InMemoryShaders {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(file, source);
        self
    }

    pub fn insert(&mut self, file: impl Into<String>, source: impl Into<String>) {
        self.files.insert(file.into(), source.into());
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }
}

impl ShaderSource for InMemoryShaders {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, file: &str) -> Option<String> {
        self.files.get(file).cloned()
    }
}

/// The renderer's built-in shaders, compiled into the crate.
pub fn builtin_shaders() -> InMemoryShaders {
    InMemoryShaders::new("builtin")
        .with_file(
            "DefaultDeferred.vert",
            include_str!("builtin/DefaultDeferred.vert.wgsl"),
        )
        .with_file(
            "DefaultDeferred.frag",
            include_str!("builtin/DefaultDeferred.frag.wgsl"),
        )
        .with_file(
            "DefaultDeferredInstanced.vert",
            include_str!("builtin/DefaultDeferredInstanced.vert.wgsl"),
        )
        .with_file(
            "FullscreenPass.vert",
            include_str!("builtin/FullscreenPass.vert.wgsl"),
        )
        .with_file(
            "DeferredLighting.frag",
            include_str!("builtin/DeferredLighting.frag.wgsl"),
        )
        .with_file("HDR.frag", include_str!("builtin/HDR.frag.wgsl"))
}
