//! Shader program resolution and module cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{GraphicsBackend, ShaderModuleDescriptor, ShaderModuleHandle, ShaderStage};
use crate::error::ShaderError;

use super::{builtin_shaders, ShaderReflection, ShaderSource};

/// Extension tried when a file is not found under its declared name.
pub const FALLBACK_EXTENSION: &str = "wgsl";

/// Pipeline stage implied by a shader file name.
///
/// `Ok(None)` marks a stage this renderer knows about but does not run
/// (geometry, tessellation and compute shaders).
pub fn stage_of(file: &str) -> Result<Option<ShaderStage>, ShaderError> {
    let name = file
        .strip_suffix(&format!(".{FALLBACK_EXTENSION}"))
        .unwrap_or(file);
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("vert") => Ok(Some(ShaderStage::Vertex)),
        Some("frag") => Ok(Some(ShaderStage::Fragment)),
        Some("geom") | Some("tesc") | Some("tese") | Some("comp") => Ok(None),
        _ => Err(ShaderError::UnsupportedStage {
            file: file.to_string(),
        }),
    }
}

/// One compiled stage of a program.
#[derive(Debug)]
pub struct ShaderStageModule {
    /// File name as declared
    pub file: String,
    /// Namespace and file name it was actually loaded from
    pub origin: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub module: ShaderModuleHandle,
    pub reflection: ShaderReflection,
}

/// A vertex and fragment stage pair resolved from a shader file set.
#[derive(Debug)]
pub struct ShaderProgram {
    files: Vec<String>,
    vertex: Arc<ShaderStageModule>,
    fragment: Arc<ShaderStageModule>,
    reflection: ShaderReflection,
}

impl ShaderProgram {
    /// Stable identifier of the program, used to key pipeline caches.
    pub fn key(&self) -> String {
        self.files.join("|")
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn vertex(&self) -> &ShaderStageModule {
        &self.vertex
    }

    pub fn fragment(&self) -> &ShaderStageModule {
        &self.fragment
    }

    /// Interface of both stages combined.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

struct LocatedSource {
    origin: String,
    source: String,
}

/// Resolves shader file sets into programs and caches compiled modules.
///
/// A file is looked up in the application namespace, then the built-in
/// namespace, then the same two namespaces with `.wgsl` appended.
pub struct ShaderRepository {
    application: Option<Arc<dyn ShaderSource>>,
    builtin: Arc<dyn ShaderSource>,
    modules: HashMap<String, Arc<ShaderStageModule>>,
    programs: HashMap<Vec<String>, Arc<ShaderProgram>>,
    compilations: usize,
}

impl std::fmt::Debug for ShaderRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderRepository")
            .field("application", &self.application.as_ref().map(|s| s.name()))
            .field("builtin", &self.builtin.name())
            .field("modules", &self.modules.len())
            .field("programs", &self.programs.len())
            .finish()
    }
}

impl Default for ShaderRepository {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ShaderRepository {
    pub fn new(application: Option<Arc<dyn ShaderSource>>) -> Self {
        Self {
            application,
            builtin: Arc::new(builtin_shaders()),
            modules: HashMap::new(),
            programs: HashMap::new(),
            compilations: 0,
        }
    }

    /// Number of stage modules compiled so far.
    pub fn compilations(&self) -> usize {
        self.compilations
    }

    /// Drop cached programs and modules. Called when the renderer shuts down.
    pub fn clear(&mut self) {
        self.programs.clear();
        self.modules.clear();
    }

    fn namespaces(&self) -> impl Iterator<Item = &Arc<dyn ShaderSource>> {
        self.application.iter().chain(std::iter::once(&self.builtin))
    }

    fn locate(&self, file: &str) -> Option<LocatedSource> {
        let fallback = format!("{file}.{FALLBACK_EXTENSION}");
        for candidate in [file, fallback.as_str()] {
            for namespace in self.namespaces() {
                if let Some(source) = namespace.read(candidate) {
                    return Some(LocatedSource {
                        origin: format!("{}:{}", namespace.name(), candidate),
                        source,
                    });
                }
            }
        }
        None
    }

    /// Resolve `files` into a program, compiling stages that are not cached yet.
    pub fn program<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        files: &[String],
    ) -> Result<Arc<ShaderProgram>, ShaderError> {
        if let Some(program) = self.programs.get(files) {
            return Ok(program.clone());
        }

        let mut vertex = None;
        let mut fragment = None;
        for file in files {
            let stage = match stage_of(file)? {
                Some(stage) => stage,
                None => {
                    log::warn!("Skipping {file}: stage is not supported by this renderer");
                    continue;
                }
            };
            let module = self.stage_module(backend, file, stage)?;
            match stage {
                ShaderStage::Vertex => vertex = Some(module),
                ShaderStage::Fragment => fragment = Some(module),
                ShaderStage::Compute => {}
            }
        }

        let vertex = vertex.ok_or_else(|| ShaderError::MissingStage {
            stage: "vertex".to_string(),
        })?;
        let fragment = fragment.ok_or_else(|| ShaderError::MissingStage {
            stage: "fragment".to_string(),
        })?;

        let mut reflection = vertex.reflection.clone();
        reflection.merge(&fragment.reflection);

        let program = Arc::new(ShaderProgram {
            files: files.to_vec(),
            vertex,
            fragment,
            reflection,
        });
        self.programs.insert(files.to_vec(), program.clone());
        Ok(program)
    }

    fn stage_module<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        file: &str,
        stage: ShaderStage,
    ) -> Result<Arc<ShaderStageModule>, ShaderError> {
        let located = self.locate(file).ok_or_else(|| ShaderError::NotFound {
            file: file.to_string(),
        })?;
        if let Some(module) = self.modules.get(&located.origin) {
            return Ok(module.clone());
        }

        let compile_error = |message: String| ShaderError::Compilation {
            file: file.to_string(),
            message,
        };

        let module = naga::front::wgsl::parse_str(&located.source)
            .map_err(|e| compile_error(e.emit_to_string(&located.source)))?;
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| compile_error(e.emit_to_string(&located.source)))?;

        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        };
        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == naga_stage)
            .map(|ep| ep.name.clone())
            .ok_or_else(|| compile_error(format!("no {stage:?} entry point")))?;

        let reflection = ShaderReflection::from_module(&module, &info, stage);
        let handle = backend
            .create_shader_module(&ShaderModuleDescriptor {
                label: Some(located.origin.clone()),
                source: located.source,
            })
            .map_err(|e| compile_error(e.to_string()))?;

        log::debug!("Compiled {} ({stage:?}, entry {entry_point})", located.origin);
        self.compilations += 1;

        let module = Arc::new(ShaderStageModule {
            file: file.to_string(),
            origin: located.origin.clone(),
            stage,
            entry_point,
            module: handle,
            reflection,
        });
        self.modules.insert(located.origin, module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::shader::InMemoryShaders;

    const VERTEX: &str = r#"
        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(position, 1.0);
        }
    "#;

    const FRAGMENT: &str = r#"
        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0);
        }
    "#;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stage_of() {
        assert_eq!(stage_of("A.vert").unwrap(), Some(ShaderStage::Vertex));
        assert_eq!(stage_of("A.frag.wgsl").unwrap(), Some(ShaderStage::Fragment));
        assert_eq!(stage_of("A.geom").unwrap(), None);
        assert!(matches!(
            stage_of("A.txt"),
            Err(ShaderError::UnsupportedStage { .. })
        ));
    }

    #[test]
    fn test_application_namespace_takes_precedence() {
        let app = InMemoryShaders::new("app")
            .with_file("DefaultDeferred.vert", VERTEX)
            .with_file("Mine.frag", FRAGMENT);
        let mut repository = ShaderRepository::new(Some(Arc::new(app)));
        let mut backend = HeadlessBackend::new(4, 4);

        let program = repository
            .program(
                &mut backend,
                &files(&["DefaultDeferred.vert", "Mine.frag"]),
            )
            .unwrap();
        assert_eq!(program.vertex().origin, "app:DefaultDeferred.vert");
        assert_eq!(program.vertex().entry_point, "vs_main");
        assert_eq!(program.fragment().entry_point, "fs_main");
    }

    #[test]
    fn test_falls_back_to_builtin_and_extension() {
        let app = InMemoryShaders::new("app").with_file("Custom.frag.wgsl", FRAGMENT);
        let mut repository = ShaderRepository::new(Some(Arc::new(app)));
        let mut backend = HeadlessBackend::new(4, 4);

        let program = repository
            .program(
                &mut backend,
                &files(&["FullscreenPass.vert", "Custom.frag"]),
            )
            .unwrap();
        assert_eq!(program.vertex().origin, "builtin:FullscreenPass.vert");
        assert_eq!(program.fragment().origin, "app:Custom.frag.wgsl");
    }

    #[test]
    fn test_programs_and_modules_are_cached() {
        let mut repository = ShaderRepository::default();
        let mut backend = HeadlessBackend::new(4, 4);
        let set = files(&["FullscreenPass.vert", "HDR.frag"]);

        let a = repository.program(&mut backend, &set).unwrap();
        let b = repository.program(&mut backend, &set).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(repository.compilations(), 2);

        repository
            .program(
                &mut backend,
                &files(&["FullscreenPass.vert", "DeferredLighting.frag"]),
            )
            .unwrap();
        assert_eq!(repository.compilations(), 3);
    }

    #[test]
    fn test_missing_and_broken_shaders() {
        let app = InMemoryShaders::new("app").with_file("Broken.frag", "fn nope( {");
        let mut repository = ShaderRepository::new(Some(Arc::new(app)));
        let mut backend = HeadlessBackend::new(4, 4);

        let missing = repository.program(&mut backend, &files(&["Nope.vert", "HDR.frag"]));
        assert_eq!(
            missing.unwrap_err(),
            ShaderError::NotFound {
                file: "Nope.vert".into()
            }
        );

        let broken = repository.program(
            &mut backend,
            &files(&["FullscreenPass.vert", "Broken.frag"]),
        );
        assert!(matches!(broken, Err(ShaderError::Compilation { .. })));

        let vertex_only = repository.program(&mut backend, &files(&["FullscreenPass.vert"]));
        assert!(matches!(vertex_only, Err(ShaderError::MissingStage { .. })));
    }

    #[test]
    fn test_unsupported_stages_are_skipped() {
        let app = InMemoryShaders::new("app").with_file("Extra.geom", "// unused");
        let mut repository = ShaderRepository::new(Some(Arc::new(app)));
        let mut backend = HeadlessBackend::new(4, 4);

        let program = repository
            .program(
                &mut backend,
                &files(&["FullscreenPass.vert", "Extra.geom", "HDR.frag"]),
            )
            .unwrap();
        assert!(program.reflection().has_block("ShaderParameters"));
        assert_eq!(program.reflection().textures[0].name, "HDRBuffer");
    }
}
