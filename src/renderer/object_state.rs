//! GPU-side state attached to scene nodes.
//!
//! Each node the renderer draws gets one [`ObjectGpuState`], created the first time the node is
//! encountered and kept in a side table keyed by [`NodeId`] until the node leaves the scene.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, TextureViewHandle,
};
use crate::error::ArenaError;
use crate::renderer::globals::SharedFrameView;
use crate::renderer::instancing::InstanceBuffers;
use crate::resources::{Material, TextureCache, TextureLoader, TextureSlot};
use crate::scene::{Geometry, Node, NodeId};
use crate::shader::{ShaderProgram, ShaderRepository};
use crate::uniform::{ArenaKind, UniformArenas, UniformBlock, UniformValue};

/// How long initialization waits for a node's geometry before retrying next frame.
pub const INIT_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Shader set of instanced masters that bring none of their own.
pub const DEFAULT_INSTANCED_SHADERS: [&str; 2] =
    ["DefaultDeferredInstanced.vert", "DefaultDeferred.frag"];

pub const MATRICES_BLOCK: &str = "Matrices";
pub const MATERIAL_BLOCK: &str = "MaterialProperties";
pub const SHADER_PROPERTIES_BLOCK: &str = "ShaderProperties";

/// Vertex and index buffers of one node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GpuGeometry {
    pub positions: BufferHandle,
    pub normals: BufferHandle,
    pub texcoords: BufferHandle,
    pub indices: Option<BufferHandle>,
    pub vertex_count: u32,
    pub index_count: u32,
}

impl GpuGeometry {
    fn upload<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        geometry: &Geometry,
    ) -> BackendResult<Self> {
        let vertex = |label: &str| BufferDescriptor {
            label: Some(format!("{name}.{label}")),
            size: 0,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
        };
        let positions =
            backend.create_buffer_init(&vertex("positions"), geometry.position_bytes())?;
        let normals = backend.create_buffer_init(&vertex("normals"), &geometry.normal_bytes())?;
        let texcoords =
            backend.create_buffer_init(&vertex("texcoords"), &geometry.texcoord_bytes())?;
        let indices = if geometry.is_indexed() {
            Some(backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{name}.indices")),
                    size: 0,
                    usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                },
                geometry.index_bytes(),
            )?)
        } else {
            None
        };
        Ok(Self {
            positions,
            normals,
            texcoords,
            indices,
            vertex_count: geometry.vertex_count() as u32,
            index_count: geometry.index_count() as u32,
        })
    }

    fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for buffer in [self.positions, self.normals, self.texcoords]
            .into_iter()
            .chain(self.indices)
        {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Outcome of the per-frame geometry refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeometryRefresh {
    Clean,
    Uploaded,
    /// A writer held the geometry; the previous upload stays in use.
    Contended,
}

/// GPU resources and uniform blocks of one scene node.
#[derive(Debug)]
pub(crate) struct ObjectGpuState {
    pub geometry: GpuGeometry,
    pub matrices: UniformBlock,
    pub material: UniformBlock,
    pub shader_properties: Option<UniformBlock>,
    /// Program resolved from the node itself; `None` draws with the pass default.
    pub program: Option<Arc<ShaderProgram>>,
    /// Shader set the program was last resolved from; `None` before the first resolution
    shader_files: Option<Option<Vec<String>>>,
    pub textures: BTreeMap<TextureSlot, TextureViewHandle>,
    texture_keys: BTreeMap<TextureSlot, String>,
    material_flags: Arc<AtomicI32>,
    pub instances: Option<InstanceBuffers>,
}

impl ObjectGpuState {
    /// Create the state of `node`.
    ///
    /// Returns `Ok(None)` when the node's geometry stays locked for longer than
    /// [`INIT_LOCK_TIMEOUT`]; initialization is retried on a later frame.
    pub fn initialize<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        node: &Arc<Node>,
        view: &SharedFrameView,
    ) -> BackendResult<Option<Self>> {
        let Some(geometry) = node.try_read_geometry_for(INIT_LOCK_TIMEOUT) else {
            log::debug!("Node {} is locked, deferring initialization", node.name());
            return Ok(None);
        };
        let geometry = GpuGeometry::upload(backend, node.name(), &geometry)?;
        node.clear_dirty();

        let material_flags = Arc::new(AtomicI32::new(0));
        let state = Self {
            geometry,
            matrices: matrices_block(node, view),
            material: material_block(node, &material_flags),
            shader_properties: None,
            program: None,
            shader_files: None,
            textures: BTreeMap::new(),
            texture_keys: BTreeMap::new(),
            material_flags,
            instances: None,
        };
        log::debug!(
            "Initialized node {} ({} vertices, {} indices)",
            node.name(),
            state.geometry.vertex_count,
            state.geometry.index_count
        );
        Ok(Some(state))
    }

    /// Re-upload dirty geometry without ever waiting for a writer.
    pub fn refresh_geometry<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        node: &Node,
    ) -> BackendResult<GeometryRefresh> {
        if !node.is_dirty() {
            return Ok(GeometryRefresh::Clean);
        }
        let Some(geometry) = node.try_read_geometry() else {
            log::trace!("Geometry of {} is locked, keeping previous upload", node.name());
            return Ok(GeometryRefresh::Contended);
        };
        let uploaded = GpuGeometry::upload(backend, node.name(), &geometry)?;
        node.clear_dirty();
        drop(geometry);
        self.geometry.destroy(backend);
        self.geometry = uploaded;
        Ok(GeometryRefresh::Uploaded)
    }

    /// Resolve the node's own shader set, re-resolving when its shader material changed.
    ///
    /// Shader files of the node kind take precedence over an attached shader material. Instanced
    /// masters without either use the built-in instanced program. A set that fails to resolve falls
    /// back to the pass default.
    pub fn refresh_program<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderRepository,
        node: &Node,
        instanced: bool,
    ) {
        let files = node
            .shader_files()
            .map(<[String]>::to_vec)
            .or_else(|| node.shader_material())
            .or_else(|| {
                instanced.then(|| DEFAULT_INSTANCED_SHADERS.iter().map(|s| s.to_string()).collect())
            });
        if self.shader_files.as_ref() == Some(&files) {
            return;
        }

        self.program = match &files {
            Some(files) => match shaders.program(backend, files) {
                Ok(program) => Some(program),
                Err(e) => {
                    log::warn!(
                        "Shader for {} failed, falling back to the pass default: {e}",
                        node.name()
                    );
                    None
                }
            },
            None => None,
        };
        self.shader_files = Some(files);
        self.shader_properties = shader_properties_block(node, self.program.as_deref());
    }

    /// Resolve the material's textures through the cache when its texture set changed.
    ///
    /// Slots that fall back to the default texture are left out of the material flags.
    pub fn refresh_textures<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        cache: &mut TextureCache,
        loader: &dyn TextureLoader,
        node: &Node,
    ) -> BackendResult<()> {
        let sources = node.read_material().textures.clone();
        let keys: BTreeMap<TextureSlot, String> =
            sources.iter().map(|(slot, source)| (*slot, source.key())).collect();
        if keys == self.texture_keys && keys.len() == self.textures.len() {
            return Ok(());
        }

        let mut textures = BTreeMap::new();
        let mut substituted = Vec::new();
        for (slot, source) in &sources {
            let (texture, fallback) = cache.resolve(backend, loader, source)?;
            if fallback {
                substituted.push(*slot);
            }
            textures.insert(*slot, texture.view);
        }

        let flags = node.read_material().flags(&substituted);
        self.material_flags.store(flags, Ordering::Relaxed);
        self.textures = textures;
        self.texture_keys = keys;
        Ok(())
    }

    pub fn material_flags(&self) -> i32 {
        self.material_flags.load(Ordering::Relaxed)
    }

    /// Populate the object blocks into this frame's arenas.
    ///
    /// Returns whether any block changed.
    pub fn populate(
        &mut self,
        arenas: &mut UniformArenas,
    ) -> std::result::Result<bool, ArenaError> {
        let arena = arenas.get_mut(ArenaKind::ObjectData);
        let offset = arena.advance_default()?;
        let mut changed = self.matrices.populate(arena, offset)?;
        let offset = arena.advance_default()?;
        changed |= self.material.populate(arena, offset)?;

        if let Some(block) = &mut self.shader_properties {
            let arena = arenas.get_mut(ArenaKind::ShaderProperties);
            let offset = arena.advance_default()?;
            changed |= block.populate(arena, offset)?;
        }
        Ok(changed)
    }

    /// Destroy the node's buffers. Textures belong to the cache and stay.
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        self.geometry.destroy(backend);
        if let Some(instances) = self.instances.take() {
            instances.destroy(backend);
        }
    }
}

fn matrices_block(node: &Arc<Node>, view: &SharedFrameView) -> UniformBlock {
    let mut block = UniformBlock::new(MATRICES_BLOCK, ArenaKind::ObjectData);
    let n = node.clone();
    block.add("ModelMatrix", move || n.transform().matrix().into());
    let n = node.clone();
    block.add("NormalMatrix", move || n.transform().normal_matrix().into());
    let v = view.clone();
    block.add("ProjectionMatrix", move || v.read().projection.into());
    let n = node.clone();
    block.add("isBillboard", move || UniformValue::Int(n.is_billboard() as i32));
    block
}

fn material_color(
    node: &Arc<Node>,
    pick: fn(&Material) -> Vec3,
) -> impl Fn() -> UniformValue + Send + Sync + 'static {
    let node = node.clone();
    move || UniformValue::Vec3(pick(&node.read_material()))
}

fn material_block(node: &Arc<Node>, flags: &Arc<AtomicI32>) -> UniformBlock {
    let mut block = UniformBlock::new(MATERIAL_BLOCK, ArenaKind::ObjectData);
    block.add("Ka", material_color(node, |m| m.ambient));
    block.add("Kd", material_color(node, |m| m.diffuse));
    block.add("Ks", material_color(node, |m| m.specular));
    let n = node.clone();
    block.add("Roughness", move || n.read_material().roughness.into());
    let n = node.clone();
    block.add("Metallic", move || n.read_material().metallic.into());
    let n = node.clone();
    block.add("Opacity", move || n.read_material().opacity.into());
    let f = flags.clone();
    block.add("materialType", move || UniformValue::Int(f.load(Ordering::Relaxed)));
    block
}

/// Block over the node's named shader properties, laid out as the program declares them.
fn shader_properties_block(node: &Node, program: Option<&ShaderProgram>) -> Option<UniformBlock> {
    let properties = node.shader_properties()?;
    let layout = program.and_then(|p| p.reflection().block(SHADER_PROPERTIES_BLOCK));

    let mut block = UniformBlock::new(SHADER_PROPERTIES_BLOCK, ArenaKind::ShaderProperties);
    for name in properties.property_names() {
        let offset = match layout {
            Some(layout) => match layout.member(&name) {
                Some(member) => Some(member.offset as usize),
                None => {
                    log::debug!("Shader of {} does not use property {name}", node.name());
                    continue;
                }
            },
            None => None,
        };
        let Some(initial) = properties.property(&name) else {
            log::warn!("Node {} lists property {name} but has no value for it", node.name());
            continue;
        };
        let source = properties.clone();
        let member = name.clone();
        block.add_supplier(
            name,
            Arc::new(move || source.property(&member).unwrap_or(initial)),
            offset,
        );
    }
    Some(block)
}

/// Destroy the state of every node in `states` not listed in `live`.
pub(crate) fn retain_live<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    states: &mut HashMap<NodeId, ObjectGpuState>,
    live: &HashSet<NodeId>,
) -> usize {
    let removed: Vec<NodeId> = states.keys().filter(|id| !live.contains(id)).copied().collect();
    for id in &removed {
        if let Some(mut state) = states.remove(id) {
            log::debug!("Releasing GPU state of removed node {:?}", id);
            state.release(backend);
        }
    }
    removed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::renderer::globals::FrameView;
    use crate::resources::{TextureData, TextureSource};
    use crate::scene::Transform;
    use crate::uniform::ArenaCapacities;
    use parking_lot::RwLock;

    fn view() -> SharedFrameView {
        Arc::new(RwLock::new(FrameView::default()))
    }

    #[test]
    fn test_initialize_uploads_geometry_and_clears_dirty() {
        let mut backend = HeadlessBackend::new(8, 8);
        let node = Arc::new(Node::new("cube", Geometry::cube()));
        assert!(node.is_dirty());

        let state = ObjectGpuState::initialize(&mut backend, &node, &view()).unwrap().unwrap();
        assert!(!node.is_dirty());
        assert_eq!(state.geometry.vertex_count as usize, Geometry::cube().vertex_count());
        assert!(state.geometry.indices.is_some());
    }

    #[test]
    fn test_initialize_defers_while_locked() {
        let mut backend = HeadlessBackend::new(8, 8);
        let node = Arc::new(Node::new("busy", Geometry::triangle()));
        let _writer = node.lock_geometry();

        let state = ObjectGpuState::initialize(&mut backend, &node, &view()).unwrap();
        assert!(state.is_none());
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_object_blocks_layout() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut arenas = UniformArenas::create(&mut backend, &ArenaCapacities::default()).unwrap();
        let node = Arc::new(
            Node::new("n", Geometry::triangle())
                .with_transform(Transform::from_position(Vec3::X)),
        );
        let mut state = ObjectGpuState::initialize(&mut backend, &node, &view()).unwrap().unwrap();

        assert!(state.populate(&mut arenas).unwrap());
        assert_eq!(state.matrices.size(), 208);
        assert_eq!(state.material.size(), 64);
        assert_eq!(state.material.offset(), Some(256));

        arenas.get_mut(ArenaKind::ObjectData).reset();
        assert!(!state.populate(&mut arenas).unwrap());
    }

    #[test]
    fn test_texture_substitution_clears_flag() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut cache = TextureCache::new();
        let material = Material::default()
            .with_texture(TextureSlot::Diffuse, TextureSource::file("missing/diffuse.png"))
            .with_texture(
                TextureSlot::Normal,
                TextureSource::buffer(
                    "normal",
                    TextureData::solid_color([128, 128, 255, 255], "normal"),
                ),
            );
        let node = Arc::new(Node::new("n", Geometry::triangle()).with_material(material));
        let mut state = ObjectGpuState::initialize(&mut backend, &node, &view()).unwrap().unwrap();

        state
            .refresh_textures(&mut backend, &mut cache, &crate::resources::ImageFileLoader, &node)
            .unwrap();

        assert_eq!(state.material_flags(), crate::resources::flags::NORMAL);
        assert_eq!(state.textures.len(), 2);
        assert_eq!(
            state.textures[&TextureSlot::Diffuse],
            cache.default_texture().unwrap().view
        );
    }
}
