//! Scene nodes as seen by the renderer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::resources::Material;
use crate::scene::{Geometry, Transform};
use crate::uniform::UniformValue;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a node for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Named values a node exposes to its shader's `ShaderProperties` block.
///
/// Values are read every frame; the member layout comes from the shader.
pub trait ShaderProperties: Send + Sync {
    /// Property names in declaration order
    fn property_names(&self) -> Vec<String>;

    fn property(&self, name: &str) -> Option<UniformValue>;
}

/// A renderable scene node.
///
/// Geometry sits behind a reader/writer lock: application threads take the write side to
/// replace it and the renderer only ever tries the read side, so a frame never waits on a writer.
pub struct Node {
    id: NodeId,
    name: String,
    geometry: RwLock<Geometry>,
    dirty: AtomicBool,
    transform: RwLock<Transform>,
    material: RwLock<Material>,
    visible: AtomicBool,
    billboard: AtomicBool,
    light_volume: bool,
    shader_files: Option<Vec<String>>,
    shader_material: RwLock<Option<Vec<String>>>,
    instance_of: Option<NodeId>,
    shader_properties: Option<Arc<dyn ShaderProperties>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instance_of", &self.instance_of)
            .field("visible", &self.is_visible())
            .finish()
    }
}

impl Node {
    pub fn new(name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            geometry: RwLock::new(geometry),
            dirty: AtomicBool::new(true),
            transform: RwLock::new(Transform::default()),
            material: RwLock::new(Material::default()),
            visible: AtomicBool::new(true),
            billboard: AtomicBool::new(false),
            light_volume: false,
            shader_files: None,
            shader_material: RwLock::new(None),
            instance_of: None,
            shader_properties: None,
        }
    }

    /// An instance of `master`: it contributes only its transform to the master's instance buffer.
    pub fn instance(name: impl Into<String>, master: &Node) -> Self {
        let mut node = Self::new(name, Geometry::default());
        node.instance_of = Some(master.id);
        node.dirty = AtomicBool::new(false);
        node
    }

    pub fn with_transform(self, transform: Transform) -> Self {
        *self.transform.write() = transform;
        self
    }

    pub fn with_material(self, material: Material) -> Self {
        *self.material.write() = material;
        self
    }

    /// Shader file set belonging to the node's kind. Takes precedence over a shader material.
    pub fn with_shaders(mut self, files: &[&str]) -> Self {
        self.shader_files = Some(files.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_shader_properties(mut self, properties: Arc<dyn ShaderProperties>) -> Self {
        self.shader_properties = Some(properties);
        self
    }

    /// Mark the node as a light volume, drawn by `lights` passes instead of geometry passes.
    pub fn as_light_volume(mut self) -> Self {
        self.light_volume = true;
        self
    }

    pub fn with_billboard(self, billboard: bool) -> Self {
        self.billboard.store(billboard, Ordering::Relaxed);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_of(&self) -> Option<NodeId> {
        self.instance_of
    }

    pub fn is_instance(&self) -> bool {
        self.instance_of.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn is_billboard(&self) -> bool {
        self.billboard.load(Ordering::Relaxed)
    }

    pub fn is_light_volume(&self) -> bool {
        self.light_volume
    }

    pub fn shader_files(&self) -> Option<&[String]> {
        self.shader_files.as_deref()
    }

    pub fn shader_material(&self) -> Option<Vec<String>> {
        self.shader_material.read().clone()
    }

    /// Attach a shader material, used when the node's kind brings no shaders.
    pub fn set_shader_material(&self, files: &[&str]) {
        *self.shader_material.write() = Some(files.iter().map(|f| f.to_string()).collect());
    }

    pub fn shader_properties(&self) -> Option<&Arc<dyn ShaderProperties>> {
        self.shader_properties.as_ref()
    }

    pub fn transform(&self) -> Transform {
        *self.transform.read()
    }

    pub fn set_transform(&self, transform: Transform) {
        *self.transform.write() = transform;
    }

    pub fn material(&self) -> Material {
        self.material.read().clone()
    }

    /// Shared access to the material without cloning it.
    pub fn read_material(&self) -> RwLockReadGuard<'_, Material> {
        self.material.read()
    }

    pub fn update_material(&self, update: impl FnOnce(&mut Material)) {
        update(&mut self.material.write());
    }

    /// Replace the geometry and flag it for re-upload. Blocks until no reader holds it.
    pub fn set_geometry(&self, geometry: Geometry) {
        *self.geometry.write() = geometry;
        self.mark_dirty();
    }

    /// Exclusive access to the geometry. Call [`Self::mark_dirty`] after changing it.
    pub fn lock_geometry(&self) -> RwLockWriteGuard<'_, Geometry> {
        self.geometry.write()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Non-blocking read access. `None` while a writer holds the geometry.
    pub fn try_read_geometry(&self) -> Option<RwLockReadGuard<'_, Geometry>> {
        self.geometry.try_read()
    }

    /// Read access, giving up after `timeout`.
    pub fn try_read_geometry_for(
        &self,
        timeout: Duration,
    ) -> Option<RwLockReadGuard<'_, Geometry>> {
        self.geometry.try_read_for(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = Node::new("a", Geometry::triangle());
        let b = Node::new("b", Geometry::triangle());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_writer_blocks_try_read() {
        let node = Node::new("n", Geometry::triangle());
        {
            let _guard = node.lock_geometry();
            assert!(node.try_read_geometry().is_none());
        }
        assert!(node.try_read_geometry().is_some());
    }

    #[test]
    fn test_instances_point_at_their_master() {
        let master = Node::new("master", Geometry::cube());
        let instance = Node::instance("copy", &master);
        assert_eq!(instance.instance_of(), Some(master.id()));
        assert!(!instance.is_dirty());
    }
}
