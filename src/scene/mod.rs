//! Scene management
//!
//! The minimal scene surface the renderer reads: nodes with geometry, material, transform and
//! visibility, an optional instancing relation, point lights and one camera. Any thread may
//! mutate a shared [`Scene`] while the renderer draws it.

mod camera;
mod geometry;
mod light;
mod node;
mod transform;

pub use camera::*;
pub use geometry::*;
pub use light::*;
pub use node::*;
pub use transform::*;

use std::sync::Arc;

use parking_lot::RwLock;

/// The scene containing all renderable content
#[derive(Debug, Default)]
pub struct Scene {
    nodes: RwLock<Vec<Arc<Node>>>,
    lights: RwLock<Vec<PointLight>>,
    camera: RwLock<Camera>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(camera: Camera) -> Self {
        Self {
            camera: RwLock::new(camera),
            ..Default::default()
        }
    }

    /// Add a node and return the shared handle to it.
    pub fn add_node(&self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.nodes.write().push(node.clone());
        node
    }

    pub fn remove_node(&self, id: NodeId) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let index = nodes.iter().position(|n| n.id() == id)?;
        Some(nodes.remove(index))
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id() == id).cloned()
    }

    /// Snapshot of all nodes.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn discover(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| predicate(n))
            .cloned()
            .collect()
    }

    pub fn instances_of(&self, master: NodeId) -> Vec<Arc<Node>> {
        self.discover(|n| n.instance_of() == Some(master))
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn add_light(&self, light: PointLight) -> usize {
        let mut lights = self.lights.write();
        lights.push(light);
        lights.len() - 1
    }

    pub fn lights(&self) -> Vec<PointLight> {
        self.lights.read().clone()
    }

    pub fn update_lights(&self, update: impl FnOnce(&mut Vec<PointLight>)) {
        update(&mut self.lights.write());
    }

    pub fn camera(&self) -> Camera {
        self.camera.read().clone()
    }

    pub fn set_camera(&self, camera: Camera) {
        *self.camera.write() = camera;
    }

    pub fn update_camera(&self, update: impl FnOnce(&mut Camera)) {
        update(&mut self.camera.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_discover_remove() {
        let scene = Scene::new();
        let master = scene.add_node(Node::new("master", Geometry::cube()));
        scene.add_node(Node::instance("a", &master));
        scene.add_node(Node::instance("b", &master));

        assert_eq!(scene.len(), 3);
        assert_eq!(scene.instances_of(master.id()).len(), 2);
        assert_eq!(scene.discover(|n| !n.is_instance()).len(), 1);

        assert!(scene.remove_node(master.id()).is_some());
        assert!(scene.node(master.id()).is_none());
        assert!(scene.remove_node(master.id()).is_none());
    }
}
