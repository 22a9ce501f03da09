//! Per-instance matrix streams of instanced masters.

use std::sync::Arc;

use glam::Mat4;

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend,
    VertexBufferLayout,
};
use crate::scene::Node;

/// First vertex buffer slot used by instance streams; slots 0..3 hold the mesh streams.
pub const INSTANCE_SLOT: u32 = 3;

/// Shader locations of the model, model-view and model-view-projection matrices.
pub const INSTANCE_LOCATIONS: [u32; 3] = [3, 7, 11];

const MATRIX_SIZE: u64 = 64;
const MIN_CAPACITY: usize = 16;

/// Vertex layouts of the three instance streams, in slot order.
pub fn instance_layouts() -> Vec<VertexBufferLayout> {
    INSTANCE_LOCATIONS
        .iter()
        .map(|location| VertexBufferLayout::instance_matrix(*location))
        .collect()
}

/// Three instance-rate vertex buffers, one per matrix.
#[derive(Debug)]
pub(crate) struct InstanceBuffers {
    buffers: [BufferHandle; 3],
    capacity: usize,
    count: u32,
}

impl InstanceBuffers {
    fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        capacity: usize,
    ) -> BackendResult<Self> {
        let mut buffers = Vec::with_capacity(3);
        for stream in ["Model", "ModelView", "MVP"] {
            buffers.push(backend.create_buffer(&BufferDescriptor {
                label: Some(format!("{name}.instances.{stream}")),
                size: capacity as u64 * MATRIX_SIZE,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            })?);
        }
        log::debug!("Created instance buffers of {name} for {capacity} instances");
        Ok(Self {
            buffers: [buffers[0], buffers[1], buffers[2]],
            capacity,
            count: 0,
        })
    }

    /// Rewrite the streams from the transforms of `instances`, growing the buffers if needed.
    ///
    /// `existing` is consumed; the returned buffers replace it.
    pub fn update<B: GraphicsBackend + ?Sized>(
        existing: Option<Self>,
        backend: &mut B,
        name: &str,
        instances: &[Arc<Node>],
        view: Mat4,
        projection: Mat4,
    ) -> BackendResult<Self> {
        let mut buffers = match existing {
            Some(buffers) if buffers.capacity >= instances.len() => buffers,
            Some(buffers) => {
                buffers.destroy(backend);
                Self::create(backend, name, grown(instances.len()))?
            }
            None => Self::create(backend, name, grown(instances.len()))?,
        };

        let mut model = Vec::with_capacity(instances.len());
        let mut model_view = Vec::with_capacity(instances.len());
        let mut mvp = Vec::with_capacity(instances.len());
        for instance in instances {
            let m = instance.transform().matrix();
            let mv = view * m;
            model.push(m);
            model_view.push(mv);
            mvp.push(projection * mv);
        }

        for (buffer, matrices) in buffers.buffers.iter().zip([&model, &model_view, &mvp]) {
            if !matrices.is_empty() {
                backend.write_buffer(*buffer, 0, bytemuck::cast_slice(matrices.as_slice()));
            }
        }
        buffers.count = instances.len() as u32;
        Ok(buffers)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Bind the streams to slots [`INSTANCE_SLOT`] and up.
    pub fn bind<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        for (slot, buffer) in (INSTANCE_SLOT..).zip(self.buffers) {
            backend.set_vertex_buffer(slot, buffer, 0);
        }
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for buffer in self.buffers {
            backend.destroy_buffer(buffer);
        }
    }
}

fn grown(required: usize) -> usize {
    required.max(MIN_CAPACITY).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::scene::{Geometry, Transform};
    use glam::Vec3;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn instances(master: &Node, count: usize) -> Vec<Arc<Node>> {
        (0..count)
            .map(|i| {
                Arc::new(
                    Node::instance(format!("i{i}"), master)
                        .with_transform(Transform::from_position(Vec3::X * i as f32)),
                )
            })
            .collect()
    }

    #[test]
    fn test_streams_hold_instance_matrices() {
        let mut backend = HeadlessBackend::new(8, 8);
        let master = Node::new("master", Geometry::cube());
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));

        let nodes = instances(&master, 3);
        let buffers =
            InstanceBuffers::update(None, &mut backend, "master", &nodes, view, Mat4::IDENTITY)
                .unwrap();

        assert_eq!(buffers.count(), 3);
        let model = floats(backend.buffer_data(buffers.buffers[0]).unwrap());
        assert_eq!(&model[16 + 12..16 + 15], &[1.0, 0.0, 0.0]);

        let model_view = floats(backend.buffer_data(buffers.buffers[1]).unwrap());
        assert_eq!(model_view[14], -5.0);
    }

    #[test]
    fn test_buffers_grow_and_release_old_ones() {
        let mut backend = HeadlessBackend::new(8, 8);
        let master = Node::new("master", Geometry::cube());

        let small = InstanceBuffers::update(
            None,
            &mut backend,
            "master",
            &instances(&master, 2),
            Mat4::IDENTITY,
            Mat4::IDENTITY,
        )
        .unwrap();
        assert_eq!(small.capacity, MIN_CAPACITY);

        let large = InstanceBuffers::update(
            Some(small),
            &mut backend,
            "master",
            &instances(&master, 40),
            Mat4::IDENTITY,
            Mat4::IDENTITY,
        )
        .unwrap();
        assert_eq!(large.capacity, 64);
        assert_eq!(backend.live_buffers(), 3);

        large.destroy(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
    }
}
