//! Mesh geometry carried by scene nodes

use glam::{Vec2, Vec3};

/// Vertex streams and indices of a mesh.
///
/// Streams are uploaded as separate vertex buffers: positions at location 0, normals at 1 and
/// texture coordinates at 2. Missing normals or texture coordinates are padded with zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn new(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vec3>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_texcoords(mut self, texcoords: Vec<Vec2>) -> Self {
        self.texcoords = texcoords;
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Normals padded or truncated to the vertex count.
    pub fn normal_bytes(&self) -> Vec<u8> {
        let mut normals = self.normals.clone();
        normals.resize(self.positions.len(), Vec3::ZERO);
        bytemuck::cast_slice(&normals).to_vec()
    }

    /// Texture coordinates padded or truncated to the vertex count.
    pub fn texcoord_bytes(&self) -> Vec<u8> {
        let mut texcoords = self.texcoords.clone();
        texcoords.resize(self.positions.len(), Vec2::ZERO);
        bytemuck::cast_slice(&texcoords).to_vec()
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Single triangle in the XY plane
    pub fn triangle() -> Self {
        Self::new(vec![
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
        ])
        .with_normals(vec![Vec3::Z; 3])
        .with_texcoords(vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.5, 0.0),
        ])
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [
            (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
            (Vec2::new(0.5, -0.5), Vec2::new(1.0, 1.0)),
            (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec2::new(-0.5, 0.5), Vec2::new(0.0, 0.0)),
        ];

        let mut geometry = Geometry::default();
        for (face, (normal, right, up)) in faces.into_iter().enumerate() {
            for (corner, uv) in corners {
                geometry
                    .positions
                    .push(normal * 0.5 + right * corner.x + up * corner.y);
                geometry.normals.push(normal);
                geometry.texcoords.push(uv);
            }
            // Define indices (two triangles per face)
            let base = face as u32 * 4;
            geometry
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        geometry
    }

    /// Create a UV sphere
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut geometry = Geometry::default();
        let segments = segments.max(3);
        let rings = rings.max(2);

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                geometry.positions.push(normal * 0.5);
                geometry.normals.push(normal.normalize_or_zero());
                geometry.texcoords.push(Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                ));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                geometry.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }
        geometry
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32) -> Self {
        let (hw, hd) = (width / 2.0, depth / 2.0);
        Self::new(vec![
            Vec3::new(-hw, 0.0, -hd),
            Vec3::new(-hw, 0.0, hd),
            Vec3::new(hw, 0.0, hd),
            Vec3::new(hw, 0.0, -hd),
        ])
        .with_normals(vec![Vec3::Y; 4])
        .with_texcoords(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
        ])
        .with_indices(vec![0, 1, 2, 0, 2, 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = Geometry::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.positions.iter().all(|p| p.abs().max_element() <= 0.5 + 1e-6));
    }

    #[test]
    fn test_missing_streams_are_padded() {
        let geometry = Geometry::new(vec![Vec3::ZERO; 4]);
        assert_eq!(geometry.normal_bytes().len(), 4 * 12);
        assert_eq!(geometry.texcoord_bytes().len(), 4 * 8);
        assert!(!geometry.is_indexed());
    }
}
