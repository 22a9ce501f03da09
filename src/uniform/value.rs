//! Uniform member values and their byte layout.
//!
//! Layout follows the uniform address space rules: scalars align to 4 bytes, `vec2` to 8,
//! `vec3`/`vec4`/`mat4` to 16. Booleans are stored as 32-bit integers.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::settings::SettingValue;

/// A single value written into a uniform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Size in bytes of the serialized value.
    pub fn size(&self) -> usize {
        match self {
            UniformValue::Float(_)
            | UniformValue::Int(_)
            | UniformValue::UInt(_)
            | UniformValue::Bool(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
            UniformValue::Mat4(_) => 64,
        }
    }

    /// Required alignment of the value's offset.
    pub fn alignment(&self) -> usize {
        match self {
            UniformValue::Float(_)
            | UniformValue::Int(_)
            | UniformValue::UInt(_)
            | UniformValue::Bool(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) | UniformValue::Vec4(_) | UniformValue::Mat4(_) => 16,
        }
    }

    /// Append the little-endian representation to `out`.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            UniformValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            UniformValue::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Bool(v) => out.extend_from_slice(&(*v as i32).to_le_bytes()),
            UniformValue::Vec2(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Mat4(m) => out.extend_from_slice(bytemuck::bytes_of(m)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.write_bytes(&mut out);
        out
    }

    /// Uniform representation of a settings value. Text and vectors longer than four
    /// components have none.
    pub fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bool(v) => Some(UniformValue::Bool(*v)),
            SettingValue::Int(v) => Some(UniformValue::Int(*v as i32)),
            SettingValue::Float(v) => Some(UniformValue::Float(*v)),
            SettingValue::Vector(v) => match v.as_slice() {
                [x] => Some(UniformValue::Float(*x)),
                [x, y] => Some(UniformValue::Vec2(Vec2::new(*x, *y))),
                [x, y, z] => Some(UniformValue::Vec3(Vec3::new(*x, *y, *z))),
                [x, y, z, w] => Some(UniformValue::Vec4(Vec4::new(*x, *y, *z, *w))),
                _ => None,
            },
            SettingValue::Text(_) => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::UInt(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}
