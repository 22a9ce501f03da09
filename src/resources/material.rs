//! Material definitions for deferred shading

use std::collections::BTreeMap;

use glam::Vec3;

use crate::resources::TextureSource;

/// Bits of the `materialType` uniform telling the shader which textures are real.
pub mod flags {
    pub const DIFFUSE: i32 = 0x1;
    pub const AMBIENT: i32 = 0x2;
    pub const SPECULAR: i32 = 0x4;
    pub const NORMAL: i32 = 0x8;
    pub const ALPHA_MASK: i32 = 0x10;
}

/// Semantic texture slots of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureSlot {
    Ambient,
    Diffuse,
    Specular,
    Normal,
    AlphaMask,
    Displacement,
    Volume,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 7] = [
        TextureSlot::Ambient,
        TextureSlot::Diffuse,
        TextureSlot::Specular,
        TextureSlot::Normal,
        TextureSlot::AlphaMask,
        TextureSlot::Displacement,
        TextureSlot::Volume,
    ];

    /// Texture unit relative to the first unit after a pass's input attachments.
    pub fn unit_offset(&self) -> u32 {
        match self {
            TextureSlot::Ambient => 0,
            TextureSlot::Diffuse => 1,
            TextureSlot::Specular => 2,
            TextureSlot::Normal => 3,
            TextureSlot::AlphaMask => 4,
            TextureSlot::Displacement => 5,
            TextureSlot::Volume => 6,
        }
    }

    /// Name of the texture binding in shaders.
    pub fn binding_name(&self) -> String {
        match self {
            TextureSlot::Volume => "VolumeTextures".to_string(),
            other => format!("ObjectTextures{}", other.unit_offset()),
        }
    }

    /// Material flag set when the slot holds a real texture.
    pub fn flag(&self) -> i32 {
        match self {
            TextureSlot::Ambient => flags::AMBIENT,
            TextureSlot::Diffuse => flags::DIFFUSE,
            TextureSlot::Specular => flags::SPECULAR,
            TextureSlot::Normal => flags::NORMAL,
            TextureSlot::AlphaMask => flags::ALPHA_MASK,
            TextureSlot::Displacement | TextureSlot::Volume => 0,
        }
    }
}

/// Surface description of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    pub opacity: f32,
    /// Drawn by passes that render transparent geometry
    pub transparent: bool,
    /// Disables back-face culling
    pub double_sided: bool,
    pub textures: BTreeMap<TextureSlot, TextureSource>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            ambient: Vec3::splat(0.5),
            diffuse: Vec3::new(0.9, 0.5, 0.5),
            specular: Vec3::splat(0.5),
            roughness: 1.0,
            metallic: 0.0,
            opacity: 1.0,
            transparent: false,
            double_sided: false,
            textures: BTreeMap::new(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_diffuse(mut self, color: Vec3) -> Self {
        self.diffuse = color;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.double_sided = double_sided;
        self
    }

    pub fn with_texture(mut self, slot: TextureSlot, source: TextureSource) -> Self {
        self.textures.insert(slot, source);
        self
    }

    /// The `materialType` bitmask for the given set of slots that fell back to the default texture.
    pub fn flags(&self, substituted: &[TextureSlot]) -> i32 {
        self.textures
            .keys()
            .filter(|slot| !substituted.contains(slot))
            .fold(0, |bits, slot| bits | slot.flag())
    }
}
