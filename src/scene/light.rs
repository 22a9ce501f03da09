//! Point lights

use glam::Vec3;

/// A point light with quadratic attenuation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            linear: 0.7,
            quadratic: 1.8,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn with_attenuation(mut self, linear: f32, quadratic: f32) -> Self {
        self.linear = linear;
        self.quadratic = quadratic;
        self
    }

    /// Distance beyond which the light contributes less than one 8-bit intensity step.
    pub fn radius(&self) -> f32 {
        let threshold = 1.0 - (256.0 / 5.0) * 100.0;
        -self.linear + (self.linear * self.linear - 4.0 * self.quadratic * threshold).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_from_attenuation() {
        let light = PointLight::default().with_attenuation(0.7, 1.8);
        let expected = -0.7 + (0.49f32 - 4.0 * 1.8 * (1.0 - 5120.0)).sqrt();
        assert!(light.radius() > 0.0);
        assert!((light.radius() - expected).abs() < 1e-3);
    }
}
