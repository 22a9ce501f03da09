//! Per-frame uniform blocks shared by every draw: camera and lights, VR parameters.

use std::sync::Arc;

use glam::Mat4;
use parking_lot::RwLock;

use crate::backend::GraphicsBackend;
use crate::error::Result;
use crate::scene::{Camera, PointLight, Scene};
use crate::settings::{SettingValue, Settings};
use crate::uniform::{ArenaKind, UniformArenas, UniformBlock, UniformValue};

/// Name of the camera and light block as declared in shaders.
pub const LIGHT_PARAMETERS_BLOCK: &str = "LightParameters";

/// Name of the stereo rendering block as declared in shaders.
pub const VR_PARAMETERS_BLOCK: &str = "VRParameters";

/// Lights the built-in lighting shader can read.
pub const MAX_LIGHTS: usize = 128;

const DEFAULT_IPD: f32 = 0.05;

/// Camera state captured once at the start of a frame.
#[derive(Debug, Clone)]
pub(crate) struct FrameView {
    pub camera: Camera,
    pub view: Mat4,
    pub projection: Mat4,
    pub eye_views: [Mat4; 2],
    pub lights: Vec<PointLight>,
    pub ipd: f32,
    pub stereo: bool,
}

impl Default for FrameView {
    fn default() -> Self {
        Self {
            camera: Camera::default(),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            eye_views: [Mat4::IDENTITY; 2],
            lights: Vec::new(),
            ipd: DEFAULT_IPD,
            stereo: false,
        }
    }
}

impl FrameView {
    pub fn capture(scene: &Scene, settings: &Settings, stereo: bool) -> Self {
        let camera = scene.camera();
        let ipd = settings.get_or("vr.IPD", DEFAULT_IPD);
        let mut lights = scene.lights();
        if lights.len() > MAX_LIGHTS {
            log::warn!(
                "Scene has {} lights, only the first {MAX_LIGHTS} are uploaded",
                lights.len()
            );
            lights.truncate(MAX_LIGHTS);
        }
        Self {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            eye_views: [camera.eye_view_matrix(0, ipd), camera.eye_view_matrix(1, ipd)],
            camera,
            lights,
            ipd,
            stereo,
        }
    }
}

pub(crate) type SharedFrameView = Arc<RwLock<FrameView>>;

/// The `LightParameters` and `VRParameters` blocks.
#[derive(Debug)]
pub(crate) struct GlobalUniforms {
    view: SharedFrameView,
    lights: UniformBlock,
    light_count: Option<usize>,
    vr: UniformBlock,
}

impl GlobalUniforms {
    pub fn new(view: SharedFrameView) -> Self {
        let vr = vr_block(&view);
        Self {
            view,
            lights: UniformBlock::new(LIGHT_PARAMETERS_BLOCK, ArenaKind::LightParameters),
            light_count: None,
            vr,
        }
    }

    pub fn lights(&self) -> &UniformBlock {
        &self.lights
    }

    pub fn vr(&self) -> &UniformBlock {
        &self.vr
    }

    /// Reset both arenas, repopulate both blocks and upload what changed.
    ///
    /// Returns the number of arena uploads issued.
    pub fn update<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        arenas: &mut UniformArenas,
    ) -> Result<usize> {
        let count = self.view.read().lights.len();
        if self.light_count != Some(count) {
            self.lights = light_block(&self.view, count);
            self.light_count = Some(count);
        }

        let mut uploads = 0;
        for (block, kind) in [
            (&mut self.vr, ArenaKind::VrParameters),
            (&mut self.lights, ArenaKind::LightParameters),
        ] {
            let arena = arenas.get_mut(kind);
            arena.reset();
            let offset = arena.advance_default()?;
            if block.populate(arena, offset)? && arena.copy_to_device(backend) {
                uploads += 1;
            }
        }
        Ok(uploads)
    }
}

fn vr_block(view: &SharedFrameView) -> UniformBlock {
    let mut block = UniformBlock::new(VR_PARAMETERS_BLOCK, ArenaKind::VrParameters);
    let v = view.clone();
    block.add("projection0", move || v.read().projection.into());
    let v = view.clone();
    block.add("projection1", move || v.read().projection.into());
    block.add("headShift", || Mat4::IDENTITY.into());
    let v = view.clone();
    block.add("IPD", move || v.read().ipd.into());
    let v = view.clone();
    block.add("stereoEnabled", move || UniformValue::Bool(v.read().stereo));
    block
}

fn light_block(view: &SharedFrameView, count: usize) -> UniformBlock {
    let mut block = UniformBlock::new(LIGHT_PARAMETERS_BLOCK, ArenaKind::LightParameters);
    let v = view.clone();
    block.add("ViewMatrix", move || v.read().view.into());
    let v = view.clone();
    block.add("CamPosition", move || v.read().camera.position.into());
    let v = view.clone();
    block.add("numLights", move || (v.read().lights.len() as i32).into());

    for i in 0..count {
        let light = move |view: &SharedFrameView| -> PointLight {
            view.read().lights.get(i).copied().unwrap_or_default()
        };
        let v = view.clone();
        block.add(format!("Linear-{i}"), move || light(&v).linear.into());
        let v = view.clone();
        block.add(format!("Quadratic-{i}"), move || light(&v).quadratic.into());
        let v = view.clone();
        block.add(format!("Intensity-{i}"), move || light(&v).intensity.into());
        let v = view.clone();
        block.add(format!("Radius-{i}"), move || light(&v).radius().into());
        let v = view.clone();
        block.add(format!("Position-{i}"), move || light(&v).position.into());
        let v = view.clone();
        block.add(format!("Color-{i}"), move || light(&v).color.into());
        block.add(format!("filler-{i}"), || 0.0f32.into());
    }
    block
}

/// Settings every renderer expects to exist.
pub(crate) fn write_default_settings(settings: &Settings) {
    let defaults: [(&str, SettingValue); 8] = [
        ("wantsFullscreen", false.into()),
        ("isFullscreen", false.into()),
        ("vr.Active", false.into()),
        ("vr.IPD", 0.0f32.into()),
        ("vr.EyeDivisor", 1i64.into()),
        ("Renderer.PrintGPUStats", false.into()),
        ("Renderer.CheckGPUErrors", false.into()),
        ("Renderer.SupersamplingFactor", 1.0f32.into()),
    ];
    for (key, value) in defaults {
        settings.set_if_unset(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::uniform::ArenaCapacities;
    use glam::Vec3;

    fn setup(lights: usize) -> (HeadlessBackend, UniformArenas, SharedFrameView, GlobalUniforms) {
        let mut backend = HeadlessBackend::new(16, 16);
        let arenas = UniformArenas::create(&mut backend, &ArenaCapacities::default()).unwrap();
        let scene = Scene::new();
        for i in 0..lights {
            scene.add_light(PointLight::new(Vec3::X * i as f32, Vec3::ONE, 1.0));
        }
        let view = Arc::new(RwLock::new(FrameView::capture(&scene, &Settings::new(), false)));
        let globals = GlobalUniforms::new(view.clone());
        (backend, arenas, view, globals)
    }

    #[test]
    fn test_light_block_matches_shader_layout() {
        let (mut backend, mut arenas, _view, mut globals) = setup(2);
        globals.update(&mut backend, &mut arenas).unwrap();

        let block = globals.lights();
        assert_eq!(block.member_range("numLights"), Some(76..80));
        assert_eq!(block.member_range("Linear-0"), Some(80..84));
        assert_eq!(block.member_range("Position-0"), Some(96..108));
        assert_eq!(block.member_range("Color-0"), Some(112..124));
        assert_eq!(block.member_range("Linear-1"), Some(128..132));
    }

    #[test]
    fn test_unchanged_globals_skip_upload() {
        let (mut backend, mut arenas, view, mut globals) = setup(1);
        assert_eq!(globals.update(&mut backend, &mut arenas).unwrap(), 2);
        assert_eq!(globals.update(&mut backend, &mut arenas).unwrap(), 0);

        view.write().camera.position = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(globals.update(&mut backend, &mut arenas).unwrap(), 1);
    }

    #[test]
    fn test_default_settings_do_not_override() {
        let settings = Settings::new();
        settings.set("Renderer.SupersamplingFactor", 2.0f32);
        write_default_settings(&settings);
        assert_eq!(settings.get::<f32>("Renderer.SupersamplingFactor"), Some(2.0));
        assert_eq!(settings.get::<bool>("vr.Active"), Some(false));
    }
}
