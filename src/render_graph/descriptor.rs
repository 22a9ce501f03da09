//! Declarative pipeline descriptors.
//!
//! A descriptor names render targets with their attachments, render passes with their inputs and
//! output, and the flow in which passes run. Documents are TOML or JSON:
//!
//! ```toml
//! name = "Deferred Shading"
//!
//! [render_targets.GeometryBuffers]
//! attachments = [
//!     { name = "NormalsMaterial", format = "RGBA_Float16" },
//!     { name = "Depth", format = "Depth32" },
//! ]
//!
//! [render_passes.Scene]
//! type = "geometry"
//! shaders = ["DefaultDeferred.vert", "DefaultDeferred.frag"]
//! output = "GeometryBuffers"
//!
//! [render_passes.DeferredLighting]
//! type = "quad"
//! shaders = ["FullscreenPass.vert", "DeferredLighting.frag"]
//! inputs = ["GeometryBuffers"]
//! output = "Viewport"
//! parameters = { "Global.Exposure" = 1.0, debugLights = 0.0 }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use glam::Vec4;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::backend::{BlendFactor, BlendOperation};
use crate::error::DescriptorError;
use crate::settings::{RenderingQuality, SettingValue};

/// Name of the target that stands for the presentable image.
pub const VIEWPORT_TARGET: &str = "Viewport";

/// Attachment formats a render target may declare.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum AttachmentFormat {
    RGBA_Float32,
    RGBA_Float16,
    RGB_Float32,
    RGB_Float16,
    RG_Float32,
    RG_Float16,
    R_Float32,
    R_Float16,
    RGBA_UInt8,
    RGBA_UInt16,
    R_UInt8,
    R_UInt16,
    Depth24,
    Depth32,
}

impl AttachmentFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, AttachmentFormat::Depth24 | AttachmentFormat::Depth32)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentConfig {
    pub name: String,
    pub format: AttachmentFormat,
}

/// A named logical output with a size relative to the window.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderTargetConfig {
    #[serde(default = "unit_pair", deserialize_with = "float_pair")]
    pub size: (f32, f32),
    #[serde(default)]
    pub attachments: Vec<AttachmentConfig>,
}

impl RenderTargetConfig {
    pub fn attachment(&self, name: &str) -> Option<&AttachmentConfig> {
        self.attachments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassType {
    Geometry,
    Quad,
    Lights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum RenderOrder {
    DontCare,
    #[default]
    BackToFront,
    FrontToBack,
}

/// Blend factors as written in descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BlendFactorConfig {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

impl From<BlendFactorConfig> for BlendFactor {
    fn from(factor: BlendFactorConfig) -> Self {
        match factor {
            BlendFactorConfig::Zero => BlendFactor::Zero,
            BlendFactorConfig::One => BlendFactor::One,
            BlendFactorConfig::SrcColor => BlendFactor::Src,
            BlendFactorConfig::OneMinusSrcColor => BlendFactor::OneMinusSrc,
            BlendFactorConfig::DstColor => BlendFactor::Dst,
            BlendFactorConfig::OneMinusDstColor => BlendFactor::OneMinusDst,
            BlendFactorConfig::SrcAlpha => BlendFactor::SrcAlpha,
            BlendFactorConfig::OneMinusSrcAlpha => BlendFactor::OneMinusSrcAlpha,
            BlendFactorConfig::DstAlpha => BlendFactor::DstAlpha,
            BlendFactorConfig::OneMinusDstAlpha => BlendFactor::OneMinusDstAlpha,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOpConfig {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl From<BlendOpConfig> for BlendOperation {
    fn from(op: BlendOpConfig) -> Self {
        match op {
            BlendOpConfig::Add => BlendOperation::Add,
            BlendOpConfig::Subtract => BlendOperation::Subtract,
            BlendOpConfig::ReverseSubtract => BlendOperation::ReverseSubtract,
            BlendOpConfig::Min => BlendOperation::Min,
            BlendOpConfig::Max => BlendOperation::Max,
        }
    }
}

/// Configuration of a single render pass.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PassConfig {
    #[serde(rename = "type")]
    pub pass_type: PassType,
    #[serde(default)]
    pub blit_inputs: bool,
    #[serde(default)]
    pub render_transparent: bool,
    #[serde(default = "default_true")]
    pub render_opaque: bool,
    #[serde(default = "default_true")]
    pub depth_test_enabled: bool,
    #[serde(default = "default_true")]
    pub depth_write_enabled: bool,
    #[serde(default)]
    pub order: RenderOrder,
    #[serde(default = "default_blend_op")]
    pub color_blend_op: BlendOpConfig,
    #[serde(default = "default_blend_op")]
    pub alpha_blend_op: BlendOpConfig,
    #[serde(default = "default_src_factor")]
    pub src_color_blend_factor: BlendFactorConfig,
    #[serde(default = "default_dst_factor")]
    pub dst_color_blend_factor: BlendFactorConfig,
    #[serde(default = "default_src_factor")]
    pub src_alpha_blend_factor: BlendFactorConfig,
    #[serde(default = "default_dst_factor")]
    pub dst_alpha_blend_factor: BlendFactorConfig,
    #[serde(default)]
    pub shaders: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    pub output: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, SettingValue>,
    #[serde(default = "unit_pair", deserialize_with = "float_pair")]
    pub viewport_size: (f32, f32),
    #[serde(default = "zero_pair", deserialize_with = "float_pair")]
    pub viewport_offset: (f32, f32),
    #[serde(default = "unit_pair", deserialize_with = "float_pair")]
    pub scissor: (f32, f32),
    #[serde(default, deserialize_with = "vector4")]
    pub clear_color: Vec4,
    #[serde(default = "default_depth_clear")]
    pub depth_clear_value: f32,
    #[serde(default = "no_eye", deserialize_with = "eye_index")]
    pub eye: i32,
}

/// Where a declared pass parameter lives in the settings store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterKey {
    /// Member name inside the pass's parameter block
    pub member: String,
    /// Settings key the value is read from
    pub settings_key: String,
    /// Whether the declared value is written into the settings store
    pub writable: bool,
}

impl ParameterKey {
    /// `Global.X` reads `Renderer.X`; `Pass.X` and `X` live under `Renderer.<pass>.X`.
    pub fn resolve(pass: &str, key: &str) -> Self {
        if let Some(member) = key.strip_prefix("Global.") {
            Self {
                member: member.to_string(),
                settings_key: format!("Renderer.{member}"),
                writable: false,
            }
        } else {
            let member = key.strip_prefix("Pass.").unwrap_or(key);
            Self {
                member: member.to_string(),
                settings_key: format!("Renderer.{pass}.{member}"),
                writable: true,
            }
        }
    }
}

impl PassConfig {
    /// Declared parameters with numbers normalized to floats and numeric strings parsed.
    pub fn parameter_values(&self) -> impl Iterator<Item = (&String, SettingValue)> {
        self.parameters.iter().map(|(key, value)| {
            let value = match value {
                SettingValue::Int(v) => SettingValue::Float(*v as f32),
                SettingValue::Text(s) => SettingValue::parse(s),
                other => other.clone(),
            };
            (key, value)
        })
    }

    /// Split a possibly attachment-qualified input into `(target, attachment)`.
    pub fn split_input(input: &str) -> (&str, Option<&str>) {
        match input.split_once('.') {
            Some((target, attachment)) => (target, Some(attachment)),
            None => (input, None),
        }
    }

    pub fn input_targets(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| Self::split_input(i).0)
    }
}

/// A complete pipeline description.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "sRGB")]
    pub srgb: bool,
    #[serde(default)]
    pub stereo_enabled: bool,
    #[serde(default, alias = "rendertargets")]
    pub render_targets: BTreeMap<String, RenderTargetConfig>,
    #[serde(alias = "renderpasses")]
    pub render_passes: BTreeMap<String, PassConfig>,
    #[serde(default)]
    pub flow: Option<Vec<String>>,
    #[serde(default)]
    pub quality_settings: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

impl PipelineDescriptor {
    pub fn from_toml_str(source: &str) -> Result<Self, DescriptorError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_json_str(source: &str) -> Result<Self, DescriptorError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load a `.toml` or `.json` descriptor from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            other => Err(DescriptorError::UnknownFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    pub fn pass(&self, name: &str) -> Option<&PassConfig> {
        self.render_passes.get(name)
    }

    pub fn target(&self, name: &str) -> Option<&RenderTargetConfig> {
        self.render_targets.get(name)
    }

    /// Settings overrides for a quality preset.
    pub fn quality_preset(
        &self,
        quality: RenderingQuality,
    ) -> Option<&BTreeMap<String, SettingValue>> {
        self.quality_settings.get(quality.name())
    }

    /// Execution order of the passes.
    ///
    /// Without an explicit flow the order is derived by walking back from the pass that renders
    /// to the viewport through the producers of each input. Every producer is placed before the
    /// first pass that reads it; passes reached twice keep their first position.
    pub fn flow(&self) -> Vec<String> {
        if let Some(flow) = &self.flow {
            return flow.clone();
        }

        let Some((start, _)) = self
            .render_passes
            .iter()
            .find(|(_, pass)| pass.output == VIEWPORT_TARGET)
        else {
            return Vec::new();
        };

        let mut flow = Vec::new();
        let mut entered = BTreeSet::new();
        self.walk_producers(start, &mut entered, &mut flow);
        flow
    }

    /// Depth-first post-order over producers. Cycles are cut at the first revisit and reported
    /// by validation.
    fn walk_producers(&self, pass: &str, entered: &mut BTreeSet<String>, flow: &mut Vec<String>) {
        if !entered.insert(pass.to_string()) {
            return;
        }
        if let Some(config) = self.render_passes.get(pass) {
            for target in config.input_targets() {
                for (name, producer) in &self.render_passes {
                    if producer.output == target {
                        self.walk_producers(name, entered, flow);
                    }
                }
            }
        }
        flow.push(pass.to_string());
    }
}

fn default_true() -> bool {
    true
}

fn unit_pair() -> (f32, f32) {
    (1.0, 1.0)
}

fn zero_pair() -> (f32, f32) {
    (0.0, 0.0)
}

fn default_depth_clear() -> f32 {
    1.0
}

fn no_eye() -> i32 {
    -1
}

fn default_blend_op() -> BlendOpConfig {
    BlendOpConfig::Add
}

fn default_src_factor() -> BlendFactorConfig {
    BlendFactorConfig::SrcAlpha
}

fn default_dst_factor() -> BlendFactorConfig {
    BlendFactorConfig::OneMinusSrcAlpha
}

/// Numbers given either as an array or as a comma-separated string.
#[derive(Deserialize)]
#[serde(untagged)]
enum FloatList {
    List(Vec<f32>),
    Text(String),
}

impl FloatList {
    fn into_floats<E: de::Error>(self) -> Result<Vec<f32>, E> {
        match self {
            FloatList::List(values) => Ok(values),
            FloatList::Text(text) => text
                .split(',')
                .map(|part| part.trim().parse::<f32>().map_err(E::custom))
                .collect(),
        }
    }
}

fn float_pair<'de, D: Deserializer<'de>>(deserializer: D) -> Result<(f32, f32), D::Error> {
    let values = FloatList::deserialize(deserializer)?.into_floats::<D::Error>()?;
    match values.as_slice() {
        [x, y] => Ok((*x, *y)),
        other => Err(de::Error::invalid_length(other.len(), &"two numbers")),
    }
}

fn vector4<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec4, D::Error> {
    let values = FloatList::deserialize(deserializer)?.into_floats::<D::Error>()?;
    let mut out = [0.0; 4];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value;
    }
    Ok(Vec4::from_array(out))
}

fn eye_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    struct EyeVisitor;

    impl<'de> de::Visitor<'de> for EyeVisitor {
        type Value = i32;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("\"LeftEye\", \"RightEye\" or an eye index")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<i32, E> {
            Ok(match value.trim() {
                "LeftEye" => 0,
                "RightEye" => 1,
                _ => -1,
            })
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i32, E> {
            Ok(i32::try_from(value).unwrap_or(-1))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i32, E> {
            Ok(i32::try_from(value).unwrap_or(-1))
        }
    }

    deserializer.deserialize_any(EyeVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFERRED: &str = r#"
        name = "Deferred"

        [render_targets.GeometryBuffers]
        size = "1.0, 1.0"
        attachments = [
            { name = "NormalsMaterial", format = "RGBA_Float16" },
            { name = "DiffuseAlbedo", format = "RGBA_UInt8" },
            { name = "ZBuffer", format = "Depth32" },
        ]

        [render_targets.HDR]
        size = [0.5, 0.5]
        attachments = [{ name = "HDRBuffer", format = "RGBA_Float16" }]

        [render_passes.Scene]
        type = "geometry"
        shaders = ["DefaultDeferred.vert", "DefaultDeferred.frag"]
        output = "GeometryBuffers"

        [render_passes.Lighting]
        type = "lights"
        shaders = ["DeferredLighting.vert", "DeferredLighting.frag"]
        inputs = ["GeometryBuffers"]
        output = "HDR"
        eye = "RightEye"
        clear_color = "0.1, 0.2, 0.3, 1.0"
        parameters = { "Global.Gamma" = 2.2, "Pass.debugLights" = 0, mode = "1.0, 2.0" }

        [render_passes.Tonemap]
        type = "quad"
        shaders = ["FullscreenPass.vert", "HDR.frag"]
        inputs = ["HDR.HDRBuffer"]
        output = "Viewport"
        viewport_size = "0.5, 1.0"

        [quality_settings.Low]
        "Renderer.SupersamplingFactor" = 0.5
    "#;

    #[test]
    fn test_parse_toml_with_defaults() {
        let descriptor = PipelineDescriptor::from_toml_str(DEFERRED).unwrap();
        let scene = descriptor.pass("Scene").unwrap();
        assert_eq!(scene.pass_type, PassType::Geometry);
        assert!(scene.render_opaque);
        assert!(!scene.render_transparent);
        assert_eq!(scene.order, RenderOrder::BackToFront);
        assert_eq!(scene.src_color_blend_factor, BlendFactorConfig::SrcAlpha);
        assert_eq!(scene.viewport_size, (1.0, 1.0));
        assert_eq!(scene.eye, -1);
        assert_eq!(scene.depth_clear_value, 1.0);

        let lighting = descriptor.pass("Lighting").unwrap();
        assert_eq!(lighting.eye, 1);
        assert_eq!(lighting.clear_color, Vec4::new(0.1, 0.2, 0.3, 1.0));

        let hdr = descriptor.target("HDR").unwrap();
        assert_eq!(hdr.size, (0.5, 0.5));
        let gbuffer = descriptor.target("GeometryBuffers").unwrap();
        let names: Vec<_> = gbuffer.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["NormalsMaterial", "DiffuseAlbedo", "ZBuffer"]);
        assert!(gbuffer.attachment("ZBuffer").unwrap().format.is_depth());

        assert_eq!(
            descriptor
                .quality_preset(RenderingQuality::Low)
                .unwrap()
                .get("Renderer.SupersamplingFactor"),
            Some(&SettingValue::Float(0.5))
        );
    }

    #[test]
    fn test_derived_flow_walks_back_from_viewport() {
        let descriptor = PipelineDescriptor::from_toml_str(DEFERRED).unwrap();
        assert_eq!(descriptor.flow(), ["Scene", "Lighting", "Tonemap"]);
    }

    #[test]
    fn test_derived_flow_orders_shared_producers_first() {
        let descriptor = PipelineDescriptor::from_toml_str(
            r#"
            name = "Diamond"
            [render_targets.TA]
            attachments = [{ name = "Color", format = "RGBA_UInt8" }]
            [render_targets.TB]
            attachments = [{ name = "Color", format = "RGBA_UInt8" }]
            [render_passes.B]
            type = "geometry"
            output = "TB"
            [render_passes.A]
            type = "quad"
            inputs = ["TB"]
            output = "TA"
            [render_passes.V]
            type = "quad"
            inputs = ["TB", "TA"]
            output = "Viewport"
            "#,
        )
        .unwrap();

        assert_eq!(descriptor.flow(), ["B", "A", "V"]);
        descriptor.validate().unwrap();
    }

    #[test]
    fn test_parameter_values_are_normalized() {
        let descriptor = PipelineDescriptor::from_toml_str(DEFERRED).unwrap();
        let values: BTreeMap<_, _> = descriptor
            .pass("Lighting")
            .unwrap()
            .parameter_values()
            .map(|(k, v)| (k.clone(), v))
            .collect();
        assert_eq!(values["Global.Gamma"], SettingValue::Float(2.2));
        assert_eq!(values["Pass.debugLights"], SettingValue::Float(0.0));
        assert_eq!(values["mode"], SettingValue::Vector(vec![1.0, 2.0]));
    }

    #[test]
    fn test_parameter_scoping() {
        let global = ParameterKey::resolve("Lighting", "Global.Gamma");
        assert_eq!(global.settings_key, "Renderer.Gamma");
        assert_eq!(global.member, "Gamma");
        assert!(!global.writable);

        let scoped = ParameterKey::resolve("Lighting", "Pass.debugLights");
        assert_eq!(scoped.settings_key, "Renderer.Lighting.debugLights");
        assert!(scoped.writable);

        let bare = ParameterKey::resolve("Lighting", "mode");
        assert_eq!(bare.settings_key, "Renderer.Lighting.mode");
        assert_eq!(bare.member, "mode");
    }

    #[test]
    fn test_parse_json() {
        let descriptor = PipelineDescriptor::from_json_str(
            r#"{
                "name": "Forward",
                "render_passes": {
                    "Main": {
                        "type": "geometry",
                        "shaders": ["Default.vert", "Default.frag"],
                        "output": "Viewport",
                        "viewport_offset": [0.25, 0.0]
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(descriptor.flow(), ["Main"]);
        assert_eq!(descriptor.pass("Main").unwrap().viewport_offset, (0.25, 0.0));
    }

    #[test]
    fn test_split_input() {
        assert_eq!(PassConfig::split_input("G.normals"), ("G", Some("normals")));
        assert_eq!(PassConfig::split_input("G"), ("G", None));
    }
}
