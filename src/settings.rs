//! Typed key-value settings store shared between the renderer and its host application.
//!
//! Keys are dotted strings such as `Renderer.SupersamplingFactor`. The renderer reads quality and
//! feature toggles from here and writes computed display dimensions back.

use std::collections::BTreeMap;
use std::fmt;

use glam::{Vec2, Vec3, Vec4};
use parking_lot::RwLock;
use serde::Deserialize;

/// A stored setting value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vector(Vec<f32>),
    Text(String),
}

impl SettingValue {
    /// Interpret a descriptor parameter string.
    ///
    /// `"true"`/`"false"` become booleans, a single number becomes a float, comma-separated numbers
    /// become a vector and everything else stays text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return SettingValue::Bool(true),
            "false" => return SettingValue::Bool(false),
            _ => {}
        }
        if let Ok(v) = trimmed.parse::<f32>() {
            return SettingValue::Float(v);
        }
        if trimmed.contains(',') {
            let parsed: Result<Vec<f32>, _> =
                trimmed.split(',').map(|p| p.trim().parse::<f32>()).collect();
            if let Ok(values) = parsed {
                return SettingValue::Vector(values);
            }
        }
        SettingValue::Text(raw.to_string())
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            SettingValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v as i64)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<u32> for SettingValue {
    fn from(v: u32) -> Self {
        SettingValue::Int(v as i64)
    }
}

impl From<f32> for SettingValue {
    fn from(v: f32) -> Self {
        SettingValue::Float(v)
    }
}

impl From<Vec<f32>> for SettingValue {
    fn from(v: Vec<f32>) -> Self {
        SettingValue::Vector(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

/// Conversion out of a [`SettingValue`].
pub trait FromSetting: Sized {
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSetting for SettingValue {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSetting for bool {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bool(v) => Some(*v),
            SettingValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromSetting for i64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Int(v) => Some(*v),
            SettingValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl FromSetting for i32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|v| i32::try_from(v).ok())
    }
}

impl FromSetting for u32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|v| u32::try_from(v).ok())
    }
}

impl FromSetting for f32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Float(v) => Some(*v),
            SettingValue::Int(v) => Some(*v as f32),
            _ => None,
        }
    }
}

impl FromSetting for Vec<f32> {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Vector(v) => Some(v.clone()),
            SettingValue::Float(v) => Some(vec![*v]),
            _ => None,
        }
    }
}

impl FromSetting for Vec2 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Vector(v) if v.len() >= 2 => Some(Vec2::new(v[0], v[1])),
            _ => None,
        }
    }
}

impl FromSetting for Vec3 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Vector(v) if v.len() >= 3 => Some(Vec3::new(v[0], v[1], v[2])),
            _ => None,
        }
    }
}

impl FromSetting for Vec4 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Vector(v) if v.len() >= 4 => Some(Vec4::new(v[0], v[1], v[2], v[3])),
            _ => None,
        }
    }
}

impl FromSetting for String {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Text(v) => Some(v.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Named rendering quality presets a pipeline descriptor may provide settings for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderingQuality {
    Low,
    Medium,
    High,
    Ultra,
}

impl RenderingQuality {
    pub fn name(&self) -> &'static str {
        match self {
            RenderingQuality::Low => "Low",
            RenderingQuality::Medium => "Medium",
            RenderingQuality::High => "High",
            RenderingQuality::Ultra => "Ultra",
        }
    }
}

/// Thread-safe settings store.
#[derive(Debug, Default)]
pub struct Settings {
    values: RwLock<BTreeMap<String, SettingValue>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Set `key` only when it has no value yet. Returns whether the value was written.
    pub fn set_if_unset(&self, key: impl Into<String>, value: impl Into<SettingValue>) -> bool {
        let mut values = self.values.write();
        let key = key.into();
        if values.contains_key(&key) {
            return false;
        }
        values.insert(key, value.into());
        true
    }

    pub fn get<T: FromSetting>(&self, key: &str) -> Option<T> {
        self.values.read().get(key).and_then(T::from_setting)
    }

    pub fn get_or<T: FromSetting>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<SettingValue> {
        self.values.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Overlay a TOML document. Nested tables flatten to dotted keys.
    ///
    /// Returns the number of keys written.
    pub fn merge_toml(&self, source: &str) -> Result<usize, toml::de::Error> {
        let table: toml::Table = toml::from_str(source)?;
        let mut flat = Vec::new();
        flatten_table("", &table, &mut flat);

        let count = flat.len();
        let mut values = self.values.write();
        for (key, value) in flat {
            values.insert(key, value);
        }
        Ok(count)
    }

    /// Write every value of `preset`.
    pub fn apply<'a>(&self, preset: impl IntoIterator<Item = (&'a String, &'a SettingValue)>) {
        let mut values = self.values.write();
        for (key, value) in preset {
            values.insert(key.clone(), value.clone());
        }
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut Vec<(String, SettingValue)>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&full, nested, out),
            toml::Value::Boolean(v) => out.push((full, SettingValue::Bool(*v))),
            toml::Value::Integer(v) => out.push((full, SettingValue::Int(*v))),
            toml::Value::Float(v) => out.push((full, SettingValue::Float(*v as f32))),
            toml::Value::String(v) => out.push((full, SettingValue::parse(v))),
            toml::Value::Array(items) => {
                let floats: Option<Vec<f32>> = items
                    .iter()
                    .map(|item| match item {
                        toml::Value::Float(v) => Some(*v as f32),
                        toml::Value::Integer(v) => Some(*v as f32),
                        _ => None,
                    })
                    .collect();
                match floats {
                    Some(values) => out.push((full, SettingValue::Vector(values))),
                    None => log::warn!("Ignoring non-numeric array setting {full}"),
                }
            }
            toml::Value::Datetime(v) => out.push((full, SettingValue::Text(v.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let settings = Settings::new();
        settings.set("Renderer.SupersamplingFactor", 1.5f32);
        settings.set("vr.EyeDivisor", 2);
        settings.set("vr.Active", false);

        assert_eq!(settings.get::<f32>("Renderer.SupersamplingFactor"), Some(1.5));
        assert_eq!(settings.get::<i32>("vr.EyeDivisor"), Some(2));
        assert_eq!(settings.get::<f32>("vr.EyeDivisor"), Some(2.0));
        assert_eq!(settings.get::<bool>("vr.Active"), Some(false));
        assert_eq!(settings.get::<bool>("missing"), None);
        assert_eq!(settings.get_or("missing", 3.0f32), 3.0);
    }

    #[test]
    fn test_set_if_unset_keeps_existing() {
        let settings = Settings::new();
        settings.set("vr.IPD", 0.064f32);
        assert!(!settings.set_if_unset("vr.IPD", 0.0f32));
        assert!(settings.set_if_unset("vr.Active", false));
        assert_eq!(settings.get::<f32>("vr.IPD"), Some(0.064));
    }

    #[test]
    fn test_parse_parameter_strings() {
        assert_eq!(SettingValue::parse("true"), SettingValue::Bool(true));
        assert_eq!(SettingValue::parse(" 0.5 "), SettingValue::Float(0.5));
        assert_eq!(
            SettingValue::parse("1.0, 2.0,3"),
            SettingValue::Vector(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(
            SettingValue::parse("Reinhard"),
            SettingValue::Text("Reinhard".to_string())
        );
    }

    #[test]
    fn test_merge_toml_flattens_tables() {
        let settings = Settings::new();
        let written = settings
            .merge_toml(
                r#"
                wantsFullscreen = true

                [Renderer]
                SupersamplingFactor = 2.0
                HDR.Exposure = "0.8"

                [vr]
                EyeDivisor = 1
                ClearColor = [0.1, 0.2, 0.3]
                "#,
            )
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(settings.get::<bool>("wantsFullscreen"), Some(true));
        assert_eq!(settings.get::<f32>("Renderer.SupersamplingFactor"), Some(2.0));
        assert_eq!(settings.get::<f32>("Renderer.HDR.Exposure"), Some(0.8));
        assert_eq!(settings.get::<i32>("vr.EyeDivisor"), Some(1));
        assert_eq!(
            settings.get::<Vec3>("vr.ClearColor"),
            Some(Vec3::new(0.1, 0.2, 0.3))
        );
    }
}
