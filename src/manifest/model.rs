//! Typed view of a normalized manifest.
//!
//! Every section defaults when absent, so partially filled manifests from
//! older writers still parse. Unknown keys are preserved in `extra` maps.
//! A value of an unexpected shape is dropped on its own (logged at debug)
//! instead of failing the whole document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    #[serde(deserialize_with = "lenient_string")]
    pub container_version: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub license: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub project: ProjectInfo,
    #[serde(deserialize_with = "lenient")]
    pub provenance: Provenance,
    /// Role-prefixed keys such as `scene_0` or `mesh_proxy_0`
    #[serde(deserialize_with = "lenient_map")]
    pub data_entries: BTreeMap<String, DataEntry>,
    #[serde(deserialize_with = "lenient")]
    pub viewer_settings: ViewerSettings,
    pub quality_metrics: Value,
    pub archival_record: Value,
    pub relationships: Value,
    pub preservation: Value,
    pub version_history: Value,
    #[serde(deserialize_with = "lenient")]
    pub integrity: Option<Integrity>,
    #[serde(rename = "_meta", deserialize_with = "lenient")]
    pub meta: Meta,
    #[serde(deserialize_with = "lenient_list")]
    pub annotations: Vec<Annotation>,
    #[serde(alias = "global_alignment", deserialize_with = "lenient")]
    pub alignment: Option<Alignment>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub license: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    #[serde(deserialize_with = "lenient_string")]
    pub operator: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub capture_date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub device_serial: Option<String>,
    pub processing_software: Value,
    #[serde(deserialize_with = "lenient_string")]
    pub processing_notes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One manifest row pointing at an archive entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataEntry {
    pub file_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub created_by: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub position: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub rotation: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub scale: Option<Scale>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    #[serde(deserialize_with = "lenient_string")]
    pub display_mode: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub auto_rotate: Option<bool>,
    #[serde(deserialize_with = "lenient_bool")]
    pub single_sided: Option<bool>,
    #[serde(deserialize_with = "lenient_string")]
    pub background_color: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub camera_position: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub camera_target: Option<Vec3>,
    #[serde(deserialize_with = "lenient_bool")]
    pub annotations_visible: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Integrity {
    #[serde(deserialize_with = "lenient_string")]
    pub algorithm: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub manifest_hash: Option<String>,
    /// Per-asset hashes keyed by entry name
    #[serde(deserialize_with = "lenient_map")]
    pub assets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    #[serde(deserialize_with = "lenient")]
    pub custom_fields: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotation {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub position: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub camera_position: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub camera_target: Option<Vec3>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Global transform applied to every asset in the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alignment {
    #[serde(deserialize_with = "lenient")]
    pub position: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub rotation: Option<Vec3>,
    #[serde(deserialize_with = "lenient")]
    pub scale: Option<Scale>,
}

/// A 3-vector written either as `[x, y, z]` or `{ "x": .., "y": .., "z": .. }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec3Repr")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Vec3Repr {
    Array([f64; 3]),
    Object { x: f64, y: f64, z: f64 },
}

impl From<Vec3Repr> for Vec3 {
    fn from(repr: Vec3Repr) -> Self {
        match repr {
            Vec3Repr::Array([x, y, z]) => Vec3 { x, y, z },
            Vec3Repr::Object { x, y, z } => Vec3 { x, y, z },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scale {
    Uniform(f64),
    Axes(Vec3),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        One(String),
        Many(Vec<Value>),
        Other(Value),
    }

    Ok(match Tags::deserialize(deserializer)? {
        Tags::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Tags::Many(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Tags::Other(_) => Vec::new(),
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn malformed<T>(error: serde_json::Error) -> T
where
    T: Default,
{
    debug!(%error, "ignoring malformed manifest value");
    T::default()
}

/// Deserialize a value, falling back to its default when it has another shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(malformed))
}

/// Map whose malformed members are dropped one by one.
fn lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Object(map) = Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(item) => Some((key, item)),
            Err(error) => {
                debug!(%key, %error, "dropping malformed manifest member");
                None
            }
        })
        .collect())
}

/// List whose malformed items are dropped one by one.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).map_err(malformed::<()>).ok())
        .collect())
}

/// Booleans as written by loosely typed tools: `true`, `"true"`, `"yes"`, `1`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}
