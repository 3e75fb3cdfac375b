//! WAM: the per-map metadata document stored next to each `.tmj` map.
//!
//! A WAM file records the map it decorates (`mapUrl`, relative to the WAM),
//! the editor-managed areas and entities, and optional listing metadata.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version written into freshly created WAM documents.
pub const WAM_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WamFile {
    pub version: String,
    pub map_url: String,
    pub areas: Vec<WamArea>,
    pub entities: Vec<WamEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WamMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WamArea {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub properties: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WamEntity {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl WamFile {
    /// An empty document pointing at `map_url`.
    pub fn fresh(map_url: impl Into<String>) -> Self {
        Self {
            version: WAM_VERSION.to_string(),
            map_url: map_url.into(),
            areas: Vec::new(),
            entities: Vec::new(),
            metadata: None,
            vendor: None,
            settings: None,
        }
    }

    /// Serialize with 4-space indentation, the layout the map editor writes.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
