//! Minimal GeoJSON feature model.
//!
//! Only the parts the cache layer inspects are typed; properties and geometry
//! pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::{LOC_ID_FIELD, YEAR_FIELD, parse_year};

/// Property that marks a feature as part of a discrete event.
pub const EVENT_ID_FIELD: &str = "event_id";

/// Property names checked, in order, for an event identifier.
pub const EVENT_ID_FIELDS: &[&str] = &[EVENT_ID_FIELD, "id"];

fn feature_type() -> String {
    "Feature".into()
}

fn collection_type() -> String {
    "FeatureCollection".into()
}

/// A single GeoJSON feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default)]
    pub properties: Map<String, Value>,

    #[serde(default)]
    pub geometry: Option<Value>,
}

impl Feature {
    pub fn new(properties: Map<String, Value>, geometry: Option<Value>) -> Self {
        Self { kind: feature_type(), id: None, properties, geometry }
    }

    /// Event identifier, from the first populated [`EVENT_ID_FIELDS`]
    /// property or the feature's own `id`.
    ///
    /// Returns `None` when nothing usable is present.
    pub fn event_id(&self) -> Option<String> {
        EVENT_ID_FIELDS
            .iter()
            .filter_map(|field| self.properties.get(*field))
            .chain(self.id.iter())
            .find_map(id_string)
    }

    pub fn loc_id(&self) -> Option<&str> {
        self.properties
            .get(LOC_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn year(&self) -> Option<i32> {
        self.properties.get(YEAR_FIELD).and_then(parse_year)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,

    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { kind: collection_type(), features }
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
