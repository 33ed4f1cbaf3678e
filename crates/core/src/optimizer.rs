//! Result assembly across independently-fetched sources.
//!
//! Order items are fetched one per source; this module collapses duplicate
//! items before fetching and folds the fetched results back into a single
//! response afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::feature::{EVENT_ID_FIELD, Feature, FeatureCollection};
use crate::hash::compute_request_key;
use crate::package::{Package, PackageFilter};
use crate::record::{GEOMETRY_FIELD, LOC_ID_FIELD, Record, YEAR_FIELD, YearData};
use crate::signature::{Delta, Signature};

/// Feature properties that describe the feature rather than measure it.
pub const STRUCTURAL_PROPERTIES: &[&str] = &[
    LOC_ID_FIELD,
    YEAR_FIELD,
    GEOMETRY_FIELD,
    "name",
    "admin_level",
    "parent_id",
    "iso3",
    "level",
    EVENT_ID_FIELD,
    "id",
];

/// Metric wildcard in an order item.
pub const ALL_METRICS: &str = "*";

fn is_structural(property: &str) -> bool {
    STRUCTURAL_PROPERTIES.contains(&property)
}

/// One resolved fetch request, as produced by the order interpreter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct OrderItem {
    pub source_id: String,

    /// Single metric, or `"*"` for every metric of the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,

    /// Region name, as the user phrased it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_start: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_end: Option<i32>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub filters: Map<String, Value>,
}

impl OrderItem {
    /// Sorted, deduplicated metric list; collapses to `["*"]` on a wildcard.
    pub fn normalized_metrics(&self) -> Vec<String> {
        let metrics: BTreeSet<String> = self
            .metric
            .iter()
            .chain(self.metrics.iter())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        if metrics.contains(ALL_METRICS) { vec![ALL_METRICS.to_string()] } else { metrics.into_iter().collect() }
    }

    /// `(start, end)`; a single `year` counts as a one-year range.
    pub fn year_bounds(&self) -> (Option<i32>, Option<i32>) {
        match self.year {
            Some(year) => (Some(year), Some(year)),
            None => (self.year_start, self.year_end),
        }
    }
}

/// Unified response payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ResultPayload {
    /// Geometry-bearing features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geojson: Option<FeatureCollection>,

    /// Multi-year tabular mode: `year -> loc_id -> metric -> value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_data: Option<YearData>,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_range: Option<YearRange>,
}

/// Inclusive year span of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct YearRange {
    pub min: i32,
    pub max: i32,
}

impl YearRange {
    fn of(sig: &Signature) -> Option<Self> {
        if sig.years().is_empty() {
            return None;
        }
        let (min, max) = sig.year_range();
        Some(Self { min, max })
    }
}

/// Stable content hash of an order item.
///
/// Source and region are case-folded, metric lists are order-independent and
/// a single year equals the same one-year range.
pub fn compute_signature(item: &OrderItem) -> String {
    let (year_start, year_end) = item.year_bounds();
    let canonical = json!({
        "source_id": item.source_id.trim().to_lowercase(),
        "metrics": item.normalized_metrics(),
        "region": item.region.as_deref().map(|r| r.trim().to_lowercase()),
        "loc_id": item.loc_id.as_deref().map(str::trim),
        "year_start": year_start,
        "year_end": year_end,
        "filters": normalize_filter_value(&Value::Object(item.filters.clone())),
    });
    compute_request_key(&canonical)
}

/// Filter values are sets: lists of scalars are sorted and deduplicated so
/// `["quake", "storm"]` and `["storm", "quake"]` mean the same filter.
fn normalize_filter_value(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.iter().all(|v| !v.is_array() && !v.is_object()) => {
            let mut items = items.clone();
            items.sort_by_cached_key(Value::to_string);
            items.dedup();
            Value::Array(items)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_filter_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), normalize_filter_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Drop items whose content hash already appeared earlier in the queue.
pub fn deduplicate_queue(items: Vec<OrderItem>) -> Vec<OrderItem> {
    let total = items.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<OrderItem> = items
        .into_iter()
        .filter(|item| seen.insert(compute_signature(item)))
        .collect();

    if unique.len() < total {
        tracing::debug!(dropped = total - unique.len(), kept = unique.len(), "deduplicated order queue");
    }
    unique
}

/// Fold packages into one, keyed by `(loc_id, year)`.
///
/// Later packages override earlier ones field by field, so callers control
/// precedence through ordering. Sources are unioned in first-seen order.
pub fn merge(packages: &[Package]) -> Package {
    let mut order: Vec<(String, Option<i32>)> = Vec::new();
    let mut merged: HashMap<(String, Option<i32>), Record> = HashMap::new();
    let mut sources: Vec<String> = Vec::new();

    for package in packages {
        for source in package.sources() {
            if !sources.contains(source) {
                sources.push(source.clone());
            }
        }
        for record in package.records() {
            let key = (record.loc_id.clone(), record.year);
            match merged.get_mut(&key) {
                Some(existing) => {
                    existing
                        .metrics
                        .extend(record.metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
                    if record.geometry.is_some() {
                        existing.geometry = record.geometry.clone();
                    }
                }
                None => {
                    order.push(key.clone());
                    merged.insert(key, record.clone());
                }
            }
        }
    }

    let records = order.into_iter().filter_map(|key| merged.remove(&key)).collect();
    let source_id = shared_source_id(packages);
    Package::from_parts(records, source_id, sources, Map::new())
}

fn shared_source_id(packages: &[Package]) -> Option<&str> {
    let first = packages.first()?.signature().source_id()?;
    packages
        .iter()
        .all(|p| p.signature().source_id() == Some(first))
        .then_some(first)
}

/// Only an explicit `event_id` marks an event; boundary features often carry
/// a plain `id` and still merge by location. Features without a location have
/// no merge key.
fn passes_through(feature: &Feature) -> bool {
    feature.loc_id().is_none() || feature.properties.contains_key(EVENT_ID_FIELD)
}

/// Right-biased union of location features keyed by `(loc_id, year)`.
///
/// Properties are merged map to map, so every field a source attached
/// survives. A later geometry or feature id replaces an earlier one.
fn merge_location_features(features: Vec<Feature>) -> Vec<Feature> {
    let mut order: Vec<(String, Option<i32>)> = Vec::new();
    let mut merged: HashMap<(String, Option<i32>), Feature> = HashMap::new();

    for feature in features {
        let key = (feature.loc_id().unwrap_or_default().to_string(), feature.year());
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.properties.extend(feature.properties);
                if feature.geometry.is_some() {
                    existing.geometry = feature.geometry;
                }
                if feature.id.is_some() {
                    existing.id = feature.id;
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, feature);
            }
        }
    }

    order.into_iter().filter_map(|key| merged.remove(&key)).collect()
}

/// Merge whole result payloads the way [`merge`] merges packages.
///
/// Location features are combined per `(loc_id, year)`; event features and
/// features without a location are appended untouched. The output is in
/// feature mode if any input was, otherwise in year-data mode.
pub fn merge_payloads(payloads: &[ResultPayload]) -> ResultPayload {
    let mut sources: Vec<String> = Vec::new();
    for source in payloads.iter().flat_map(|p| &p.sources) {
        if !sources.contains(source) {
            sources.push(source.clone());
        }
    }
    let mut result = ResultPayload { sources, ..Default::default() };

    if payloads.iter().any(|p| p.geojson.is_some()) {
        let mut located = Vec::new();
        let mut passthrough = Vec::new();
        for payload in payloads {
            if let Some(fc) = &payload.geojson {
                for feature in &fc.features {
                    if passes_through(feature) {
                        passthrough.push(feature.clone());
                    } else {
                        located.push(feature.clone());
                    }
                }
            }
            if let Some(data) = &payload.year_data {
                located.extend(Package::from_year_data(data, None).to_feature_collection().features);
            }
        }

        let mut features = merge_location_features(located);
        features.extend(passthrough);
        result.year_range = YearRange::of(&extract_signature_from_features(&features));
        result.geojson = Some(FeatureCollection::new(features));
    } else {
        let packages: Vec<Package> = payloads
            .iter()
            .filter_map(|p| p.year_data.as_ref())
            .map(|data| Package::from_year_data(data, None))
            .collect();
        let merged = merge(&packages);
        result.year_range = YearRange::of(merged.signature());
        result.year_data = Some(merged.to_year_data());
    }
    result
}

fn extract_signature_from_features(features: &[Feature]) -> Signature {
    let mut locations = BTreeSet::new();
    let mut years = BTreeSet::new();
    let mut metrics = BTreeSet::new();

    for feature in features {
        if let Some(loc_id) = feature.loc_id() {
            locations.insert(loc_id.to_string());
        }
        if let Some(year) = feature.year() {
            years.insert(year);
        }
        metrics.extend(feature.properties.keys().filter(|k| !is_structural(k)).cloned());
    }

    Signature::new(locations, years, metrics)
}

/// Coverage of a result payload, read off its features and year data.
pub fn extract_signature_from_result(payload: &ResultPayload) -> Signature {
    let mut sig = Signature::default();
    if let Some(fc) = &payload.geojson {
        sig = sig.merge(&extract_signature_from_features(&fc.features));
    }
    if let Some(data) = &payload.year_data {
        sig = sig.merge(&Signature::from_year_data(data, None));
    }
    sig
}

/// Whether `cached` coverage is enough to answer `requested`.
pub fn can_serve_from_cache(cached: &Signature, requested: &Signature) -> bool {
    cached.contains(requested)
}

/// What still has to be fetched to answer `requested`.
pub fn compute_delta(cached: &Signature, requested: &Signature) -> Delta {
    requested.subtract(cached)
}

fn filter_feature(feature: &Feature, filter: &PackageFilter) -> Option<Feature> {
    if filter.locations.is_some() && !feature.loc_id().is_some_and(|loc| filter.matches_location(loc)) {
        return None;
    }
    if !filter.matches_year(feature.year()) {
        return None;
    }
    if filter.metrics.is_none() {
        return Some(feature.clone());
    }

    let had_metrics = feature.properties.keys().any(|k| !is_structural(k));
    let properties: Map<String, Value> = feature
        .properties
        .iter()
        .filter(|(k, _)| is_structural(k) || filter.keeps_metric(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if had_metrics && !properties.keys().any(|k| !is_structural(k)) {
        return None;
    }
    Some(Feature { properties, ..feature.clone() })
}

fn filter_year_data(data: &YearData, filter: &PackageFilter) -> YearData {
    let mut out = YearData::new();
    for (year, locations) in data {
        if !filter.matches_year(Some(*year)) {
            continue;
        }
        for (loc_id, metrics) in locations {
            if !filter.matches_location(loc_id) {
                continue;
            }
            let kept: BTreeMap<String, Value> = metrics
                .iter()
                .filter(|(k, _)| filter.keeps_metric(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !kept.is_empty() {
                out.entry(*year).or_default().insert(loc_id.clone(), kept);
            }
        }
    }
    out
}

/// Narrow a payload to the given locations, years and metrics.
///
/// Structural feature properties are always kept. The year range is
/// recomputed from what remains.
pub fn filter_result(payload: &ResultPayload, filter: &PackageFilter) -> ResultPayload {
    let geojson = payload
        .geojson
        .as_ref()
        .map(|fc| FeatureCollection::new(fc.features.iter().filter_map(|f| filter_feature(f, filter)).collect()));
    let year_data = payload.year_data.as_ref().map(|data| filter_year_data(data, filter));

    let mut result = ResultPayload { geojson, year_data, sources: payload.sources.clone(), year_range: None };
    result.year_range = YearRange::of(&extract_signature_from_result(&result));
    result
}
