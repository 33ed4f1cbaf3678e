//! Structured data records.
//!
//! Data loaders hand over loosely-typed JSON rows. Everything downstream works
//! on [`Record`], which pins the location and year fields and keeps every other
//! non-reserved field as a metric.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the location identifier.
pub const LOC_ID_FIELD: &str = "loc_id";

/// Field holding the calendar year.
pub const YEAR_FIELD: &str = "year";

/// Field holding GeoJSON geometry.
pub const GEOMETRY_FIELD: &str = "geometry";

/// Field names that are never treated as metrics.
pub const RESERVED_FIELDS: &[&str] = &[LOC_ID_FIELD, YEAR_FIELD, GEOMETRY_FIELD, "id", "_id", "_source", "_row"];

/// Multi-year tabular data: `year -> loc_id -> metric -> value`.
pub type YearData = BTreeMap<i32, BTreeMap<String, BTreeMap<String, Value>>>;

/// One row of location-scoped data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Record {
    /// Hierarchical location identifier. Empty when the source row had none.
    pub loc_id: String,

    /// Calendar year; `None` for non-temporal data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    /// Metric name to value.
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(loc_id: impl Into<String>, year: Option<i32>) -> Self {
        Self { loc_id: loc_id.into(), year, geometry: None, metrics: BTreeMap::new() }
    }

    /// Builder-style metric insertion.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Whether `field` is structural rather than a metric.
    pub fn is_reserved(field: &str) -> bool {
        RESERVED_FIELDS.contains(&field)
    }

    /// Whether the record carries a usable location identifier.
    pub fn has_location(&self) -> bool {
        !self.loc_id.is_empty()
    }

    /// Convert a loosely-typed JSON row.
    ///
    /// A missing location becomes the empty identifier and a malformed year
    /// becomes `None`; neither is an error.
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let loc_id = match row.get(LOC_ID_FIELD) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        let year = row.get(YEAR_FIELD).and_then(parse_year);
        let geometry = row.get(GEOMETRY_FIELD).filter(|g| !g.is_null()).cloned();
        let metrics = row
            .iter()
            .filter(|(k, _)| !Self::is_reserved(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self { loc_id, year, geometry, metrics }
    }

    /// Inverse of [`Record::from_row`], minus any dropped internal identifiers.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert(LOC_ID_FIELD.to_string(), Value::String(self.loc_id.clone()));
        if let Some(year) = self.year {
            row.insert(YEAR_FIELD.to_string(), Value::from(year));
        }
        if let Some(geometry) = &self.geometry {
            row.insert(GEOMETRY_FIELD.to_string(), geometry.clone());
        }
        for (k, v) in &self.metrics {
            row.insert(k.clone(), v.clone());
        }
        row
    }
}

/// Interpret a JSON value as a positive calendar year.
///
/// Accepts integers, integral floats and numeric strings.
pub fn parse_year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else {
                let f = n.as_f64()?;
                if f.fract() != 0.0 {
                    return None;
                }
                f as i64
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    if year > 0 { i32::try_from(year).ok() } else { None }
}

/// Number of `(year, location, metric)` cells in a year-indexed map.
pub fn year_data_cell_count(data: &YearData) -> usize {
    data.values().flat_map(|locs| locs.values()).map(|metrics| metrics.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_row_splits_reserved_fields() {
        let record = Record::from_row(&row(json!({
            "loc_id": "USA-CA",
            "year": 2020,
            "geometry": {"type": "Point", "coordinates": [0, 0]},
            "_id": 7,
            "population": 39_500_000,
            "gdp": 3.1
        })));

        assert_eq!(record.loc_id, "USA-CA");
        assert_eq!(record.year, Some(2020));
        assert!(record.geometry.is_some());
        assert_eq!(record.metrics.keys().collect::<Vec<_>>(), vec!["gdp", "population"]);
    }

    #[test]
    fn test_from_row_missing_location() {
        let record = Record::from_row(&row(json!({"year": 2020, "pop": 1})));
        assert!(!record.has_location());
        assert_eq!(record.metrics.len(), 1);
    }

    #[test]
    fn test_parse_year_variants() {
        assert_eq!(parse_year(&json!(2021)), Some(2021));
        assert_eq!(parse_year(&json!(2021.0)), Some(2021));
        assert_eq!(parse_year(&json!(" 1999 ")), Some(1999));
        assert_eq!(parse_year(&json!(2021.5)), None);
        assert_eq!(parse_year(&json!(0)), None);
        assert_eq!(parse_year(&json!(-5)), None);
        assert_eq!(parse_year(&json!("n/a")), None);
        assert_eq!(parse_year(&json!(null)), None);
    }

    #[test]
    fn test_to_row_roundtrip_fields() {
        let record = Record::new("FRA", Some(2010)).with_metric("gdp", 2.6);
        let back = Record::from_row(&record.to_row());
        assert_eq!(back, record);
    }

    #[test]
    fn test_year_data_cell_count() {
        let mut data = YearData::new();
        data.entry(2020)
            .or_default()
            .entry("USA".into())
            .or_default()
            .extend([("pop".to_string(), json!(1)), ("gdp".to_string(), json!(2))]);
        data.entry(2021)
            .or_default()
            .entry("CAN".into())
            .or_default()
            .insert("pop".into(), json!(3));
        assert_eq!(year_data_cell_count(&data), 3);
    }
}
