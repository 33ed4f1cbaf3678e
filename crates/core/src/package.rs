//! Data packages: records bound to their coverage signature.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::feature::{Feature, FeatureCollection};
use crate::record::{LOC_ID_FIELD, Record, YEAR_FIELD, YearData};
use crate::signature::Signature;

/// Flattened, tabular row for CSV-style export.
pub type ExportRow = BTreeMap<String, Value>;

/// Records plus the signature derived from them.
///
/// The signature is recomputed whenever the record set changes, so it never
/// drifts from the data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Package {
    records: Vec<Record>,
    signature: Signature,
    sources: Vec<String>,
    metadata: Map<String, Value>,
}

/// Record selection for [`Package::filter`].
///
/// Each populated field is an independent predicate; all of them must hold.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub locations: Option<BTreeSet<String>>,
    pub years: Option<BTreeSet<i32>>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    /// Metrics to keep. Records are projected onto this set.
    pub metrics: Option<BTreeSet<String>>,
}

impl PackageFilter {
    fn has_year_predicate(&self) -> bool {
        self.years.is_some() || self.year_start.is_some() || self.year_end.is_some()
    }

    pub fn matches_location(&self, loc_id: &str) -> bool {
        self.locations.as_ref().is_none_or(|locs| locs.contains(loc_id))
    }

    /// Data without a year never satisfies a year predicate.
    pub fn matches_year(&self, year: Option<i32>) -> bool {
        if !self.has_year_predicate() {
            return true;
        }
        let Some(year) = year else {
            return false;
        };
        self.years.as_ref().is_none_or(|ys| ys.contains(&year))
            && self.year_start.is_none_or(|start| year >= start)
            && self.year_end.is_none_or(|end| year <= end)
    }

    pub fn keeps_metric(&self, metric: &str) -> bool {
        self.metrics.as_ref().is_none_or(|wanted| wanted.contains(metric))
    }

    /// Apply the filter to one record, projecting its metrics.
    pub fn apply(&self, record: &Record) -> Option<Record> {
        if !self.matches_location(&record.loc_id) || !self.matches_year(record.year) {
            return None;
        }
        if self.metrics.is_none() {
            return Some(record.clone());
        }

        let metrics: BTreeMap<String, Value> = record
            .metrics
            .iter()
            .filter(|(k, _)| self.keeps_metric(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if metrics.is_empty() {
            return None;
        }
        Some(Record { metrics, ..record.clone() })
    }
}

/// Structural difference between a package and an expected signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct VerificationReport {
    pub missing_locations: Vec<String>,
    pub extra_locations: Vec<String>,
    pub missing_years: Vec<i32>,
    pub extra_years: Vec<i32>,
    pub missing_metrics: Vec<String>,
    pub extra_metrics: Vec<String>,
}

impl VerificationReport {
    /// True when nothing is missing and nothing is extra.
    pub fn is_match(&self) -> bool {
        self.missing_locations.is_empty()
            && self.extra_locations.is_empty()
            && self.missing_years.is_empty()
            && self.extra_years.is_empty()
            && self.missing_metrics.is_empty()
            && self.extra_metrics.is_empty()
    }

    /// True when everything expected is present, extras allowed.
    pub fn is_complete(&self) -> bool {
        self.missing_locations.is_empty() && self.missing_years.is_empty() && self.missing_metrics.is_empty()
    }
}

fn diff<T: Ord + Clone>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> Vec<T> {
    a.difference(b).cloned().collect()
}

impl Package {
    pub fn from_records(records: Vec<Record>, source_id: Option<&str>, metadata: Map<String, Value>) -> Self {
        let sources = source_id.map(|s| vec![s.to_string()]).unwrap_or_default();
        Self::from_parts(records, source_id, sources, metadata)
    }

    /// Build from loosely-typed JSON rows, see [`Record::from_row`].
    pub fn from_rows(rows: &[Map<String, Value>], source_id: Option<&str>, metadata: Map<String, Value>) -> Self {
        let records = rows.iter().map(Record::from_row).collect();
        Self::from_records(records, source_id, metadata)
    }

    /// Build from year-indexed tabular data, one record per `(year, loc_id)`.
    pub fn from_year_data(data: &YearData, source_id: Option<&str>) -> Self {
        let records = data
            .iter()
            .flat_map(|(year, locations)| {
                locations.iter().map(move |(loc_id, metrics)| Record {
                    loc_id: loc_id.clone(),
                    year: Some(*year),
                    geometry: None,
                    metrics: metrics.clone(),
                })
            })
            .collect();
        Self::from_records(records, source_id, Map::new())
    }

    pub(crate) fn from_parts(
        records: Vec<Record>, source_id: Option<&str>, sources: Vec<String>, metadata: Map<String, Value>,
    ) -> Self {
        let signature = Signature::from_records(&records, source_id);
        Self { records, signature, sources, metadata }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Logical sources that contributed to this package.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(min, max)` year, or `None` for non-temporal data.
    pub fn year_range(&self) -> Option<(i32, i32)> {
        if self.signature.years().is_empty() { None } else { Some(self.signature.year_range()) }
    }

    /// New package holding only matching records, with a fresh signature.
    pub fn filter(&self, filter: &PackageFilter) -> Package {
        let records = self.records.iter().filter_map(|r| filter.apply(r)).collect();
        Self::from_parts(records, self.signature.source_id(), self.sources.clone(), self.metadata.clone())
    }

    /// Flatten records for tabular export.
    ///
    /// Nested objects become `parent_key` columns, arrays are serialized to a
    /// JSON string and geometry is dropped.
    pub fn to_export_rows(&self) -> Vec<ExportRow> {
        self.records
            .iter()
            .map(|record| {
                let mut row = ExportRow::new();
                row.insert(LOC_ID_FIELD.to_string(), Value::String(record.loc_id.clone()));
                if let Some(year) = record.year {
                    row.insert(YEAR_FIELD.to_string(), Value::from(year));
                }
                for (key, value) in &record.metrics {
                    flatten_into(&mut row, key, value);
                }
                row
            })
            .collect()
    }

    /// Export column order: `loc_id`, `year`, then the rest alphabetically.
    pub fn columns(&self) -> Vec<String> {
        let mut rest = BTreeSet::new();
        let mut has_year = false;
        for row in self.to_export_rows() {
            for key in row.into_keys() {
                match key.as_str() {
                    LOC_ID_FIELD => {}
                    YEAR_FIELD => has_year = true,
                    _ => {
                        rest.insert(key);
                    }
                }
            }
        }

        let mut columns = Vec::with_capacity(rest.len() + 2);
        if !self.records.is_empty() {
            columns.push(LOC_ID_FIELD.to_string());
        }
        if has_year {
            columns.push(YEAR_FIELD.to_string());
        }
        columns.extend(rest);
        columns
    }

    /// Compare this package's actual coverage against `expected`.
    pub fn verify_against(&self, expected: &Signature) -> VerificationReport {
        let actual = &self.signature;
        VerificationReport {
            missing_locations: diff(expected.locations(), actual.locations()),
            extra_locations: diff(actual.locations(), expected.locations()),
            missing_years: diff(expected.years(), actual.years()),
            extra_years: diff(actual.years(), expected.years()),
            missing_metrics: diff(expected.metrics(), actual.metrics()),
            extra_metrics: diff(actual.metrics(), expected.metrics()),
        }
    }

    /// Year-indexed view. Records without a location or year are skipped.
    pub fn to_year_data(&self) -> YearData {
        let mut data = YearData::new();
        for record in &self.records {
            let Some(year) = record.year else { continue };
            if !record.has_location() {
                continue;
            }
            data.entry(year)
                .or_default()
                .entry(record.loc_id.clone())
                .or_default()
                .extend(record.metrics.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        data
    }

    /// One feature per record; metrics, `loc_id` and `year` become properties.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .records
            .iter()
            .map(|record| {
                let mut properties = record.to_row();
                let geometry = properties.remove(crate::record::GEOMETRY_FIELD);
                Feature::new(properties, geometry)
            })
            .collect();
        FeatureCollection::new(features)
    }
}

fn flatten_into(row: &mut ExportRow, key: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (child, nested) in map {
                flatten_into(row, &format!("{key}_{child}"), nested);
            }
        }
        Value::Array(_) => {
            row.insert(key.to_string(), Value::String(value.to_string()));
        }
        other => {
            row.insert(key.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Package {
        let records = vec![
            Record::new("USA", Some(2019)).with_metric("pop", 328).with_metric("gdp", 21.4),
            Record::new("USA", Some(2020)).with_metric("pop", 331).with_metric("gdp", 20.9),
            Record::new("CAN", Some(2020)).with_metric("pop", 38),
            Record::new("CAN", None).with_metric("area", 9.98),
        ];
        Package::from_records(records, Some("owid"), Map::new())
    }

    #[test]
    fn test_from_records_signature() {
        let pkg = sample();
        assert_eq!(pkg.len(), 4);
        assert_eq!(pkg.signature().years().len(), 2);
        assert_eq!(pkg.sources(), ["owid".to_string()]);
        assert_eq!(pkg.year_range(), Some((2019, 2020)));
    }

    #[test]
    fn test_filter_year_set_and_range_intersect() {
        let pkg = sample();
        let filter = PackageFilter {
            years: Some(BTreeSet::from([2019, 2020])),
            year_start: Some(2020),
            ..Default::default()
        };
        let out = pkg.filter(&filter);
        assert_eq!(out.len(), 2);
        assert!(out.records().iter().all(|r| r.year == Some(2020)));
        assert_eq!(out.signature().years(), &BTreeSet::from([2020]));
    }

    #[test]
    fn test_filter_metrics_projects_and_recomputes() {
        let pkg = sample();
        let filter = PackageFilter { metrics: Some(BTreeSet::from(["gdp".to_string()])), ..Default::default() };
        let out = pkg.filter(&filter);
        assert_eq!(out.len(), 2);
        assert_eq!(out.signature().metrics(), &BTreeSet::from(["gdp".to_string()]));
        assert_eq!(out.signature().locations(), &BTreeSet::from(["USA".to_string()]));
    }

    #[test]
    fn test_filter_locations() {
        let pkg = sample();
        let filter = PackageFilter { locations: Some(BTreeSet::from(["CAN".to_string()])), ..Default::default() };
        let out = pkg.filter(&filter);
        assert_eq!(out.len(), 2);
        assert_eq!(out.year_range(), Some((2020, 2020)));
    }

    #[test]
    fn test_export_rows_flatten() {
        let record = Record::new("USA", Some(2020))
            .with_metric("pop", 331)
            .with_metric("age", json!({"median": 38.1, "under_18": 22}))
            .with_metric("tags", json!(["a", "b"]));
        let pkg = Package::from_records(vec![record], None, Map::new());
        let rows = pkg.to_export_rows();
        assert_eq!(rows[0]["age_median"], json!(38.1));
        assert_eq!(rows[0]["age_under_18"], json!(22));
        assert_eq!(rows[0]["tags"], json!("[\"a\",\"b\"]"));
        assert_eq!(pkg.columns(), vec!["loc_id", "year", "age_median", "age_under_18", "pop", "tags"]);
    }

    #[test]
    fn test_verify_against() {
        let pkg = sample();
        let expected = Signature::new(["USA", "MEX"], [2020, 2021], ["pop"]);
        let report = pkg.verify_against(&expected);
        assert_eq!(report.missing_locations, vec!["MEX"]);
        assert_eq!(report.extra_locations, vec!["CAN"]);
        assert_eq!(report.missing_years, vec![2021]);
        assert_eq!(report.extra_years, vec![2019]);
        assert!(report.missing_metrics.is_empty());
        assert_eq!(report.extra_metrics, vec!["area", "gdp"]);
        assert!(!report.is_match());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_year_data_roundtrip() {
        let pkg = sample();
        let data = pkg.to_year_data();
        assert_eq!(data[&2020]["USA"]["pop"], json!(331));
        let back = Package::from_year_data(&data, Some("owid"));
        assert_eq!(back.len(), 3);
        assert_eq!(back.signature().years(), pkg.signature().years());
    }

    #[test]
    fn test_feature_collection() {
        let mut record = Record::new("USA", Some(2020)).with_metric("pop", 331);
        record.geometry = Some(json!({"type": "Point", "coordinates": [1, 2]}));
        let fc = Package::from_records(vec![record], None, Map::new()).to_feature_collection();
        assert_eq!(fc.features.len(), 1);
        assert_eq!(fc.features[0].loc_id(), Some("USA"));
        assert!(fc.features[0].geometry.is_some());
        assert!(!fc.features[0].properties.contains_key("geometry"));
    }
}
