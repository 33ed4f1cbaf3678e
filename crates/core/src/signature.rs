//! Coverage signatures.
//!
//! A [`Signature`] summarises what a body of data covers as three independent
//! sets: locations, years and metrics. Every cell `(loc, year, metric)` of the
//! cartesian product is considered covered. Signatures are derived from data,
//! never authoritative on their own.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Record, YearData};

/// Wire form of a [`Signature`]: sorted lists plus the optional source tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SignatureMap {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Immutable coverage descriptor with set algebra.
///
/// Equality compares coverage only. The source tag is provenance and is
/// ignored by `==`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "SignatureMap", from = "SignatureMap")]
pub struct Signature {
    locations: BTreeSet<String>,
    years: BTreeSet<i32>,
    metrics: BTreeSet<String>,
    source_id: Option<String>,
}

/// Result of subtracting one signature from another.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Nothing is left to fetch.
    Covered,
    /// Coverage that still has to be fetched.
    Remaining(Signature),
}

impl Delta {
    pub fn is_covered(&self) -> bool {
        matches!(self, Delta::Covered)
    }

    pub fn remaining(&self) -> Option<&Signature> {
        match self {
            Delta::Covered => None,
            Delta::Remaining(sig) => Some(sig),
        }
    }

    /// Collapse to a plain signature; `Covered` becomes the empty signature.
    pub fn into_signature(self) -> Signature {
        match self {
            Delta::Covered => Signature::default(),
            Delta::Remaining(sig) => sig,
        }
    }
}

impl Signature {
    pub fn new<L, Y, M>(locations: L, years: Y, metrics: M) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        Y: IntoIterator<Item = i32>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            locations: locations.into_iter().map(Into::into).collect(),
            years: years.into_iter().collect(),
            metrics: metrics.into_iter().map(Into::into).collect(),
            source_id: None,
        }
    }

    /// Tag the signature with the logical source it came from.
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Derive a signature from structured records.
    ///
    /// Records without a location contribute no location; records without a
    /// year contribute no year. Reserved names never count as metrics.
    pub fn from_records(records: &[Record], source_id: Option<&str>) -> Self {
        let mut sig = Self { source_id: source_id.map(str::to_string), ..Default::default() };

        for record in records {
            if record.has_location() {
                sig.locations.insert(record.loc_id.clone());
            }
            if let Some(year) = record.year {
                sig.years.insert(year);
            }
            sig.metrics.extend(
                record
                    .metrics
                    .keys()
                    .filter(|k| !Record::is_reserved(k))
                    .cloned(),
            );
        }

        sig
    }

    /// Derive a signature from year-indexed tabular data.
    pub fn from_year_data(data: &YearData, source_id: Option<&str>) -> Self {
        let mut sig = Self { source_id: source_id.map(str::to_string), ..Default::default() };

        for (year, locations) in data {
            if *year > 0 && !locations.is_empty() {
                sig.years.insert(*year);
            }
            for (loc_id, metrics) in locations {
                if !loc_id.is_empty() {
                    sig.locations.insert(loc_id.clone());
                }
                sig.metrics.extend(metrics.keys().cloned());
            }
        }

        sig
    }

    pub fn locations(&self) -> &BTreeSet<String> {
        &self.locations
    }

    pub fn years(&self) -> &BTreeSet<i32> {
        &self.years
    }

    pub fn metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    /// True when all three axes are empty.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.years.is_empty() && self.metrics.is_empty()
    }

    /// Whether every axis of `other` is a subset of the same axis of `self`.
    pub fn contains(&self, other: &Signature) -> bool {
        other.locations.is_subset(&self.locations)
            && other.years.is_subset(&self.years)
            && other.metrics.is_subset(&self.metrics)
    }

    /// Coverage of `self` that `other` does not provide.
    ///
    /// An axis is narrowed to `self \ other` only when every other axis of
    /// `self` is already covered by `other`; otherwise it is kept whole. The
    /// result may over-fetch but never misses a cell.
    pub fn subtract(&self, other: &Signature) -> Delta {
        let locations_covered = self.locations.is_subset(&other.locations);
        let years_covered = self.years.is_subset(&other.years);
        let metrics_covered = self.metrics.is_subset(&other.metrics);

        if locations_covered && years_covered && metrics_covered {
            return Delta::Covered;
        }

        let locations = if years_covered && metrics_covered {
            self.locations.difference(&other.locations).cloned().collect()
        } else {
            self.locations.clone()
        };
        let years = if locations_covered && metrics_covered {
            self.years.difference(&other.years).copied().collect()
        } else {
            self.years.clone()
        };
        let metrics = if locations_covered && years_covered {
            self.metrics.difference(&other.metrics).cloned().collect()
        } else {
            self.metrics.clone()
        };

        Delta::Remaining(Self { locations, years, metrics, source_id: self.source_id.clone() })
    }

    /// Per-axis union. The source tag survives only when both sides agree.
    pub fn merge(&self, other: &Signature) -> Signature {
        Self {
            locations: self.locations.union(&other.locations).cloned().collect(),
            years: self.years.union(&other.years).copied().collect(),
            metrics: self.metrics.union(&other.metrics).cloned().collect(),
            source_id: shared_source(self, other),
        }
    }

    /// Per-axis intersection. The source tag survives only when both sides agree.
    pub fn intersection(&self, other: &Signature) -> Signature {
        Self {
            locations: self.locations.intersection(&other.locations).cloned().collect(),
            years: self.years.intersection(&other.years).copied().collect(),
            metrics: self.metrics.intersection(&other.metrics).cloned().collect(),
            source_id: shared_source(self, other),
        }
    }

    /// `(min, max)` of the year axis, or `(0, 0)` when there are no years.
    pub fn year_range(&self) -> (i32, i32) {
        match (self.years.first(), self.years.last()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => (0, 0),
        }
    }

    pub fn to_map(&self) -> SignatureMap {
        SignatureMap {
            locations: self.locations.iter().cloned().collect(),
            years: self.years.iter().copied().collect(),
            metrics: self.metrics.iter().cloned().collect(),
            source_id: self.source_id.clone(),
        }
    }

    pub fn from_map(map: SignatureMap) -> Self {
        Self {
            locations: map.locations.into_iter().collect(),
            years: map.years.into_iter().collect(),
            metrics: map.metrics.into_iter().collect(),
            source_id: map.source_id,
        }
    }

    /// Short human-readable description.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "empty signature".to_string();
        }

        let years = match self.years.len() {
            0 => "no years".to_string(),
            1 => format!("{}", self.year_range().0),
            n => {
                let (min, max) = self.year_range();
                format!("{min}-{max} ({n} years)")
            }
        };
        let mut out = format!(
            "{} location{} x {} x {} metric{}",
            self.locations.len(),
            plural(self.locations.len()),
            years,
            self.metrics.len(),
            plural(self.metrics.len()),
        );
        if let Some(source) = &self.source_id {
            out.push_str(&format!(" [{source}]"));
        }
        out
    }
}

fn shared_source(a: &Signature, b: &Signature) -> Option<String> {
    match (&a.source_id, &b.source_id) {
        (Some(x), Some(y)) if x == y => Some(x.clone()),
        _ => None,
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.locations == other.locations && self.years == other.years && self.metrics == other.metrics
    }
}

impl Eq for Signature {}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl From<SignatureMap> for Signature {
    fn from(map: SignatureMap) -> Self {
        Self::from_map(map)
    }
}

impl From<Signature> for SignatureMap {
    fn from(sig: Signature) -> Self {
        sig.to_map()
    }
}
