//! Coverage inventory for a named cache.
//!
//! Tracks the signature of each independently-fetched entry so the cache can
//! answer "can this request be served" without touching records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::package::Package;
use crate::signature::{Delta, Signature};

#[derive(Debug, Clone)]
struct InventoryEntry {
    signature: Signature,
    /// `None` until the data behind the signature has been materialized.
    record_count: Option<usize>,
    added_at: DateTime<Utc>,
}

/// Per-entry coverage bookkeeping under one logical cache name.
#[derive(Debug, Clone)]
pub struct Inventory {
    name: String,
    entries: BTreeMap<String, InventoryEntry>,
}

/// Aggregate counts over an [`Inventory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub name: String,
    pub entries: usize,
    pub pending_entries: usize,
    pub locations: usize,
    pub years: usize,
    pub metrics: usize,
    pub year_range: (i32, i32),
    pub oldest_entry: Option<DateTime<Utc>>,
}

impl Inventory {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a materialized package under `key`, replacing any prior entry.
    pub fn add(&mut self, key: impl Into<String>, package: &Package) {
        let entry = InventoryEntry {
            signature: package.signature().clone(),
            record_count: Some(package.len()),
            added_at: Utc::now(),
        };
        self.entries.insert(key.into(), entry);
    }

    /// Register coverage before the data exists, e.g. for an in-flight fetch.
    pub fn add_signature_only(&mut self, key: impl Into<String>, signature: Signature) {
        let entry = InventoryEntry { signature, record_count: None, added_at: Utc::now() };
        self.entries.insert(key.into(), entry);
    }

    pub fn signature(&self, key: &str) -> Option<&Signature> {
        self.entries.get(key).map(|e| &e.signature)
    }

    /// Fold of every entry's signature.
    pub fn combined_signature(&self) -> Signature {
        self.entries
            .values()
            .fold(Signature::default(), |acc, entry| acc.merge(&entry.signature))
    }

    pub fn can_serve(&self, requested: &Signature) -> bool {
        self.combined_signature().contains(requested)
    }

    /// Coverage that still needs fetching to serve `requested`.
    pub fn compute_delta(&self, requested: &Signature) -> Delta {
        requested.subtract(&self.combined_signature())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> InventoryStats {
        let combined = self.combined_signature();
        InventoryStats {
            name: self.name.clone(),
            entries: self.entries.len(),
            pending_entries: self.entries.values().filter(|e| e.record_count.is_none()).count(),
            locations: combined.locations().len(),
            years: combined.years().len(),
            metrics: combined.metrics().len(),
            year_range: combined.year_range(),
            oldest_entry: self.entries.values().map(|e| e.added_at).min(),
        }
    }
}
