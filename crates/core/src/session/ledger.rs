//! Per-session record of transmitted data.
//!
//! Coverage signatures answer "do we have it"; the ledger answers "did we
//! already send it to this client". Cells are tracked at `(loc, year, metric)`
//! granularity and events as whole events.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::SessionId;
use crate::feature::Feature;
use crate::record::YearData;
use crate::signature::Signature;

/// Identity of one transmitted unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SentKey {
    /// One tabular cell; exact match on all three parts.
    Cell { loc_id: String, year: i32, metric: String },
    /// A whole event, however many features it spans.
    Event(String),
}

impl SentKey {
    pub fn cell(loc_id: impl Into<String>, year: i32, metric: impl Into<String>) -> Self {
        SentKey::Cell { loc_id: loc_id.into(), year, metric: metric.into() }
    }
}

impl fmt::Display for SentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentKey::Cell { loc_id, year, metric } => write!(f, "{loc_id}|{year}|{metric}"),
            SentKey::Event(id) => f.write_str(id),
        }
    }
}

/// A request-level result kept for replay.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub result: Value,
    pub signature: Option<Signature>,
    pub stored_at: DateTime<Utc>,
}

/// Point-in-time counters for one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct LedgerStats {
    pub session_id: String,
    pub created_at: String,
    pub last_activity: String,
    pub sent_cells: usize,
    pub sent_events: usize,
    pub sources: Vec<String>,
    pub cached_results: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Sent key to the number of sources holding it.
    sent: HashMap<SentKey, usize>,
    by_source: HashMap<String, HashSet<SentKey>>,
    /// Request key to insertion sequence and result.
    results: HashMap<String, (u64, CachedResult)>,
    next_seq: u64,
}

impl LedgerState {
    fn is_sent(&self, key: &SentKey) -> bool {
        self.sent.contains_key(key)
    }

    fn register(&mut self, source: &str, key: SentKey) -> bool {
        let bucket = self.by_source.entry(source.to_string()).or_default();
        if !bucket.insert(key.clone()) {
            return false;
        }
        *self.sent.entry(key).or_insert(0) += 1;
        true
    }

    fn clear_source(&mut self, source: &str) -> usize {
        let Some(keys) = self.by_source.remove(source) else {
            return 0;
        };
        for key in &keys {
            if let Some(holders) = self.sent.get_mut(key) {
                *holders -= 1;
                if *holders == 0 {
                    self.sent.remove(key);
                }
            }
        }
        keys.len()
    }

    fn unsent_cells(&self, data: &YearData) -> YearData {
        let mut out = YearData::new();
        for (year, locations) in data {
            for (loc_id, metrics) in locations {
                for (metric, value) in metrics {
                    if self.is_sent(&SentKey::cell(loc_id.as_str(), *year, metric.as_str())) {
                        continue;
                    }
                    out.entry(*year)
                        .or_default()
                        .entry(loc_id.clone())
                        .or_default()
                        .insert(metric.clone(), value.clone());
                }
            }
        }
        out
    }

    fn register_cells(&mut self, data: &YearData) -> usize {
        let mut added = 0;
        for (year, locations) in data {
            for (loc_id, metrics) in locations {
                for metric in metrics.keys() {
                    if self.register(metric, SentKey::cell(loc_id.as_str(), *year, metric.as_str())) {
                        added += 1;
                    }
                }
            }
        }
        added
    }

    fn unsent_events(&self, features: Vec<Feature>) -> Vec<Feature> {
        features
            .into_iter()
            .filter(|f| match f.event_id() {
                Some(id) => !self.is_sent(&SentKey::Event(id)),
                None => true,
            })
            .collect()
    }

    fn register_events(&mut self, features: &[Feature], source: &str) -> usize {
        features
            .iter()
            .filter_map(Feature::event_id)
            .filter(|id| self.register(source, SentKey::Event(id.clone())))
            .count()
    }
}

/// What one client session has already received.
///
/// All state sits behind a single per-ledger lock, so filtering and
/// registration for the same session never interleave.
#[derive(Debug)]
pub struct SessionLedger {
    id: SessionId,
    created_at: DateTime<Utc>,
    /// Unix milliseconds; readable without the state lock.
    last_activity_ms: AtomicI64,
    max_cached_results: usize,
    state: Mutex<LedgerState>,
}

impl SessionLedger {
    pub fn new(id: SessionId, max_cached_results: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            max_cached_results,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_activity_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.created_at)
    }

    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    /// Record activity at an explicit instant.
    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.last_activity_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Idle for longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(Utc::now(), ttl)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let idle_ms = now.timestamp_millis() - self.last_activity_ms.load(Ordering::Relaxed);
        idle_ms > i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }

    /// Mark every `(year, loc, metric)` cell in `data` as sent, bucketed by
    /// metric. Returns how many cells were newly marked.
    pub fn register_sent_cells(&self, data: &YearData) -> usize {
        let added = self.state.lock().register_cells(data);
        tracing::debug!(session = %self.id, added, "registered sent cells");
        added
    }

    /// Mark the events behind `features` as sent under `source_id`.
    ///
    /// Features without an event id are ignored. Returns how many events were
    /// newly marked.
    pub fn register_sent_events(&self, features: &[Feature], source_id: &str) -> usize {
        let added = self.state.lock().register_events(features, source_id);
        tracing::debug!(session = %self.id, source = source_id, added, "registered sent events");
        added
    }

    /// Cells of `data` this client has not received yet.
    pub fn filter_cells(&self, data: &YearData) -> YearData {
        self.state.lock().unsent_cells(data)
    }

    /// Features whose event has not been sent. A sent event excludes every
    /// one of its features; features without an event id always pass.
    pub fn filter_events(&self, features: Vec<Feature>) -> Vec<Feature> {
        self.state.lock().unsent_events(features)
    }

    /// Filter and register in one step, so overlapping requests for the same
    /// session each get a disjoint share of the cells.
    pub fn take_unsent_cells(&self, data: &YearData) -> YearData {
        let mut state = self.state.lock();
        let unsent = state.unsent_cells(data);
        state.register_cells(&unsent);
        unsent
    }

    /// Event counterpart of [`SessionLedger::take_unsent_cells`].
    pub fn take_unsent_events(&self, features: Vec<Feature>, source_id: &str) -> Vec<Feature> {
        let mut state = self.state.lock();
        let unsent = state.unsent_events(features);
        state.register_events(&unsent, source_id);
        unsent
    }

    pub fn is_cell_sent(&self, loc_id: &str, year: i32, metric: &str) -> bool {
        self.state.lock().is_sent(&SentKey::cell(loc_id, year, metric))
    }

    pub fn is_event_sent(&self, event_id: &str) -> bool {
        self.state.lock().is_sent(&SentKey::Event(event_id.to_string()))
    }

    /// Forget everything registered under `source_id`.
    ///
    /// Keys also registered under another source stay marked. Returns the
    /// number of keys dropped from the source's bucket.
    pub fn clear_source(&self, source_id: &str) -> usize {
        let removed = self.state.lock().clear_source(source_id);
        if removed > 0 {
            tracing::info!(session = %self.id, source = source_id, removed, "cleared source from ledger");
        }
        removed
    }

    /// Drop all sent keys and cached results.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = LedgerState::default();
    }

    /// Cache a full result under a caller-computed request fingerprint.
    pub fn store_result(&self, request_key: impl Into<String>, result: Value, signature: Option<Signature>) {
        let request_key = request_key.into();
        let mut state = self.state.lock();

        if !state.results.contains_key(&request_key) && state.results.len() >= self.max_cached_results {
            let oldest = state
                .results
                .iter()
                .min_by_key(|(_, (seq, _))| *seq)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                state.results.remove(&oldest);
                tracing::debug!(session = %self.id, evicted = %oldest, "evicted cached result");
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .results
            .insert(request_key, (seq, CachedResult { result, signature, stored_at: Utc::now() }));
    }

    pub fn get_cached_result(&self, request_key: &str) -> Option<CachedResult> {
        self.state
            .lock()
            .results
            .get(request_key)
            .map(|(_, cached)| cached.clone())
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.state.lock();
        let sent_events = state.sent.keys().filter(|k| matches!(k, SentKey::Event(_))).count();
        let mut sources: Vec<String> = state.by_source.keys().cloned().collect();
        sources.sort();

        LedgerStats {
            session_id: self.id.to_string(),
            created_at: self.created_at.to_rfc3339(),
            last_activity: self.last_activity().to_rfc3339(),
            sent_cells: state.sent.len() - sent_events,
            sent_events,
            sources,
            cached_results: state.results.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn ledger() -> SessionLedger {
        SessionLedger::new(SessionId::new("test-session").unwrap(), 4)
    }

    fn cells(entries: &[(i32, &str, &str)]) -> YearData {
        let mut data = YearData::new();
        for (year, loc, metric) in entries {
            data.entry(*year)
                .or_default()
                .entry(loc.to_string())
                .or_default()
                .insert(metric.to_string(), json!(1));
        }
        data
    }

    fn event_feature(event_id: &str, segment: u32) -> Feature {
        serde_json::from_value(json!({
            "type": "Feature",
            "properties": {"event_id": event_id, "segment": segment},
            "geometry": {"type": "Point", "coordinates": [segment, 0]}
        }))
        .unwrap()
    }

    #[test]
    fn test_filter_drops_already_sent_cell() {
        let ledger = ledger();
        ledger.register_sent_cells(&cells(&[(2020, "USA-CA", "population")]));

        let incoming = cells(&[(2020, "USA-CA", "population"), (2020, "USA-CA", "gdp")]);
        let filtered = ledger.filter_cells(&incoming);

        assert_eq!(filtered, cells(&[(2020, "USA-CA", "gdp")]));
    }

    #[test]
    fn test_register_twice_then_filter_empty() {
        let ledger = ledger();
        let data = cells(&[(2020, "USA", "pop"), (2021, "USA", "pop")]);
        assert_eq!(ledger.register_sent_cells(&data), 2);
        assert_eq!(ledger.register_sent_cells(&data), 0);
        assert!(ledger.filter_cells(&data).is_empty());
    }

    #[test]
    fn test_event_all_or_nothing() {
        let ledger = ledger();
        ledger.register_sent_events(&[event_feature("storm-9", 0)], "storms");

        let incoming = vec![event_feature("storm-9", 0), event_feature("storm-9", 1), event_feature("quake-1", 0)];
        let filtered = ledger.filter_events(incoming);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].event_id().as_deref(), Some("quake-1"));
    }

    #[test]
    fn test_events_without_id_pass_through() {
        let ledger = ledger();
        let anonymous: Feature = serde_json::from_value(json!({"properties": {"mag": 4.0}})).unwrap();
        assert_eq!(ledger.register_sent_events(std::slice::from_ref(&anonymous), "quakes"), 0);
        assert_eq!(ledger.filter_events(vec![anonymous]).len(), 1);
    }

    #[test]
    fn test_clear_source_isolation() {
        let ledger = ledger();
        ledger.register_sent_cells(&cells(&[(2020, "USA", "population"), (2020, "USA", "gdp")]));

        assert_eq!(ledger.clear_source("population"), 1);
        assert!(!ledger.is_cell_sent("USA", 2020, "population"));
        assert!(ledger.is_cell_sent("USA", 2020, "gdp"));

        ledger.register_sent_cells(&cells(&[(2020, "USA", "population")]));
        assert!(ledger.is_cell_sent("USA", 2020, "population"));
        assert!(ledger.filter_cells(&cells(&[(2020, "USA", "population"), (2020, "USA", "gdp")])).is_empty());
    }

    #[test]
    fn test_clear_unknown_source_is_zero() {
        assert_eq!(ledger().clear_source("never-registered"), 0);
    }

    #[test]
    fn test_shared_event_survives_clearing_one_source() {
        let ledger = ledger();
        let features = [event_feature("eq-1", 0)];
        ledger.register_sent_events(&features, "usgs");
        ledger.register_sent_events(&features, "emsc");

        assert_eq!(ledger.clear_source("usgs"), 1);
        assert!(ledger.is_event_sent("eq-1"));
        ledger.clear_source("emsc");
        assert!(!ledger.is_event_sent("eq-1"));
    }

    #[test]
    fn test_take_unsent_cells_registers() {
        let ledger = ledger();
        let data = cells(&[(2020, "USA", "pop")]);
        assert_eq!(ledger.take_unsent_cells(&data), data);
        assert!(ledger.take_unsent_cells(&data).is_empty());
    }

    #[test]
    fn test_take_unsent_events_multi_feature_batch() {
        let ledger = ledger();
        let batch = vec![event_feature("storm-1", 0), event_feature("storm-1", 1)];
        assert_eq!(ledger.take_unsent_events(batch.clone(), "storms").len(), 2);
        assert!(ledger.take_unsent_events(batch, "storms").is_empty());
    }

    #[test]
    fn test_concurrent_take_delivers_each_cell_once() {
        let ledger = Arc::new(ledger());
        let data = Arc::new(cells(&[
            (2019, "USA", "pop"),
            (2020, "USA", "pop"),
            (2020, "USA", "gdp"),
            (2020, "CAN", "pop"),
            (2021, "MEX", "gdp"),
        ]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let data = Arc::clone(&data);
                std::thread::spawn(move || crate::record::year_data_cell_count(&ledger.take_unsent_cells(&data)))
            })
            .collect();

        let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(delivered, 5);
    }

    #[test]
    fn test_result_cache_and_eviction() {
        let ledger = ledger();
        ledger.store_result("k0", json!({"n": 0}), Some(Signature::new(["USA"], [2020], ["pop"])));
        assert_eq!(ledger.get_cached_result("k0").unwrap().result, json!({"n": 0}));
        assert!(ledger.get_cached_result("missing").is_none());

        for i in 1..=4 {
            ledger.store_result(format!("k{i}"), json!({"n": i}), None);
        }
        assert!(ledger.get_cached_result("k0").is_none());
        assert!(ledger.get_cached_result("k4").is_some());
        assert_eq!(ledger.stats().cached_results, 4);
    }

    #[test]
    fn test_expiry() {
        let ledger = ledger();
        let ttl = Duration::from_secs(4 * 3600);
        let now = Utc::now();
        ledger.touch_at(now - chrono::Duration::hours(5));
        assert!(ledger.is_expired_at(now, ttl));

        ledger.touch_at(now - chrono::Duration::hours(3));
        assert!(!ledger.is_expired_at(now, ttl));
    }

    #[test]
    fn test_stats_and_clear() {
        let ledger = ledger();
        ledger.register_sent_cells(&cells(&[(2020, "USA", "pop"), (2020, "USA", "gdp")]));
        ledger.register_sent_events(&[event_feature("eq-1", 0)], "quakes");

        let stats = ledger.stats();
        assert_eq!(stats.sent_cells, 2);
        assert_eq!(stats.sent_events, 1);
        assert_eq!(stats.sources, vec!["gdp", "pop", "quakes"]);

        ledger.clear();
        let stats = ledger.stats();
        assert_eq!(stats.sent_cells + stats.sent_events, 0);
        assert!(stats.sources.is_empty());
    }

    #[test]
    fn test_sent_key_display() {
        assert_eq!(SentKey::cell("USA-CA", 2020, "population").to_string(), "USA-CA|2020|population");
        assert_eq!(SentKey::Event("eq-1".into()).to_string(), "eq-1");
    }
}
