//! Session ledger lifecycle.
//!
//! The store maps session ids to ledgers, creating them lazily and evicting
//! idle ones. Expiry is amortized over `get_or_create` calls instead of
//! running on a timer thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::id::SessionId;
use super::ledger::{LedgerStats, SessionLedger};

/// Lifecycle knobs for a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time after which a ledger is evicted.
    pub ttl: Duration,
    /// Minimum spacing between amortized sweeps.
    pub sweep_interval: Duration,
    /// Per-session cap on cached request results.
    pub max_cached_results: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(4 * 3600),
            sweep_interval: Duration::from_secs(5 * 60),
            max_cached_results: 64,
        }
    }
}

/// Aggregate view over every live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StoreStats {
    pub sessions: usize,
    pub sent_cells: usize,
    pub sent_events: usize,
    pub cached_results: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub last_sweep: String,
}

/// Registry of per-session ledgers.
///
/// The map lock is only held for lookups and inserts; each ledger carries its
/// own lock, so traffic for different sessions never contends.
#[derive(Debug)]
pub struct SessionStore {
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, Arc<SessionLedger>>>,
    last_sweep_ms: AtomicI64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            last_sweep_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Ledger for `id`, created on first use. Every call refreshes the
    /// session's activity and may trigger an expiry sweep.
    pub fn get_or_create(&self, id: &SessionId) -> Arc<SessionLedger> {
        self.maybe_sweep(Utc::now());

        let existing = self.sessions.read().get(id).cloned();
        let ledger = match existing {
            Some(ledger) => ledger,
            None => {
                let mut sessions = self.sessions.write();
                sessions
                    .entry(id.clone())
                    .or_insert_with(|| {
                        tracing::debug!(session = %id, "created session ledger");
                        Arc::new(SessionLedger::new(id.clone(), self.config.max_cached_results))
                    })
                    .clone()
            }
        };

        ledger.touch();
        ledger
    }

    /// Ledger for `id` if it exists. Does not refresh activity.
    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionLedger>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove the session outright. Returns whether it existed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            tracing::debug!(session = %id, "deleted session ledger");
        }
        removed
    }

    /// Empty the session's ledger but keep the session registered.
    pub fn clear_session(&self, id: &SessionId) -> bool {
        match self.get(id) {
            Some(ledger) => {
                ledger.clear();
                true
            }
            None => false,
        }
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms - last < millis(self.config.sweep_interval) {
            return 0;
        }
        // One caller wins the right to sweep; the rest carry on.
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return 0;
        }
        self.sweep_expired_at(now)
    }

    /// Evict every ledger idle for longer than the TTL.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Sweep as of `now`. Returns the number of evicted sessions.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let snapshot: Vec<Arc<SessionLedger>> = self.sessions.read().values().cloned().collect();

        let expired: Vec<SessionId> = snapshot
            .iter()
            .filter(|ledger| ledger.is_expired_at(now, ttl))
            .map(|ledger| ledger.id().clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write();
        let mut evicted = 0;
        for id in expired {
            // Re-check: the session may have been touched since the snapshot.
            if sessions.get(&id).is_some_and(|ledger| ledger.is_expired_at(now, ttl)) {
                sessions.remove(&id);
                evicted += 1;
            }
        }
        let remaining = sessions.len();
        drop(sessions);

        tracing::info!(evicted, remaining, "swept expired sessions");
        evicted
    }

    /// Per-session stats, ordered by session id.
    pub fn list_sessions(&self) -> Vec<LedgerStats> {
        let ledgers: Vec<Arc<SessionLedger>> = self.sessions.read().values().cloned().collect();
        let mut stats: Vec<LedgerStats> = ledgers.iter().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        stats
    }

    pub fn stats(&self) -> StoreStats {
        let sessions = self.list_sessions();
        let last_sweep = Utc
            .timestamp_millis_opt(self.last_sweep_ms.load(Ordering::Relaxed))
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        StoreStats {
            sessions: sessions.len(),
            sent_cells: sessions.iter().map(|s| s.sent_cells).sum(),
            sent_events: sessions.iter().map(|s| s.sent_events).sum(),
            cached_results: sessions.iter().map(|s| s.cached_results).sum(),
            ttl_secs: self.config.ttl.as_secs(),
            sweep_interval_secs: self.config.sweep_interval.as_secs(),
            last_sweep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::YearData;
    use serde_json::json;

    fn sid(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    fn one_cell(year: i32, loc: &str, metric: &str) -> YearData {
        let mut data = YearData::new();
        data.entry(year)
            .or_default()
            .entry(loc.to_string())
            .or_default()
            .insert(metric.to_string(), json!(1));
        data
    }

    #[test]
    fn test_get_or_create_returns_same_ledger() {
        let store = SessionStore::default();
        let a = store.get_or_create(&sid("a"));
        a.register_sent_cells(&one_cell(2020, "USA", "pop"));

        let again = store.get_or_create(&sid("a"));
        assert!(Arc::ptr_eq(&a, &again));
        assert!(again.is_cell_sent("USA", 2020, "pop"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::default();
        store
            .get_or_create(&sid("a"))
            .register_sent_cells(&one_cell(2020, "USA", "pop"));
        assert!(!store.get_or_create(&sid("b")).is_cell_sent("USA", 2020, "pop"));
    }

    #[test]
    fn test_sweep_evicts_expired() {
        let store = SessionStore::default();
        let now = Utc::now();
        store
            .get_or_create(&sid("stale"))
            .touch_at(now - chrono::Duration::hours(5));
        store.get_or_create(&sid("fresh"));

        assert!(store.get(&sid("stale")).unwrap().is_expired(Duration::from_secs(4 * 3600)));
        assert_eq!(store.sweep_expired_at(now), 1);
        assert!(store.get(&sid("stale")).is_none());
        assert!(store.get(&sid("fresh")).is_some());
    }

    #[test]
    fn test_amortized_sweep_on_access() {
        let config = SessionConfig { sweep_interval: Duration::ZERO, ..Default::default() };
        let store = SessionStore::new(config);
        store
            .get_or_create(&sid("stale"))
            .touch_at(Utc::now() - chrono::Duration::hours(5));

        store.get_or_create(&sid("other"));
        assert!(store.get(&sid("stale")).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sweep_waits_for_interval() {
        let store = SessionStore::default();
        store
            .get_or_create(&sid("stale"))
            .touch_at(Utc::now() - chrono::Duration::hours(5));

        store.get_or_create(&sid("other"));
        assert!(store.get(&sid("stale")).is_some());
    }

    #[test]
    fn test_clear_session_vs_delete() {
        let store = SessionStore::default();
        store
            .get_or_create(&sid("a"))
            .register_sent_cells(&one_cell(2020, "USA", "pop"));

        assert!(store.clear_session(&sid("a")));
        let ledger = store.get(&sid("a")).unwrap();
        assert!(!ledger.is_cell_sent("USA", 2020, "pop"));

        assert!(store.delete(&sid("a")));
        assert!(!store.delete(&sid("a")));
        assert!(!store.clear_session(&sid("a")));
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats_and_listing() {
        let store = SessionStore::default();
        store
            .get_or_create(&sid("b"))
            .register_sent_cells(&one_cell(2020, "USA", "pop"));
        store
            .get_or_create(&sid("a"))
            .register_sent_cells(&one_cell(2021, "USA", "gdp"));

        let listed = store.list_sessions();
        assert_eq!(listed.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let stats = store.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.sent_cells, 2);
        assert_eq!(stats.ttl_secs, 4 * 3600);
        assert_eq!(stats.sweep_interval_secs, 300);
    }

    #[test]
    fn test_concurrent_access_across_sessions() {
        let store = Arc::new(SessionStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let ledger = store.get_or_create(&sid(&format!("s{}", i % 4)));
                    ledger.take_unsent_cells(&one_cell(2020, "USA", "pop")).len()
                })
            })
            .collect();

        let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(store.len(), 4);
        assert_eq!(delivered, 4);
    }
}
