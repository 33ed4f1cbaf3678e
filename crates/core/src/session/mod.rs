//! Per-client session state.
//!
//! - [`SessionLedger`]: what one client has already received
//! - [`SessionStore`]: lazy creation and TTL eviction of ledgers

pub mod id;
pub mod ledger;
pub mod store;

pub use id::SessionId;
pub use ledger::{CachedResult, LedgerStats, SentKey, SessionLedger};
pub use store::{SessionConfig, SessionStore, StoreStats};
