//! Core types and shared functionality for geoledger.
//!
//! This crate provides:
//! - Coverage signatures and the delta calculus over them
//! - Data packages, coverage inventories and result merging
//! - Per-session sent-data ledgers and their lifecycle store
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod feature;
pub mod hash;
pub mod inventory;
pub mod optimizer;
pub mod package;
pub mod record;
pub mod session;
pub mod signature;

pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use feature::{Feature, FeatureCollection};
pub use inventory::{Inventory, InventoryStats};
pub use optimizer::{OrderItem, ResultPayload, YearRange};
pub use package::{Package, PackageFilter, VerificationReport};
pub use record::{Record, YearData};
pub use session::{LedgerStats, SessionConfig, SessionId, SessionLedger, SessionStore, StoreStats};
pub use signature::{Delta, Signature, SignatureMap};
