//! Session ledger tools.
//!
//! Each call names its session explicitly; unknown sessions are created on
//! first use.

use geoledger_core::{Feature, LedgerStats, SessionId, SessionStore, StoreStats, YearData, record::year_data_cell_count};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

fn default_register() -> bool {
    true
}

/// Parameters for the session_filter_cells tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionFilterCellsParams {
    /// Client session identifier.
    pub session_id: String,

    /// Candidate cells as `year -> loc_id -> metric -> value`.
    pub year_data: YearData,

    /// Mark the surviving cells as sent (default: true).
    #[serde(default = "default_register")]
    pub register: bool,
}

/// Output from the session_filter_cells tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionFilterCellsOutput {
    /// Cells not yet sent to this session.
    pub year_data: YearData,
    pub cells_kept: usize,
    pub cells_filtered: usize,
}

/// Implementation of the session_filter_cells tool.
pub fn filter_cells_impl(store: &SessionStore, params: SessionFilterCellsParams) -> Result<CallToolResult, McpError> {
    let session_id = SessionId::new(params.session_id)?;
    let ledger = store.get_or_create(&session_id);

    let year_data = if params.register {
        ledger.take_unsent_cells(&params.year_data)
    } else {
        ledger.filter_cells(&params.year_data)
    };

    let cells_kept = year_data_cell_count(&year_data);
    let cells_filtered = year_data_cell_count(&params.year_data) - cells_kept;
    tracing::debug!(session = %session_id, cells_kept, cells_filtered, "filtered cells");

    json_result(&SessionFilterCellsOutput { year_data, cells_kept, cells_filtered })
}

/// Parameters for the session_filter_events tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionFilterEventsParams {
    /// Client session identifier.
    pub session_id: String,

    /// Data source the features came from; sent events are tracked per source.
    pub source_id: String,

    /// Candidate GeoJSON features.
    pub features: Vec<Feature>,

    /// Mark the surviving events as sent (default: true).
    #[serde(default = "default_register")]
    pub register: bool,
}

/// Output from the session_filter_events tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionFilterEventsOutput {
    pub features: Vec<Feature>,
    pub features_kept: usize,
    pub features_filtered: usize,
}

/// Implementation of the session_filter_events tool.
pub fn filter_events_impl(store: &SessionStore, params: SessionFilterEventsParams) -> Result<CallToolResult, McpError> {
    let session_id = SessionId::new(params.session_id)?;
    let ledger = store.get_or_create(&session_id);

    let total = params.features.len();
    let features = if params.register {
        ledger.take_unsent_events(params.features, &params.source_id)
    } else {
        ledger.filter_events(params.features)
    };

    let features_kept = features.len();
    let features_filtered = total - features_kept;
    json_result(&SessionFilterEventsOutput { features, features_kept, features_filtered })
}

/// Parameters for the session_clear_source tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionClearSourceParams {
    pub session_id: String,

    /// Source id for events, or metric name for cells.
    pub source_id: String,
}

/// Output from the session_clear_source tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionClearSourceOutput {
    /// Number of keys removed from the source's bucket.
    pub removed: usize,
}

/// Implementation of the session_clear_source tool.
///
/// Unknown sessions and sources report zero removed.
pub fn clear_source_impl(store: &SessionStore, params: SessionClearSourceParams) -> Result<CallToolResult, McpError> {
    let session_id = SessionId::new(params.session_id)?;
    let removed = store.get_or_create(&session_id).clear_source(&params.source_id);
    json_result(&SessionClearSourceOutput { removed })
}

/// Parameters for the session_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionClearParams {
    pub session_id: String,

    /// Remove the session instead of just emptying its ledger.
    #[serde(default)]
    pub delete: bool,
}

/// Output from the session_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionClearOutput {
    /// Whether the session existed.
    pub found: bool,
    pub deleted: bool,
}

/// Implementation of the session_clear tool.
pub fn clear_impl(store: &SessionStore, params: SessionClearParams) -> Result<CallToolResult, McpError> {
    let session_id = SessionId::new(params.session_id)?;
    let output = if params.delete {
        let found = store.delete(&session_id);
        SessionClearOutput { found, deleted: found }
    } else {
        SessionClearOutput { found: store.clear_session(&session_id), deleted: false }
    };
    json_result(&output)
}

/// Parameters for the session_stats tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SessionStatsParams {
    /// Session to report on. Omit for store-wide counters.
    pub session_id: Option<String>,
}

/// Output from the session_stats tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SessionStatsOutput {
    Session(LedgerStats),
    Store { store: StoreStats, sessions: Vec<LedgerStats> },
}

/// Implementation of the session_stats tool.
///
/// Asking about an unknown session starts it, like any other session call.
pub fn stats_impl(store: &SessionStore, params: SessionStatsParams) -> Result<CallToolResult, McpError> {
    let output = match params.session_id {
        Some(id) => {
            let session_id = SessionId::new(id)?;
            SessionStatsOutput::Session(store.get_or_create(&session_id).stats())
        }
        None => SessionStatsOutput::Store { store: store.stats(), sessions: store.list_sessions() },
    };
    json_result(&output)
}
