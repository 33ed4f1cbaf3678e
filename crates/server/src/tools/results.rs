//! Result merging, queue dedup and coverage tools.
//!
//! These operate on payloads the caller already holds; the only state touched
//! is the optional per-session result cache.

use std::collections::BTreeSet;

use geoledger_core::{
    Error, OrderItem, PackageFilter, ResultPayload, SessionId, SessionStore, Signature, SignatureMap,
    hash::compute_request_key,
    optimizer::{
        can_serve_from_cache, compute_delta, compute_signature, deduplicate_queue, extract_signature_from_result,
        filter_result, merge_payloads,
    },
};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::json_result;

/// Narrowing applied to a merged payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResultFilterParams {
    pub locations: Option<Vec<String>>,
    pub years: Option<Vec<i32>>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    /// Metrics to keep; features left without any metric are dropped.
    pub metrics: Option<Vec<String>>,
}

impl From<ResultFilterParams> for PackageFilter {
    fn from(params: ResultFilterParams) -> Self {
        PackageFilter {
            locations: params.locations.map(BTreeSet::from_iter),
            years: params.years.map(BTreeSet::from_iter),
            year_start: params.year_start,
            year_end: params.year_end,
            metrics: params.metrics.map(BTreeSet::from_iter),
        }
    }
}

/// Parameters for the result_merge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResultMergeParams {
    /// Payloads to merge; later payloads take precedence per `(loc_id, year)`.
    pub payloads: Vec<ResultPayload>,

    pub filter: Option<ResultFilterParams>,

    /// Session whose result cache should hold the merged payload.
    pub session_id: Option<String>,

    /// Original request; its canonical hash, together with `filter`, keys the
    /// session cache.
    pub request: Option<Value>,
}

/// Output from the result_merge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResultMergeOutput {
    pub result: ResultPayload,
    pub signature: SignatureMap,
    /// Human-readable coverage, e.g. "2 locations x 2020-2021 (2 years) x 1 metric".
    pub summary: String,
    pub request_key: Option<String>,
    /// Whether the result was replayed from the session cache.
    pub cached: bool,
}

/// Implementation of the result_merge tool.
pub fn result_merge_impl(store: &SessionStore, params: ResultMergeParams) -> Result<CallToolResult, McpError> {
    let request_key = params
        .request
        .as_ref()
        .map(|request| compute_request_key(&json!({ "request": request, "filter": &params.filter })));
    let ledger = params
        .session_id
        .as_deref()
        .map(SessionId::new)
        .transpose()?
        .map(|id| store.get_or_create(&id));

    if let (Some(ledger), Some(key)) = (&ledger, &request_key)
        && let Some(hit) = ledger.get_cached_result(key)
    {
        let result: ResultPayload = serde_json::from_value(hit.result).map_err(Error::from)?;
        let signature = hit
            .signature
            .unwrap_or_else(|| extract_signature_from_result(&result));
        tracing::debug!(session = %ledger.id(), request_key = %key, "replayed cached result");
        let summary = signature.summary();
        let output = ResultMergeOutput { result, signature: signature.into(), summary, request_key, cached: true };
        return json_result(&output);
    }

    if params.payloads.is_empty() {
        return Err(Error::InvalidInput("At least one payload must be provided".to_string()).into());
    }

    let mut result = merge_payloads(&params.payloads);
    if let Some(filter) = params.filter {
        result = filter_result(&result, &filter.into());
    }
    let signature = extract_signature_from_result(&result);

    if let (Some(ledger), Some(key)) = (&ledger, &request_key) {
        let value = serde_json::to_value(&result).map_err(Error::from)?;
        ledger.store_result(key.clone(), value, Some(signature.clone()));
    }

    let summary = signature.summary();
    json_result(&ResultMergeOutput { result, signature: signature.into(), summary, request_key, cached: false })
}

/// Parameters for the queue_dedupe tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueDedupeParams {
    pub items: Vec<OrderItem>,
}

/// Output from the queue_dedupe tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueDedupeOutput {
    pub items: Vec<OrderItem>,
    /// Content hash of each kept item, in order.
    pub signatures: Vec<String>,
    pub removed: usize,
}

/// Implementation of the queue_dedupe tool.
pub fn queue_dedupe_impl(params: QueueDedupeParams) -> Result<CallToolResult, McpError> {
    let total = params.items.len();
    let items = deduplicate_queue(params.items);
    let signatures = items.iter().map(compute_signature).collect();
    let removed = total - items.len();
    json_result(&QueueDedupeOutput { items, signatures, removed })
}

/// Parameters for the coverage_delta tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoverageDeltaParams {
    /// Coverage already held.
    pub cached: SignatureMap,
    pub requested: SignatureMap,
}

/// Output from the coverage_delta tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CoverageDeltaOutput {
    pub can_serve: bool,
    /// Coverage still to fetch; absent when the cache suffices.
    pub remaining: Option<SignatureMap>,
    pub summary: String,
}

/// Implementation of the coverage_delta tool.
pub fn coverage_delta_impl(params: CoverageDeltaParams) -> Result<CallToolResult, McpError> {
    let cached = Signature::from(params.cached);
    let requested = Signature::from(params.requested);

    let can_serve = can_serve_from_cache(&cached, &requested);
    let remaining = compute_delta(&cached, &requested).remaining().cloned();
    let summary = match &remaining {
        Some(sig) => format!("fetch {}", sig.summary()),
        None => "covered".to_string(),
    };

    json_result(&CoverageDeltaOutput { can_serve, remaining: remaining.map(SignatureMap::from), summary })
}
