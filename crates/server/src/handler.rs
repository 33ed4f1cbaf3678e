//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use geoledger_core::SessionStore;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::results::{
    CoverageDeltaParams, QueueDedupeParams, ResultMergeParams, coverage_delta_impl, queue_dedupe_impl,
    result_merge_impl,
};
use crate::tools::session::{
    SessionClearParams, SessionClearSourceParams, SessionFilterCellsParams, SessionFilterEventsParams,
    SessionStatsParams, clear_impl, clear_source_impl, filter_cells_impl, filter_events_impl, stats_impl,
};

/// The main MCP server handler for geoledger.
#[derive(Clone)]
pub struct GeoLedgerServer {
    tool_router: ToolRouter<Self>,
    store: Arc<SessionStore>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl GeoLedgerServer {
    /// Create a new server handler over a shared session store.
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { tool_router: Self::tool_router(), store }
    }

    #[tool(description = "Drop year_data cells this session already received, registering the rest as sent.")]
    async fn session_filter_cells(
        &self, params: Parameters<SessionFilterCellsParams>,
    ) -> Result<CallToolResult, McpError> {
        filter_cells_impl(&self.store, params.0)
    }

    #[tool(description = "Drop GeoJSON event features this session already received. Features without ids pass.")]
    async fn session_filter_events(
        &self, params: Parameters<SessionFilterEventsParams>,
    ) -> Result<CallToolResult, McpError> {
        filter_events_impl(&self.store, params.0)
    }

    /// Forget one data layer so the client can receive it again.
    #[tool(description = "Forget everything sent to this session under one source id. Returns the keys removed.")]
    async fn session_clear_source(
        &self, params: Parameters<SessionClearSourceParams>,
    ) -> Result<CallToolResult, McpError> {
        clear_source_impl(&self.store, params.0)
    }

    #[tool(description = "Reset a session's ledger, or delete the session entirely.")]
    async fn session_clear(&self, params: Parameters<SessionClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.store, params.0)
    }

    #[tool(description = "Counters for one session, or for the whole store when no session id is given.")]
    async fn session_stats(&self, params: Parameters<SessionStatsParams>) -> Result<CallToolResult, McpError> {
        stats_impl(&self.store, params.0)
    }

    /// Merge partial result payloads into one response.
    ///
    /// When a session id and request are supplied, the merged result is cached
    /// under the fingerprint of the request and filter, and replayed on repeat
    /// calls.
    #[tool(description = "Merge result payloads into one, optionally filtered. Returns the payload and its signature.")]
    async fn result_merge(&self, params: Parameters<ResultMergeParams>) -> Result<CallToolResult, McpError> {
        result_merge_impl(&self.store, params.0)
    }

    #[tool(description = "Remove duplicate fetch orders from a queue, keeping the first of each.")]
    async fn queue_dedupe(&self, params: Parameters<QueueDedupeParams>) -> Result<CallToolResult, McpError> {
        queue_dedupe_impl(params.0)
    }

    #[tool(description = "Compare requested with cached coverage. Returns whether it is served and what remains.")]
    async fn coverage_delta(&self, params: Parameters<CoverageDeltaParams>) -> Result<CallToolResult, McpError> {
        coverage_delta_impl(params.0)
    }
}

impl ServerHandler for GeoLedgerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "geoledger-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_lists_every_tool() {
        let server = GeoLedgerServer::new(Arc::new(SessionStore::default()));
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "coverage_delta",
                "queue_dedupe",
                "result_merge",
                "session_clear",
                "session_clear_source",
                "session_filter_cells",
                "session_filter_events",
                "session_stats",
            ]
        );
    }

    #[test]
    fn test_server_info() {
        let server = GeoLedgerServer::new(Arc::new(SessionStore::default()));
        let info = server.get_info();
        assert_eq!(info.server_info.name, "geoledger-mcp");
        assert!(info.capabilities.tools.is_some());
    }
}
