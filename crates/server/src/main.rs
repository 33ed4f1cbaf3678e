//! geoledger-mcp server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use geoledger_core::{AppConfig, SessionStore};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        session_ttl_hours = config.session_ttl_hours,
        sweep_interval_secs = config.sweep_interval_secs,
        max_cached_results = config.max_cached_results,
        "Starting geoledger-mcp server on stdio transport"
    );

    let store = Arc::new(SessionStore::new(config.session_config()));
    let handler = handler::GeoLedgerServer::new(store);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
