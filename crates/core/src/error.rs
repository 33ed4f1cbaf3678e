//! Unified error types for geoledger.
//!
//! Data-shape problems never surface here; they degrade to empty or partial
//! results. Only caller mistakes are reported.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Unified error types for the cache layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty or malformed session identifier.
    #[error("INVALID_SESSION: {0}")]
    InvalidSession(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A payload could not be encoded or decoded.
    #[error("SERIALIZE_FAILED: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidSession(msg) => (-32001, msg.clone()),
            Error::Serialize(e) => (-32603, e.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
