//! Daemon error taxonomy
//!
//! Every failure that can reach a remote peer is a [`DaemonError`]. Tool calls
//! convert it to a JSON-RPC error with [`DaemonError::to_mcp_error`]; background
//! query failures end up as a tab's `error` message instead.

use rmcp::ErrorData as McpError;
use sql_connectors::ConnectorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    /// The data source could not be reached or opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// The data source rejected or failed the statement
    #[error("Query error: {0}")]
    Query(String),

    /// Connector configuration is incomplete; raised before any I/O
    #[error("Configuration error: {0}")]
    Validation(String),

    /// The caller aborted the operation
    #[error("{0}")]
    Cancelled(String),

    /// A session, tab, or buffer cap was hit
    #[error("Resource limit: {0}")]
    ResourceLimit(String),

    /// Startup or shutdown failed (duplicate instance, bind failure)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed tool arguments or an unknown tool
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No writable profile store is configured
    #[error("No writable connection store available")]
    ReadOnlyStore,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

impl From<ConnectorError> for DaemonError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::Connection(msg) => DaemonError::Connection(msg),
            ConnectorError::Query(msg) | ConnectorError::Protocol(msg) => DaemonError::Query(msg),
            ConnectorError::Validation(msg) => DaemonError::Validation(msg),
            ConnectorError::Cancelled => {
                DaemonError::Cancelled(crate::tools::CANCELLED_MESSAGE.to_string())
            }
        }
    }
}

impl DaemonError {
    /// Map to a JSON-RPC error for the peer
    pub fn to_mcp_error(&self) -> McpError {
        match self {
            DaemonError::InvalidRequest(_)
            | DaemonError::Validation(_)
            | DaemonError::NotFound(_) => McpError::invalid_params(self.to_string(), None),
            _ => McpError::internal_error(self.to_string(), None),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DaemonError::Cancelled(_))
    }
}

impl From<DaemonError> for McpError {
    fn from(e: DaemonError) -> Self {
        e.to_mcp_error()
    }
}
