//! The connector contract
//!
//! A connector validates a flattened [`ConnectorConfig`], then streams a query's
//! results as [`QueryPage`]s. Connectors hold no connection state between
//! `run_query` calls.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectorError;

/// Lazy, finite sequence of result pages.
///
/// Consumers may stop early by dropping the stream; producers stop as soon as
/// the cancellation token fires and yield nothing further.
pub type PageStream = BoxStream<'static, Result<QueryPage, ConnectorError>>;

// ============================================================================
// Data Types
// ============================================================================

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// One incremental batch of query results.
///
/// `columns` is only guaranteed on the first page (or when it changes).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_pagination: Option<bool>,
}

impl QueryPage {
    /// A page carrying column metadata and rows
    pub fn with_columns(columns: Vec<Column>, data: Vec<Vec<Value>>) -> Self {
        Self {
            columns: Some(columns),
            data,
            ..Default::default()
        }
    }

    /// A page carrying rows only
    pub fn rows(data: Vec<Vec<Value>>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
}

/// Flattened, connector-specific settings for a single query.
///
/// Built fresh per query from a connection profile plus caller overrides.
/// Each connector decides which fields it requires in `validate_config`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub ssl: bool,
    pub ssl_verify: bool,
    pub database_path: Option<PathBuf>,
    /// Maximum rows to fetch; 0 means unbounded
    pub max_rows: usize,
}

/// Outcome of a connection health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTest {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Contract
// ============================================================================

/// A pluggable data source.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key, matching the profile `type` (e.g. "trino")
    fn id(&self) -> &str;

    /// Whether the source pages results server-side
    fn supports_pagination(&self) -> bool {
        false
    }

    /// Returns an error message when required settings are missing.
    fn validate_config(&self, config: &ConnectorConfig) -> Option<String>;

    /// Start a query and return its pages.
    fn run_query(
        &self,
        query: &str,
        config: &ConnectorConfig,
        auth_header: Option<&str>,
        cancel: CancellationToken,
    ) -> PageStream;

    /// Dedicated health check. `None` means the connector has none and callers
    /// should probe with a trivial query instead.
    async fn test_connection(
        &self,
        _config: &ConnectorConfig,
        _auth_header: Option<&str>,
    ) -> Option<ConnectionTest> {
        None
    }
}

/// A stream that yields a single error and ends.
pub(crate) fn failed_stream(error: ConnectorError) -> PageStream {
    use futures::StreamExt;
    futures::stream::once(async move { Err(error) }).boxed()
}
