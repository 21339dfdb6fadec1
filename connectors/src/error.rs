//! Error types for connectors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectorError {
    /// The data source could not be reached or opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// The data source rejected or failed the statement
    #[error("Query error: {0}")]
    Query(String),

    /// Connector configuration is missing required fields
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// The caller aborted the operation
    #[error("Query cancelled")]
    Cancelled,

    /// The data source answered with something we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl From<rusqlite::Error> for ConnectorError {
    fn from(e: rusqlite::Error) -> Self {
        ConnectorError::Query(e.to_string())
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ConnectorError::Connection(e.to_string())
        } else if e.is_decode() {
            ConnectorError::Protocol(e.to_string())
        } else {
            ConnectorError::Query(e.to_string())
        }
    }
}
