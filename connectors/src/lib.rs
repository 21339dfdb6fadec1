//! SQL Connectors
//!
//! The connector contract used by the query daemon, plus the built-in
//! data sources:
//!
//! - **trino**: Trino/Presto over the HTTP statement protocol (`nextUri` paging)
//! - **sqlite**: embedded SQLite database files
//!
//! Every connector turns a query into a lazy [`PageStream`] that observes a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) between pages.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use sql_connectors::{ConnectorConfig, ConnectorRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = ConnectorRegistry::with_defaults();
//! let sqlite = registry.get("sqlite").unwrap();
//! let config = ConnectorConfig {
//!     database_path: Some("app.db".into()),
//!     max_rows: 1000,
//!     ..Default::default()
//! };
//! let mut pages = sqlite.run_query("SELECT * FROM users", &config, None, CancellationToken::new());
//! while let Some(page) = pages.next().await {
//!     println!("{} rows", page?.data.len());
//! }
//! ```

pub mod connector;
pub mod error;
pub mod registry;
pub mod sqlite;
pub mod trino;

pub use connector::{Column, ConnectionTest, Connector, ConnectorConfig, PageStream, QueryPage};
pub use error::{ConnectorError, ConnectorResult};
pub use registry::ConnectorRegistry;
pub use sqlite::SqliteConnector;
pub use trino::TrinoConnector;
