//! SQL Preview Daemon
//!
//! A long-running background process that runs SQL queries on behalf of
//! editor and agent clients. Clients talk MCP over a local Unix socket or
//! streamable HTTP; both transports share one tool dispatcher and one
//! session table.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use sql_preview_daemon::{DaemonConfig, DaemonInstance};
//!
//! let config = DaemonConfig::load()?;
//! let instance = DaemonInstance::start(config).await?;
//! instance.run_until_shutdown().await?;
//! ```

pub mod config;
pub mod connections;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod logging;
pub mod server;
pub mod sessions;
pub mod tools;
pub mod transport;

pub use config::DaemonConfig;
pub use daemon::{DaemonInstance, InstanceLock, ShutdownReason};
pub use error::{DaemonError, DaemonResult};
pub use server::QueryMcpServer;
pub use tools::{ToolCall, ToolHandler};
