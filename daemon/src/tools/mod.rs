//! The tool surface shared by every transport

pub mod format;
pub mod handler;
pub mod params;

pub use handler::{ToolHandler, ToolOptions};
pub use params::{
    CancelQueryParams, DeleteConnectionParams, EmptyParams, GetTabInfoParams, RunQueryParams,
    SaveConnectionParams, TabInfoMode, TestConnectionParams, ToolCall, TOOL_NAMES,
};

/// Error text written into a tab whose query was cancelled
pub const CANCELLED_MESSAGE: &str = "Query cancelled by user";
