//! Tool argument records and the tagged [`ToolCall`]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::connections::ConnectionProfile;
use crate::error::{DaemonError, DaemonResult};

// ============================================================================
// Query tools
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryParams {
    #[schemars(description = "SQL statement to execute")]
    pub sql: String,

    #[schemars(description = "Session id. Defaults to the caller's connection session")]
    #[serde(default)]
    pub session: Option<String>,

    #[schemars(description = "Human-readable session name, used when the session is new")]
    #[serde(default)]
    pub display_name: Option<String>,

    #[schemars(description = "Open a new tab (default: true). false reuses the active tab")]
    #[serde(default)]
    pub new_tab: Option<bool>,

    #[schemars(description = "Saved connection profile id. Defaults to the first profile")]
    #[serde(default)]
    pub connection_id: Option<String>,

    #[schemars(description = "Ad-hoc connection profile, used instead of a saved one")]
    #[serde(default)]
    pub connection_profile: Option<ConnectionProfile>,

    #[schemars(description = "Run in this tab, replacing its results")]
    #[serde(default)]
    pub tab_id: Option<String>,

    #[schemars(description = "Wait for the query to finish and return rows inline (default: false)")]
    #[serde(default)]
    pub wait_for_result: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TabInfoMode {
    /// Status, metadata, and a small row sample
    #[default]
    Preview,
    /// An explicit offset/limit window
    Page,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetTabInfoParams {
    #[schemars(description = "Session id. Defaults to the caller's connection session")]
    #[serde(default)]
    pub session: Option<String>,

    #[schemars(description = "Tab id. Defaults to the session's active tab")]
    #[serde(default)]
    pub tab_id: Option<String>,

    #[schemars(description = "'preview' (default) or 'page'")]
    #[serde(default)]
    pub mode: Option<TabInfoMode>,

    #[schemars(description = "First row of the window (page mode, default: 0)")]
    #[serde(default)]
    pub offset: Option<usize>,

    #[schemars(description = "Rows in the window (page mode)")]
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelQueryParams {
    #[schemars(description = "Session id. Defaults to the caller's connection session")]
    #[serde(default)]
    pub session: Option<String>,

    #[schemars(description = "Tab whose query should be cancelled")]
    pub tab_id: String,
}

// ============================================================================
// Connection tools
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveConnectionParams {
    #[schemars(description = "Profile to save. A non-empty password goes to the credential store; an empty one deletes it")]
    pub profile: ConnectionProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionParams {
    #[schemars(description = "Saved profile id to test")]
    #[serde(default)]
    pub connection_id: Option<String>,

    #[schemars(description = "Unsaved profile to test")]
    #[serde(default)]
    pub profile: Option<ConnectionProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteConnectionParams {
    #[schemars(description = "Profile id to delete")]
    pub connection_id: String,
}

// ============================================================================
// Dispatch
// ============================================================================

/// A decoded tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    RunQuery(RunQueryParams),
    GetTabInfo(GetTabInfoParams),
    CancelQuery(CancelQueryParams),
    ListSessions(EmptyParams),
    ListConnections(EmptyParams),
    SaveConnection(SaveConnectionParams),
    TestConnection(TestConnectionParams),
    DeleteConnection(DeleteConnectionParams),
}

pub const TOOL_NAMES: [&str; 8] = [
    "run_query",
    "get_tab_info",
    "cancel_query",
    "list_sessions",
    "list_connections",
    "save_connection",
    "test_connection",
    "delete_connection",
];

impl ToolCall {
    /// Decode a tool name and its raw arguments
    pub fn parse(name: &str, arguments: Option<Value>) -> DaemonResult<Self> {
        if !TOOL_NAMES.contains(&name) {
            return Err(DaemonError::InvalidRequest(format!("Unknown tool '{}'", name)));
        }
        let arguments = match arguments {
            None | Some(Value::Null) => json!({}),
            Some(args) => args,
        };
        serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .map_err(|e| DaemonError::InvalidRequest(format!("Invalid arguments for '{}': {}", name, e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::RunQuery(_) => "run_query",
            ToolCall::GetTabInfo(_) => "get_tab_info",
            ToolCall::CancelQuery(_) => "cancel_query",
            ToolCall::ListSessions(_) => "list_sessions",
            ToolCall::ListConnections(_) => "list_connections",
            ToolCall::SaveConnection(_) => "save_connection",
            ToolCall::TestConnection(_) => "test_connection",
            ToolCall::DeleteConnection(_) => "delete_connection",
        }
    }

    /// Fill in the session id for calls that omitted it
    pub fn with_default_session(mut self, session_id: &str) -> Self {
        if let Some(slot) = self.session_slot() {
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = Some(session_id.to_string());
            }
        }
        self
    }

    fn session_slot(&mut self) -> Option<&mut Option<String>> {
        match self {
            ToolCall::RunQuery(p) => Some(&mut p.session),
            ToolCall::GetTabInfo(p) => Some(&mut p.session),
            ToolCall::CancelQuery(p) => Some(&mut p.session),
            _ => None,
        }
    }
}
