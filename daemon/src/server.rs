//! MCP server wrapping the tool dispatcher

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, InitializeRequestParam, InitializeResult,
        ListResourcesResult, PaginatedRequestParam, RawResource, ReadResourceRequestParam,
        ReadResourceResult, Resource, ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{DaemonError, DaemonResult};
use crate::tools::{
    CancelQueryParams, DeleteConnectionParams, EmptyParams, GetTabInfoParams, RunQueryParams,
    SaveConnectionParams, TestConnectionParams, ToolCall, ToolHandler,
};

pub const SESSIONS_URI: &str = "sqlpreview://sessions";
pub const UI_URI: &str = "ui://sql-preview/results.html";

const SESSIONS_PREFIX: &str = "sqlpreview://sessions/";
const RESULTS_HTML: &str = include_str!("../static/results.html");

/// Which transport a server instance is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    Http,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Socket => "socket",
            TransportKind::Http => "http",
        }
    }
}

fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

// ============================================================================
// Server Implementation
// ============================================================================

/// One instance per transport session.
///
/// Calls that omit `session` run in the daemon session keyed by this
/// instance's transport session id.
#[derive(Clone)]
pub struct QueryMcpServer {
    handler: ToolHandler,
    session_id: String,
    transport: TransportKind,
    tool_router: ToolRouter<Self>,
}

impl QueryMcpServer {
    pub fn new(handler: ToolHandler, transport: TransportKind) -> Self {
        Self::with_session_id(handler, transport, Uuid::new_v4().to_string())
    }

    pub fn with_session_id(
        handler: ToolHandler,
        transport: TransportKind,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            session_id: session_id.into(),
            transport,
            tool_router: Self::tool_router(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn call(&self, call: ToolCall) -> Result<CallToolResult, McpError> {
        let call = call.with_default_session(&self.session_id);
        let name = call.name();
        match self.handler.dispatch(call).await {
            Ok(value) => json_success(&value),
            Err(e) => {
                tracing::debug!(tool = name, transport = self.transport.as_str(), "Tool failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Every resource currently readable
    pub async fn resources(&self) -> Vec<Resource> {
        let mut resources = vec![
            RawResource::new(SESSIONS_URI, "Sessions").no_annotation(),
            RawResource::new(UI_URI, "Query results UI").no_annotation(),
        ];
        for session in self.handler.sessions().list_sessions().await {
            resources.push(
                RawResource::new(
                    format!("{}{}/tabs", SESSIONS_PREFIX, session.id),
                    format!("Tabs of {}", session.display_name),
                )
                .no_annotation(),
            );
        }
        resources
    }

    /// Resolve a resource URI to its text
    pub async fn read_uri(&self, uri: &str) -> DaemonResult<String> {
        if uri == UI_URI {
            return Ok(RESULTS_HTML.to_string());
        }

        let sessions = self.handler.sessions();
        if uri == SESSIONS_URI {
            let list = sessions.list_sessions().await;
            return Ok(serde_json::to_string_pretty(&json!({ "sessions": list }))?);
        }

        let session_id = uri
            .strip_prefix(SESSIONS_PREFIX)
            .and_then(|rest| rest.strip_suffix("/tabs"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DaemonError::NotFound(format!("Resource '{}'", uri)))?;
        let tabs = sessions
            .list_tabs(session_id)
            .await
            .ok_or_else(|| DaemonError::NotFound(format!("Session '{}'", session_id)))?;
        Ok(serde_json::to_string_pretty(
            &json!({ "sessionId": session_id, "tabs": tabs }),
        )?)
    }
}

#[tool_router]
impl QueryMcpServer {
    #[tool(description = "Run a SQL statement in a session tab. Returns the tab id immediately; \
        poll get_tab_info for results, or pass waitForResult=true to get rows inline.")]
    async fn run_query(
        &self,
        Parameters(params): Parameters<RunQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::RunQuery(params)).await
    }

    #[tool(description = "Status and results of a tab. mode='preview' (default) returns metadata and \
        a row sample; mode='page' returns rows [offset, offset+limit) with hasMore.")]
    async fn get_tab_info(
        &self,
        Parameters(params): Parameters<GetTabInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::GetTabInfo(params)).await
    }

    #[tool(description = "Cancel the query running in a tab. The tab ends with status 'error'.")]
    async fn cancel_query(
        &self,
        Parameters(params): Parameters<CancelQueryParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::CancelQuery(params)).await
    }

    #[tool(description = "List sessions known to the daemon, most recently active first.")]
    async fn list_sessions(
        &self,
        Parameters(params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::ListSessions(params)).await
    }

    #[tool(description = "List saved connection profiles. Passwords are never included.")]
    async fn list_connections(
        &self,
        Parameters(params): Parameters<EmptyParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::ListConnections(params)).await
    }

    #[tool(description = "Save a connection profile. The password is kept in the credential store, \
        not the profile file.")]
    async fn save_connection(
        &self,
        Parameters(params): Parameters<SaveConnectionParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::SaveConnection(params)).await
    }

    #[tool(description = "Check that a saved or ad-hoc connection profile can reach its data source.")]
    async fn test_connection(
        &self,
        Parameters(params): Parameters<TestConnectionParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::TestConnection(params)).await
    }

    #[tool(description = "Delete a saved connection profile and its stored password.")]
    async fn delete_connection(
        &self,
        Parameters(params): Parameters<DeleteConnectionParams>,
    ) -> Result<CallToolResult, McpError> {
        self.call(ToolCall::DeleteConnection(params)).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for QueryMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "SQL preview daemon. Use run_query to start a query in a tab, get_tab_info to \
                 read its status and rows, and cancel_query to stop it. Connection profiles are \
                 managed with list_connections, save_connection, test_connection and \
                 delete_connection."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let client_name = request.client_info.name.clone();
        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        self.handler
            .sessions()
            .register_session(&self.session_id, &client_name, self.transport.as_str())
            .await;
        Ok(self.get_info())
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(self.resources().await))
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri, .. }: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let text = self.read_uri(&uri).await?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }
}
