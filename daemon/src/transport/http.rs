//! HTTP transport
//!
//! `/mcp` is the streamable-HTTP MCP endpoint; everything else is plain JSON
//! for humans and scripts. Only loopback hosts and origins are served, so a
//! web page in the user's browser cannot drive the tools.

use axum::response::IntoResponse;
use axum::{
    extract::{Path, Request, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE, HOST},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::daemon::activity::ActivityTracker;
use crate::error::{DaemonError, DaemonResult};
use crate::server::{QueryMcpServer, TransportKind};
use crate::sessions::{SessionSummary, TabSummary};
use crate::tools::ToolHandler;

#[derive(Clone)]
pub struct HttpState {
    pub handler: ToolHandler,
    pub activity: ActivityTracker,
    pub pid: u32,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

const MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");
const MCP_PROTOCOL_VERSION: HeaderName = HeaderName::from_static("mcp-protocol-version");
const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

fn not_found(what: String) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new(format!("{} not found", what))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pid: u32,
    pub uptime_secs: u64,
    /// Resident memory in bytes, when the OS reports it
    pub memory_bytes: Option<u64>,
    pub sessions: usize,
    pub connected_sockets: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabsResponse {
    pub session_id: String,
    pub tabs: Vec<TabSummary>,
}

// ============================================================================
// Router
// ============================================================================

/// Build the router. `ui_dir` is served at `/` when it exists.
pub fn create_router(state: HttpState, ui_dir: Option<PathBuf>, shutdown: CancellationToken) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(is_loopback_origin)
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, ACCEPT, MCP_SESSION_ID, MCP_PROTOCOL_VERSION, LAST_EVENT_ID])
        .expose_headers([MCP_SESSION_ID]);

    let handler = state.handler.clone();
    let mcp = StreamableHttpService::new(
        move || Ok(QueryMcpServer::new(handler.clone(), TransportKind::Http)),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            cancellation_token: shutdown,
            ..Default::default()
        },
    );

    let debug_routes = Router::new()
        .route("/sessions", get(debug_sessions))
        .route("/sessions/{id}/tabs", get(debug_tabs))
        .route("/sessions/{id}/tabs/{tab_id}", get(debug_tab));

    let mut router = Router::new()
        .route("/status", get(status))
        .nest("/debug", debug_routes)
        .with_state(state.clone())
        .nest_service("/mcp", mcp);

    if let Some(dir) = ui_dir.filter(|d| d.is_dir()) {
        tracing::info!("Serving UI from {:?}", dir);
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(middleware::from_fn_with_state(state.activity, track_activity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(reject_foreign_host))
}

/// `localhost`, `127.0.0.1` or `[::1]`, with or without a port
pub fn is_loopback_host(host: &str) -> bool {
    let name = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or_default(),
        None => host.split(':').next().unwrap_or_default(),
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

/// `http(s)://` followed by a loopback host
pub fn is_loopback_origin(origin: &str) -> bool {
    origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
        .is_some_and(is_loopback_host)
}

/// Refuse requests addressed to a non-loopback name (DNS rebinding)
async fn reject_foreign_host(request: Request, next: Next) -> Response {
    let foreign = request
        .headers()
        .get(HOST)
        .is_some_and(|host| !host.to_str().is_ok_and(is_loopback_host));
    if foreign {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("Host not allowed")),
        )
            .into_response();
    }
    next.run(request).await
}

/// Bind `127.0.0.1:port`, trying the next `retries` ports when taken
pub async fn bind_with_retry(port: u16, retries: u16) -> DaemonResult<(TcpListener, u16)> {
    let mut last_error = None;
    for candidate in (0..=retries).filter_map(|offset| port.checked_add(offset)) {
        let addr = SocketAddr::from(([127, 0, 0, 1], candidate));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(candidate);
                return Ok((listener, bound));
            }
            Err(e) => {
                tracing::warn!("Port {} unavailable: {}", candidate, e);
                last_error = Some(e);
            }
        }
    }
    Err(DaemonError::Lifecycle(format!(
        "Could not bind HTTP ports {}..={}: {}",
        port,
        port.saturating_add(retries),
        last_error.map(|e| e.to_string()).unwrap_or_else(|| "no ports tried".into())
    )))
}

async fn track_activity(State(activity): State<ActivityTracker>, request: Request, next: Next) -> Response {
    activity.touch();
    next.run(request).await
}

// ============================================================================
// Handlers
// ============================================================================

async fn status(State(state): State<HttpState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pid: state.pid,
        uptime_secs: state.activity.uptime().as_secs(),
        memory_bytes: process_memory(state.pid),
        sessions: state.handler.sessions().session_count().await,
        connected_sockets: state.activity.connected(),
    })
}

async fn debug_sessions(State(state): State<HttpState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.handler.sessions().list_sessions().await,
    })
}

async fn debug_tabs(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<TabsResponse>, ApiError> {
    let tabs = state
        .handler
        .sessions()
        .list_tabs(&id)
        .await
        .ok_or_else(|| not_found(format!("Session '{}'", id)))?;
    Ok(Json(TabsResponse { session_id: id, tabs }))
}

async fn debug_tab(
    State(state): State<HttpState>,
    Path((id, tab_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let tab = state
        .handler
        .sessions()
        .read_tab(&id, &tab_id, |tab| serde_json::to_value(tab))
        .await
        .ok_or_else(|| not_found(format!("Tab '{}' in session '{}'", tab_id, id)))?
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
        })?;
    Ok(Json(json!({ "sessionId": id, "tab": tab })))
}

fn process_memory(pid: u32) -> Option<u64> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}
