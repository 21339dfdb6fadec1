//! Transport-independent tool dispatch

use futures::StreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use super::format;
use super::params::*;
use super::CANCELLED_MESSAGE;
use crate::connections::ConnectionManager;
use crate::error::{DaemonError, DaemonResult};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::sessions::{CancelOutcome, RunTicket, SessionManager};

#[derive(Debug, Clone, Copy)]
pub struct ToolOptions {
    pub preview_rows: usize,
    pub page_size: usize,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            preview_rows: 10,
            page_size: 100,
        }
    }
}

/// Maps [`ToolCall`]s onto session state and query execution.
///
/// Cheap to clone; every transport session holds one.
#[derive(Clone)]
pub struct ToolHandler {
    sessions: SessionManager,
    executor: QueryExecutor,
    options: ToolOptions,
}

impl ToolHandler {
    pub fn new(sessions: SessionManager, executor: QueryExecutor, options: ToolOptions) -> Self {
        Self {
            sessions,
            executor,
            options,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn connections(&self) -> &ConnectionManager {
        self.executor.connections()
    }

    pub async fn dispatch(&self, call: ToolCall) -> DaemonResult<Value> {
        tracing::debug!(tool = call.name(), "Dispatching tool call");
        match call {
            ToolCall::RunQuery(p) => self.run_query(p).await,
            ToolCall::GetTabInfo(p) => self.get_tab_info(p).await,
            ToolCall::CancelQuery(p) => self.cancel_query(p).await,
            ToolCall::ListSessions(_) => self.list_sessions().await,
            ToolCall::ListConnections(_) => self.list_connections().await,
            ToolCall::SaveConnection(p) => self.save_connection(p).await,
            ToolCall::TestConnection(p) => self.test_connection(p).await,
            ToolCall::DeleteConnection(p) => self.delete_connection(p).await,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn run_query(&self, p: RunQueryParams) -> DaemonResult<Value> {
        let session_id = require_session(p.session.as_deref())?;
        if p.sql.trim().is_empty() {
            return Err(DaemonError::InvalidRequest("sql must not be empty".into()));
        }

        self.sessions
            .get_or_create_session(&session_id, p.display_name.as_deref())
            .await;

        // explicit tab > reuse active tab > new tab
        let reuse_active = !p.new_tab.unwrap_or(true);
        let tab_id = match p.tab_id.filter(|t| !t.is_empty()) {
            Some(tab_id) => tab_id,
            None if reuse_active => match self.sessions.active_tab_id(&session_id).await {
                Some(active) => active,
                None => new_tab_id(),
            },
            None => new_tab_id(),
        };

        let ticket = self
            .sessions
            .begin_run(&session_id, &tab_id, &p.sql, p.connection_id.clone())
            .await?;

        let request = QueryRequest {
            sql: p.sql,
            session_id: session_id.clone(),
            connection_id: p.connection_id,
            profile_override: p.connection_profile,
            cancel: ticket.cancel.clone(),
        };

        if p.wait_for_result.unwrap_or(false) {
            execute_into_tab(&self.sessions, &self.executor, &ticket, request).await?;
            return self
                .sessions
                .read_tab(&session_id, &tab_id, |tab| format::inline_result(&session_id, tab))
                .await
                .ok_or_else(|| DaemonError::NotFound(format!("Tab '{}'", tab_id)));
        }

        let sessions = self.sessions.clone();
        let executor = self.executor.clone();
        let background = ticket.clone();
        tokio::spawn(async move {
            if let Err(e) = execute_into_tab(&sessions, &executor, &background, request).await {
                tracing::warn!(
                    session = %background.session_id,
                    tab = %background.tab_id,
                    "Background query failed: {}",
                    e
                );
            }
        });

        Ok(json!({
            "sessionId": session_id,
            "tabId": tab_id,
            "status": "loading",
            "message": "Query started. Poll get_tab_info for results.",
        }))
    }

    async fn get_tab_info(&self, p: GetTabInfoParams) -> DaemonResult<Value> {
        let session_id = require_session(p.session.as_deref())?;
        if !self.sessions.has_session(&session_id).await {
            return Err(DaemonError::NotFound(format!("Session '{}'", session_id)));
        }

        let tab_id = match p.tab_id.filter(|t| !t.is_empty()) {
            Some(tab_id) => tab_id,
            None => self.sessions.active_tab_id(&session_id).await.ok_or_else(|| {
                DaemonError::NotFound(format!("Session '{}' has no active tab", session_id))
            })?,
        };

        let mode = p.mode.unwrap_or_default();
        let offset = p.offset.unwrap_or(0);
        let limit = p.limit.unwrap_or(self.options.page_size).max(1);
        let preview_rows = self.options.preview_rows;

        self.sessions
            .read_tab(&session_id, &tab_id, |tab| match mode {
                TabInfoMode::Preview => format::preview(&session_id, tab, preview_rows),
                TabInfoMode::Page => format::page(&session_id, tab, offset, limit),
            })
            .await
            .ok_or_else(|| DaemonError::NotFound(format!("Tab '{}' in session '{}'", tab_id, session_id)))
    }

    async fn cancel_query(&self, p: CancelQueryParams) -> DaemonResult<Value> {
        let session_id = require_session(p.session.as_deref())?;
        let outcome = self
            .sessions
            .cancel_tab(&session_id, &p.tab_id, CANCELLED_MESSAGE)
            .await?;

        Ok(match outcome {
            CancelOutcome::Cancelled => json!({
                "tabId": p.tab_id,
                "cancelled": true,
                "status": "error",
                "message": CANCELLED_MESSAGE,
            }),
            CancelOutcome::NotRunning(status) => json!({
                "tabId": p.tab_id,
                "cancelled": false,
                "status": status,
                "message": "No query is running in this tab",
            }),
        })
    }

    async fn list_sessions(&self) -> DaemonResult<Value> {
        let sessions = self.sessions.list_sessions().await;
        Ok(json!({ "count": sessions.len(), "sessions": sessions }))
    }

    // ========================================================================
    // Connections
    // ========================================================================

    async fn list_connections(&self) -> DaemonResult<Value> {
        let connections = self.connections().redacted_profiles().await;
        Ok(json!({ "connections": connections }))
    }

    async fn save_connection(&self, p: SaveConnectionParams) -> DaemonResult<Value> {
        if p.profile.id().is_empty() {
            return Err(DaemonError::InvalidRequest("profile id must not be empty".into()));
        }
        self.connections().save_profile(&p.profile).await?;
        Ok(json!({ "saved": true, "profile": p.profile.without_secret() }))
    }

    async fn test_connection(&self, p: TestConnectionParams) -> DaemonResult<Value> {
        let profile = match (p.profile, p.connection_id) {
            (Some(profile), _) => profile,
            (None, Some(id)) => self
                .connections()
                .get_profile(&id)
                .await?
                .ok_or_else(|| DaemonError::NotFound(format!("Connection profile '{}'", id)))?,
            (None, None) => {
                return Err(DaemonError::InvalidRequest(
                    "Provide connectionId or profile".into(),
                ))
            }
        };

        let result = self.executor.test_connection(&profile).await;
        Ok(json!({
            "connectionId": profile.id(),
            "success": result.success,
            "error": result.error,
        }))
    }

    async fn delete_connection(&self, p: DeleteConnectionParams) -> DaemonResult<Value> {
        let deleted = self.connections().delete_profile(&p.connection_id).await?;
        Ok(json!({ "connectionId": p.connection_id, "deleted": deleted }))
    }
}

fn require_session(session: Option<&str>) -> DaemonResult<String> {
    session
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| DaemonError::InvalidRequest("session is required".into()))
}

fn new_tab_id() -> String {
    format!("tab-{}", Uuid::new_v4().simple())
}

/// Drain the executor's stream into the tab.
///
/// Returns the final row count. A cancelled run leaves the tab to whoever
/// cancelled it.
async fn execute_into_tab(
    sessions: &SessionManager,
    executor: &QueryExecutor,
    ticket: &RunTicket,
    request: QueryRequest,
) -> DaemonResult<usize> {
    let mut stream = match executor.execute(request).await {
        Ok(stream) => stream,
        Err(e) => {
            sessions.fail_run(ticket, e.to_string()).await;
            return Err(e);
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => {
                return Err(DaemonError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(page)) => {
                if !sessions.apply_page(ticket, page).await {
                    // superseded by a newer run or cancelled
                    return Err(DaemonError::Cancelled(CANCELLED_MESSAGE.to_string()));
                }
            }
            Some(Err(e)) => {
                let message = if ticket.cancel.is_cancelled() || e.is_cancelled() {
                    CANCELLED_MESSAGE.to_string()
                } else {
                    e.to_string()
                };
                sessions.fail_run(ticket, message).await;
                return Err(e);
            }
            None => {
                let rows = sessions.complete_run(ticket).await.unwrap_or(0);
                tracing::info!(
                    session = %ticket.session_id,
                    tab = %ticket.tab_id,
                    rows,
                    "Query finished"
                );
                return Ok(rows);
            }
        }
    }
}
