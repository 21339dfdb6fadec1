//! Session → tab state shared by every transport

use chrono::Utc;
use sql_connectors::QueryPage;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::lru::LruTable;
use super::types::{RunHandle, Session, SessionSummary, Tab, TabStatus, TabSummary};
use crate::error::{DaemonError, DaemonResult};

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_sessions: usize,
    pub max_tabs_per_session: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            max_tabs_per_session: 20,
        }
    }
}

/// A run that has started in a tab
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub session_id: String,
    pub tab_id: String,
    pub run_id: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A running query was signalled
    Cancelled,
    /// Nothing was running; the tab keeps its status
    NotRunning(TabStatus),
}

struct Inner {
    sessions: LruTable<String, Session>,
    next_run_id: u64,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<Inner>>,
    limits: SessionLimits,
}

impl SessionManager {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                sessions: LruTable::new(limits.max_sessions.max(1)),
                next_run_id: 0,
            })),
            limits,
        }
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Upsert. An existing session keeps its tabs and gets fresh timestamps.
    pub async fn register_session(
        &self,
        id: &str,
        display_name: &str,
        client_type: &str,
    ) -> SessionSummary {
        let mut inner = self.inner.write().await;
        let key = id.to_string();

        if let Some(session) = inner.sessions.get_mut(&key) {
            session.display_name = display_name.to_string();
            session.client_type = client_type.to_string();
            session.last_activity_at = Utc::now();
            let summary = session.summary();
            inner.sessions.touch(&key);
            return summary;
        }

        if inner.sessions.is_full() {
            Self::prune_locked(&mut inner);
        }

        let session = Session::new(id, display_name, client_type, self.limits.max_tabs_per_session);
        let summary = session.summary();
        inner.sessions.insert(key, session);
        for (evicted, session) in inner.sessions.evict_if_over_capacity() {
            cancel_runs(&session);
            tracing::warn!(session = %evicted, "Evicted session over capacity");
        }
        tracing::info!(session = %id, client = %client_type, "Registered session");
        summary
    }

    /// Lookup, auto-registering an unseen id
    pub async fn get_or_create_session(&self, id: &str, display_name: Option<&str>) -> SessionSummary {
        {
            let mut inner = self.inner.write().await;
            let key = id.to_string();
            if let Some(session) = inner.sessions.get_mut(&key) {
                session.last_activity_at = Utc::now();
                let summary = session.summary();
                inner.sessions.touch(&key);
                return summary;
            }
        }
        self.register_session(id, display_name.unwrap_or(id), "auto").await
    }

    /// Drop the least recently active ~10% of sessions (at least one)
    pub async fn prune_sessions(&self) -> usize {
        let mut inner = self.inner.write().await;
        Self::prune_locked(&mut inner)
    }

    fn prune_locked(inner: &mut Inner) -> usize {
        let count = (inner.sessions.len() / 10).max(1);
        let evicted = inner.sessions.evict_oldest(count);
        for (id, session) in &evicted {
            cancel_runs(session);
            tracing::info!(session = %id, "Pruned idle session");
        }
        evicted.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn has_session(&self, id: &str) -> bool {
        self.inner.read().await.sessions.contains_key(&id.to_string())
    }

    /// Most recently active first
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<SessionSummary> =
            inner.sessions.iter_by_recency().map(|(_, s)| s.summary()).collect();
        sessions.reverse();
        sessions
    }

    pub async fn session_summary(&self, id: &str) -> Option<SessionSummary> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id.to_string()).map(Session::summary)
    }

    pub async fn active_tab_id(&self, session_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&session_id.to_string())
            .and_then(|s| s.active_tab_id.clone())
    }

    // ========================================================================
    // Tabs
    // ========================================================================

    /// Whether one more tab fits under the per-session cap
    pub async fn can_add_tab(&self, session_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&session_id.to_string())
            .map_or(true, |s| !s.tabs.is_full())
    }

    /// Insert (or replace) a tab. Fails at the cap unless the id already exists.
    pub async fn insert_tab(&self, session_id: &str, tab: Tab) -> DaemonResult<()> {
        let mut inner = self.inner.write().await;
        let session = session_mut(&mut inner, session_id)?;
        if !session.tabs.contains_key(&tab.id) && session.tabs.is_full() {
            return Err(tab_limit_error(session));
        }
        session.tabs.insert(tab.id.clone(), tab);
        Ok(())
    }

    /// Evict the least recently used finished tab when at the cap.
    ///
    /// Returns the evicted id, or `ResourceLimit` if every tab is still loading.
    pub async fn make_room_for_tab(&self, session_id: &str) -> DaemonResult<Option<String>> {
        let mut inner = self.inner.write().await;
        let session = session_mut(&mut inner, session_id)?;
        make_room(session)
    }

    /// Reset or create `tab_id` as `loading` and hand out a cancel token.
    ///
    /// A previous run in the same tab is cancelled and can no longer write
    /// into it.
    pub async fn begin_run(
        &self,
        session_id: &str,
        tab_id: &str,
        sql: &str,
        connection_id: Option<String>,
    ) -> DaemonResult<RunTicket> {
        let mut inner = self.inner.write().await;
        inner.next_run_id += 1;
        let run_id = inner.next_run_id;

        let key = session_id.to_string();
        let session = session_mut(&mut inner, session_id)?;
        let tab_key = tab_id.to_string();

        if !session.tabs.contains_key(&tab_key) {
            if session.tabs.is_full() {
                if let Some(evicted) = make_room(session)? {
                    tracing::debug!(session = %session_id, tab = %evicted, "Evicted tab to make room");
                }
            }
            session.tabs.insert(tab_key.clone(), Tab::new(tab_id, sql));
        }

        if let Some(previous) = session.runs.remove(&tab_key) {
            previous.token.cancel();
        }

        let tab = session
            .tabs
            .get_mut(&tab_key)
            .ok_or_else(|| DaemonError::NotFound(format!("Tab '{}'", tab_id)))?;
        tab.reset_for_run(sql, connection_id);
        session.tabs.touch(&tab_key);

        let token = CancellationToken::new();
        session.runs.insert(
            tab_key.clone(),
            RunHandle {
                run_id,
                token: token.clone(),
            },
        );
        session.active_tab_id = Some(tab_key);
        session.last_activity_at = Utc::now();
        inner.sessions.touch(&key);

        Ok(RunTicket {
            session_id: session_id.to_string(),
            tab_id: tab_id.to_string(),
            run_id,
            cancel: token,
        })
    }

    /// Fold a page into the tab. False when the run was superseded or cancelled.
    pub async fn apply_page(&self, ticket: &RunTicket, page: QueryPage) -> bool {
        let mut inner = self.inner.write().await;
        let Some(session) = current_run(&mut inner, ticket) else {
            return false;
        };
        match session.tabs.get_mut(&ticket.tab_id) {
            Some(tab) => {
                tab.apply_page(page);
                true
            }
            None => false,
        }
    }

    /// Mark the run `success`. No-op for a superseded run.
    pub async fn complete_run(&self, ticket: &RunTicket) -> Option<usize> {
        self.finish_run(ticket, TabStatus::Success, None).await
    }

    /// Mark the run `error`. No-op for a superseded run.
    pub async fn fail_run(&self, ticket: &RunTicket, message: String) -> Option<usize> {
        self.finish_run(ticket, TabStatus::Error, Some(message)).await
    }

    async fn finish_run(
        &self,
        ticket: &RunTicket,
        status: TabStatus,
        error: Option<String>,
    ) -> Option<usize> {
        let mut inner = self.inner.write().await;
        let session = current_run(&mut inner, ticket)?;
        session.runs.remove(&ticket.tab_id);
        let tab = session.tabs.get_mut(&ticket.tab_id)?;
        tab.finish(status, error);
        Some(tab.row_count)
    }

    /// Cancel whatever is running in a tab and mark it `error` with `message`.
    pub async fn cancel_tab(
        &self,
        session_id: &str,
        tab_id: &str,
        message: &str,
    ) -> DaemonResult<CancelOutcome> {
        let mut inner = self.inner.write().await;
        let session = session_mut(&mut inner, session_id)?;
        let tab_key = tab_id.to_string();

        let handle = session.runs.remove(&tab_key);
        let tab = session
            .tabs
            .get_mut(&tab_key)
            .ok_or_else(|| DaemonError::NotFound(format!("Tab '{}' in session '{}'", tab_id, session_id)))?;

        match handle {
            Some(handle) => {
                handle.token.cancel();
                tab.finish(TabStatus::Error, Some(message.to_string()));
                tracing::info!(session = %session_id, tab = %tab_id, "Cancelled query");
                Ok(CancelOutcome::Cancelled)
            }
            None => Ok(CancelOutcome::NotRunning(tab.status)),
        }
    }

    /// Run `f` against a tab without cloning its rows
    pub async fn read_tab<R>(
        &self,
        session_id: &str,
        tab_id: &str,
        f: impl FnOnce(&Tab) -> R,
    ) -> Option<R> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&session_id.to_string())
            .and_then(|s| s.tabs.get(&tab_id.to_string()))
            .map(f)
    }

    /// Tab metadata, most recently used first
    pub async fn list_tabs(&self, session_id: &str) -> Option<Vec<TabSummary>> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(&session_id.to_string())?;
        let mut tabs: Vec<TabSummary> = session.tabs.iter_by_recency().map(|(_, t)| t.summary()).collect();
        tabs.reverse();
        Some(tabs)
    }

    pub async fn is_running(&self, session_id: &str, tab_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(&session_id.to_string())
            .is_some_and(|s| s.runs.contains_key(tab_id))
    }

    /// Cancel every running query (shutdown)
    pub async fn cancel_all(&self) {
        let inner = self.inner.read().await;
        for (_, session) in inner.sessions.iter_by_recency() {
            cancel_runs(session);
        }
    }
}

fn session_mut<'a>(inner: &'a mut Inner, session_id: &str) -> DaemonResult<&'a mut Session> {
    inner
        .sessions
        .get_mut(&session_id.to_string())
        .ok_or_else(|| DaemonError::NotFound(format!("Session '{}'", session_id)))
}

/// The session, if `ticket` is still the tab's current run
fn current_run<'a>(inner: &'a mut Inner, ticket: &RunTicket) -> Option<&'a mut Session> {
    let session = inner.sessions.get_mut(&ticket.session_id)?;
    let current = session
        .runs
        .get(&ticket.tab_id)
        .is_some_and(|handle| handle.run_id == ticket.run_id);
    current.then_some(session)
}

fn make_room(session: &mut Session) -> DaemonResult<Option<String>> {
    if !session.tabs.is_full() {
        return Ok(None);
    }
    let victim = session
        .tabs
        .keys_by_recency()
        .into_iter()
        .find(|id| !session.runs.contains_key(id));

    match victim {
        Some(id) => {
            session.tabs.remove(&id);
            if session.active_tab_id.as_deref() == Some(id.as_str()) {
                session.active_tab_id = None;
            }
            Ok(Some(id))
        }
        None => Err(tab_limit_error(session)),
    }
}

fn tab_limit_error(session: &Session) -> DaemonError {
    DaemonError::ResourceLimit(format!(
        "Session '{}' already has {} tabs, all still loading. Reuse a tab or cancel a query.",
        session.id,
        session.tabs.capacity()
    ))
}

fn cancel_runs(session: &Session) {
    for handle in session.runs.values() {
        handle.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(max_sessions: usize, max_tabs: usize) -> SessionManager {
        SessionManager::new(SessionLimits {
            max_sessions,
            max_tabs_per_session: max_tabs,
        })
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let sessions = manager(5, 5);
        let first = sessions.register_session("s1", "Editor", "vscode").await;
        sessions.begin_run("s1", "t1", "SELECT 1", None).await.unwrap();

        let second = sessions.register_session("s1", "Editor 2", "vscode").await;
        assert_eq!(sessions.session_count().await, 1);
        assert_eq!(second.connected_at, first.connected_at);
        assert_eq!(second.display_name, "Editor 2");
        assert_eq!(second.tab_count, 1);
    }

    #[tokio::test]
    async fn test_fifty_first_session_prunes_oldest() {
        let sessions = manager(50, 5);
        for i in 0..50 {
            sessions.register_session(&format!("s{}", i), "x", "test").await;
        }
        // s0 becomes recent again, so s1 is the oldest
        sessions.get_or_create_session("s0", None).await;

        sessions.register_session("s50", "x", "test").await;
        assert!(sessions.session_count().await <= 50);
        assert!(sessions.has_session("s0").await);
        assert!(!sessions.has_session("s1").await);
        assert!(sessions.has_session("s50").await);
    }

    #[tokio::test]
    async fn test_prune_removes_ten_percent() {
        let sessions = manager(100, 5);
        for i in 0..30 {
            sessions.register_session(&format!("s{}", i), "x", "test").await;
        }
        assert_eq!(sessions.prune_sessions().await, 3);
        assert_eq!(sessions.session_count().await, 27);
        assert!(!sessions.has_session("s0").await);
    }

    #[tokio::test]
    async fn test_tab_cap_evicts_finished_tabs() {
        let sessions = manager(5, 2);
        sessions.register_session("s", "x", "test").await;

        let t1 = sessions.begin_run("s", "t1", "SELECT 1", None).await.unwrap();
        sessions.complete_run(&t1).await;
        sessions.begin_run("s", "t2", "SELECT 2", None).await.unwrap();
        assert!(!sessions.can_add_tab("s").await);

        // t1 finished, so it makes way
        sessions.begin_run("s", "t3", "SELECT 3", None).await.unwrap();
        let ids: Vec<String> = sessions.list_tabs("s").await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t3".to_string(), "t2".to_string()]);

        // t2 and t3 both loading: nothing can go
        let err = sessions.begin_run("s", "t4", "SELECT 4", None).await.unwrap_err();
        assert!(matches!(err, DaemonError::ResourceLimit(_)));
        assert_eq!(sessions.list_tabs("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_tab_respects_cap() {
        let sessions = manager(5, 1);
        sessions.register_session("s", "x", "test").await;
        sessions.insert_tab("s", Tab::new("a", "SELECT 1")).await.unwrap();
        sessions.insert_tab("s", Tab::new("a", "SELECT 2")).await.unwrap();
        assert!(matches!(
            sessions.insert_tab("s", Tab::new("b", "SELECT 3")).await,
            Err(DaemonError::ResourceLimit(_))
        ));
        assert_eq!(sessions.make_room_for_tab("s").await.unwrap(), Some("a".to_string()));
        assert!(sessions.can_add_tab("s").await);
    }

    #[tokio::test]
    async fn test_run_lifecycle_and_handles() {
        let sessions = manager(5, 5);
        sessions.register_session("s", "x", "test").await;
        let ticket = sessions.begin_run("s", "t", "SELECT 1", None).await.unwrap();
        assert!(sessions.is_running("s", "t").await);

        assert!(sessions.apply_page(&ticket, QueryPage::rows(vec![vec![json!(1)]])).await);
        assert_eq!(sessions.complete_run(&ticket).await, Some(1));
        assert!(!sessions.is_running("s", "t").await);

        let status = sessions.read_tab("s", "t", |t| t.status).await;
        assert_eq!(status, Some(TabStatus::Success));
        assert_eq!(sessions.active_tab_id("s").await.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_superseded_run_cannot_write() {
        let sessions = manager(5, 5);
        sessions.register_session("s", "x", "test").await;
        let old = sessions.begin_run("s", "t", "SELECT 1", None).await.unwrap();
        let new = sessions.begin_run("s", "t", "SELECT 2", None).await.unwrap();

        assert!(old.cancel.is_cancelled());
        assert!(!sessions.apply_page(&old, QueryPage::rows(vec![vec![json!(1)]])).await);
        assert_eq!(sessions.fail_run(&old, "late".into()).await, None);

        assert!(sessions.is_running("s", "t").await);
        assert_eq!(sessions.complete_run(&new).await, Some(0));
    }

    #[tokio::test]
    async fn test_cancel_tab() {
        let sessions = manager(5, 5);
        sessions.register_session("s", "x", "test").await;
        let ticket = sessions.begin_run("s", "t", "SELECT 1", None).await.unwrap();

        let outcome = sessions.cancel_tab("s", "t", "Query cancelled by user").await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert!(ticket.cancel.is_cancelled());
        assert!(!sessions.is_running("s", "t").await);

        let (status, error) = sessions
            .read_tab("s", "t", |t| (t.status, t.error.clone()))
            .await
            .unwrap();
        assert_eq!(status, TabStatus::Error);
        assert!(error.unwrap().contains("cancelled"));

        // Second cancel is a no-op
        let again = sessions.cancel_tab("s", "t", "Query cancelled by user").await.unwrap();
        assert_eq!(again, CancelOutcome::NotRunning(TabStatus::Error));

        assert!(matches!(
            sessions.cancel_tab("s", "missing", "x").await,
            Err(DaemonError::NotFound(_))
        ));
    }
}
