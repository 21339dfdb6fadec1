//! Session and tab records

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sql_connectors::{Column, QueryPage};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use super::lru::LruTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Created,
    Loading,
    Success,
    Error,
}

impl TabStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TabStatus::Success | TabStatus::Error)
    }
}

/// One query's execution record and result buffer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub title: String,
    pub query: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub status: TabStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows_in_first_batch: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_pagination: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub row_count: usize,
}

impl Tab {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            id: id.into(),
            title: tab_title(&query),
            query,
            columns: Vec::new(),
            rows: Vec::new(),
            status: TabStatus::Created,
            error: None,
            total_rows_in_first_batch: None,
            supports_pagination: None,
            connection_id: None,
            started_at: None,
            completed_at: None,
            row_count: 0,
        }
    }

    /// Clear results and enter `loading` for a new run
    pub fn reset_for_run(&mut self, query: &str, connection_id: Option<String>) {
        self.query = query.to_string();
        self.title = tab_title(query);
        self.columns.clear();
        self.rows.clear();
        self.status = TabStatus::Loading;
        self.error = None;
        self.total_rows_in_first_batch = None;
        self.supports_pagination = None;
        self.connection_id = connection_id;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.row_count = 0;
    }

    /// Fold one page into the buffer
    pub fn apply_page(&mut self, page: QueryPage) {
        if let Some(columns) = page.columns {
            if !columns.is_empty() || self.columns.is_empty() {
                self.columns = columns;
            }
        }
        if page.supports_pagination.is_some() {
            self.supports_pagination = page.supports_pagination;
        }
        if !page.data.is_empty() {
            if self.total_rows_in_first_batch.is_none() {
                self.total_rows_in_first_batch = Some(page.data.len());
            }
            self.rows.extend(page.data);
            self.row_count = self.rows.len();
            self.status = TabStatus::Loading;
        }
    }

    pub fn finish(&mut self, status: TabStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.row_count = self.rows.len();
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> TabSummary {
        TabSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            query: self.query.clone(),
            status: self.status,
            error: self.error.clone(),
            row_count: self.row_count,
            column_count: self.columns.len(),
            supports_pagination: self.supports_pagination,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// First line of the query, shortened
fn tab_title(query: &str) -> String {
    const MAX: usize = 40;
    let line = query.trim().lines().next().unwrap_or("").trim();
    if line.chars().count() <= MAX {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX).collect();
    format!("{}...", cut.trim_end())
}

/// Tab metadata without the row payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSummary {
    pub id: String,
    pub title: String,
    pub query: String,
    pub status: TabStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub row_count: usize,
    pub column_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports_pagination: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Cancellation handle for the run currently executing in a tab
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub display_name: String,
    pub client_type: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub tabs: LruTable<String, Tab>,
    /// Present exactly while the tab's query is executing
    pub runs: HashMap<String, RunHandle>,
    pub active_tab_id: Option<String>,
}

impl Session {
    pub fn new(id: &str, display_name: &str, client_type: &str, max_tabs: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            client_type: client_type.to_string(),
            connected_at: now,
            last_activity_at: now,
            tabs: LruTable::new(max_tabs),
            runs: HashMap::new(),
            active_tab_id: None,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            client_type: self.client_type.clone(),
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at,
            tab_count: self.tabs.len(),
            running_queries: self.runs.len(),
            active_tab_id: self.active_tab_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub display_name: String,
    pub client_type: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub tab_count: usize,
    pub running_queries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tab_id: Option<String>,
}
