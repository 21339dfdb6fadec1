//! Trino connector
//!
//! Speaks the Trino client REST protocol: the statement is POSTed to
//! `/v1/statement`, then each response's `nextUri` is followed until the
//! server stops returning one. Cancelling, hitting the row cap or dropping
//! the stream mid-query sends a best-effort `DELETE` to the pending `nextUri`
//! so the coordinator can free the query.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::connector::{failed_stream, Column, Connector, ConnectorConfig, PageStream, QueryPage};
use crate::error::ConnectorError;

/// Default Trino coordinator port
pub const DEFAULT_PORT: u16 = 8080;

/// Delay between polls while the query is queued and returns no rows
const POLL_DELAY: Duration = Duration::from_millis(100);

const CLIENT_SOURCE: &str = "sql-preview";

/// Connector for Trino (and Presto-compatible) coordinators
#[derive(Debug, Default, Clone)]
pub struct TrinoConnector;

impl TrinoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TrinoConnector {
    fn id(&self) -> &str {
        "trino"
    }

    fn supports_pagination(&self) -> bool {
        true
    }

    fn validate_config(&self, config: &ConnectorConfig) -> Option<String> {
        if config.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
            return Some("Host is required".to_string());
        }
        if config.user.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Some("User is required".to_string());
        }
        None
    }

    fn run_query(
        &self,
        query: &str,
        config: &ConnectorConfig,
        auth_header: Option<&str>,
        cancel: CancellationToken,
    ) -> PageStream {
        if let Some(message) = self.validate_config(config) {
            return failed_stream(ConnectorError::Validation(message));
        }

        let headers = match build_headers(config, auth_header) {
            Ok(headers) => headers,
            Err(e) => return failed_stream(e),
        };

        let client = match reqwest::Client::builder()
            .danger_accept_invalid_certs(config.ssl && !config.ssl_verify)
            .build()
        {
            Ok(client) => client,
            Err(e) => return failed_stream(ConnectorError::Connection(e.to_string())),
        };

        let cursor = Cursor {
            client,
            statement_url: statement_url(config),
            headers,
            step: Step::Submit(query.to_string()),
            pending: None,
            rows_seen: 0,
            max_rows: config.max_rows,
            cancel,
        };

        futures::stream::unfold(cursor, |mut cursor| async move {
            cursor.next_page().await.map(|item| (item, cursor))
        })
        .boxed()
    }
}

/// URL of the statement endpoint for a config
pub fn statement_url(config: &ConnectorConfig) -> String {
    let scheme = if config.ssl { "https" } else { "http" };
    let host = config
        .host
        .as_deref()
        .unwrap_or_default()
        .trim()
        .trim_end_matches('/');
    format!(
        "{}://{}:{}/v1/statement",
        scheme,
        host,
        config.port.unwrap_or(DEFAULT_PORT)
    )
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ConnectorError> {
    HeaderValue::from_str(value)
        .map_err(|_| ConnectorError::Validation(format!("Invalid value for header {}", name)))
}

fn build_headers(
    config: &ConnectorConfig,
    auth_header: Option<&str>,
) -> Result<HeaderMap, ConnectorError> {
    let mut headers = HeaderMap::new();
    headers.insert("X-Trino-Source", HeaderValue::from_static(CLIENT_SOURCE));

    if let Some(user) = &config.user {
        headers.insert("X-Trino-User", header_value("X-Trino-User", user)?);
    }
    if let Some(catalog) = config.catalog.as_deref().filter(|c| !c.is_empty()) {
        headers.insert("X-Trino-Catalog", header_value("X-Trino-Catalog", catalog)?);
    }
    if let Some(schema) = config.schema.as_deref().filter(|s| !s.is_empty()) {
        headers.insert("X-Trino-Schema", header_value("X-Trino-Schema", schema)?);
    }
    if let Some(auth) = auth_header {
        headers.insert(AUTHORIZATION, header_value("Authorization", auth)?);
    }

    Ok(headers)
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    columns: Option<Vec<Column>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    stats: Option<Value>,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

impl StatementError {
    fn into_connector_error(self) -> ConnectorError {
        match self.error_name {
            Some(name) => ConnectorError::Query(format!("{}: {}", name, self.message)),
            None => ConnectorError::Query(self.message),
        }
    }
}

// ============================================================================
// Cursor
// ============================================================================

enum Step {
    Submit(String),
    Follow(String),
    Done,
}

struct Cursor {
    client: reqwest::Client,
    statement_url: String,
    headers: HeaderMap,
    step: Step,
    /// Latest `nextUri` of a query the coordinator still considers live
    pending: Option<String>,
    rows_seen: usize,
    max_rows: usize,
    cancel: CancellationToken,
}

impl Cursor {
    async fn next_page(&mut self) -> Option<Result<QueryPage, ConnectorError>> {
        loop {
            let request = match std::mem::replace(&mut self.step, Step::Done) {
                Step::Done => return None,
                Step::Submit(sql) => self
                    .client
                    .post(&self.statement_url)
                    .headers(self.headers.clone())
                    .body(sql),
                Step::Follow(uri) => self.client.get(&uri).headers(self.headers.clone()),
            };

            let body = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.abandon();
                    return None;
                }
                result = async {
                    match request.send().await {
                        Ok(response) => decode(response).await,
                        Err(e) => Err(ConnectorError::from(e)),
                    }
                } => result,
            };

            let body = match body {
                Ok(body) => body,
                Err(e) => {
                    self.pending = None;
                    return Some(Err(e));
                }
            };

            if let Some(error) = body.error {
                self.pending = None;
                return Some(Err(error.into_connector_error()));
            }

            self.pending = body.next_uri.clone();
            if let Some(next) = &body.next_uri {
                self.step = Step::Follow(next.clone());
            }

            let mut data = body.data.unwrap_or_default();
            if self.max_rows > 0 && self.rows_seen + data.len() >= self.max_rows {
                data.truncate(self.max_rows - self.rows_seen);
                if matches!(self.step, Step::Follow(_)) {
                    tracing::debug!("Row limit {} reached, abandoning query", self.max_rows);
                    self.step = Step::Done;
                    self.abandon();
                }
            }
            self.rows_seen += data.len();

            if body.columns.is_none() && data.is_empty() {
                if matches!(self.step, Step::Done) {
                    return None;
                }
                // Queued or planning: nothing to hand out yet
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.step = Step::Done;
                        self.abandon();
                        return None;
                    }
                    _ = tokio::time::sleep(POLL_DELAY) => {}
                }
                continue;
            }

            return Some(Ok(QueryPage {
                columns: body.columns,
                data,
                next_uri: match &self.step {
                    Step::Follow(uri) => Some(uri.clone()),
                    _ => None,
                },
                stats: body.stats,
                supports_pagination: Some(true),
            }));
        }
    }

    /// Tell the coordinator we no longer want results
    fn abandon(&mut self) {
        let Some(uri) = self.pending.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime to cancel query at {}", uri);
            return;
        };
        let client = self.client.clone();
        let headers = self.headers.clone();
        runtime.spawn(async move {
            if let Err(e) = client.delete(&uri).headers(headers).send().await {
                tracing::debug!("Failed to cancel query at {}: {}", uri, e);
            }
        });
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.abandon();
    }
}

async fn decode(response: reqwest::Response) -> Result<StatementResponse, ConnectorError> {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(ConnectorError::Connection(format!(
                "Authentication failed ({})",
                status
            )));
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            return Err(ConnectorError::Connection(format!(
                "Coordinator unavailable ({})",
                status
            )));
        }
        _ => {}
    }

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ConnectorError::Query(format!("HTTP {}: {}", status, text.trim())));
    }

    response
        .json::<StatementResponse>()
        .await
        .map_err(|e| ConnectorError::Protocol(e.to_string()))
}
