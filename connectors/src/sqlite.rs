//! SQLite connector
//!
//! rusqlite is synchronous, so each query runs on a blocking thread and hands
//! batches of rows to the async side through a bounded channel. The producer
//! checks the cancellation token between rows, interrupts a statement that is
//! still working when the token fires, and stops as soon as the consumer goes
//! away.

use async_trait::async_trait;
use futures::StreamExt;
use rusqlite::{types::Value as SqlValue, Connection, OpenFlags};
use serde_json::Value;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::connector::{
    failed_stream, Column, ConnectionTest, Connector, ConnectorConfig, PageStream, QueryPage,
};
use crate::error::ConnectorError;

/// Rows per page
const BATCH_SIZE: usize = 500;

type PageSender = mpsc::Sender<Result<QueryPage, ConnectorError>>;

/// Connector for local SQLite database files
#[derive(Debug, Default, Clone)]
pub struct SqliteConnector;

impl SqliteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn id(&self) -> &str {
        "sqlite"
    }

    fn validate_config(&self, config: &ConnectorConfig) -> Option<String> {
        match &config.database_path {
            Some(path) if !path.as_os_str().is_empty() => None,
            _ => Some("Database path is required".to_string()),
        }
    }

    fn run_query(
        &self,
        query: &str,
        config: &ConnectorConfig,
        _auth_header: Option<&str>,
        cancel: CancellationToken,
    ) -> PageStream {
        let Some(path) = config.database_path.clone() else {
            return failed_stream(ConnectorError::Validation(
                "Database path is required".to_string(),
            ));
        };

        let (tx, rx) = mpsc::channel(2);
        let query = query.to_string();
        let max_rows = config.max_rows;

        tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_rows(&path, &query, max_rows, &cancel, &tx) {
                // An interrupted statement is not a failure
                if !cancel.is_cancelled() {
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    async fn test_connection(
        &self,
        config: &ConnectorConfig,
        _auth_header: Option<&str>,
    ) -> Option<ConnectionTest> {
        let Some(path) = config.database_path.clone() else {
            return Some(ConnectionTest::failed("Database path is required"));
        };

        let outcome = tokio::task::spawn_blocking(move || -> Result<(), ConnectorError> {
            let conn = open(&path)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await;

        Some(match outcome {
            Ok(Ok(())) => ConnectionTest::ok(),
            Ok(Err(e)) => ConnectionTest::failed(e.to_string()),
            Err(e) => ConnectionTest::failed(format!("Connection check aborted: {}", e)),
        })
    }
}

fn open(path: &Path) -> Result<Connection, ConnectorError> {
    if !path.exists() {
        return Err(ConnectorError::Connection(format!(
            "Database file not found: {}",
            path.display()
        )));
    }
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ConnectorError::Connection(format!("Failed to open {}: {}", path.display(), e)))
}

/// Runs on the blocking pool. Returns `Ok` when finished, cancelled, or the
/// receiver hung up.
fn stream_rows(
    path: &Path,
    query: &str,
    max_rows: usize,
    cancel: &CancellationToken,
    tx: &PageSender,
) -> Result<(), ConnectorError> {
    if cancel.is_cancelled() {
        return Ok(());
    }
    let conn = open(path)?;
    let _watch = watch_for_cancel(&conn, cancel);
    let mut stmt = conn.prepare(query)?;
    let column_count = stmt.column_count();

    if column_count == 0 {
        let affected = stmt.execute([])?;
        let page = QueryPage {
            columns: Some(Vec::new()),
            stats: Some(serde_json::json!({ "rowsAffected": affected })),
            ..Default::default()
        };
        let _ = tx.blocking_send(Ok(page));
        return Ok(());
    }

    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut batch: Vec<Vec<Value>> = Vec::with_capacity(BATCH_SIZE);
    let mut columns_sent = false;
    let mut total = 0usize;

    while let Some(row) = rows.next()? {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value: SqlValue = row.get(i)?;
            values.push(to_json(value));
        }
        batch.push(values);
        total += 1;

        if batch.len() == BATCH_SIZE {
            let page = make_page(&names, &mut columns_sent, std::mem::take(&mut batch));
            if tx.blocking_send(Ok(page)).is_err() {
                return Ok(());
            }
        }

        if max_rows > 0 && total >= max_rows {
            break;
        }
    }

    if cancel.is_cancelled() {
        return Ok(());
    }
    if !batch.is_empty() || !columns_sent {
        let page = make_page(&names, &mut columns_sent, batch);
        let _ = tx.blocking_send(Ok(page));
    }

    Ok(())
}

/// Interrupt the connection's running statement when `cancel` fires. The
/// watcher stops when the returned guard drops.
fn watch_for_cancel(conn: &Connection, cancel: &CancellationToken) -> Option<DropGuard> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let interrupt = conn.get_interrupt_handle();
    let cancel = cancel.clone();
    let done = CancellationToken::new();
    let finished = done.clone();
    runtime.spawn(async move {
        tokio::select! {
            _ = finished.cancelled() => {}
            _ = cancel.cancelled() => interrupt.interrupt(),
        }
    });
    Some(done.drop_guard())
}

/// Build a page, attaching column metadata only to the first one
fn make_page(names: &[String], columns_sent: &mut bool, data: Vec<Vec<Value>>) -> QueryPage {
    if *columns_sent {
        return QueryPage::rows(data);
    }
    *columns_sent = true;
    let columns = names
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name.clone(), infer_type(&data, i)))
        .collect();
    QueryPage::with_columns(columns, data)
}

/// SQLite is dynamically typed; report the type of the first non-null value
fn infer_type(data: &[Vec<Value>], index: usize) -> &'static str {
    data.iter()
        .filter_map(|row| row.get(index))
        .find(|v| !v.is_null())
        .map(|v| match v {
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "real",
            Value::Number(_) => "integer",
            _ => "text",
        })
        .unwrap_or("unknown")
}

fn to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => serde_json::json!(i),
        SqlValue::Real(f) => serde_json::json!(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}
