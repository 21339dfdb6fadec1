//! Shared fixtures: a small SQLite database and a daemon handler pointed at it

#![allow(dead_code)]

use rusqlite::Connection;
use sql_preview_daemon::connections::{ConnectionProfile, SqliteProfile};
use sql_preview_daemon::daemon::build_handler;
use sql_preview_daemon::{DaemonConfig, ToolHandler};
use std::path::PathBuf;
use tempfile::TempDir;

pub const PROFILE_ID: &str = "local-db";

/// `numbers(n INTEGER, label TEXT)` with `rows` rows, n = 0..rows
pub fn create_database(dir: &TempDir, rows: usize) -> PathBuf {
    let path = dir.path().join("fixture.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE numbers (n INTEGER NOT NULL, label TEXT);")
        .unwrap();
    let mut insert = conn
        .prepare("INSERT INTO numbers (n, label) VALUES (?1, ?2)")
        .unwrap();
    for n in 0..rows {
        insert
            .execute(rusqlite::params![n as i64, format!("row {}", n)])
            .unwrap();
    }
    path
}

pub fn config(dir: &TempDir) -> DaemonConfig {
    DaemonConfig {
        state_dir: dir.path().join("state"),
        http_port: 0,
        port_retries: 0,
        ..Default::default()
    }
}

/// Handler with one saved SQLite profile over a `rows`-row fixture
pub async fn handler_with_database(dir: &TempDir, rows: usize) -> ToolHandler {
    let database_path = create_database(dir, rows);
    let handler = build_handler(&config(dir)).unwrap();
    handler
        .connections()
        .save_profile(&ConnectionProfile::Sqlite(SqliteProfile {
            id: PROFILE_ID.to_string(),
            name: "Fixture".to_string(),
            database_path,
        }))
        .await
        .unwrap();
    handler
}
