//! MCP over a Unix socket pair, end to end

mod common;

use serde_json::{json, Value};
use sql_preview_daemon::daemon::ActivityTracker;
use sql_preview_daemon::transport::serve_connection;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Client {
    writer: OwnedWriteHalf,
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl Client {
    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, message: Value) {
        let mut line = serde_json::to_vec(&message).unwrap();
        line.push(b'\n');
        self.send_raw(&line).await;
    }

    /// Next response carrying `id`, skipping notifications
    async fn response(&mut self, id: u64) -> Value {
        loop {
            let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
                .await
                .expect("timed out waiting for response")
                .unwrap()
                .expect("connection closed");
            let message: Value = serde_json::from_str(&line).unwrap();
            if message["id"] == id {
                return message;
            }
        }
    }

    async fn initialize(&mut self) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "socket-test", "version": "1.0"}
            }
        }))
        .await;
        let response = self.response(1).await;
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        response
    }

    async fn call_tool(&mut self, id: u64, name: &str, arguments: Value) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        }))
        .await;
        let response = self.response(id).await;
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .unwrap_or_else(|| panic!("no tool result in {}", response));
        serde_json::from_str(text).unwrap()
    }
}

async fn connect(
    dir: &TempDir,
    rows: usize,
    buffer_limit: usize,
) -> (Client, ActivityTracker, JoinHandle<()>) {
    let handler = common::handler_with_database(dir, rows).await;
    let activity = ActivityTracker::new();
    let (client, server) = UnixStream::pair().unwrap();

    let (read, write) = server.into_split();
    let tracker = activity.clone();
    let task = tokio::spawn(async move {
        let _ = serve_connection(read, write, handler, tracker, buffer_limit, CancellationToken::new()).await;
    });

    let (read, write) = client.into_split();
    let client = Client {
        writer: write,
        lines: BufReader::new(read).lines(),
    };
    (client, activity, task)
}

#[tokio::test]
async fn initialize_list_and_query() {
    let dir = TempDir::new().unwrap();
    let (mut client, activity, _task) = connect(&dir, 12, 1024 * 1024).await;

    let init = client.initialize().await;
    assert!(init["result"]["capabilities"]["tools"].is_object());
    assert!(init["result"]["capabilities"]["resources"].is_object());
    assert_eq!(activity.connected(), 1);

    client
        .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .await;
    let tools = client.response(2).await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"run_query"));
    assert!(names.contains(&"get_tab_info"));
    assert_eq!(names.len(), 8);

    // Session defaults to the connection's own session
    let result = client
        .call_tool(3, "run_query", json!({"sql": "SELECT n FROM numbers", "waitForResult": true}))
        .await;
    assert_eq!(result["rowCount"], 12);

    let sessions = client.call_tool(4, "list_sessions", json!({})).await;
    assert_eq!(sessions["count"], 1);
    assert_eq!(sessions["sessions"][0]["displayName"], "socket-test");
    assert_eq!(sessions["sessions"][0]["clientType"], "socket");
}

#[tokio::test]
async fn split_writes_and_malformed_lines() {
    let dir = TempDir::new().unwrap();
    let (mut client, _activity, _task) = connect(&dir, 3, 1024 * 1024).await;
    client.initialize().await;

    // A malformed line is skipped without closing the connection
    client.send_raw(b"{not json}\n").await;

    let request = serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": "list_connections", "arguments": {}}
    }))
    .unwrap();
    for chunk in request.chunks(5) {
        client.send_raw(chunk).await;
    }
    client.send_raw(b"\n").await;

    let response = client.response(7).await;
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let body: Value = serde_json::from_str(text).unwrap();
    assert_eq!(body["connections"][0]["id"], common::PROFILE_ID);
}

#[tokio::test]
async fn buffer_limit_closes_connection() {
    let dir = TempDir::new().unwrap();
    let (mut client, activity, task) = connect(&dir, 1, 256).await;

    client.send_raw(&[b'x'; 1024]).await;

    let next = tokio::time::timeout(Duration::from_secs(10), client.lines.next_line())
        .await
        .expect("connection should close");
    assert!(matches!(next, Ok(None) | Err(_)));

    tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    assert_eq!(activity.connected(), 0);
}
