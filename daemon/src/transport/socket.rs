//! Unix socket transport
//!
//! Each accepted connection speaks newline-delimited JSON-RPC and gets its
//! own [`QueryMcpServer`], so calls that omit `session` land in a session
//! keyed to that connection.

use futures::{future, StreamExt};
use rmcp::service::{RxJsonRpcMessage, TxJsonRpcMessage};
use rmcp::{RoleServer, ServiceExt};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::{Frame, FrameError, JsonLineCodec};
use crate::daemon::activity::ActivityTracker;
use crate::error::{DaemonError, DaemonResult};
use crate::server::{QueryMcpServer, TransportKind};
use crate::tools::ToolHandler;

/// Bind `path`, replacing a stale socket file
pub async fn bind(path: &Path) -> DaemonResult<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed stale socket {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    UnixListener::bind(path)
        .map_err(|e| DaemonError::Lifecycle(format!("Failed to bind socket {:?}: {}", path, e)))
}

/// Accept loop state
pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
    handler: ToolHandler,
    activity: ActivityTracker,
    buffer_limit: usize,
}

impl SocketServer {
    pub fn new(
        listener: UnixListener,
        path: PathBuf,
        handler: ToolHandler,
        activity: ActivityTracker,
        buffer_limit: usize,
    ) -> Self {
        Self {
            listener,
            path,
            handler,
            activity,
            buffer_limit,
        }
    }

    /// Accept until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Socket transport listening on {:?}", self.path);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = self.handler.clone();
                        let activity = self.activity.clone();
                        let limit = self.buffer_limit;
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            let (read, write) = stream.into_split();
                            if let Err(e) = serve_connection(read, write, handler, activity, limit, token).await {
                                tracing::warn!("Socket connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
            }
        }
        tracing::info!("Socket transport stopped");
    }
}

/// Serve one MCP session over a duplex byte stream until it closes
pub async fn serve_connection<R, W>(
    read: R,
    write: W,
    handler: ToolHandler,
    activity: ActivityTracker,
    buffer_limit: usize,
    shutdown: CancellationToken,
) -> DaemonResult<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let _connected = activity.connection_opened();
    let server = QueryMcpServer::new(handler, TransportKind::Socket);
    let session_id = server.session_id().to_string();
    tracing::info!(session = %session_id, "Socket client connected");

    let incoming = {
        let activity = activity.clone();
        let session_id = session_id.clone();
        FramedRead::new(read, JsonLineCodec::<RxJsonRpcMessage<RoleServer>>::new(buffer_limit))
            .inspect(move |_| activity.touch())
            .take_while(move |frame| {
                if let Err(e) = frame {
                    match e {
                        FrameError::BufferLimit { .. } => {
                            tracing::error!(session = %session_id, "Closing socket: {}", e)
                        }
                        _ => tracing::warn!(session = %session_id, "Socket read failed: {}", e),
                    }
                }
                future::ready(frame.is_ok())
            })
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Frame::Message(message)) => Some(message),
                    Ok(Frame::Malformed { error, length }) => {
                        tracing::warn!(bytes = length, "Skipping malformed message: {}", error);
                        None
                    }
                    Err(_) => None,
                })
            })
            .boxed()
    };

    let outgoing = FramedWrite::new(
        write,
        JsonLineCodec::<TxJsonRpcMessage<RoleServer>>::new(buffer_limit),
    );

    let running = server
        .serve((outgoing, incoming))
        .await
        .map_err(|e| DaemonError::Lifecycle(format!("MCP handshake failed: {}", e)))?;

    let cancel = running.cancellation_token();
    let waiting = running.waiting();
    tokio::pin!(waiting);
    let outcome = tokio::select! {
        outcome = &mut waiting => outcome,
        _ = shutdown.cancelled() => {
            cancel.cancel();
            waiting.await
        }
    };
    match outcome {
        Ok(reason) => tracing::debug!(session = %session_id, "Socket session ended: {:?}", reason),
        Err(e) => tracing::warn!(session = %session_id, "Socket session task failed: {}", e),
    }

    tracing::info!(session = %session_id, "Socket client disconnected");
    Ok(())
}
