//! Daemon lifecycle
//!
//! [`DaemonInstance`] owns everything a running daemon holds: the tool
//! handler, both listeners, the PID file and the background tasks. The
//! entry point acquires an [`InstanceLock`] first, then calls
//! [`DaemonInstance::start`] and [`DaemonInstance::run_until_shutdown`].

pub mod activity;
pub mod pidfile;

pub use activity::{ActivityTracker, ConnectionGuard};
pub use pidfile::{process_alive, InstanceLock, PidFile};

use sql_connectors::ConnectorRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::connections::{
    ConnectionManager, EnvProfileStore, FileCredentialStore, FileProfileStore, ProfileStore,
};
use crate::error::DaemonResult;
use crate::executor::{ExecutorPolicy, QueryExecutor};
use crate::sessions::{SessionLimits, SessionManager};
use crate::tools::{ToolHandler, ToolOptions};
use crate::transport::{self, HttpState, SocketServer};

/// Why the daemon stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Idle,
    Fatal,
    Requested,
}

/// Wire profile stores, credentials, connectors and sessions from config
pub fn build_handler(config: &DaemonConfig) -> DaemonResult<ToolHandler> {
    let mut stores: Vec<Arc<dyn ProfileStore>> = Vec::new();
    if let Some(raw) = &config.env_connections {
        stores.push(Arc::new(EnvProfileStore::from_json(raw)?));
    }
    stores.push(Arc::new(FileProfileStore::new(config.connections_path())));

    let connections = ConnectionManager::new(
        stores,
        Arc::new(FileCredentialStore::new(config.credentials_path())),
    );
    let executor = QueryExecutor::new(
        Arc::new(ConnectorRegistry::with_defaults()),
        connections,
        ExecutorPolicy {
            default_row_limit: config.default_row_limit,
            fallback_to_first: config.fallback_to_first,
        },
    );
    let sessions = SessionManager::new(SessionLimits {
        max_sessions: config.max_sessions,
        max_tabs_per_session: config.max_tabs_per_session,
    });

    Ok(ToolHandler::new(
        sessions,
        executor,
        ToolOptions {
            preview_rows: config.preview_rows,
            page_size: config.page_size,
        },
    ))
}

pub struct DaemonInstance {
    config: DaemonConfig,
    handler: ToolHandler,
    activity: ActivityTracker,
    pid_file: PidFile,
    pid: u32,
    http_port: u16,
    /// Stops listeners and tasks
    shutdown: CancellationToken,
    /// Cancelled on idle timeout
    idle: CancellationToken,
    /// Cancelled by the panic hook
    fatal: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl DaemonInstance {
    /// Claim the PID file, bind both listeners and start background tasks
    pub async fn start(config: DaemonConfig) -> DaemonResult<Self> {
        tokio::fs::create_dir_all(&config.state_dir).await?;

        let pid = std::process::id();
        let pid_file = PidFile::new(config.pid_path());
        pid_file.claim(pid)?;

        match Self::bind_and_spawn(config, pid, pid_file.clone()).await {
            Ok(instance) => Ok(instance),
            Err(e) => {
                pid_file.release(pid);
                Err(e)
            }
        }
    }

    async fn bind_and_spawn(config: DaemonConfig, pid: u32, pid_file: PidFile) -> DaemonResult<Self> {
        let handler = build_handler(&config)?;
        let activity = ActivityTracker::new();
        let shutdown = CancellationToken::new();
        let idle = CancellationToken::new();
        let mut tasks = Vec::new();

        // Socket
        let socket_path = config.socket_path();
        let listener = transport::socket::bind(&socket_path).await?;
        let socket_server = SocketServer::new(
            listener,
            socket_path,
            handler.clone(),
            activity.clone(),
            config.socket_buffer_limit,
        );
        tasks.push(tokio::spawn(socket_server.run(shutdown.clone())));

        // HTTP
        let (listener, http_port) =
            match transport::bind_with_retry(config.http_port, config.port_retries).await {
                Ok(bound) => bound,
                Err(e) => {
                    shutdown.cancel();
                    let _ = std::fs::remove_file(config.socket_path());
                    return Err(e);
                }
            };
        let router = transport::create_router(
            HttpState {
                handler: handler.clone(),
                activity: activity.clone(),
                pid,
            },
            Some(config.ui_dir()),
            shutdown.child_token(),
        );
        let http_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!("HTTP server error: {}", e);
            }
        }));
        tracing::info!("HTTP transport listening on http://127.0.0.1:{}", http_port);

        // Idle watcher
        if let Some(timeout) = config.idle_timeout() {
            tasks.push(tokio::spawn(watch_idle(
                activity.clone(),
                timeout,
                config.idle_check_interval(),
                idle.clone(),
                shutdown.clone(),
            )));
        }

        tracing::info!(pid, state_dir = ?config.state_dir, "Daemon started");

        Ok(Self {
            config,
            handler,
            activity,
            pid_file,
            pid,
            http_port,
            shutdown,
            idle,
            fatal: CancellationToken::new(),
            tasks,
            stopped: false,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    pub fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    /// Cancel to request a graceful stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel to report a fatal error; shutdown follows after a delay
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Wait for a signal, idle timeout, fatal error or explicit request,
    /// then stop.
    pub async fn run_until_shutdown(mut self) -> DaemonResult<ShutdownReason> {
        let reason = tokio::select! {
            _ = wait_for_signal() => ShutdownReason::Signal,
            _ = self.idle.cancelled() => ShutdownReason::Idle,
            _ = self.fatal.cancelled() => {
                let delay = self.config.fatal_shutdown_delay();
                tracing::error!("Fatal error, shutting down in {:?}", delay);
                tokio::time::sleep(delay).await;
                ShutdownReason::Fatal
            }
            _ = self.shutdown.cancelled() => ShutdownReason::Requested,
        };
        tracing::info!(?reason, "Shutting down");
        self.stop().await;
        Ok(reason)
    }

    /// Close listeners, cancel queries and tasks, remove PID and socket files
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.shutdown.cancel();
        self.handler.sessions().cancel_all().await;

        for task in self.tasks.drain(..) {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Daemon task failed: {}", e),
                Err(_) => tracing::warn!("Daemon task did not stop in time"),
            }
        }

        let socket_path = self.config.socket_path();
        if let Err(e) = tokio::fs::remove_file(&socket_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove socket {:?}: {}", socket_path, e);
            }
        }
        self.pid_file.release(self.pid);
        tracing::info!("Daemon stopped");
    }
}

impl Drop for DaemonInstance {
    fn drop(&mut self) {
        if !self.stopped {
            self.shutdown.cancel();
            let _ = std::fs::remove_file(self.config.socket_path());
            self.pid_file.release(self.pid);
        }
    }
}

async fn watch_idle(
    activity: ActivityTracker,
    timeout: Duration,
    every: Duration,
    idle: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                if activity.should_shut_down(timeout) {
                    tracing::info!(
                        idle_secs = activity.idle_for().as_secs(),
                        "Idle with no connected sockets"
                    );
                    idle.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Log panics and cancel `fatal` so the running instance shuts down
pub fn install_panic_hook(fatal: CancellationToken) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("Uncaught panic: {}", info);
        fatal.cancel();
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DaemonConfig {
        DaemonConfig {
            state_dir: dir.path().to_path_buf(),
            http_port: 0,
            port_retries: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_cleans_up() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let pid_path = config.pid_path();

        let mut instance = DaemonInstance::start(config).await.unwrap();
        assert!(pid_path.exists());
        assert!(instance.socket_path().exists());
        assert_ne!(instance.http_port(), 0);

        instance.stop().await;
        assert!(!pid_path.exists());
        assert!(!instance.socket_path().exists());
    }

    #[tokio::test]
    async fn test_stale_socket_replaced_on_start() {
        use std::os::unix::fs::FileTypeExt;

        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        // A listener from a crashed run leaves its socket file behind
        drop(std::os::unix::net::UnixListener::bind(config.socket_path()).unwrap());
        assert!(config.socket_path().exists());

        let mut instance = DaemonInstance::start(config).await.unwrap();
        let file_type = std::fs::metadata(instance.socket_path()).unwrap().file_type();
        assert!(file_type.is_socket());
        tokio::net::UnixStream::connect(instance.socket_path())
            .await
            .unwrap();

        instance.stop().await;
    }

    #[tokio::test]
    async fn test_live_pid_refuses_start() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::write(config.pid_path(), "1\n").unwrap();

        let err = DaemonInstance::start(config).await.err().unwrap();
        assert!(err.to_string().contains("already running"));
    }

    #[tokio::test]
    async fn test_idle_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig {
            idle_timeout_secs: 1,
            idle_check_interval_secs: 1,
            ..config(&dir)
        };
        let pid_path = config.pid_path();

        let instance = DaemonInstance::start(config).await.unwrap();
        let reason = tokio::time::timeout(Duration::from_secs(10), instance.run_until_shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Idle);
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_requested_shutdown() {
        let dir = TempDir::new().unwrap();
        let instance = DaemonInstance::start(config(&dir)).await.unwrap();
        instance.shutdown_token().cancel();
        assert_eq!(
            instance.run_until_shutdown().await.unwrap(),
            ShutdownReason::Requested
        );
    }

    #[tokio::test]
    async fn test_fatal_error_shuts_down_after_delay() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig {
            fatal_shutdown_delay_ms: 200,
            ..config(&dir)
        };
        let pid_path = config.pid_path();

        let instance = DaemonInstance::start(config).await.unwrap();
        let socket_path = instance.socket_path();
        let started = std::time::Instant::now();
        instance.fatal_token().cancel();

        let reason = tokio::time::timeout(Duration::from_secs(10), instance.run_until_shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Fatal);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(!pid_path.exists());
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_panic_hook_cancels_fatal_token() {
        let fatal = CancellationToken::new();
        install_panic_hook(fatal.clone());

        let outcome = std::thread::spawn(|| panic!("worker failed")).join();
        // Back to the default hook
        drop(std::panic::take_hook());

        assert!(outcome.is_err());
        assert!(fatal.is_cancelled());
    }

    #[tokio::test]
    async fn test_env_connections_take_priority() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig {
            env_connections: Some(
                r#"[{"type": "sqlite", "id": "env-db", "name": "Env", "databasePath": "/tmp/x.db"}]"#
                    .into(),
            ),
            ..config(&dir)
        };
        let handler = build_handler(&config).unwrap();
        let profiles = handler.connections().get_profiles().await;
        assert_eq!(profiles[0].id(), "env-db");
    }
}
