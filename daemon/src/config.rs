//! Daemon configuration
//!
//! Resolution order: built-in defaults, then `daemon.toml` in the state
//! directory, then `SQL_PREVIEW_*` environment variables, then CLI flags
//! (applied by the binary).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

pub const ENV_HOME: &str = "SQL_PREVIEW_HOME";
pub const ENV_PORT: &str = "SQL_PREVIEW_MCP_PORT";
pub const ENV_LOG_LEVEL: &str = "SQL_PREVIEW_LOG_LEVEL";
pub const ENV_CONNECTIONS: &str = "SQL_PREVIEW_CONNECTIONS";

const CONFIG_FILE: &str = "daemon.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Per-user state directory (PID file, socket, profiles)
    pub state_dir: PathBuf,
    pub http_port: u16,
    /// Extra ports tried after `http_port` when it is taken
    pub port_retries: u16,
    pub max_sessions: usize,
    pub max_tabs_per_session: usize,
    /// Row cap handed to connectors
    pub default_row_limit: usize,
    pub preview_rows: usize,
    pub page_size: usize,
    /// Socket receive buffer cap, in bytes
    pub socket_buffer_limit: usize,
    /// 0 disables idle shutdown
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
    /// Use the first known profile when a query names no connection
    pub fallback_to_first: bool,
    pub fatal_shutdown_delay_ms: u64,
    pub log_level: Option<String>,
    /// Raw JSON from `SQL_PREVIEW_CONNECTIONS`
    #[serde(skip)]
    pub env_connections: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            http_port: 8414,
            port_retries: 5,
            max_sessions: 50,
            max_tabs_per_session: 20,
            default_row_limit: 1000,
            preview_rows: 10,
            page_size: 100,
            socket_buffer_limit: 10 * 1024 * 1024,
            idle_timeout_secs: 30 * 60,
            idle_check_interval_secs: 60,
            fallback_to_first: true,
            fatal_shutdown_delay_ms: 500,
            log_level: None,
            env_connections: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".sql-preview")
}

impl DaemonConfig {
    /// Load from the process environment
    pub fn load() -> DaemonResult<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn load_with<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let state_dir = lookup(ENV_HOME)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let mut config = Self::load_file(&state_dir.join(CONFIG_FILE))?.unwrap_or_default();
        config.state_dir = state_dir;

        if let Some(port) = lookup(ENV_PORT) {
            config.http_port = port
                .trim()
                .parse()
                .map_err(|_| DaemonError::Config(format!("{} is not a port: {}", ENV_PORT, port)))?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            config.log_level = Some(level);
        }
        config.env_connections = lookup(ENV_CONNECTIONS).filter(|v| !v.trim().is_empty());

        Ok(config)
    }

    fn load_file(path: &Path) -> DaemonResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        tracing::debug!("Loading daemon config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(config))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("daemon.pid")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("daemon.lock")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("srv.sock")
    }

    pub fn connections_path(&self) -> PathBuf {
        self.state_dir.join("connections.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("credentials.json")
    }

    pub fn ui_dir(&self) -> PathBuf {
        self.state_dir.join("ui")
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    pub fn fatal_shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.fatal_shutdown_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.http_port, 8414);
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.max_tabs_per_session, 20);
        assert_eq!(config.socket_buffer_limit, 10 * 1024 * 1024);
        assert!(config.fallback_to_first);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        let vars = HashMap::from([
            (ENV_HOME, dir.path().display().to_string()),
            (ENV_PORT, "9000".to_string()),
            (ENV_LOG_LEVEL, "debug".to_string()),
            (ENV_CONNECTIONS, "[]".to_string()),
        ]);
        let config = DaemonConfig::load_with(lookup(vars)).unwrap();

        assert_eq!(config.state_dir, dir.path());
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.env_connections.as_deref(), Some("[]"));
        assert_eq!(config.socket_path(), dir.path().join("srv.sock"));
    }

    #[test]
    fn test_file_then_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("daemon.toml"),
            "http_port = 7000\nmax_sessions = 3\nfallback_to_first = false\n",
        )
        .unwrap();

        let vars = HashMap::from([(ENV_HOME, dir.path().display().to_string())]);
        let config = DaemonConfig::load_with(lookup(vars)).unwrap();
        assert_eq!(config.http_port, 7000);
        assert_eq!(config.max_sessions, 3);
        assert!(!config.fallback_to_first);
        // state_dir in the file never wins over the directory it was found in
        assert_eq!(config.state_dir, dir.path());

        let vars = HashMap::from([
            (ENV_HOME, dir.path().display().to_string()),
            (ENV_PORT, "7001".to_string()),
        ]);
        assert_eq!(DaemonConfig::load_with(lookup(vars)).unwrap().http_port, 7001);
    }

    #[test]
    fn test_bad_port_rejected() {
        let dir = TempDir::new().unwrap();
        let vars = HashMap::from([
            (ENV_HOME, dir.path().display().to_string()),
            (ENV_PORT, "not-a-port".to_string()),
        ]);
        assert!(matches!(
            DaemonConfig::load_with(lookup(vars)),
            Err(DaemonError::Config(_))
        ));
    }

    #[test]
    fn test_zero_idle_timeout_disables() {
        let config = DaemonConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.idle_timeout().is_none());
    }
}
