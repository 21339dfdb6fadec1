use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sql_preview_daemon::config::{DaemonConfig, ENV_HOME, ENV_LOG_LEVEL, ENV_PORT};
use sql_preview_daemon::daemon::{self, process_alive, DaemonInstance, InstanceLock, PidFile};
use sql_preview_daemon::logging;

#[derive(Parser)]
#[command(name = "sql-preview-daemon")]
#[command(about = "Background SQL query daemon speaking MCP over a Unix socket and HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// State directory (PID file, socket, profiles)
    #[arg(long, env = ENV_HOME, global = true)]
    home: Option<PathBuf>,

    /// HTTP port
    #[arg(long, env = ENV_PORT, global = true)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = ENV_LOG_LEVEL, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground (default)
    Serve,
    /// Query a running daemon's /status endpoint
    Status,
    /// Send SIGTERM to a running daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load().context("Failed to load configuration")?;
    if let Some(home) = cli.home {
        config.state_dir = home;
    }
    if let Some(port) = cli.port {
        config.http_port = port;
    }
    if cli.log_level.is_some() {
        config.log_level = cli.log_level;
    }

    logging::init_tracing(config.log_level.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Status => status(&config).await,
        Commands::Stop => stop(&config),
    }
}

async fn serve(config: DaemonConfig) -> Result<()> {
    let _lock = InstanceLock::acquire(config.lock_path())?;

    let instance = DaemonInstance::start(config).await?;
    daemon::install_panic_hook(instance.fatal_token());

    let reason = instance.run_until_shutdown().await?;
    tracing::info!(?reason, "Exiting");
    Ok(())
}

async fn status(config: &DaemonConfig) -> Result<()> {
    let pid_file = PidFile::new(config.pid_path());
    let Some(pid) = pid_file.running_pid() else {
        println!("Daemon is not running");
        return Ok(());
    };

    // The daemon may have moved to a retry port; try the same range it would.
    for port in (0..=config.port_retries).filter_map(|o| config.http_port.checked_add(o)) {
        let url = format!("http://127.0.0.1:{}/status", port);
        let Ok(response) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(body) = response.json::<serde_json::Value>().await else {
            continue;
        };
        if body["pid"].as_u64() == Some(u64::from(pid)) {
            println!("{}", serde_json::to_string_pretty(&body)?);
            return Ok(());
        }
    }

    println!("Daemon running with pid {} but its HTTP endpoint did not answer", pid);
    Ok(())
}

fn stop(config: &DaemonConfig) -> Result<()> {
    let pid_file = PidFile::new(config.pid_path());
    let Some(pid) = pid_file.running_pid() else {
        println!("Daemon is not running");
        return Ok(());
    };

    let raw = libc::pid_t::try_from(pid).context("Invalid pid in pid file")?;
    // SAFETY: plain signal delivery to a pid we just probed
    if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error()).context(format!("Failed to signal pid {}", pid));
    }

    for _ in 0..50 {
        if !process_alive(pid) {
            println!("Daemon stopped");
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    println!("Sent SIGTERM to pid {}", pid);
    Ok(())
}
