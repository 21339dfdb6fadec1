//! Single-instance enforcement
//!
//! [`InstanceLock`] holds an exclusive `fs2` lock for the life of the process.
//! [`PidFile`] records the running pid so `status`/`stop` can find it, and
//! tells a live daemon apart from a stale file left by a crash.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, DaemonResult};

#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Fails with a lifecycle error when another process holds the lock
    pub fn acquire(path: impl Into<PathBuf>) -> DaemonResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            DaemonError::Lifecycle(format!("Daemon already running (lock held on {:?})", path))
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!("Failed to release {:?}: {}", self.path, e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded in the file, if any
    pub fn read(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Pid of a live daemon, if one is recorded
    pub fn running_pid(&self) -> Option<u32> {
        self.read().filter(|pid| process_alive(*pid))
    }

    /// Refuse if a live process owns the file, clear it if stale, then
    /// record `pid`.
    pub fn claim(&self, pid: u32) -> DaemonResult<()> {
        match self.read() {
            Some(existing) if existing != pid && process_alive(existing) => {
                return Err(DaemonError::Lifecycle(format!(
                    "Daemon already running with pid {}",
                    existing
                )));
            }
            Some(stale) if stale != pid => {
                tracing::info!("Removing stale pid file for pid {}", stale);
            }
            _ => {}
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", pid))?;
        Ok(())
    }

    /// Remove the file if it still names `pid`
    pub fn release(&self, pid: u32) {
        if self.read() == Some(pid) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove pid file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Signal-0 probe
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
