//! Secret storage, keyed by profile id

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::DaemonResult;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_password(&self, profile_id: &str) -> DaemonResult<Option<String>>;

    async fn set_password(&self, profile_id: &str, password: &str) -> DaemonResult<()>;

    /// Absence is not an error
    async fn delete_password(&self, profile_id: &str) -> DaemonResult<()>;
}

/// In-process store; secrets are lost on exit
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_password(&self, profile_id: &str) -> DaemonResult<Option<String>> {
        Ok(self.secrets.lock().await.get(profile_id).cloned())
    }

    async fn set_password(&self, profile_id: &str, password: &str) -> DaemonResult<()> {
        self.secrets
            .lock()
            .await
            .insert(profile_id.to_string(), password.to_string());
        Ok(())
    }

    async fn delete_password(&self, profile_id: &str) -> DaemonResult<()> {
        self.secrets.lock().await.remove(profile_id);
        Ok(())
    }
}

/// `credentials.json` in the state directory, owner-only on Unix
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> DaemonResult<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, secrets: &HashMap<String, String>) -> DaemonResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut file = create_private(&tmp).await?;
        file.write_all(serde_json::to_string_pretty(secrets)?.as_bytes())
            .await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Create (or replace) `path` readable by the owner only from the start
async fn create_private(path: &Path) -> DaemonResult<tokio::fs::File> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    Ok(options.open(path).await?)
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_password(&self, profile_id: &str) -> DaemonResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.remove(profile_id))
    }

    async fn set_password(&self, profile_id: &str, password: &str) -> DaemonResult<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read().await?;
        secrets.insert(profile_id.to_string(), password.to_string());
        self.write(&secrets).await
    }

    async fn delete_password(&self, profile_id: &str) -> DaemonResult<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read().await?;
        if secrets.remove(profile_id).is_some() {
            self.write(&secrets).await?;
        }
        Ok(())
    }
}
