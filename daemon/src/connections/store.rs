//! Profile stores
//!
//! Stores are layered by the [`ConnectionManager`](super::ConnectionManager)
//! in priority order. None of them ever persists a secret.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::profile::ConnectionProfile;
use crate::error::{DaemonError, DaemonResult};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    fn is_writable(&self) -> bool {
        false
    }

    async fn list(&self) -> DaemonResult<Vec<ConnectionProfile>>;

    /// Insert or replace by id
    async fn save(&self, _profile: &ConnectionProfile) -> DaemonResult<()> {
        Err(DaemonError::ReadOnlyStore)
    }

    /// Returns whether anything was removed
    async fn delete(&self, _id: &str) -> DaemonResult<bool> {
        Err(DaemonError::ReadOnlyStore)
    }
}

/// `{ "connections": [...] }` document
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    connections: Vec<ConnectionProfile>,
}

// ============================================================================
// File store
// ============================================================================

/// Writable store backed by `connections.json`
pub struct FileProfileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> DaemonResult<ProfileDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(ProfileDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProfileDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via temp file + rename
    async fn write(&self, doc: &ProfileDocument) -> DaemonResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn is_writable(&self) -> bool {
        true
    }

    async fn list(&self) -> DaemonResult<Vec<ConnectionProfile>> {
        Ok(self.read().await?.connections)
    }

    async fn save(&self, profile: &ConnectionProfile) -> DaemonResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read().await?;
        let stripped = profile.without_secret();

        match doc.connections.iter_mut().find(|p| p.id() == profile.id()) {
            Some(existing) => *existing = stripped,
            None => doc.connections.push(stripped),
        }

        self.write(&doc).await?;
        tracing::debug!(connection = %profile.id(), "Saved profile to {}", self.path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> DaemonResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read().await?;
        let before = doc.connections.len();
        doc.connections.retain(|p| p.id() != id);

        if doc.connections.len() == before {
            return Ok(false);
        }
        self.write(&doc).await?;
        Ok(true)
    }
}

// ============================================================================
// Environment store
// ============================================================================

/// Read-only store parsed once from `SQL_PREVIEW_CONNECTIONS`
#[derive(Debug, Default)]
pub struct EnvProfileStore {
    profiles: Vec<ConnectionProfile>,
}

impl EnvProfileStore {
    /// Accepts either a JSON array of profiles or `{ "connections": [...] }`
    pub fn from_json(raw: &str) -> DaemonResult<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Payload {
            List(Vec<ConnectionProfile>),
            Document(ProfileDocument),
        }

        let profiles = match serde_json::from_str::<Payload>(raw) {
            Ok(Payload::List(profiles)) => profiles,
            Ok(Payload::Document(doc)) => doc.connections,
            Err(e) => {
                return Err(DaemonError::Config(format!(
                    "{} is not a valid profile list: {}",
                    crate::config::ENV_CONNECTIONS,
                    e
                )))
            }
        };
        Ok(Self { profiles })
    }
}

#[async_trait]
impl ProfileStore for EnvProfileStore {
    fn name(&self) -> &str {
        "env"
    }

    async fn list(&self) -> DaemonResult<Vec<ConnectionProfile>> {
        Ok(self.profiles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::profile::fixtures::{sqlite, trino};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_roundtrip_strips_secret() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path().join("connections.json"));

        assert!(store.list().await.unwrap().is_empty());

        store.save(&trino("t1", Some("hunter2"))).await.unwrap();
        store.save(&sqlite("s1", "/tmp/a.db")).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"connections\""));
        assert!(!raw.contains("hunter2"));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].password(), None);
    }

    #[tokio::test]
    async fn test_file_store_replace_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileProfileStore::new(dir.path().join("nested").join("connections.json"));

        store.save(&sqlite("s1", "/tmp/a.db")).await.unwrap();
        store.save(&sqlite("s1", "/tmp/b.db")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![sqlite("s1", "/tmp/b.db")]);

        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_env_store_formats() {
        let list = r#"[{"type":"sqlite","id":"a","name":"A","databasePath":"/a.db"}]"#;
        let doc = r#"{"connections":[{"type":"sqlite","id":"b","name":"B","databasePath":"/b.db"}]}"#;

        let store = EnvProfileStore::from_json(list).unwrap();
        assert_eq!(store.list().await.unwrap()[0].id(), "a");
        let store = EnvProfileStore::from_json(doc).unwrap();
        assert_eq!(store.list().await.unwrap()[0].id(), "b");

        assert!(EnvProfileStore::from_json("{nope").is_err());
    }

    #[tokio::test]
    async fn test_env_store_is_read_only() {
        let store = EnvProfileStore::default();
        assert!(!store.is_writable());
        assert!(matches!(
            store.save(&sqlite("x", "/x.db")).await,
            Err(DaemonError::ReadOnlyStore)
        ));
    }
}
