//! Layered profile access with credential injection

use std::collections::HashSet;
use std::sync::Arc;

use super::credentials::CredentialStore;
use super::profile::ConnectionProfile;
use super::store::ProfileStore;
use crate::error::{DaemonError, DaemonResult};

/// Merges profile stores and keeps secrets in the credential store.
#[derive(Clone)]
pub struct ConnectionManager {
    /// Highest priority first
    stores: Vec<Arc<dyn ProfileStore>>,
    credentials: Arc<dyn CredentialStore>,
}

impl ConnectionManager {
    pub fn new(stores: Vec<Arc<dyn ProfileStore>>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            stores,
            credentials,
        }
    }

    /// All profiles; the earlier store wins on duplicate ids.
    ///
    /// A store that fails to load is skipped with a warning.
    pub async fn get_profiles(&self) -> Vec<ConnectionProfile> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for store in &self.stores {
            let profiles = match store.list().await {
                Ok(profiles) => profiles,
                Err(e) => {
                    tracing::warn!("Failed to read '{}' profile store: {}", store.name(), e);
                    continue;
                }
            };
            for profile in profiles {
                if seen.insert(profile.id().to_string()) {
                    merged.push(profile);
                }
            }
        }

        merged
    }

    /// Profiles safe to hand to a caller
    pub async fn redacted_profiles(&self) -> Vec<ConnectionProfile> {
        self.get_profiles()
            .await
            .iter()
            .map(ConnectionProfile::without_secret)
            .collect()
    }

    /// Resolve one profile, filling in its secret from the credential store
    pub async fn get_profile(&self, id: &str) -> DaemonResult<Option<ConnectionProfile>> {
        let Some(profile) = self.get_profiles().await.into_iter().find(|p| p.id() == id) else {
            return Ok(None);
        };
        self.with_credentials(profile).await.map(Some)
    }

    /// Inject the stored secret unless the profile already carries one
    pub async fn with_credentials(
        &self,
        mut profile: ConnectionProfile,
    ) -> DaemonResult<ConnectionProfile> {
        if profile.has_secret_field() && profile.password().map_or(true, str::is_empty) {
            let secret = self.credentials.get_password(profile.id()).await?;
            if secret.is_some() {
                profile.set_password(secret);
            }
        }
        Ok(profile)
    }

    /// Persist a profile.
    ///
    /// A non-empty secret goes to the credential store, an empty one deletes
    /// the stored secret, and no secret leaves it untouched.
    pub async fn save_profile(&self, profile: &ConnectionProfile) -> DaemonResult<()> {
        let store = self
            .stores
            .iter()
            .find(|s| s.is_writable())
            .ok_or(DaemonError::ReadOnlyStore)?;

        match profile.password() {
            Some("") => self.credentials.delete_password(profile.id()).await?,
            Some(secret) => self.credentials.set_password(profile.id(), secret).await?,
            None => {}
        }

        store.save(&profile.without_secret()).await?;
        tracing::info!(connection = %profile.id(), store = store.name(), "Saved connection profile");
        Ok(())
    }

    /// Remove from every writable store and drop the secret. Idempotent.
    pub async fn delete_profile(&self, id: &str) -> DaemonResult<bool> {
        let mut removed = false;
        for store in self.stores.iter().filter(|s| s.is_writable()) {
            removed |= store.delete(id).await?;
        }
        self.credentials.delete_password(id).await?;
        if removed {
            tracing::info!(connection = %id, "Deleted connection profile");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field(
                "stores",
                &self.stores.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::credentials::MemoryCredentialStore;
    use crate::connections::profile::fixtures::{sqlite, trino};
    use crate::connections::store::{EnvProfileStore, FileProfileStore};
    use tempfile::TempDir;

    fn manager(dir: &TempDir, env_json: &str) -> ConnectionManager {
        let env = EnvProfileStore::from_json(env_json).unwrap();
        let file = FileProfileStore::new(dir.path().join("connections.json"));
        ConnectionManager::new(
            vec![Arc::new(env), Arc::new(file)],
            Arc::new(MemoryCredentialStore::new()),
        )
    }

    #[tokio::test]
    async fn test_secret_roundtrip_never_on_disk() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "[]");

        manager.save_profile(&trino("t1", Some("hunter2"))).await.unwrap();

        let loaded = manager.get_profile("t1").await.unwrap().unwrap();
        assert_eq!(loaded.password(), Some("hunter2"));

        let raw = std::fs::read_to_string(dir.path().join("connections.json")).unwrap();
        assert!(!raw.contains("hunter2"));

        let redacted = manager.redacted_profiles().await;
        assert_eq!(redacted[0].password(), None);
    }

    #[tokio::test]
    async fn test_empty_secret_deletes_credential() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "[]");

        manager.save_profile(&trino("t1", Some("pw"))).await.unwrap();
        manager.save_profile(&trino("t1", None)).await.unwrap();
        assert_eq!(
            manager.get_profile("t1").await.unwrap().unwrap().password(),
            Some("pw")
        );

        manager.save_profile(&trino("t1", Some(""))).await.unwrap();
        assert_eq!(manager.get_profile("t1").await.unwrap().unwrap().password(), None);
    }

    #[tokio::test]
    async fn test_earlier_store_wins() {
        let dir = TempDir::new().unwrap();
        let env = r#"[{"type":"sqlite","id":"shared","name":"From env","databasePath":"/env.db"}]"#;
        let manager = manager(&dir, env);

        manager.save_profile(&sqlite("shared", "/file.db")).await.unwrap();
        manager.save_profile(&sqlite("own", "/own.db")).await.unwrap();

        let profiles = manager.get_profiles().await;
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name(), "From env");
        assert_eq!(profiles[1].id(), "own");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "[]");

        manager.save_profile(&trino("t1", Some("pw"))).await.unwrap();
        assert!(manager.delete_profile("t1").await.unwrap());
        assert!(!manager.delete_profile("t1").await.unwrap());
        assert!(manager.get_profile("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_only_layers_reject_writes() {
        let manager = ConnectionManager::new(
            vec![Arc::new(EnvProfileStore::default())],
            Arc::new(MemoryCredentialStore::new()),
        );
        assert!(matches!(
            manager.save_profile(&sqlite("x", "/x.db")).await,
            Err(DaemonError::ReadOnlyStore)
        ));
    }
}
