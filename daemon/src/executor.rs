//! Query execution
//!
//! Resolves which profile a query runs against, turns it into a connector
//! config, and hands back the connector's page stream. Everything that can
//! fail before I/O (no profile, unknown connector, bad config) fails here,
//! synchronously with the caller.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::BoxStream;
use futures::StreamExt;
use sql_connectors::{ConnectionTest, Connector, ConnectorRegistry, QueryPage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::connections::{ConnectionManager, ConnectionProfile};
use crate::error::{DaemonError, DaemonResult};

pub type ResultStream = BoxStream<'static, DaemonResult<QueryPage>>;

pub const NO_PROFILE_MESSAGE: &str =
    "No valid connection profile found. Save a connection or pass connectionId.";

/// One query to run
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    /// For logs only
    pub session_id: String,
    pub connection_id: Option<String>,
    /// Ad-hoc profile; wins over `connection_id`
    pub profile_override: Option<ConnectionProfile>,
    pub cancel: CancellationToken,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            session_id: session_id.into(),
            connection_id: None,
            profile_override: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorPolicy {
    pub default_row_limit: usize,
    /// Use the first known profile when nothing else names one
    pub fallback_to_first: bool,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            default_row_limit: 1000,
            fallback_to_first: true,
        }
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    registry: Arc<ConnectorRegistry>,
    connections: ConnectionManager,
    policy: ExecutorPolicy,
}

impl QueryExecutor {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        connections: ConnectionManager,
        policy: ExecutorPolicy,
    ) -> Self {
        Self {
            registry,
            connections,
            policy,
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Override, then explicit id, then (by policy) the first profile
    pub async fn resolve_profile(&self, request: &QueryRequest) -> DaemonResult<ConnectionProfile> {
        if let Some(profile) = &request.profile_override {
            return self.connections.with_credentials(profile.clone()).await;
        }

        if let Some(id) = &request.connection_id {
            return self
                .connections
                .get_profile(id)
                .await?
                .ok_or_else(|| DaemonError::NotFound(format!("Connection profile '{}'", id)));
        }

        if self.policy.fallback_to_first {
            if let Some(first) = self.connections.get_profiles().await.into_iter().next() {
                return self.connections.with_credentials(first).await;
            }
        }

        Err(DaemonError::Validation(NO_PROFILE_MESSAGE.to_string()))
    }

    fn connector_for(&self, profile: &ConnectionProfile) -> DaemonResult<Arc<dyn Connector>> {
        self.registry.get(profile.connector_type()).ok_or_else(|| {
            DaemonError::Validation(format!("No connector for type '{}'", profile.connector_type()))
        })
    }

    /// Start a query. Pages come back tagged with the connector's pagination
    /// capability.
    pub async fn execute(&self, request: QueryRequest) -> DaemonResult<ResultStream> {
        let profile = self.resolve_profile(&request).await?;
        let connector = self.connector_for(&profile)?;
        let config = profile.to_connector_config(self.policy.default_row_limit);

        if let Some(message) = connector.validate_config(&config) {
            return Err(DaemonError::Validation(message));
        }

        let auth = auth_header_for(&profile);
        let paginates = connector.supports_pagination();

        tracing::info!(
            session = %request.session_id,
            connection = %profile.id(),
            connector = connector.id(),
            "Executing query"
        );

        let stream = connector
            .run_query(&request.sql, &config, auth.as_deref(), request.cancel)
            .map(move |page| {
                page.map(|mut page| {
                    page.supports_pagination = Some(paginates);
                    page
                })
                .map_err(DaemonError::from)
            })
            .boxed();

        Ok(stream)
    }

    /// Health-check a profile. Never fails; problems come back in the result.
    pub async fn test_connection(&self, profile: &ConnectionProfile) -> ConnectionTest {
        let profile = match self.connections.with_credentials(profile.clone()).await {
            Ok(profile) => profile,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };
        let connector = match self.connector_for(&profile) {
            Ok(connector) => connector,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };
        let config = profile.to_connector_config(1);
        if let Some(message) = connector.validate_config(&config) {
            return ConnectionTest::failed(message);
        }

        let auth = auth_header_for(&profile);
        if let Some(result) = connector.test_connection(&config, auth.as_deref()).await {
            return result;
        }

        // No dedicated hook: pull one page of a trivial probe
        let cancel = CancellationToken::new();
        let mut stream = connector.run_query("SELECT 1", &config, auth.as_deref(), cancel.clone());
        let outcome = match stream.next().await {
            Some(Err(e)) => ConnectionTest::failed(e.to_string()),
            _ => ConnectionTest::ok(),
        };
        cancel.cancel();
        outcome
    }
}

/// `Basic base64(user:password)`
pub fn basic_auth_header(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

fn auth_header_for(profile: &ConnectionProfile) -> Option<String> {
    match (profile.user(), profile.password()) {
        (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
            Some(basic_auth_header(user, password))
        }
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedConnector;
    use super::*;
    use crate::connections::profile::fixtures::{sqlite, trino};
    use crate::connections::{FileProfileStore, MemoryCredentialStore};
    use tempfile::TempDir;

    fn executor(dir: &TempDir, policy: ExecutorPolicy) -> (QueryExecutor, Arc<ScriptedConnector>) {
        let scripted = Arc::new(ScriptedConnector::new(3, 4));
        let mut registry = ConnectorRegistry::new();
        registry.register(scripted.clone());

        let connections = ConnectionManager::new(
            vec![Arc::new(FileProfileStore::new(dir.path().join("connections.json")))],
            Arc::new(MemoryCredentialStore::new()),
        );
        (
            QueryExecutor::new(Arc::new(registry), connections, policy),
            scripted,
        )
    }

    #[tokio::test]
    async fn test_pages_tagged_with_pagination() {
        let dir = TempDir::new().unwrap();
        let (executor, scripted) = executor(&dir, ExecutorPolicy::default());
        executor
            .connections()
            .save_profile(&trino("t1", Some("pw")))
            .await
            .unwrap();

        let pages: Vec<_> = executor
            .execute(QueryRequest::new("SELECT 1", "s"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(pages.len(), 3);
        assert!(pages
            .iter()
            .all(|p| p.as_ref().unwrap().supports_pagination == Some(true)));
        let auth = scripted.seen_auth.lock().unwrap()[0].clone();
        assert_eq!(auth, Some(basic_auth_header("analyst", "pw")));
    }

    #[tokio::test]
    async fn test_fallback_policy() {
        let dir = TempDir::new().unwrap();
        let (with_fallback, _) = executor(&dir, ExecutorPolicy::default());
        with_fallback
            .connections()
            .save_profile(&trino("t1", None))
            .await
            .unwrap();
        let request = QueryRequest::new("SELECT 1", "s");
        assert_eq!(with_fallback.resolve_profile(&request).await.unwrap().id(), "t1");

        let (strict, _) = executor(
            &dir,
            ExecutorPolicy {
                fallback_to_first: false,
                ..Default::default()
            },
        );
        let err = strict.resolve_profile(&request).await.unwrap_err();
        assert!(err.to_string().contains("No valid connection profile"));
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let (executor, _) = executor(&dir, ExecutorPolicy::default());
        executor.connections().save_profile(&trino("first", None)).await.unwrap();
        executor.connections().save_profile(&trino("second", None)).await.unwrap();

        let mut request = QueryRequest::new("SELECT 1", "s");
        request.connection_id = Some("second".into());
        assert_eq!(executor.resolve_profile(&request).await.unwrap().id(), "second");

        request.profile_override = Some(sqlite("adhoc", "/tmp/x.db"));
        assert_eq!(executor.resolve_profile(&request).await.unwrap().id(), "adhoc");

        request.profile_override = None;
        request.connection_id = Some("missing".into());
        assert!(matches!(
            executor.resolve_profile(&request).await,
            Err(DaemonError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_profiles_at_all() {
        let dir = TempDir::new().unwrap();
        let (executor, _) = executor(&dir, ExecutorPolicy::default());
        let result = executor.execute(QueryRequest::new("SELECT 1", "s")).await;
        assert!(matches!(result, Err(DaemonError::Validation(_))));
    }

    #[tokio::test]
    async fn test_validation_fails_before_io() {
        let dir = TempDir::new().unwrap();
        let (executor, scripted) = executor(&dir, ExecutorPolicy::default());
        let mut bad = trino("t1", None);
        if let ConnectionProfile::Trino(p) = &mut bad {
            p.host = String::new();
        }

        let mut request = QueryRequest::new("SELECT 1", "s");
        request.profile_override = Some(bad);
        let err = executor.execute(request).await.err().unwrap();
        assert!(err.to_string().contains("Host is required"));
        assert!(scripted.seen_auth.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_probe_without_hook() {
        let dir = TempDir::new().unwrap();
        let (executor, _) = executor(&dir, ExecutorPolicy::default());
        assert!(executor.test_connection(&trino("t1", None)).await.success);

        let unknown = executor.test_connection(&sqlite("s1", "/tmp/x.db")).await;
        assert!(!unknown.success);
        assert!(unknown.error.unwrap().contains("sqlite"));
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }
}
