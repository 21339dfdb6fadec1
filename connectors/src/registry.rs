//! Name → connector lookup

use std::collections::HashMap;
use std::sync::Arc;

use crate::connector::Connector;
use crate::sqlite::SqliteConnector;
use crate::trino::TrinoConnector;

/// Registry of available connectors, keyed by connector id
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in connector
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TrinoConnector::new()));
        registry.register(Arc::new(SqliteConnector::new()));
        registry
    }

    /// Add a connector, replacing any previous one with the same id
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let id = connector.id().to_string();
        if self.connectors.insert(id.clone(), connector).is_some() {
            tracing::debug!("Replaced connector '{}'", id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(id).cloned()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connectors.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.ids())
            .finish()
    }
}
