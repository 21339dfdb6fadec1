//! Connection profiles

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sql_connectors::ConnectorConfig;
use std::path::PathBuf;

/// A named description of how to reach a data source.
///
/// The `type` tag doubles as the connector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionProfile {
    Trino(TrinoProfile),
    Sqlite(SqliteProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrinoProfile {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
    /// Never persisted; routed to the credential store on save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    /// Defaults to true when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_verify: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqliteProfile {
    pub id: String,
    pub name: String,
    pub database_path: PathBuf,
}

impl ConnectionProfile {
    pub fn id(&self) -> &str {
        match self {
            ConnectionProfile::Trino(p) => &p.id,
            ConnectionProfile::Sqlite(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ConnectionProfile::Trino(p) => &p.name,
            ConnectionProfile::Sqlite(p) => &p.name,
        }
    }

    /// Connector registry key
    pub fn connector_type(&self) -> &'static str {
        match self {
            ConnectionProfile::Trino(_) => "trino",
            ConnectionProfile::Sqlite(_) => "sqlite",
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            ConnectionProfile::Trino(p) => Some(&p.user),
            ConnectionProfile::Sqlite(_) => None,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            ConnectionProfile::Trino(p) => p.password.as_deref(),
            ConnectionProfile::Sqlite(_) => None,
        }
    }

    pub fn set_password(&mut self, password: Option<String>) {
        if let ConnectionProfile::Trino(p) = self {
            p.password = password;
        }
    }

    /// Whether this profile kind carries a secret at all
    pub fn has_secret_field(&self) -> bool {
        matches!(self, ConnectionProfile::Trino(_))
    }

    /// Copy with the secret removed
    pub fn without_secret(&self) -> Self {
        let mut profile = self.clone();
        profile.set_password(None);
        profile
    }

    /// Flatten into a connector config with the given row cap
    pub fn to_connector_config(&self, max_rows: usize) -> ConnectorConfig {
        match self {
            ConnectionProfile::Trino(p) => ConnectorConfig {
                host: Some(p.host.clone()).filter(|h| !h.is_empty()),
                port: p.port,
                user: Some(p.user.clone()).filter(|u| !u.is_empty()),
                catalog: p.catalog.clone(),
                schema: p.schema.clone(),
                ssl: p.ssl,
                ssl_verify: p.ssl_verify.unwrap_or(true),
                max_rows,
                ..Default::default()
            },
            ConnectionProfile::Sqlite(p) => ConnectorConfig {
                database_path: Some(p.database_path.clone()),
                ssl_verify: true,
                max_rows,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn trino(id: &str, password: Option<&str>) -> ConnectionProfile {
        ConnectionProfile::Trino(TrinoProfile {
            id: id.to_string(),
            name: format!("Trino {}", id),
            host: "localhost".to_string(),
            port: Some(8080),
            user: "analyst".to_string(),
            password: password.map(String::from),
            catalog: Some("hive".to_string()),
            schema: None,
            ssl: false,
            ssl_verify: None,
        })
    }

    pub fn sqlite(id: &str, path: impl Into<PathBuf>) -> ConnectionProfile {
        ConnectionProfile::Sqlite(SqliteProfile {
            id: id.to_string(),
            name: format!("SQLite {}", id),
            database_path: path.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_tagged_wire_format() {
        let json = serde_json::to_value(trino("t1", None)).unwrap();
        assert_eq!(json["type"], "trino");
        assert_eq!(json["id"], "t1");
        assert!(json.get("password").is_none());

        let parsed: ConnectionProfile = serde_json::from_str(
            r#"{"type":"sqlite","id":"s1","name":"Local","databasePath":"/tmp/a.db"}"#,
        )
        .unwrap();
        assert_eq!(parsed.connector_type(), "sqlite");
        assert_eq!(parsed.id(), "s1");
    }

    #[test]
    fn test_without_secret() {
        let profile = trino("t1", Some("hunter2"));
        assert_eq!(profile.password(), Some("hunter2"));
        assert_eq!(profile.without_secret().password(), None);
    }

    #[test]
    fn test_connector_config_defaults_tls_verify() {
        let config = trino("t1", None).to_connector_config(1000);
        assert!(config.ssl_verify);
        assert_eq!(config.max_rows, 1000);
        assert_eq!(config.host.as_deref(), Some("localhost"));
        assert_eq!(config.catalog.as_deref(), Some("hive"));

        let config = sqlite("s1", "/tmp/x.db").to_connector_config(5);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/x.db")));
    }
}
