//! Connection descriptors for the registered database backends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend tag carried by every connection.
///
/// Unrecognized tags deserialize to `Unknown` so that a bad config entry
/// surfaces as an `Unsupported` error at driver-build time instead of a
/// parse failure that takes the whole file down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Postgres,
    Clickhouse,
    Bigquery,
    Snowflake,
    #[serde(other)]
    Unknown,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Postgres => "postgres",
            ConnectionKind::Clickhouse => "clickhouse",
            ConnectionKind::Bigquery => "bigquery",
            ConnectionKind::Snowflake => "snowflake",
            ConnectionKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open bag of connection settings; the recognized keys depend on the
/// connection kind. Extra keys are preserved verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
    /// ClickHouse: serve over https instead of http.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<bool>,
    /// BigQuery: billing/job project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// BigQuery: service-account key JSON, as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_json: Option<String>,
    /// BigQuery: restrict metadata to a single dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    /// BigQuery: project owning the dataset when it differs from
    /// `project_id` (public datasets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_project_id: Option<String>,
    /// Snowflake account identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConnectionConfig {
    /// Required-string accessor used by the drivers; missing keys become a
    /// uniform config error naming the field.
    pub fn require(&self, field: &str) -> crate::error::Result<&str> {
        let value = match field {
            "host" => self.host.as_deref(),
            "database" => self.database.as_deref(),
            "user" => self.user.as_deref(),
            "password" => self.password.as_deref(),
            "project_id" => self.project_id.as_deref(),
            "account" => self.account.as_deref(),
            "warehouse" => self.warehouse.as_deref(),
            _ => None,
        };
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| crate::error::FacetError::Config(format!("missing connection field: {field}")))
    }
}

/// A registered database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    pub config: ConnectionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of probing a backend with the connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        let kind: ConnectionKind = serde_json::from_str("\"clickhouse\"").unwrap();
        assert_eq!(kind, ConnectionKind::Clickhouse);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"clickhouse\"");
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let kind: ConnectionKind = serde_json::from_str("\"oracle\"").unwrap();
        assert_eq!(kind, ConnectionKind::Unknown);
    }

    #[test]
    fn config_preserves_extra_keys() {
        let config: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "host": "localhost",
            "port": 5432,
            "application_name": "facet"
        }))
        .unwrap();
        assert_eq!(config.host.as_deref(), Some("localhost"));
        assert_eq!(
            config.extra.get("application_name"),
            Some(&Value::String("facet".to_string()))
        );
    }
}
