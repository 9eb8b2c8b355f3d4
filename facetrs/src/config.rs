//! Predefined-connection configuration.
//!
//! `connections.yaml` declares connections that exist for the lifetime of
//! the process. String values of the form `${FACET_<NAME>}` are replaced
//! from the environment at load time; a missing variable substitutes the
//! empty string with a warning so one bad entry never blocks startup.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::connection::{Connection, ConnectionConfig, ConnectionKind};
use crate::error::{FacetError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectionsFile {
    #[serde(default)]
    pub connections: Vec<ConnectionSeed>,
}

/// One entry of the config file; the id is derived from its position.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSeed {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    pub config: YamlValue,
}

/// Load and resolve predefined connections from a YAML file. Entries that
/// fail to parse are skipped with a log line rather than failing the load.
pub fn load_connections<P: AsRef<Path>>(path: P) -> Result<Vec<Connection>> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| FacetError::Config(format!("failed to read connections file: {e}")))?;
    parse_connections(&contents)
}

pub fn parse_connections(yaml: &str) -> Result<Vec<Connection>> {
    let file: ConnectionsFile = serde_yaml::from_str(yaml)
        .map_err(|e| FacetError::Config(format!("failed to parse connections file: {e}")))?;

    let mut connections = Vec::new();
    for (index, seed) in file.connections.into_iter().enumerate() {
        let id = format!("predef_{index}_{}", seed.kind);
        let resolved = substitute_env(seed.config);
        let config: ConnectionConfig = match serde_yaml::from_value(resolved) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "skipping invalid connection entry");
                continue;
            }
        };
        let now = Utc::now();
        connections.push(Connection {
            id,
            name: seed.name,
            kind: seed.kind,
            config,
            created_at: now,
            updated_at: now,
        });
    }

    tracing::info!(count = connections.len(), "loaded predefined connections");
    Ok(connections)
}

/// Walk a YAML tree replacing `${FACET_*}` string values from the
/// environment.
fn substitute_env(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::String(s) => YamlValue::String(resolve_placeholder(&s)),
        YamlValue::Sequence(items) => {
            YamlValue::Sequence(items.into_iter().map(substitute_env).collect())
        }
        YamlValue::Mapping(map) => YamlValue::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env(v)))
                .collect(),
        ),
        other => other,
    }
}

fn resolve_placeholder(raw: &str) -> String {
    let Some(name) = raw
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return raw.to_string();
    };
    if !name.starts_with("FACET_") {
        return raw.to_string();
    }
    match std::env::var(name) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(variable = name, "environment variable not set, substituting empty string");
            String::new()
        }
    }
}
