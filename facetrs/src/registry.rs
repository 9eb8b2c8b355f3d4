//! Connection registry: predefined entries loaded once at start plus
//! session-scoped connections created at runtime.
//!
//! Predefined connections are read-only; session connections support the
//! full create/update/delete lifecycle. Reads take a shared lock, writes
//! an exclusive one.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::Utc;

use crate::connection::{Connection, ConnectionConfig, ConnectionKind};
use crate::error::{FacetError, Result};

pub struct ConnectionRegistry {
    predefined: Vec<Connection>,
    session: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    pub fn new(predefined: Vec<Connection>) -> Self {
        Self {
            predefined,
            session: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded from a connections.yaml file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(crate::config::load_connections(path)?))
    }

    pub fn is_predefined(&self, id: &str) -> bool {
        self.predefined.iter().any(|c| c.id == id)
    }

    pub fn list(&self) -> Vec<Connection> {
        let mut all = self.predefined.clone();
        let session = self.session.read().expect("registry lock poisoned");
        let mut rest: Vec<Connection> = session.values().cloned().collect();
        rest.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all.extend(rest);
        all
    }

    pub fn get(&self, id: &str) -> Option<Connection> {
        if let Some(conn) = self.predefined.iter().find(|c| c.id == id) {
            return Some(conn.clone());
        }
        self.session
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Resolve a connection or fail with NotFound, for the query path.
    pub fn resolve(&self, id: &str) -> Result<Connection> {
        self.get(id)
            .ok_or_else(|| FacetError::NotFound(format!("connection {id}")))
    }

    pub fn create(
        &self,
        name: impl Into<String>,
        kind: ConnectionKind,
        config: ConnectionConfig,
    ) -> Connection {
        let now = Utc::now();
        let connection = Connection {
            id: format!("sess_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            name: name.into(),
            kind,
            config,
            created_at: now,
            updated_at: now,
        };
        self.session
            .write()
            .expect("registry lock poisoned")
            .insert(connection.id.clone(), connection.clone());
        tracing::info!(id = %connection.id, kind = %kind, "created session connection");
        connection
    }

    pub fn update(
        &self,
        id: &str,
        name: impl Into<String>,
        kind: ConnectionKind,
        config: ConnectionConfig,
    ) -> Result<Connection> {
        if self.is_predefined(id) {
            return Err(FacetError::InvalidQuery(format!(
                "predefined connection {id} is read-only"
            )));
        }
        let mut session = self.session.write().expect("registry lock poisoned");
        let existing = session
            .get_mut(id)
            .ok_or_else(|| FacetError::NotFound(format!("connection {id}")))?;
        existing.name = name.into();
        existing.kind = kind;
        existing.config = config;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if self.is_predefined(id) {
            return Err(FacetError::InvalidQuery(format!(
                "predefined connection {id} is read-only"
            )));
        }
        let removed = self
            .session
            .write()
            .expect("registry lock poisoned")
            .remove(id);
        match removed {
            Some(_) => {
                tracing::info!(id = %id, "deleted session connection");
                Ok(())
            }
            None => Err(FacetError::NotFound(format!("connection {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(host: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: Some(host.to_string()),
            ..Default::default()
        }
    }

    fn registry_with_predefined() -> ConnectionRegistry {
        let now = Utc::now();
        ConnectionRegistry::new(vec![Connection {
            id: "predef_0_postgres".to_string(),
            name: "Analytics".to_string(),
            kind: ConnectionKind::Postgres,
            config: sample_config("db.internal"),
            created_at: now,
            updated_at: now,
        }])
    }

    #[test]
    fn create_then_get_then_delete() {
        let registry = registry_with_predefined();
        let created = registry.create("Scratch", ConnectionKind::Clickhouse, sample_config("ch"));
        assert!(created.id.starts_with("sess_"));

        let fetched = registry.get(&created.id).unwrap();
        assert_eq!(fetched.name, "Scratch");

        registry.delete(&created.id).unwrap();
        assert!(registry.get(&created.id).is_none());
    }

    #[test]
    fn predefined_entries_reject_update_and_delete() {
        let registry = registry_with_predefined();
        assert!(matches!(
            registry.delete("predef_0_postgres"),
            Err(FacetError::InvalidQuery(_))
        ));
        assert!(matches!(
            registry.update(
                "predef_0_postgres",
                "X",
                ConnectionKind::Postgres,
                sample_config("x")
            ),
            Err(FacetError::InvalidQuery(_))
        ));
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let registry = registry_with_predefined();
        assert!(matches!(
            registry.resolve("nope"),
            Err(FacetError::NotFound(_))
        ));
    }

    #[test]
    fn list_includes_both_kinds() {
        let registry = registry_with_predefined();
        registry.create("Scratch", ConnectionKind::Snowflake, sample_config("sf"));
        let all = registry.list();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "predef_0_postgres");
    }
}
