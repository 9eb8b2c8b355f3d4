//! Per-connection metadata cache.
//!
//! Reads are cache-first with a single lazy refresh when a connection has
//! never been loaded. Refreshes are serialized per connection id and the
//! (tables, columns, relationships) triple is swapped in atomically, so a
//! concurrent read never observes a half-updated catalog.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::backends::create_driver;
use crate::connection::Connection;
use crate::error::Result;
use crate::metadata::{
    ColumnMetadata, DatabaseCatalog, RelationshipMetadata, TableMetadata, TableMetadataPatch,
};

#[derive(Default)]
pub struct MetadataService {
    cache: RwLock<HashMap<String, DatabaseCatalog>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_tables(&self, connection: &Connection) -> Result<Vec<TableMetadata>> {
        self.ensure_cached(connection).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(&connection.id)
            .map(|catalog| catalog.tables.clone())
            .unwrap_or_default())
    }

    pub async fn get_table(
        &self,
        connection: &Connection,
        table_name: &str,
    ) -> Result<Option<TableMetadata>> {
        let tables = self.get_tables(connection).await?;
        Ok(tables.into_iter().find(|t| t.name == table_name))
    }

    pub async fn get_columns(
        &self,
        connection: &Connection,
        table_name: &str,
    ) -> Result<Vec<ColumnMetadata>> {
        self.ensure_cached(connection).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(&connection.id)
            .map(|catalog| {
                catalog
                    .columns
                    .iter()
                    .filter(|c| c.table_name == table_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn get_relationships(
        &self,
        connection: &Connection,
    ) -> Result<Vec<RelationshipMetadata>> {
        self.ensure_cached(connection).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(&connection.id)
            .map(|catalog| catalog.relationships.clone())
            .unwrap_or_default())
    }

    /// Re-extract the catalog from the backend and replace the cached
    /// triple. Errors propagate unchanged and leave the cache untouched.
    pub async fn refresh(&self, connection: &Connection) -> Result<()> {
        let guard = self.refresh_guard(&connection.id).await;
        let _held = guard.lock().await;

        tracing::info!(id = %connection.id, "refreshing metadata");
        let mut catalog = self.extract_catalog(connection).await?;

        let refreshed_at = Utc::now();
        for table in &mut catalog.tables {
            table.refreshed_at = Some(refreshed_at);
        }

        let mut cache = self.cache.write().await;
        cache.insert(connection.id.clone(), catalog);
        Ok(())
    }

    /// Patch display-only fields of a cached table entry. Returns the
    /// updated entry, or None when the table is unknown.
    pub async fn update_table_metadata(
        &self,
        connection: &Connection,
        table_name: &str,
        patch: &TableMetadataPatch,
    ) -> Result<Option<TableMetadata>> {
        self.ensure_cached(connection).await?;
        let mut cache = self.cache.write().await;
        let Some(catalog) = cache.get_mut(&connection.id) else {
            return Ok(None);
        };
        let Some(table) = catalog.tables.iter_mut().find(|t| t.name == table_name) else {
            return Ok(None);
        };

        if let Some(display_name) = &patch.display_name {
            table.display_name = Some(display_name.clone());
        }
        if let Some(description) = &patch.description {
            table.description = Some(description.clone());
        }
        if let Some(category) = &patch.category {
            table.category = Some(category.clone());
        }
        if let Some(explorable) = patch.explorable {
            table.explorable = explorable;
        }
        Ok(Some(table.clone()))
    }

    async fn ensure_cached(&self, connection: &Connection) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if cache.contains_key(&connection.id) {
                return Ok(());
            }
        }
        self.refresh(connection).await
    }

    async fn refresh_guard(&self, connection_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Build a driver, extract the catalog, and close the driver on both
    /// paths.
    async fn extract_catalog(&self, connection: &Connection) -> Result<DatabaseCatalog> {
        let mut driver = create_driver(connection)?;
        driver.connect().await?;
        let result = driver.fetch_catalog().await;
        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, "driver close failed after metadata fetch");
        }
        result
    }

    #[cfg(test)]
    async fn prime(&self, connection_id: &str, catalog: DatabaseCatalog) {
        self.cache
            .write()
            .await
            .insert(connection_id.to_string(), catalog);
    }
}
