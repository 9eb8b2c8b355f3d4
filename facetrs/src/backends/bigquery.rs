//! BigQuery backend driver using gcp-bigquery-client.
//!
//! The client is async; a small semaphore bounds concurrent jobs per
//! driver instance so one request cannot monopolize the backend.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::ResultSet;
use gcp_bigquery_client::Client;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::connection::Connection;
use crate::dialect::BigQueryDialect;
use crate::error::{FacetError, Result};
use crate::metadata::{ColumnMetadata, DatabaseCatalog, NormalizedType, TableMetadata};
use crate::query::{ColumnInfo, QueryExplainResult};

use super::{
    substitute_params, BackendDriver, BatchSender, ParamMap, ParamStyle, RawQueryOutput, RowMap,
    RowStream, STREAM_BATCH_ROWS,
};

/// Concurrent jobs per driver instance.
const WORKER_SLOTS: usize = 5;

pub struct BigQueryDriver {
    connection: Connection,
    client: Option<Client>,
    dialect: BigQueryDialect,
    limiter: Arc<Semaphore>,
}

impl BigQueryDriver {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            client: None,
            dialect: BigQueryDialect,
            limiter: Arc::new(Semaphore::new(WORKER_SLOTS)),
        }
    }

    async fn build_client(connection: &Connection) -> Result<Client> {
        let config = &connection.config;
        match config.credentials_json.as_deref().filter(|c| !c.is_empty()) {
            Some(credentials) => {
                // The client loads keys from disk; materialize the inline
                // JSON through a temp file that is removed after the read.
                let mut key_file = tempfile::NamedTempFile::new()
                    .map_err(|e| FacetError::Backend(format!("stage credentials: {e}")))?;
                key_file
                    .write_all(credentials.as_bytes())
                    .map_err(|e| FacetError::Backend(format!("stage credentials: {e}")))?;
                key_file
                    .flush()
                    .map_err(|e| FacetError::Backend(format!("stage credentials: {e}")))?;
                Client::from_service_account_key_file(
                    key_file.path().to_str().ok_or_else(|| {
                        FacetError::Backend("credentials path is not UTF-8".to_string())
                    })?,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to create BigQuery client");
                    FacetError::Backend(format!("create bigquery client: {e}"))
                })
            }
            None => Client::from_application_default_credentials()
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "failed to create BigQuery client from ADC");
                    FacetError::Backend(format!("create bigquery client: {e}"))
                }),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| FacetError::Backend("bigquery driver is not connected".to_string()))
    }

    fn project_id(&self) -> Result<&str> {
        let config = &self.connection.config;
        config.require("project_id")
    }

    /// Project the datasets live in; differs from the job project for
    /// public datasets.
    fn dataset_project(&self) -> Result<&str> {
        let config = &self.connection.config;
        match config.dataset_project_id.as_deref().filter(|p| !p.is_empty()) {
            Some(project) => Ok(project),
            None => self.project_id(),
        }
    }

    async fn run_query(&self, sql: &str) -> Result<RawQueryOutput> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FacetError::Backend(format!("limiter closed: {e}")))?;
        let client = self.client()?;
        let project_id = self.project_id()?;

        let start = Instant::now();
        tracing::trace!(sql = %sql, "executing BigQuery query");

        let mut request = QueryRequest::new(sql);
        request.use_query_cache = Some(true);

        let response = client
            .job()
            .query(project_id, request)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "BigQuery query execution failed");
                FacetError::Backend(format!("bigquery query: {e}"))
            })?;

        let columns: Vec<ColumnInfo> = response
            .schema
            .as_ref()
            .and_then(|schema| schema.fields.as_ref())
            .map(|fields| {
                fields
                    .iter()
                    .map(|field| ColumnInfo {
                        name: field.name.clone(),
                        data_type: Some(
                            normalize_bigquery_type(&format!("{:?}", field.r#type))
                                .as_str()
                                .to_string(),
                        ),
                        cardinality: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut rs = ResultSet::new_from_query_response(response);
        // column_names() comes back in hash order; read values by name so
        // the mapping stays correct, preferring the schema's ordering.
        let col_names: Vec<String> = if columns.is_empty() {
            rs.column_names().iter().map(|s| s.to_string()).collect()
        } else {
            columns.iter().map(|c| c.name.clone()).collect()
        };
        let mut rows = Vec::new();
        while rs.next_row() {
            let mut map = RowMap::new();
            for name in &col_names {
                let value = rs
                    .get_json_value_by_name(name)
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Null);
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            rows = rows.len(),
            columns = columns.len(),
            ms = elapsed.as_millis(),
            "bigquery execute_query"
        );

        Ok(RawQueryOutput {
            columns,
            rows,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }
}

#[async_trait]
impl BackendDriver for BigQueryDriver {
    fn dialect(&self) -> &(dyn crate::dialect::Dialect + Send + Sync) {
        &self.dialect
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        tracing::info!(
            id = %self.connection.id,
            project = ?self.connection.config.project_id,
            "creating BigQuery client"
        );
        self.client = Some(Self::build_client(&self.connection).await?);
        Ok(())
    }

    async fn test_connection(&self) -> (bool, String) {
        let probe = async {
            let client = Self::build_client(&self.connection).await?;
            let config = &self.connection.config;
            let project_id = config.require("project_id")?;
            client
                .job()
                .query(project_id, QueryRequest::new("SELECT 1"))
                .await
                .map_err(|e| FacetError::Backend(format!("probe query: {e}")))?;
            Ok::<String, FacetError>(project_id.to_string())
        };
        match probe.await {
            Ok(project) => (
                true,
                format!("Connection successful. Connected to project: {project}"),
            ),
            Err(e) => {
                tracing::error!(error = %e, "connection test failed");
                (false, format!("Connection failed: {e}"))
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<DatabaseCatalog> {
        let start = Instant::now();
        let dataset_project = self.dataset_project()?.to_string();

        // A configured dataset restricts the listing; otherwise every
        // dataset in the project is enumerated.
        let dataset_ids: Vec<String> = match self
            .connection
            .config
            .dataset_id
            .as_deref()
            .filter(|d| !d.is_empty())
        {
            Some(dataset) => vec![dataset.to_string()],
            None => {
                let sql = format!(
                    "SELECT schema_name FROM `{dataset_project}`.INFORMATION_SCHEMA.SCHEMATA"
                );
                self.run_query(&sql)
                    .await?
                    .rows
                    .iter()
                    .filter_map(|row| row.get("schema_name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            }
        };

        let mut tables = Vec::new();
        let mut columns = Vec::new();

        for dataset_id in &dataset_ids {
            let tables_sql = format!(
                "SELECT table_name, table_type FROM `{dataset_project}.{dataset_id}`.INFORMATION_SCHEMA.TABLES ORDER BY table_name"
            );
            let table_rows = self.run_query(&tables_sql).await?.rows;

            let columns_sql = format!(
                "SELECT table_name, column_name, data_type, is_nullable FROM `{dataset_project}.{dataset_id}`.INFORMATION_SCHEMA.COLUMNS ORDER BY table_name, ordinal_position"
            );
            let column_rows = self.run_query(&columns_sql).await?.rows;

            for row in &table_rows {
                let Some(name) = row.get("table_name").and_then(Value::as_str) else {
                    continue;
                };
                let table_type = match row.get("table_type").and_then(Value::as_str) {
                    Some("VIEW") => "view",
                    _ => "table",
                };
                let full_name = format!("{dataset_id}.{name}");
                let column_names: Vec<String> = column_rows
                    .iter()
                    .filter(|c| c.get("table_name").and_then(Value::as_str) == Some(name))
                    .filter_map(|c| c.get("column_name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();

                tables.push(TableMetadata {
                    name: full_name,
                    schema_name: Some(dataset_id.clone()),
                    display_name: None,
                    description: None,
                    table_type: table_type.to_string(),
                    row_count: None,
                    category: None,
                    explorable: true,
                    refreshed_at: None,
                    columns: column_names,
                });
            }

            for row in &column_rows {
                let (Some(table_name), Some(name)) = (
                    row.get("table_name").and_then(Value::as_str),
                    row.get("column_name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                let raw_type = row.get("data_type").and_then(Value::as_str).unwrap_or_default();
                columns.push(ColumnMetadata {
                    name: name.to_string(),
                    table_name: format!("{dataset_id}.{table_name}"),
                    display_name: None,
                    description: None,
                    data_type: normalize_bigquery_type(raw_type).as_str().to_string(),
                    nullable: row.get("is_nullable").and_then(Value::as_str) != Some("NO"),
                    primary_key: false,
                    foreign_key: None,
                    cardinality: None,
                    special_type: None,
                    value_map: None,
                    explorable: true,
                });
            }
        }

        tracing::debug!(
            datasets = dataset_ids.len(),
            tables = tables.len(),
            columns = columns.len(),
            ms = start.elapsed().as_millis(),
            "bigquery fetch_catalog"
        );

        // BigQuery exposes no key constraints through this surface
        Ok(DatabaseCatalog {
            tables,
            columns,
            relationships: Vec::new(),
        })
    }

    async fn execute_query(&self, sql: &str, params: Option<&ParamMap>) -> Result<RawQueryOutput> {
        let sql = match params.filter(|p| !p.is_empty()) {
            Some(params) => substitute_params(sql, params, ParamStyle::At),
            None => sql.to_string(),
        };
        self.run_query(&sql).await
    }

    async fn stream_query(&self, sql: &str) -> Result<RowStream> {
        // The jobs.query response is already materialized; re-chunk it
        // through the bounded hand-off so consumers see a uniform stream.
        let output = self.run_query(sql).await?;
        let (tx, rx) = mpsc::channel(STREAM_BATCH_ROWS);

        tokio::spawn(async move {
            let mut sender = BatchSender::new(tx);
            for row in output.rows {
                if !sender.push(row).await {
                    return;
                }
            }
            sender.flush().await;
        });

        Ok(super::rows_into_stream(rx))
    }

    async fn explain(&self, sql: &str) -> Result<QueryExplainResult> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FacetError::Backend(format!("limiter closed: {e}")))?;
        let client = self.client()?;
        let project_id = self.project_id()?;

        // Dry-run the job: validates the SQL and reports scan volume
        let mut request = QueryRequest::new(sql);
        request.dry_run = Some(true);

        let response = client
            .job()
            .query(project_id, request)
            .await
            .map_err(|e| FacetError::Backend(format!("bigquery dry run: {e}")))?;

        let bytes_processed = response
            .total_bytes_processed
            .as_deref()
            .and_then(|b| b.parse::<f64>().ok());
        let plan = match bytes_processed {
            Some(bytes) => format!("Dry run successful; estimated bytes processed: {bytes}"),
            None => "Dry run successful".to_string(),
        };

        Ok(QueryExplainResult {
            plan,
            cost: bytes_processed,
            details: serde_json::json!({ "totalBytesProcessed": response.total_bytes_processed }),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// Map a BigQuery type name (INFORMATION_SCHEMA or field-schema spelling)
/// into the common vocabulary.
fn normalize_bigquery_type(raw: &str) -> NormalizedType {
    let t = raw.to_lowercase();
    if t.starts_with("array") || t == "repeated" {
        NormalizedType::Array
    } else if t.contains("struct") || t.contains("record") || t.contains("json") {
        NormalizedType::Json
    } else if t.contains("bool") {
        NormalizedType::Boolean
    } else if t.contains("timestamp") || t.contains("datetime") || t.contains("time") {
        NormalizedType::Timestamp
    } else if t == "date" {
        NormalizedType::Date
    } else if t.contains("int") {
        NormalizedType::Integer
    } else if t.contains("float") || t.contains("numeric") || t.contains("bignumeric") {
        NormalizedType::Number
    } else {
        NormalizedType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bigquery_types() {
        assert_eq!(normalize_bigquery_type("INT64"), NormalizedType::Integer);
        assert_eq!(normalize_bigquery_type("Integer"), NormalizedType::Integer);
        assert_eq!(normalize_bigquery_type("FLOAT64"), NormalizedType::Number);
        assert_eq!(normalize_bigquery_type("NUMERIC"), NormalizedType::Number);
        assert_eq!(normalize_bigquery_type("STRING"), NormalizedType::String);
        assert_eq!(normalize_bigquery_type("BOOL"), NormalizedType::Boolean);
        assert_eq!(normalize_bigquery_type("DATE"), NormalizedType::Date);
        assert_eq!(normalize_bigquery_type("TIMESTAMP"), NormalizedType::Timestamp);
        assert_eq!(normalize_bigquery_type("DATETIME"), NormalizedType::Timestamp);
        assert_eq!(
            normalize_bigquery_type("ARRAY<STRING>"),
            NormalizedType::Array
        );
        assert_eq!(
            normalize_bigquery_type("STRUCT<a INT64>"),
            NormalizedType::Json
        );
    }
}
