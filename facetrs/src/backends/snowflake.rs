//! Snowflake backend driver using the snowflake-api SQL client.
//!
//! Results arrive either Arrow-encoded or as raw JSON depending on the
//! statement; both decode into the same row maps. A semaphore bounds
//! concurrent statements per driver instance.

use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde_json::Value;
use snowflake_api::{QueryResult as SnowflakeResult, SnowflakeApi};
use tokio::sync::{mpsc, Semaphore};

use crate::connection::Connection;
use crate::dialect::SnowflakeDialect;
use crate::error::{FacetError, Result};
use crate::metadata::{ColumnMetadata, DatabaseCatalog, NormalizedType, TableMetadata};
use crate::query::{ColumnInfo, QueryExplainResult};

use super::{
    infer_value_type, substitute_params, BackendDriver, BatchSender, ParamMap, ParamStyle,
    RawQueryOutput, RowMap, RowStream, STREAM_BATCH_ROWS,
};

/// Concurrent statements per driver instance.
const WORKER_SLOTS: usize = 5;

pub struct SnowflakeDriver {
    connection: Connection,
    api: Option<Arc<SnowflakeApi>>,
    dialect: SnowflakeDialect,
    limiter: Arc<Semaphore>,
}

impl SnowflakeDriver {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            api: None,
            dialect: SnowflakeDialect,
            limiter: Arc::new(Semaphore::new(WORKER_SLOTS)),
        }
    }

    fn build_api(connection: &Connection) -> Result<SnowflakeApi> {
        let config = &connection.config;
        let account = config.require("account")?;
        let user = config.require("user")?;
        let password = config.require("password")?;

        SnowflakeApi::with_password_auth(
            account,
            config.warehouse.as_deref(),
            config.database.as_deref(),
            config.schema.as_deref(),
            user,
            config.role.as_deref(),
            password,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create Snowflake client");
            FacetError::Backend(format!("create snowflake client: {e}"))
        })
    }

    fn api(&self) -> Result<&Arc<SnowflakeApi>> {
        self.api
            .as_ref()
            .ok_or_else(|| FacetError::Backend("snowflake driver is not connected".to_string()))
    }

    async fn run_query(&self, sql: &str) -> Result<RawQueryOutput> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FacetError::Backend(format!("limiter closed: {e}")))?;
        let api = self.api()?;

        let start = Instant::now();
        tracing::trace!(sql = %sql, "executing Snowflake query");

        let result = api
            .exec(sql)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Snowflake query execution failed");
                FacetError::Backend(format!("snowflake query: {e}"))
            })?;
        let (columns, rows) = decode_result(result)?;

        let elapsed = start.elapsed();
        tracing::debug!(
            rows = rows.len(),
            columns = columns.len(),
            ms = elapsed.as_millis(),
            "snowflake execute_query"
        );

        Ok(RawQueryOutput {
            columns,
            rows,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Row value by column name, tolerating the upper-cased identifiers
    /// Snowflake returns.
    fn get_ci<'a>(row: &'a RowMap, key: &str) -> Option<&'a Value> {
        row.get(key)
            .or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
    }
}

#[async_trait]
impl BackendDriver for SnowflakeDriver {
    fn dialect(&self) -> &(dyn crate::dialect::Dialect + Send + Sync) {
        &self.dialect
    }

    async fn connect(&mut self) -> Result<()> {
        if self.api.is_some() {
            return Ok(());
        }
        tracing::info!(
            id = %self.connection.id,
            account = ?self.connection.config.account,
            database = ?self.connection.config.database,
            "creating Snowflake client"
        );
        self.api = Some(Arc::new(Self::build_api(&self.connection)?));
        Ok(())
    }

    async fn test_connection(&self) -> (bool, String) {
        let probe = async {
            let api = Self::build_api(&self.connection)?;
            let result = api
                .exec("SELECT CURRENT_VERSION()")
                .await
                .map_err(|e| FacetError::Backend(format!("probe query: {e}")))?;
            let (_, rows) = decode_result(result)?;
            let version = rows
                .first()
                .and_then(|row| row.values().next())
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unknown".to_string());
            Ok::<String, FacetError>(version)
        };
        match probe.await {
            Ok(version) => (
                true,
                format!("Connection successful. Snowflake version: {version}"),
            ),
            Err(e) => {
                tracing::error!(error = %e, "connection test failed");
                (false, format!("Connection failed: {e}"))
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<DatabaseCatalog> {
        let start = Instant::now();

        let tables_sql = r#"
            SELECT
                TABLE_NAME,
                TABLE_SCHEMA,
                COMMENT,
                TABLE_TYPE,
                ROW_COUNT
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA NOT IN ('INFORMATION_SCHEMA')
            ORDER BY TABLE_SCHEMA, TABLE_NAME
        "#;
        let table_rows = self.run_query(tables_sql).await?.rows;

        let columns_sql = r#"
            SELECT
                TABLE_NAME,
                COLUMN_NAME,
                DATA_TYPE,
                IS_NULLABLE,
                COMMENT
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA NOT IN ('INFORMATION_SCHEMA')
            ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#;
        let column_rows = self.run_query(columns_sql).await?.rows;

        let mut columns = Vec::new();
        for row in &column_rows {
            let (Some(table_name), Some(name)) = (
                Self::get_ci(row, "TABLE_NAME").and_then(Value::as_str),
                Self::get_ci(row, "COLUMN_NAME").and_then(Value::as_str),
            ) else {
                continue;
            };
            let raw_type = Self::get_ci(row, "DATA_TYPE")
                .and_then(Value::as_str)
                .unwrap_or_default();
            columns.push(ColumnMetadata {
                name: name.to_string(),
                table_name: table_name.to_string(),
                display_name: None,
                description: Self::get_ci(row, "COMMENT")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data_type: normalize_snowflake_type(raw_type).as_str().to_string(),
                nullable: Self::get_ci(row, "IS_NULLABLE").and_then(Value::as_str) != Some("NO"),
                primary_key: false,
                foreign_key: None,
                cardinality: None,
                special_type: None,
                value_map: None,
                explorable: true,
            });
        }

        let mut tables = Vec::new();
        for row in &table_rows {
            let Some(name) = Self::get_ci(row, "TABLE_NAME").and_then(Value::as_str) else {
                continue;
            };
            let table_type = match Self::get_ci(row, "TABLE_TYPE").and_then(Value::as_str) {
                Some("VIEW") => "view",
                _ => "table",
            };
            tables.push(TableMetadata {
                name: name.to_string(),
                schema_name: Self::get_ci(row, "TABLE_SCHEMA")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                display_name: None,
                description: Self::get_ci(row, "COMMENT")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                table_type: table_type.to_string(),
                row_count: Self::get_ci(row, "ROW_COUNT").and_then(Value::as_i64),
                category: None,
                explorable: true,
                refreshed_at: None,
                columns: columns
                    .iter()
                    .filter(|c| c.table_name == name)
                    .map(|c| c.name.clone())
                    .collect(),
            });
        }

        tracing::debug!(
            tables = tables.len(),
            columns = columns.len(),
            ms = start.elapsed().as_millis(),
            "snowflake fetch_catalog"
        );

        // KEY_COLUMN_USAGE is not populated by Snowflake's
        // INFORMATION_SCHEMA, so no relationships are derived here
        Ok(DatabaseCatalog {
            tables,
            columns,
            relationships: Vec::new(),
        })
    }

    async fn execute_query(&self, sql: &str, params: Option<&ParamMap>) -> Result<RawQueryOutput> {
        let sql = match params.filter(|p| !p.is_empty()) {
            Some(params) => substitute_params(sql, params, ParamStyle::Colon),
            None => sql.to_string(),
        };
        self.run_query(&sql).await
    }

    async fn stream_query(&self, sql: &str) -> Result<RowStream> {
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
        let output = self.run_query(&format!("EXPLAIN USING TEXT {sql}")).await?;
        let lines: Vec<String> = output
            .rows
            .iter()
            .flat_map(|row| row.values())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        Ok(QueryExplainResult {
            plan: lines.join("\n"),
            cost: None,
            details: serde_json::to_value(&output.rows)?,
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.api = None;
        Ok(())
    }
}

/// Decode a snowflake-api result into columns and row maps.
fn decode_result(result: SnowflakeResult) -> Result<(Vec<ColumnInfo>, Vec<RowMap>)> {
    match result {
        SnowflakeResult::Arrow(batches) => decode_arrow(&batches),
        SnowflakeResult::Json(json) => {
            let names: Vec<String> = json.schema.iter().map(|f| f.name.clone()).collect();
            let mut rows = Vec::new();
            if let Value::Array(raw_rows) = &json.value {
                for raw in raw_rows {
                    let mut map = RowMap::new();
                    match raw {
                        // rowset rows are positional arrays
                        Value::Array(cells) => {
                            for (idx, cell) in cells.iter().enumerate() {
                                let name = names
                                    .get(idx)
                                    .cloned()
                                    .unwrap_or_else(|| format!("col_{idx}"));
                                map.insert(name, cell.clone());
                            }
                        }
                        Value::Object(obj) => {
                            map.extend(obj.clone());
                        }
                        other => {
                            map.insert("value".to_string(), other.clone());
                        }
                    }
                    rows.push(map);
                }
            }
            let columns = names
                .iter()
                .map(|name| ColumnInfo {
                    name: name.clone(),
                    data_type: rows
                        .first()
                        .and_then(|row| row.get(name))
                        .and_then(infer_value_type)
                        .map(str::to_string),
                    cardinality: None,
                })
                .collect();
            Ok((columns, rows))
        }
        SnowflakeResult::Empty => Ok((Vec::new(), Vec::new())),
    }
}

fn decode_arrow(batches: &[RecordBatch]) -> Result<(Vec<ColumnInfo>, Vec<RowMap>)> {
    let Some(first) = batches.first() else {
        return Ok((Vec::new(), Vec::new()));
    };

    let columns: Vec<ColumnInfo> = first
        .schema()
        .fields()
        .iter()
        .map(|field| ColumnInfo {
            name: field.name().clone(),
            data_type: Some(
                normalize_snowflake_type(&format!("{:?}", field.data_type()))
                    .as_str()
                    .to_string(),
            ),
            cardinality: None,
        })
        .collect();

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer
        .write_batches(&refs)
        .map_err(|e| FacetError::Backend(format!("decode arrow rows: {e}")))?;
    writer
        .finish()
        .map_err(|e| FacetError::Backend(format!("decode arrow rows: {e}")))?;
    let buffer = writer.into_inner();

    let rows: Vec<RowMap> = if buffer.is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice(&buffer)
            .map_err(|e| FacetError::Backend(format!("parse arrow rows: {e}")))?
    };
    Ok((columns, rows))
}

/// Map a Snowflake (or arrow debug) type name into the common vocabulary.
fn normalize_snowflake_type(raw: &str) -> NormalizedType {
    let t = raw.to_lowercase();
    if t.contains("array") || t.contains("list") {
        NormalizedType::Array
    } else if t.contains("variant") || t.contains("object") || t.contains("struct") {
        NormalizedType::Json
    } else if t.contains("bool") {
        NormalizedType::Boolean
    } else if t.contains("timestamp") || t.contains("datetime") {
        NormalizedType::Timestamp
    } else if t.contains("date") {
        NormalizedType::Date
    } else if t.contains("int") {
        NormalizedType::Integer
    } else if t.contains("float")
        || t.contains("double")
        || t.contains("real")
        || t.contains("number")
        || t.contains("numeric")
        || t.contains("decimal")
    {
        NormalizedType::Number
    } else {
        NormalizedType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_snowflake_types() {
        assert_eq!(normalize_snowflake_type("NUMBER"), NormalizedType::Number);
        assert_eq!(normalize_snowflake_type("INTEGER"), NormalizedType::Integer);
        assert_eq!(normalize_snowflake_type("FLOAT"), NormalizedType::Number);
        assert_eq!(normalize_snowflake_type("VARCHAR"), NormalizedType::String);
        assert_eq!(normalize_snowflake_type("TEXT"), NormalizedType::String);
        assert_eq!(normalize_snowflake_type("BOOLEAN"), NormalizedType::Boolean);
        assert_eq!(normalize_snowflake_type("DATE"), NormalizedType::Date);
        assert_eq!(
            normalize_snowflake_type("TIMESTAMP_NTZ"),
            NormalizedType::Timestamp
        );
        assert_eq!(normalize_snowflake_type("VARIANT"), NormalizedType::Json);
        assert_eq!(normalize_snowflake_type("ARRAY"), NormalizedType::Array);
    }

    #[test]
    fn ci_lookup_matches_uppercased_keys() {
        let mut row = RowMap::new();
        row.insert("TABLE_NAME".to_string(), serde_json::json!("events"));
        assert_eq!(
            SnowflakeDriver::get_ci(&row, "table_name").and_then(Value::as_str),
            Some("events")
        );
    }
}
