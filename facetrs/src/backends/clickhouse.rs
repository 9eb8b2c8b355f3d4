//! ClickHouse backend driver over the HTTP interface.
//!
//! Queries run with `FORMAT JSONEachRow`; each response line is one row
//! object, which keeps the driver independent of the result shape.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::dialect::ClickHouseDialect;
use crate::error::{FacetError, Result};
use crate::metadata::{ColumnMetadata, DatabaseCatalog, NormalizedType, TableMetadata};
use crate::query::{ColumnInfo, QueryExplainResult};

use super::{
    infer_value_type, substitute_params, BackendDriver, BatchSender, ParamMap, ParamStyle,
    RawQueryOutput, RowMap, RowStream, STREAM_BATCH_ROWS,
};

const DEFAULT_HTTP_PORT: u16 = 8123;

pub struct ClickHouseDriver {
    connection: Connection,
    client: Option<clickhouse::Client>,
    dialect: ClickHouseDialect,
}

impl ClickHouseDriver {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            client: None,
            dialect: ClickHouseDialect,
        }
    }

    fn build_client(connection: &Connection) -> Result<clickhouse::Client> {
        let config = &connection.config;
        let host = config.require("host")?;
        let database = config.require("database")?;
        let port = config.port.unwrap_or(DEFAULT_HTTP_PORT);
        let protocol = if config.https.unwrap_or(false) {
            "https"
        } else {
            "http"
        };
        let url = format!("{protocol}://{host}:{port}");

        let mut client = clickhouse::Client::default()
            .with_url(url)
            .with_database(database);
        if let Some(user) = &config.user {
            client = client.with_user(user);
        }
        if let Some(password) = &config.password {
            client = client.with_password(password);
        }
        Ok(client)
    }

    fn client(&self) -> Result<&clickhouse::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| FacetError::Backend("clickhouse driver is not connected".to_string()))
    }
}

#[async_trait]
impl BackendDriver for ClickHouseDriver {
    fn dialect(&self) -> &(dyn crate::dialect::Dialect + Send + Sync) {
        &self.dialect
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        tracing::info!(id = %self.connection.id, "creating ClickHouse HTTP client");
        self.client = Some(Self::build_client(&self.connection)?);
        Ok(())
    }

    async fn test_connection(&self) -> (bool, String) {
        let probe = async {
            let client = Self::build_client(&self.connection)?;
            let rows = fetch_json_rows(&client, "SELECT version() AS version").await?;
            let version = rows
                .first()
                .and_then(|row| row.get("version"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            Ok::<String, FacetError>(version)
        };
        match probe.await {
            Ok(version) => (
                true,
                format!("Connection successful. ClickHouse version: {version}"),
            ),
            Err(e) => {
                tracing::error!(error = %e, "connection test failed");
                (false, format!("Connection failed: {e}"))
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<DatabaseCatalog> {
        let start = Instant::now();
        let client = self.client()?;
        let database = self
            .connection
            .config
            .database
            .clone()
            .unwrap_or_default();

        let table_rows = fetch_json_rows(client, "SHOW TABLES").await?;
        let mut tables = Vec::new();
        let mut columns = Vec::new();

        for row in &table_rows {
            // SHOW TABLES yields a single name column
            let Some(name) = row.values().next().and_then(Value::as_str) else {
                continue;
            };

            let describe_sql = format!("DESCRIBE TABLE {name}");
            let column_rows = fetch_json_rows(client, &describe_sql).await?;
            let mut column_names = Vec::new();
            for col in &column_rows {
                let Some(col_name) = col.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let raw_type = col.get("type").and_then(Value::as_str).unwrap_or_default();
                column_names.push(col_name.to_string());
                columns.push(ColumnMetadata {
                    name: col_name.to_string(),
                    table_name: name.to_string(),
                    display_name: None,
                    description: None,
                    data_type: normalize_clickhouse_type(raw_type).as_str().to_string(),
                    // No NOT NULL constraint outside Nullable(...) wrappers
                    nullable: true,
                    primary_key: false,
                    foreign_key: None,
                    cardinality: None,
                    special_type: None,
                    value_map: None,
                    explorable: true,
                });
            }

            tables.push(TableMetadata {
                name: name.to_string(),
                schema_name: Some(database.clone()),
                display_name: None,
                description: None,
                table_type: "table".to_string(),
                row_count: None,
                category: None,
                explorable: true,
                refreshed_at: None,
                columns: column_names,
            });
        }

        tracing::debug!(
            tables = tables.len(),
            columns = columns.len(),
            ms = start.elapsed().as_millis(),
            "clickhouse fetch_catalog"
        );

        // ClickHouse has no foreign-key constraints to derive relationships from
        Ok(DatabaseCatalog {
            tables,
            columns,
            relationships: Vec::new(),
        })
    }

    async fn execute_query(&self, sql: &str, params: Option<&ParamMap>) -> Result<RawQueryOutput> {
        let client = self.client()?;
        let sql = match params.filter(|p| !p.is_empty()) {
            Some(params) => substitute_params(sql, params, ParamStyle::Brace),
            None => sql.to_string(),
        };

        let start = Instant::now();
        tracing::trace!(sql = %sql, "executing ClickHouse query");
        let rows = fetch_json_rows(client, &sql).await?;

        let columns = rows
            .first()
            .map(|first| {
                first
                    .iter()
                    .map(|(name, value)| ColumnInfo {
                        name: name.clone(),
                        data_type: infer_value_type(value).map(str::to_string),
                        cardinality: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let elapsed = start.elapsed();
        tracing::debug!(
            rows = rows.len(),
            ms = elapsed.as_millis(),
            "clickhouse execute_query"
        );

        Ok(RawQueryOutput {
            columns,
            rows,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    async fn stream_query(&self, sql: &str) -> Result<RowStream> {
        let client = self.client()?.clone();
        let sql = sql.to_string();
        let (tx, rx) = mpsc::channel(STREAM_BATCH_ROWS);

        tokio::spawn(async move {
            let mut sender = BatchSender::new(tx);
            match produce_rows(client, &sql, &mut sender).await {
                Ok(()) => {
                    sender.flush().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "clickhouse streaming query failed");
                    sender.fail(e).await;
                }
            }
        });

        Ok(super::rows_into_stream(rx))
    }

    async fn explain(&self, sql: &str) -> Result<QueryExplainResult> {
        let client = self.client()?;
        let rows = fetch_json_rows(client, &format!("EXPLAIN {sql}")).await?;
        let lines: Vec<String> = rows
            .iter()
            .filter_map(|row| row.values().next().and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        Ok(QueryExplainResult {
            plan: lines.join("\n"),
            // ClickHouse does not provide cost estimates
            cost: None,
            details: Value::Array(lines.into_iter().map(Value::String).collect()),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

/// Run a query with `FORMAT JSONEachRow` and parse every line into a row
/// object.
async fn fetch_json_rows(client: &clickhouse::Client, sql: &str) -> Result<Vec<RowMap>> {
    let mut cursor = client
        .query(sql)
        .fetch_bytes("JSONEachRow")
        .map_err(|e| FacetError::Backend(format!("clickhouse query: {e}")))?;

    let mut data = Vec::new();
    while let Some(chunk) = cursor
        .next()
        .await
        .map_err(|e| FacetError::Backend(format!("clickhouse fetch: {e}")))?
    {
        data.extend_from_slice(&chunk);
    }
    parse_json_lines(&data)
}

fn parse_json_lines(data: &[u8]) -> Result<Vec<RowMap>> {
    let text = std::str::from_utf8(data)
        .map_err(|e| FacetError::Backend(format!("clickhouse response is not UTF-8: {e}")))?;
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: RowMap = serde_json::from_str(line)
            .map_err(|e| FacetError::Backend(format!("parse result row: {e}")))?;
        rows.push(row);
    }
    Ok(rows)
}

async fn produce_rows(
    client: clickhouse::Client,
    sql: &str,
    sender: &mut BatchSender,
) -> Result<()> {
    let mut cursor = client
        .query(sql)
        .fetch_bytes("JSONEachRow")
        .map_err(|e| FacetError::Backend(format!("clickhouse query: {e}")))?;

    // Chunks are not line-aligned; carry the partial tail across reads
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = cursor
        .next()
        .await
        .map_err(|e| FacetError::Backend(format!("clickhouse fetch: {e}")))?
    {
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            for row in parse_json_lines(&line)? {
                if !sender.push(row).await {
                    return Ok(());
                }
            }
        }
    }
    for row in parse_json_lines(&buf)? {
        if !sender.push(row).await {
            return Ok(());
        }
    }
    Ok(())
}

/// Map a ClickHouse type name into the common vocabulary.
fn normalize_clickhouse_type(raw: &str) -> NormalizedType {
    let t = raw.to_lowercase();
    if t.contains("array") {
        NormalizedType::Array
    } else if t.contains("map") || t.contains("tuple") || t.contains("json") {
        NormalizedType::Json
    } else if t.contains("bool") {
        NormalizedType::Boolean
    } else if t.contains("datetime") {
        NormalizedType::Timestamp
    } else if t.contains("date") {
        NormalizedType::Date
    } else if t.contains("int") {
        NormalizedType::Integer
    } else if t.contains("float") || t.contains("double") || t.contains("decimal") {
        NormalizedType::Number
    } else {
        NormalizedType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_clickhouse_types() {
        assert_eq!(normalize_clickhouse_type("UInt64"), NormalizedType::Integer);
        assert_eq!(
            normalize_clickhouse_type("Nullable(Int32)"),
            NormalizedType::Integer
        );
        assert_eq!(normalize_clickhouse_type("Float64"), NormalizedType::Number);
        assert_eq!(
            normalize_clickhouse_type("Decimal(18, 4)"),
            NormalizedType::Number
        );
        assert_eq!(normalize_clickhouse_type("String"), NormalizedType::String);
        assert_eq!(
            normalize_clickhouse_type("FixedString(16)"),
            NormalizedType::String
        );
        assert_eq!(normalize_clickhouse_type("Date"), NormalizedType::Date);
        assert_eq!(
            normalize_clickhouse_type("DateTime64(3)"),
            NormalizedType::Timestamp
        );
        assert_eq!(
            normalize_clickhouse_type("Array(String)"),
            NormalizedType::Array
        );
        assert_eq!(
            normalize_clickhouse_type("Map(String, UInt8)"),
            NormalizedType::Json
        );
    }

    #[test]
    fn parses_json_each_row_lines() {
        let data = b"{\"a\": 1, \"b\": \"x\"}\n{\"a\": 2, \"b\": \"y\"}\n";
        let rows = parse_json_lines(data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("a"), Some(&serde_json::json!(2)));
    }
}
