//! PostgreSQL backend driver built on a deadpool connection pool.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_postgres::types::ToSql;

use crate::connection::Connection;
use crate::dialect::PostgresDialect;
use crate::error::{FacetError, Result};
use crate::metadata::{
    ColumnMetadata, DatabaseCatalog, NormalizedType, RelationshipMetadata, TableMetadata,
};
use crate::query::{ColumnInfo, QueryExplainResult};

use super::{BackendDriver, BatchSender, ParamMap, RawQueryOutput, RowMap, RowStream, STREAM_BATCH_ROWS};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_SIZE: usize = 10;

pub struct PostgresDriver {
    connection: Connection,
    pool: Option<deadpool_postgres::Pool>,
    dialect: PostgresDialect,
}

impl PostgresDriver {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            pool: None,
            dialect: PostgresDialect,
        }
    }

    fn build_pool(connection: &Connection) -> Result<deadpool_postgres::Pool> {
        let config = &connection.config;
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = config.host.clone();
        cfg.port = config.port;
        cfg.user = config.user.clone();
        cfg.password = config.password.clone();
        cfg.dbname = config.database.clone();
        cfg.ssl_mode = Some(if config.ssl.unwrap_or(false) {
            deadpool_postgres::SslMode::Prefer
        } else {
            deadpool_postgres::SslMode::Disable
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(POOL_SIZE));

        cfg.create_pool(
            Some(deadpool_postgres::Runtime::Tokio1),
            tokio_postgres::NoTls,
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create PostgreSQL pool");
            FacetError::Backend(format!("create postgres pool: {e}"))
        })
    }

    async fn acquire(&self) -> Result<deadpool_postgres::Object> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| FacetError::Backend("postgres driver is not connected".to_string()))?;
        tokio::time::timeout(CONNECT_TIMEOUT, pool.get())
            .await
            .map_err(|_| FacetError::Backend("postgres connection acquire timed out".to_string()))?
            .map_err(|e| FacetError::Backend(format!("get postgres connection: {e}")))
    }
}

#[async_trait]
impl BackendDriver for PostgresDriver {
    fn dialect(&self) -> &(dyn crate::dialect::Dialect + Send + Sync) {
        &self.dialect
    }

    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        tracing::info!(id = %self.connection.id, "creating PostgreSQL connection pool");
        self.pool = Some(Self::build_pool(&self.connection)?);
        // Surface bad settings now rather than on the first query
        self.acquire().await.map(drop)
    }

    async fn test_connection(&self) -> (bool, String) {
        let probe = async {
            let pool = Self::build_pool(&self.connection)?;
            let client = tokio::time::timeout(CONNECT_TIMEOUT, pool.get())
                .await
                .map_err(|_| FacetError::Backend("connection acquire timed out".to_string()))?
                .map_err(|e| FacetError::Backend(format!("get postgres connection: {e}")))?;
            let row = client
                .query_one("SELECT version()", &[])
                .await
                .map_err(|e| FacetError::Backend(format!("probe query: {e}")))?;
            Ok::<String, FacetError>(row.get::<_, String>(0))
        };
        match probe.await {
            Ok(version) => (
                true,
                format!("Connection successful. PostgreSQL version: {version}"),
            ),
            Err(e) => {
                tracing::error!(error = %e, "connection test failed");
                (false, format!("Connection failed: {e}"))
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<DatabaseCatalog> {
        let start = Instant::now();
        let client = self.acquire().await?;

        let tables_sql = r#"
            SELECT
                t.table_name AS name,
                t.table_schema AS schema,
                obj_description(pgc.oid) AS description,
                CASE WHEN t.table_type = 'VIEW' THEN 'view' ELSE 'table' END AS type,
                pg_stat_get_live_tuples(pgc.oid)::bigint AS row_count
            FROM information_schema.tables t
            JOIN pg_class pgc ON pgc.relname = t.table_name
            JOIN pg_namespace n ON pgc.relnamespace = n.oid AND n.nspname = t.table_schema
            WHERE t.table_schema NOT IN ('pg_catalog', 'information_schema')
              AND t.table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY t.table_schema, t.table_name
        "#;
        let table_rows = client
            .query(tables_sql, &[])
            .await
            .map_err(|e| FacetError::Backend(format!("fetch tables: {e}")))?;

        let mut tables = Vec::new();
        for row in &table_rows {
            tables.push(TableMetadata {
                name: row.get("name"),
                schema_name: row.get("schema"),
                display_name: None,
                description: row.get("description"),
                table_type: row.get("type"),
                row_count: row.get("row_count"),
                category: None,
                explorable: true,
                refreshed_at: None,
                columns: Vec::new(),
            });
        }

        let columns_sql = r#"
            SELECT
                c.table_name,
                c.column_name AS name,
                c.data_type,
                c.is_nullable = 'YES' AS nullable,
                pg_catalog.col_description(pgc.oid, c.ordinal_position::int) AS description,
                pk.constraint_name IS NOT NULL AS primary_key,
                CASE WHEN fk.constraint_name IS NOT NULL
                     THEN fk.referenced_table_name || '.' || fk.referenced_column_name
                END AS foreign_key
            FROM information_schema.columns c
            JOIN pg_class pgc ON pgc.relname = c.table_name
            JOIN pg_namespace n ON pgc.relnamespace = n.oid AND n.nspname = c.table_schema
            LEFT JOIN (
                SELECT tc.constraint_name, kcu.table_name, kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
            ) pk ON pk.table_name = c.table_name AND pk.column_name = c.column_name
            LEFT JOIN (
                SELECT tc.constraint_name, kcu.table_name, kcu.column_name,
                       ccu.table_name AS referenced_table_name,
                       ccu.column_name AS referenced_column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage ccu
                    ON tc.constraint_name = ccu.constraint_name
                    AND tc.table_schema = ccu.table_schema
                WHERE tc.constraint_type = 'FOREIGN KEY'
            ) fk ON fk.table_name = c.table_name AND fk.column_name = c.column_name
            WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY c.table_name, c.ordinal_position
        "#;
        let column_rows = client
            .query(columns_sql, &[])
            .await
            .map_err(|e| FacetError::Backend(format!("fetch columns: {e}")))?;

        let mut columns = Vec::new();
        for row in &column_rows {
            let data_type: String = row.get("data_type");
            columns.push(ColumnMetadata {
                name: row.get("name"),
                table_name: row.get("table_name"),
                display_name: None,
                description: row.get("description"),
                data_type: normalize_postgres_type(&data_type).as_str().to_string(),
                nullable: row.get("nullable"),
                primary_key: row.get("primary_key"),
                foreign_key: row.get("foreign_key"),
                cardinality: None,
                special_type: None,
                value_map: None,
                explorable: true,
            });
        }

        for table in &mut tables {
            table.columns = columns
                .iter()
                .filter(|c| c.table_name == table.name)
                .map(|c| c.name.clone())
                .collect();
        }

        let relationships_sql = r#"
            SELECT
                kcu.table_name AS source_table,
                kcu.column_name AS source_column,
                ccu.table_name AS target_table,
                ccu.column_name AS target_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name
                AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema NOT IN ('pg_catalog', 'information_schema')
        "#;
        let rel_rows = client
            .query(relationships_sql, &[])
            .await
            .map_err(|e| FacetError::Backend(format!("fetch relationships: {e}")))?;

        let relationships = rel_rows
            .iter()
            .map(|row| RelationshipMetadata {
                source_table: row.get("source_table"),
                source_column: row.get("source_column"),
                target_table: row.get("target_table"),
                target_column: row.get("target_column"),
                relationship: "many-to-one".to_string(),
                automatic: true,
            })
            .collect();

        tracing::debug!(
            tables = tables.len(),
            columns = columns.len(),
            ms = start.elapsed().as_millis(),
            "postgres fetch_catalog"
        );

        Ok(DatabaseCatalog {
            tables,
            columns,
            relationships,
        })
    }

    async fn execute_query(&self, sql: &str, params: Option<&ParamMap>) -> Result<RawQueryOutput> {
        if params.is_some_and(|p| !p.is_empty()) {
            // The translator inlines literals; postgres has no naive
            // substitution convention here.
            tracing::debug!("ignoring params map for postgres execution");
        }

        let start = Instant::now();
        let client = self.acquire().await?;
        tracing::trace!(sql = %sql, "executing PostgreSQL query");

        let (stmt, rows) = tokio::time::timeout(COMMAND_TIMEOUT, async {
            let stmt = client
                .prepare(sql)
                .await
                .map_err(|e| FacetError::Backend(format!("prepare query: {e}")))?;
            let rows = client
                .query(&stmt, &[])
                .await
                .map_err(|e| FacetError::Backend(format!("execute query: {e}")))?;
            Ok::<_, FacetError>((stmt, rows))
        })
        .await
        .map_err(|_| FacetError::Backend("postgres query timed out".to_string()))??;

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: Some(normalize_postgres_type(col.type_().name()).as_str().to_string()),
                cardinality: None,
            })
            .collect();

        let mut result_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            result_rows.push(row_to_json(row));
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            rows = result_rows.len(),
            columns = columns.len(),
            ms = elapsed.as_millis(),
            "postgres execute_query"
        );

        Ok(RawQueryOutput {
            columns,
            rows: result_rows,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    async fn stream_query(&self, sql: &str) -> Result<RowStream> {
        let pool = self
            .pool
            .as_ref()
            .cloned()
            .ok_or_else(|| FacetError::Backend("postgres driver is not connected".to_string()))?;
        let sql = sql.to_string();
        let (tx, rx) = mpsc::channel(STREAM_BATCH_ROWS);

        tokio::spawn(async move {
            let mut sender = BatchSender::new(tx);
            match produce_rows(pool, &sql, &mut sender).await {
                Ok(()) => {
                    sender.flush().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "postgres streaming query failed");
                    sender.fail(e).await;
                }
            }
        });

        Ok(super::rows_into_stream(rx))
    }

    async fn explain(&self, sql: &str) -> Result<QueryExplainResult> {
        let client = self.acquire().await?;
        let explain_sql = format!("EXPLAIN (FORMAT JSON) {sql}");
        let row = client
            .query_one(&explain_sql, &[])
            .await
            .map_err(|e| FacetError::Backend(format!("explain query: {e}")))?;
        let plan: Value = row.get(0);

        let cost = plan
            .get(0)
            .and_then(|p| p.get("Plan"))
            .and_then(|p| p.get("Total Cost"))
            .and_then(Value::as_f64);

        Ok(QueryExplainResult {
            plan: serde_json::to_string_pretty(&plan)?,
            cost,
            details: plan,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
        Ok(())
    }
}

async fn produce_rows(
    pool: deadpool_postgres::Pool,
    sql: &str,
    sender: &mut BatchSender,
) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| FacetError::Backend(format!("get postgres connection: {e}")))?;
    let params: Vec<&(dyn ToSql + Sync)> = Vec::new();
    let stream = client
        .query_raw(sql, params)
        .await
        .map_err(|e| FacetError::Backend(format!("execute query: {e}")))?;
    futures::pin_mut!(stream);
    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|e| FacetError::Backend(format!("stream rows: {e}")))?
    {
        if !sender.push(row_to_json(&row)).await {
            break;
        }
    }
    Ok(())
}

/// Convert a row to a column-name -> JSON value map.
fn row_to_json(row: &tokio_postgres::Row) -> RowMap {
    let mut map = RowMap::new();
    for (idx, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), pg_value_to_json(row, idx, col));
    }
    map
}

/// One cell as `Option<T>`; decode failures and SQL NULL both come back
/// as None so callers can chain widths.
fn cell<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Decode a result cell by the same normalized class the catalog uses for
/// the column's type, widening within a class until a decode sticks.
fn pg_value_to_json(
    row: &tokio_postgres::Row,
    idx: usize,
    col: &tokio_postgres::Column,
) -> Value {
    let decoded = match normalize_postgres_type(col.type_().name()) {
        NormalizedType::Boolean => cell::<bool>(row, idx).map(Value::Bool),
        NormalizedType::Integer => cell::<i64>(row, idx)
            .or_else(|| cell::<i32>(row, idx).map(i64::from))
            .or_else(|| cell::<i16>(row, idx).map(i64::from))
            .map(Value::from),
        NormalizedType::Number => cell::<f64>(row, idx)
            .or_else(|| cell::<f32>(row, idx).map(f64::from))
            .or_else(|| cell::<i64>(row, idx).map(|v| v as f64))
            .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number)),
        NormalizedType::String => cell::<String>(row, idx).map(Value::String),
        NormalizedType::Json => cell::<Value>(row, idx),
        NormalizedType::Date => {
            cell::<chrono::NaiveDate>(row, idx).map(|v| Value::String(v.to_string()))
        }
        NormalizedType::Timestamp => cell::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| Value::String(v.to_rfc3339()))
            .or_else(|| {
                cell::<chrono::NaiveDateTime>(row, idx).map(|v| Value::String(v.to_string()))
            })
            .or_else(|| cell::<chrono::NaiveTime>(row, idx).map(|v| Value::String(v.to_string()))),
        NormalizedType::Array => cell::<Vec<String>>(row, idx)
            .map(|v| Value::Array(v.into_iter().map(Value::String).collect()))
            .or_else(|| {
                cell::<Vec<i64>>(row, idx)
                    .map(|v| Value::Array(v.into_iter().map(Value::from).collect()))
            })
            .or_else(|| {
                cell::<Vec<f64>>(row, idx)
                    .map(|v| Value::Array(v.into_iter().map(Value::from).collect()))
            }),
    };

    if let Some(value) = decoded {
        return value;
    }
    // Types outside the fast paths (uuid, interval, ranges) read as text
    // when the protocol allows; otherwise the cell is reported as NULL
    cell::<String>(row, idx)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

/// Map a postgres type name (information_schema spelling or wire type
/// name) into the common vocabulary.
fn normalize_postgres_type(raw: &str) -> NormalizedType {
    let t = raw.to_lowercase();
    if t.contains("json") {
        NormalizedType::Json
    } else if t.starts_with('_') || t.contains("array") {
        NormalizedType::Array
    } else if t.contains("bool") {
        NormalizedType::Boolean
    } else if t.contains("timestamp") || t.contains("time") {
        NormalizedType::Timestamp
    } else if t == "date" {
        NormalizedType::Date
    } else if t.contains("int") || t.contains("serial") {
        NormalizedType::Integer
    } else if t.contains("numeric")
        || t.contains("decimal")
        || t.contains("real")
        || t.contains("double")
        || t.contains("float")
        || t.contains("money")
    {
        NormalizedType::Number
    } else {
        NormalizedType::String
    }
}
