//! Database backend drivers.
//!
//! Each backend is implemented in its own file and gated behind a feature
//! flag. A driver owns its live client or pool, is created per request by
//! the query service and closed on every exit path.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::connection::{Connection, ConnectionConfig, ConnectionKind, ConnectionTestResult};
use crate::dialect::Dialect;
use crate::error::{FacetError, Result};
use crate::metadata::DatabaseCatalog;
use crate::query::{ColumnInfo, QueryExplainResult};

/// Rows handed through streaming reads, batch by batch.
pub const STREAM_BATCH_ROWS: usize = 100;

pub type RowMap = serde_json::Map<String, Value>;
pub type ParamMap = HashMap<String, Value>;
pub type RowStream = futures::stream::BoxStream<'static, Result<RowMap>>;

/// Raw output of a single SQL execution, before the query service wraps it
/// into the client-facing envelope.
#[derive(Debug, Clone, Default)]
pub struct RawQueryOutput {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<RowMap>,
    /// Client-side wall clock between submit and materialization, seconds.
    pub elapsed_secs: f64,
}

/// Uniform capability every backend implements.
///
/// `connect` and `close` are idempotent; `close` tolerates partial
/// construction and in-flight calls (tasks holding client clones finish on
/// their own).
#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn dialect(&self) -> &(dyn Dialect + Send + Sync);

    async fn connect(&mut self) -> Result<()>;

    /// Probe the backend with a transient client built from the connection
    /// settings. Failures are reported in the message, not as errors.
    async fn test_connection(&self) -> (bool, String);

    async fn fetch_catalog(&self) -> Result<DatabaseCatalog>;

    async fn execute_query(&self, sql: &str, params: Option<&ParamMap>) -> Result<RawQueryOutput>;

    /// Lazily yield rows through a bounded batch hand-off; the producer
    /// task owns a client clone and keeps filling until drained or dropped.
    async fn stream_query(&self, sql: &str) -> Result<RowStream>;

    async fn explain(&self, sql: &str) -> Result<QueryExplainResult>;

    async fn close(&mut self) -> Result<()>;
}

/// Select a driver implementation by the connection's type tag.
pub fn create_driver(connection: &Connection) -> Result<Box<dyn BackendDriver>> {
    tracing::debug!(id = %connection.id, kind = %connection.kind, "creating backend driver");
    match connection.kind {
        #[cfg(feature = "postgres")]
        ConnectionKind::Postgres => Ok(Box::new(postgres::PostgresDriver::new(connection.clone()))),
        #[cfg(feature = "clickhouse")]
        ConnectionKind::Clickhouse => {
            Ok(Box::new(clickhouse::ClickHouseDriver::new(connection.clone())))
        }
        #[cfg(feature = "bigquery")]
        ConnectionKind::Bigquery => Ok(Box::new(bigquery::BigQueryDriver::new(connection.clone()))),
        #[cfg(feature = "snowflake")]
        ConnectionKind::Snowflake => {
            Ok(Box::new(snowflake::SnowflakeDriver::new(connection.clone())))
        }
        other => Err(FacetError::Unsupported(other.as_str().to_string())),
    }
}

/// Probe a backend with candidate settings, without registering anything.
pub async fn test_connection(kind: ConnectionKind, config: ConnectionConfig) -> ConnectionTestResult {
    let now = chrono::Utc::now();
    let candidate = Connection {
        id: "temp".to_string(),
        name: "Test Connection".to_string(),
        kind,
        config,
        created_at: now,
        updated_at: now,
    };
    match create_driver(&candidate) {
        Ok(driver) => {
            let (success, message) = driver.test_connection().await;
            ConnectionTestResult { success, message }
        }
        Err(e) => ConnectionTestResult {
            success: false,
            message: e.to_string(),
        },
    }
}

/// Placeholder conventions for the naive parameter substitution the
/// drivers offer for interface parity. The translator inlines literals,
/// so this only runs when a caller supplies a params map explicitly.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ParamStyle {
    /// BigQuery `@name`
    At,
    /// ClickHouse `{name}`
    Brace,
    /// Snowflake `:name`
    Colon,
}

pub(crate) fn substitute_params(sql: &str, params: &ParamMap, style: ParamStyle) -> String {
    let mut sql = sql.to_string();
    for (key, value) in params {
        let placeholder = match style {
            ParamStyle::At => format!("@{key}"),
            ParamStyle::Brace => format!("{{{key}}}"),
            ParamStyle::Colon => format!(":{key}"),
        };
        if sql.contains(&placeholder) {
            sql = sql.replace(&placeholder, &param_literal(value));
        }
    }
    sql
}

fn param_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

/// Infer a normalized column type from a JSON value, for backends that
/// return untyped rows.
pub(crate) fn infer_value_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some("boolean"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer"),
        Value::Number(_) => Some("number"),
        Value::String(_) => Some("string"),
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("json"),
    }
}

/// Producer side of the streaming hand-off: buffers rows and pushes full
/// batches into the bounded channel.
pub(crate) struct BatchSender {
    tx: mpsc::Sender<Result<Vec<RowMap>>>,
    buf: Vec<RowMap>,
}

impl BatchSender {
    pub(crate) fn new(tx: mpsc::Sender<Result<Vec<RowMap>>>) -> Self {
        Self {
            tx,
            buf: Vec::with_capacity(STREAM_BATCH_ROWS),
        }
    }

    /// Returns false when the consumer is gone and production should stop.
    pub(crate) async fn push(&mut self, row: RowMap) -> bool {
        self.buf.push(row);
        if self.buf.len() >= STREAM_BATCH_ROWS {
            return self.flush().await;
        }
        true
    }

    pub(crate) async fn flush(&mut self) -> bool {
        if self.buf.is_empty() {
            return true;
        }
        let batch = std::mem::take(&mut self.buf);
        self.tx.send(Ok(batch)).await.is_ok()
    }

    pub(crate) async fn fail(self, err: FacetError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Consumer side: flatten the batch channel into a stream of rows.
pub(crate) fn rows_into_stream(rx: mpsc::Receiver<Result<Vec<RowMap>>>) -> RowStream {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|batch| (batch, rx))
    })
    .flat_map(|batch| match batch {
        Ok(rows) => stream::iter(rows.into_iter().map(Ok).collect::<Vec<_>>()),
        Err(e) => stream::iter(vec![Err(e)]),
    })
    .boxed()
}

// Feature-gated backend implementations
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;

#[cfg(feature = "clickhouse")]
mod clickhouse;
#[cfg(feature = "clickhouse")]
pub use clickhouse::ClickHouseDriver;

#[cfg(feature = "bigquery")]
mod bigquery;
#[cfg(feature = "bigquery")]
pub use bigquery::BigQueryDriver;

#[cfg(feature = "snowflake")]
mod snowflake;
#[cfg(feature = "snowflake")]
pub use snowflake::SnowflakeDriver;
