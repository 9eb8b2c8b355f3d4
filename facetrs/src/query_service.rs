//! Query orchestration: resolve the connection, build and connect a
//! driver, translate, optionally run the COUNT pre-query, execute, and
//! assemble the result envelope. The driver is closed on every exit path.

use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;

use crate::backends::{create_driver, BackendDriver, RawQueryOutput};
use crate::connection::Connection;
use crate::error::{FacetError, Result};
use crate::query::{
    QueryExplainResult, QueryHistoryEntry, QueryModel, QueryResult, QueryValidationResult,
};
use crate::registry::ConnectionRegistry;
use crate::translator::Translator;

#[derive(Default)]
pub struct QueryService {
    history: RwLock<Vec<QueryHistoryEntry>>,
}

impl QueryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a query against the connection named by its source.
    ///
    /// Translator and connect failures surface as errors; failures of the
    /// execution itself come back as an envelope with `error` set so the
    /// client can still render the generated SQL.
    pub async fn execute(
        &self,
        registry: &ConnectionRegistry,
        query: &QueryModel,
    ) -> Result<QueryResult> {
        let source = query.source.as_ref().ok_or_else(|| {
            FacetError::InvalidQuery("query must specify a source table".to_string())
        })?;
        let connection = registry.resolve(&source.connection_id)?;
        self.execute_on(&connection, query).await
    }

    pub async fn execute_on(
        &self,
        connection: &Connection,
        query: &QueryModel,
    ) -> Result<QueryResult> {
        let mut driver = create_driver(connection)?;
        let result = run_query(driver.as_mut(), query).await;
        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, "driver close failed");
        }

        if let Ok(envelope) = &result {
            self.record_history(&connection.id, query, envelope);
        }
        result
    }

    /// Translate without executing. On postgres the SQL is dry-run through
    /// the driver's explain to catch planner errors.
    pub async fn validate(
        &self,
        registry: &ConnectionRegistry,
        query: &QueryModel,
    ) -> Result<QueryValidationResult> {
        let source = query.source.as_ref().ok_or_else(|| {
            FacetError::InvalidQuery("query must specify a source table".to_string())
        })?;
        let connection = registry.resolve(&source.connection_id)?;

        let mut driver = create_driver(&connection)?;
        let result = validate_query(driver.as_mut(), query).await;
        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, "driver close failed");
        }
        result
    }

    /// Translate and fetch the backend's execution plan.
    pub async fn explain(
        &self,
        registry: &ConnectionRegistry,
        query: &QueryModel,
    ) -> Result<QueryExplainResult> {
        let source = query.source.as_ref().ok_or_else(|| {
            FacetError::InvalidQuery("query must specify a source table".to_string())
        })?;
        let connection = registry.resolve(&source.connection_id)?;

        let mut driver = create_driver(&connection)?;
        let result = async {
            driver.connect().await?;
            let sql = Translator::new(driver.dialect()).translate(query)?;
            driver.explain(&sql).await
        }
        .await;
        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, "driver close failed");
        }
        result
    }

    /// Most recent history entries, newest first, optionally filtered by
    /// connection.
    pub fn history(
        &self,
        limit: usize,
        offset: usize,
        connection_id: Option<&str>,
    ) -> Vec<QueryHistoryEntry> {
        let history = self.history.read().expect("history lock poisoned");
        let mut entries: Vec<QueryHistoryEntry> = history
            .iter()
            .filter(|e| connection_id.is_none_or(|id| e.connection_id == id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.into_iter().skip(offset).take(limit).collect()
    }

    pub fn history_entry(&self, id: &str) -> Option<QueryHistoryEntry> {
        self.history
            .read()
            .expect("history lock poisoned")
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    fn record_history(&self, connection_id: &str, query: &QueryModel, result: &QueryResult) {
        let entry = QueryHistoryEntry {
            id: format!("qry_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            connection_id: connection_id.to_string(),
            query: query.clone(),
            sql: result.sql.clone(),
            execution_time: result.execution_time,
            row_count: result.row_count,
            timestamp: Utc::now(),
            error: result.error.clone(),
        };
        self.history
            .write()
            .expect("history lock poisoned")
            .push(entry);
    }
}

async fn run_query(driver: &mut dyn BackendDriver, query: &QueryModel) -> Result<QueryResult> {
    driver.connect().await?;

    let translator = Translator::new(driver.dialect());
    let sql = translator.translate(query)?;

    // Server-side pagination runs a COUNT over the same logical query
    // first; if the main query later fails the count is discarded.
    let mut total_count = None;
    if query.is_server_pagination {
        let count_sql = translator.translate_count(query)?;
        match driver.execute_query(&count_sql, None).await {
            Ok(output) => total_count = extract_count(&output),
            Err(e) => {
                tracing::error!(error = %e, "count query failed");
                return Ok(error_envelope(sql, &e));
            }
        }
    }

    match driver.execute_query(&sql, None).await {
        Ok(output) => Ok(assemble_result(sql, output, total_count, query)),
        Err(e) => {
            tracing::error!(error = %e, "query execution failed");
            Ok(error_envelope(sql, &e))
        }
    }
}

async fn validate_query(
    driver: &mut dyn BackendDriver,
    query: &QueryModel,
) -> Result<QueryValidationResult> {
    driver.connect().await?;

    let sql = match Translator::new(driver.dialect()).translate(query) {
        Ok(sql) => sql,
        Err(e) => {
            return Ok(QueryValidationResult {
                valid: false,
                errors: vec![e.to_string()],
                warnings: Vec::new(),
                sql: String::new(),
            })
        }
    };

    if driver.dialect().name() == "postgresql" {
        return Ok(match driver.explain(&sql).await {
            Ok(_) => QueryValidationResult {
                valid: true,
                errors: Vec::new(),
                warnings: Vec::new(),
                sql,
            },
            Err(e) => QueryValidationResult {
                valid: false,
                errors: vec![e.to_string()],
                warnings: Vec::new(),
                sql,
            },
        });
    }

    Ok(QueryValidationResult {
        valid: true,
        errors: Vec::new(),
        warnings: vec![
            "Cannot validate query without executing for this database type".to_string(),
        ],
        sql,
    })
}

fn assemble_result(
    sql: String,
    output: RawQueryOutput,
    total_count: Option<u64>,
    query: &QueryModel,
) -> QueryResult {
    let row_count = output.rows.len();
    let has_more = match (query.is_server_pagination, total_count) {
        (true, Some(total)) => query.offset.unwrap_or(0) + (row_count as u64) < total,
        _ => false,
    };

    QueryResult {
        columns: output.columns,
        data: output.rows,
        row_count,
        total_count,
        execution_time: output.elapsed_secs,
        sql,
        warnings: Vec::new(),
        error: None,
        has_more,
    }
}

fn error_envelope(sql: String, err: &FacetError) -> QueryResult {
    QueryResult {
        columns: Vec::new(),
        data: Vec::new(),
        row_count: 0,
        total_count: None,
        execution_time: 0.0,
        sql,
        warnings: Vec::new(),
        error: Some(err.to_string()),
        has_more: false,
    }
}

/// Pull the integer count out of the single COUNT-query row. Some
/// backends upcase the alias, so the lookup is case-insensitive.
fn extract_count(output: &RawQueryOutput) -> Option<u64> {
    let row = output.rows.first()?;
    let value = row
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("count"))
        .map(|(_, value)| value)?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.round() as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::RowMap;

    fn count_output(value: Value, column: &str) -> RawQueryOutput {
        let mut row = RowMap::new();
        row.insert(column.to_string(), value);
        RawQueryOutput {
            columns: Vec::new(),
            rows: vec![row],
            elapsed_secs: 0.01,
        }
    }

    #[test]
    fn extracts_count_from_any_case() {
        let output = count_output(serde_json::json!(120), "count");
        assert_eq!(extract_count(&output), Some(120));

        let output = count_output(serde_json::json!(120), "COUNT");
        assert_eq!(extract_count(&output), Some(120));

        // backends that stringify integers
        let output = count_output(serde_json::json!("120"), "count");
        assert_eq!(extract_count(&output), Some(120));

        let output = RawQueryOutput::default();
        assert_eq!(extract_count(&output), None);
    }

    #[test]
    fn has_more_accounts_for_offset() {
        let query = QueryModel {
            is_server_pagination: true,
            limit: Some(50),
            offset: Some(100),
            ..Default::default()
        };
        let output = RawQueryOutput {
            columns: Vec::new(),
            rows: vec![RowMap::new(); 50],
            elapsed_secs: 0.2,
        };
        let result = assemble_result("SELECT 1".to_string(), output, Some(200), &query);
        assert!(result.has_more);
        assert_eq!(result.total_count, Some(200));

        let output = RawQueryOutput {
            columns: Vec::new(),
            rows: vec![RowMap::new(); 50],
            elapsed_secs: 0.2,
        };
        let result = assemble_result("SELECT 1".to_string(), output, Some(150), &query);
        assert!(!result.has_more);
    }

    #[test]
    fn error_envelope_preserves_sql() {
        let envelope = error_envelope(
            "SELECT *\nFROM public.events".to_string(),
            &FacetError::Backend("boom".to_string()),
        );
        assert_eq!(envelope.row_count, 0);
        assert_eq!(envelope.sql, "SELECT *\nFROM public.events");
        assert_eq!(envelope.error.as_deref(), Some("backend error: boom"));
    }

    #[test]
    fn history_is_newest_first_and_filterable() {
        let service = QueryService::new();
        let query = QueryModel::default();
        let mut result = QueryResult {
            sql: "SELECT 1".to_string(),
            ..Default::default()
        };
        service.record_history("c1", &query, &result);
        // distinct timestamps so ordering is deterministic
        std::thread::sleep(std::time::Duration::from_millis(2));
        result.sql = "SELECT 2".to_string();
        service.record_history("c2", &query, &result);

        let all = service.history(10, 0, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sql, "SELECT 2");

        let filtered = service.history(10, 0, Some("c1"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].connection_id, "c1");

        let entry = service.history_entry(&filtered[0].id).unwrap();
        assert_eq!(entry.sql, "SELECT 1");
    }
}
