//! The JSON query IR consumed by the translator and the result envelope
//! returned to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source table of a query, resolved against the connection registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySource {
    pub connection_id: String,
    pub table: String,
}

/// A filter tree node: either a single condition or a logical group of
/// nested nodes. Groups nest to arbitrary depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group {
        logic: FilterLogic,
        conditions: Vec<FilterNode>,
    },
    Condition {
        column: String,
        operator: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    And,
    Or,
}

impl FilterLogic {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterLogic::And => "AND",
            FilterLogic::Or => "OR",
        }
    }
}

/// Aggregation functions the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggFunction::Count => "COUNT",
            AggFunction::Sum => "SUM",
            AggFunction::Avg => "AVG",
            AggFunction::Min => "MIN",
            AggFunction::Max => "MAX",
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            AggFunction::Count => "count",
            AggFunction::Sum => "sum",
            AggFunction::Avg => "avg",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
        }
    }
}

/// A single aggregation in the projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(default)]
    pub column: Option<String>,
    pub function: AggFunction,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Time bucket size applied to the time column when the visualization asks
/// for a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Minute => "minute",
            TimeGranularity::Hour => "hour",
            TimeGranularity::Day => "day",
            TimeGranularity::Week => "week",
            TimeGranularity::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRange {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Time range specification. `range` is one of `custom`,
/// `last_<N>_<unit>` or `this_<unit>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(default)]
    pub column: Option<String>,
    pub range: String,
    #[serde(default)]
    pub granularity: Option<TimeGranularity>,
    #[serde(default)]
    pub custom_range: Option<CustomRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortOrder {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// The query model: what the client sends to `POST /query/execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    #[serde(default)]
    pub source: Option<QuerySource>,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub agg: Vec<Aggregation>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub sort: Vec<SortOrder>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub is_server_pagination: bool,
    #[serde(default)]
    pub visualization: Option<Visualization>,
    #[serde(default)]
    pub selected_fields: Vec<String>,
    #[serde(default)]
    pub granularity: Option<TimeGranularity>,
}

impl QueryModel {
    /// Visualization kind with the documented `table` default.
    pub fn visualization_kind(&self) -> &str {
        self.visualization
            .as_ref()
            .map(|v| v.kind.as_str())
            .unwrap_or("table")
    }
}

/// Information about a column in query results, in result order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<String>,
}

/// Uniform result envelope for a query execution. Backend execution errors
/// are reported in `error` with empty data so clients can still render the
/// generated SQL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Wall-clock seconds between submit and result materialization.
    pub execution_time: f64,
    pub sql: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Result of validating a query without executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub sql: String,
}

/// Execution plan details reported by a driver's explain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExplainResult {
    pub plan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default)]
    pub details: Value,
}

/// An entry in the in-memory query history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHistoryEntry {
    pub id: String,
    pub connection_id: String,
    pub query: QueryModel,
    pub sql: String,
    pub execution_time: f64,
    pub row_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_node_shape_discrimination() {
        let json = serde_json::json!([
            {"column": "status", "operator": "=", "value": "active"},
            {"logic": "or", "conditions": [
                {"column": "country", "operator": "=", "value": "US"},
                {"column": "country", "operator": "=", "value": "CA"}
            ]}
        ]);
        let nodes: Vec<FilterNode> = serde_json::from_value(json).unwrap();
        assert!(matches!(nodes[0], FilterNode::Condition { .. }));
        match &nodes[1] {
            FilterNode::Group { logic, conditions } => {
                assert_eq!(*logic, FilterLogic::Or);
                assert_eq!(conditions.len(), 2);
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn query_model_camel_case_wire_format() {
        let json = serde_json::json!({
            "source": {"connectionId": "c1", "table": "events"},
            "groupBy": ["service"],
            "agg": [{"function": "count", "alias": "n"}],
            "isServerPagination": true,
            "limit": 50,
            "offset": 100,
            "selectedFields": []
        });
        let model: QueryModel = serde_json::from_value(json).unwrap();
        assert!(model.is_server_pagination);
        assert_eq!(model.group_by, vec!["service"]);
        assert_eq!(model.agg[0].function, AggFunction::Count);
        assert_eq!(model.offset, Some(100));
    }

    #[test]
    fn visualization_defaults_to_table() {
        let model = QueryModel::default();
        assert_eq!(model.visualization_kind(), "table");
    }
}
