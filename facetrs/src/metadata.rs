//! Metadata models describing tables, columns and relationships of a
//! registered connection, normalized across backends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub name: String,
    #[serde(rename = "schema")]
    pub schema_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `table` or `view`.
    #[serde(rename = "type")]
    pub table_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub explorable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Normalized type from [`NormalizedType`]'s vocabulary.
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    /// `"table.column"` when the column references another table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_map: Option<BTreeMap<String, String>>,
    pub explorable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMetadata {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    /// one-to-one, one-to-many, many-to-one, many-to-many.
    pub relationship: String,
    /// Whether the relationship was inferred from the database as opposed
    /// to declared by hand.
    pub automatic: bool,
}

/// The triple a driver's metadata extraction produces; the cache stores and
/// replaces it atomically.
#[derive(Debug, Clone, Default)]
pub struct DatabaseCatalog {
    pub tables: Vec<TableMetadata>,
    pub columns: Vec<ColumnMetadata>,
    pub relationships: Vec<RelationshipMetadata>,
}

/// Display-only fields a client may patch on a cached table entry. Never
/// touches the underlying database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadataPatch {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub explorable: Option<bool>,
}

/// Common type vocabulary all backend-native column types normalize into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedType {
    Integer,
    Number,
    String,
    Boolean,
    Date,
    Timestamp,
    Json,
    Array,
}

impl NormalizedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedType::Integer => "integer",
            NormalizedType::Number => "number",
            NormalizedType::String => "string",
            NormalizedType::Boolean => "boolean",
            NormalizedType::Date => "date",
            NormalizedType::Timestamp => "timestamp",
            NormalizedType::Json => "json",
            NormalizedType::Array => "array",
        }
    }
}

impl std::fmt::Display for NormalizedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
