//! Translation from the JSON query model to dialect-specific SQL.
//!
//! `translate` and `translate_count` are deterministic and side-effect
//! free; every per-dialect difference flows through the [`Dialect`] hooks.

mod filters;
mod select;
mod time;

use crate::dialect::Dialect;
use crate::error::{FacetError, Result};
use crate::query::{QueryModel, TimeGranularity};

/// Active time bucketing for a line visualization: the raw time column,
/// the dialect-rendered truncation expression and the alias the GROUP BY
/// must reference instead of the raw column.
pub(crate) struct TimeBucket {
    pub column: String,
    pub expr: String,
    pub alias: String,
}

pub struct Translator<'a> {
    dialect: &'a (dyn Dialect + Send + Sync),
}

impl<'a> Translator<'a> {
    pub fn new(dialect: &'a (dyn Dialect + Send + Sync)) -> Self {
        Self { dialect }
    }

    /// Convert a query model into a SQL string for this dialect.
    pub fn translate(&self, query: &QueryModel) -> Result<String> {
        self.validate(query)?;

        let bucket = self.time_bucket(query);
        let select_clause = select::build_select(query, bucket.as_ref())?;
        let from_clause = self.build_from(query)?;
        let where_clause = filters::build_where(self.dialect, &query.filters, query.time_range.as_ref());
        let group_by_clause = self.build_group_by(query, bucket.as_ref());
        let order_by_clause = Self::build_order_by(query);
        let limit_clause = Self::build_limit(query);

        let sql = format!(
            "{select_clause}\n{from_clause}\n{where_clause}\n{group_by_clause}\n{order_by_clause}\n{limit_clause}"
        );
        tracing::debug!(sql = %sql, "generated SQL");
        Ok(sql)
    }

    /// Wrap the translated query in a COUNT(*) for server-side pagination
    /// totals. Limit, offset and the pagination flag are cleared on the
    /// inner query.
    pub fn translate_count(&self, query: &QueryModel) -> Result<String> {
        let mut inner = query.clone();
        inner.limit = None;
        inner.offset = None;
        inner.is_server_pagination = false;
        let sql = self.translate(&inner)?;

        Ok(match self.dialect.count_subquery_alias() {
            Some(alias) => format!("SELECT COUNT(*) AS count FROM ({sql}) AS {alias}"),
            None => format!("SELECT COUNT(*) AS count FROM ({sql})"),
        })
    }

    fn validate(&self, query: &QueryModel) -> Result<()> {
        if query.is_server_pagination {
            if query.limit.is_none() || query.offset.is_none() {
                return Err(FacetError::InvalidQuery(
                    "server-side pagination requires both limit and offset".to_string(),
                ));
            }
        } else if query.offset.is_some() {
            return Err(FacetError::InvalidQuery(
                "offset is only valid with server-side pagination".to_string(),
            ));
        }
        Ok(())
    }

    /// Time bucketing applies when a line visualization declares a
    /// granularity and the time-range column is one of the grouped
    /// dimensions.
    fn time_bucket(&self, query: &QueryModel) -> Option<TimeBucket> {
        if query.visualization_kind() != "line" {
            return None;
        }
        let granularity = query.granularity?;
        let column = query.time_range.as_ref()?.column.clone()?;
        if !query.group_by.iter().any(|g| g == &column) {
            return None;
        }
        Some(TimeBucket {
            expr: self.dialect.time_trunc(&column, granularity),
            alias: trunc_alias(&column, granularity),
            column,
        })
    }

    fn build_from(&self, query: &QueryModel) -> Result<String> {
        let source = query
            .source
            .as_ref()
            .ok_or_else(|| FacetError::InvalidQuery("query must specify a source table".to_string()))?;
        Ok(format!("FROM {}", self.dialect.qualify_table(&source.table)))
    }

    fn build_group_by(&self, query: &QueryModel, bucket: Option<&TimeBucket>) -> String {
        if query.group_by.is_empty() {
            return String::new();
        }
        let columns: Vec<&str> = query
            .group_by
            .iter()
            .map(|column| match bucket {
                Some(b) if *column == b.column => b.alias.as_str(),
                _ => column.as_str(),
            })
            .collect();
        format!("GROUP BY {}", columns.join(", "))
    }

    fn build_order_by(query: &QueryModel) -> String {
        if query.sort.is_empty() {
            return String::new();
        }
        let items: Vec<String> = query
            .sort
            .iter()
            .map(|s| format!("{} {}", s.column, s.direction.as_sql()))
            .collect();
        format!("ORDER BY {}", items.join(", "))
    }

    fn build_limit(query: &QueryModel) -> String {
        if query.is_server_pagination {
            // validated: both present, offset may be 0
            let limit = query.limit.unwrap_or_default();
            let offset = query.offset.unwrap_or_default();
            return format!("LIMIT {limit} OFFSET {offset}");
        }
        match query.limit {
            Some(limit) => format!("LIMIT {limit}"),
            None => String::new(),
        }
    }
}

/// Alias for a truncated time column: `trunc_<col>_<granularity>` with dots
/// replaced so the alias stays a plain identifier.
pub(crate) fn trunc_alias(column: &str, granularity: TimeGranularity) -> String {
    format!(
        "trunc_{}_{}",
        column.replace('.', "_"),
        granularity.as_str()
    )
}
