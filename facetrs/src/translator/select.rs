//! Projection rules.
//!
//! The SELECT list depends on the visualization: line charts with a
//! granularity lead with the truncated time column, table views apply the
//! chosen aggregation across the selected fields, and everything else
//! projects dimensions followed by aggregations.

use crate::error::{FacetError, Result};
use crate::query::{AggFunction, Aggregation, QueryModel};

use super::TimeBucket;

pub(crate) fn build_select(query: &QueryModel, bucket: Option<&TimeBucket>) -> Result<String> {
    let mut items: Vec<String> = Vec::new();

    if let Some(bucket) = bucket {
        items.push(format!("{} AS {}", bucket.expr, bucket.alias));
        for dimension in &query.group_by {
            if *dimension != bucket.column {
                items.push(dimension.clone());
            }
        }
        for agg in &query.agg {
            items.push(render_aggregation(agg, &query.selected_fields)?);
        }
    } else if query.visualization_kind() == "table" && !query.selected_fields.is_empty() {
        items.extend(query.group_by.iter().cloned());
        if let Some(first) = query.agg.first() {
            if first.function == AggFunction::Count {
                // A count collapses the selected fields to a single column
                let alias = first.alias.as_deref().filter(|a| !a.is_empty()).unwrap_or("count");
                items.push(format!("COUNT(*) AS {alias}"));
            } else {
                for field in &query.selected_fields {
                    let field = field.trim();
                    if field.is_empty() || query.group_by.iter().any(|g| g == field) {
                        continue;
                    }
                    items.push(format!(
                        "{}({field}) AS {}",
                        first.function.as_sql(),
                        agg_alias(first.function, field)
                    ));
                }
            }
        }
    } else {
        items.extend(query.group_by.iter().cloned());
        for agg in &query.agg {
            items.push(render_aggregation(agg, &query.selected_fields)?);
        }
    }

    if items.is_empty() {
        let fields: Vec<&str> = query
            .selected_fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        if !fields.is_empty() {
            return Ok(format!("SELECT {}", fields.join(", ")));
        }
        return Ok("SELECT *".to_string());
    }

    Ok(format!("SELECT {}", items.join(", ")))
}

fn render_aggregation(agg: &Aggregation, selected_fields: &[String]) -> Result<String> {
    let column = agg
        .column
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    if agg.function == AggFunction::Count && column.is_none() {
        let alias = agg.alias.as_deref().filter(|a| !a.is_empty()).unwrap_or("count");
        return Ok(format!("COUNT(*) AS {alias}"));
    }

    // A missing column falls back to the first selected field
    let column = match column.or_else(|| {
        selected_fields
            .iter()
            .map(|f| f.trim())
            .find(|f| !f.is_empty())
    }) {
        Some(column) => column,
        None => {
            return Err(FacetError::InvalidQuery(format!(
                "fields required for {} aggregation",
                agg.function.as_sql()
            )))
        }
    };

    let alias = match agg.alias.as_deref().filter(|a| !a.is_empty()) {
        Some(alias) => alias.to_string(),
        None => agg_alias(agg.function, column),
    };
    Ok(format!("{}({column}) AS {alias}", agg.function.as_sql()))
}

/// Canonical derived alias: `<function>_<column basename>`, where the
/// basename is the segment after the last dot.
pub(crate) fn agg_alias(function: AggFunction, column: &str) -> String {
    let basename = column.rsplit('.').next().unwrap_or(column);
    format!("{}_{basename}", function.as_lower())
}
