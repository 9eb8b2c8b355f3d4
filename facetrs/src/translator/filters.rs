//! Filter tree rendering.
//!
//! Conditions render to `<column> <op> <literal>` fragments; groups wrap
//! their children in parentheses joined by the group's logic token.
//! Unknown operators are skipped with a warning rather than failing the
//! whole query.

use serde_json::Value;

use crate::dialect::Dialect;
use crate::query::{FilterNode, TimeRange};

use super::time;

pub(crate) fn build_where(
    dialect: &(dyn Dialect + Send + Sync),
    filters: &[FilterNode],
    time_range: Option<&TimeRange>,
) -> String {
    let mut conditions: Vec<String> = filters
        .iter()
        .filter_map(|node| render_node(dialect, node))
        .collect();

    if let Some(time_range) = time_range {
        if let Some(condition) = time::render_time_range(dialect, time_range) {
            conditions.push(condition);
        }
    }

    if conditions.is_empty() {
        return String::new();
    }
    format!("WHERE {}", conditions.join(" AND "))
}

fn render_node(dialect: &(dyn Dialect + Send + Sync), node: &FilterNode) -> Option<String> {
    match node {
        FilterNode::Group { logic, conditions } => {
            let parts: Vec<String> = conditions
                .iter()
                .filter_map(|child| render_node(dialect, child))
                .collect();
            if parts.is_empty() {
                return None;
            }
            Some(format!("({})", parts.join(&format!(" {} ", logic.as_sql()))))
        }
        FilterNode::Condition {
            column,
            operator,
            value,
        } => render_condition(dialect, column, operator, value.as_ref()),
    }
}

fn render_condition(
    dialect: &(dyn Dialect + Send + Sync),
    column: &str,
    operator: &str,
    value: Option<&Value>,
) -> Option<String> {
    match operator {
        "is_null" => return Some(format!("{column} IS NULL")),
        "is_not_null" => return Some(format!("{column} IS NOT NULL")),
        _ => {}
    }

    let Some(value) = value else {
        tracing::warn!(column, operator, "filter condition has no value, skipping");
        return None;
    };

    match operator {
        "=" | "!=" | ">" | ">=" | "<" | "<=" => {
            Some(format!("{column} {operator} {}", render_literal(value)))
        }
        "in" => Some(format!("{column} IN ({})", render_list(value))),
        "not_in" => Some(format!("{column} NOT IN ({})", render_list(value))),
        "contains" => Some(render_like(dialect, column, &format!("%{}%", raw_text(value)))),
        "starts_with" => Some(render_like(dialect, column, &format!("{}%", raw_text(value)))),
        "ends_with" => Some(render_like(dialect, column, &format!("%{}", raw_text(value)))),
        _ => {
            tracing::warn!(operator, "unsupported filter operator, skipping");
            None
        }
    }
}

fn render_like(dialect: &(dyn Dialect + Send + Sync), column: &str, pattern: &str) -> String {
    format!("{column} {} '{pattern}'", dialect.like_op())
}

/// Render a scalar as a SQL literal. Strings are quoted with embedded
/// single quotes doubled; the caller is otherwise trusted.
fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape(s)),
        other => format!("'{}'", escape(&other.to_string())),
    }
}

/// Render the operand of IN/NOT IN. Arrays become a comma-separated literal
/// list; a scalar is passed through as-is for pre-rendered lists.
fn render_list(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_literal)
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => escape(s),
        other => other.to_string(),
    }
}

/// Text of a value inside a LIKE pattern, quotes escaped.
fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => escape(s),
        other => escape(&other.to_string()),
    }
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('\'', "''")
}
