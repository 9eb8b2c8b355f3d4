//! PostgreSQL dialect implementation.

use crate::query::TimeGranularity;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn qualify_table(&self, table: &str) -> String {
        // Unqualified tables resolve against the default schema
        if table.contains('.') {
            table.to_string()
        } else {
            format!("public.{table}")
        }
    }

    fn time_trunc(&self, column: &str, granularity: TimeGranularity) -> String {
        format!("DATE_TRUNC('{}', {column})", granularity.as_str())
    }

    fn now_minus(&self, n: u32, unit: &str) -> String {
        format!("CURRENT_TIMESTAMP - INTERVAL '{n} {unit}'")
    }

    fn period_start(&self, unit: &str) -> String {
        format!("DATE_TRUNC('{unit}', CURRENT_TIMESTAMP)")
    }

    fn like_op(&self) -> &'static str {
        "ILIKE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_bare_tables_with_public() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.qualify_table("events"), "public.events");
        assert_eq!(dialect.qualify_table("analytics.events"), "analytics.events");
    }

    #[test]
    fn truncates_with_date_trunc() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.time_trunc("ts", TimeGranularity::Day),
            "DATE_TRUNC('day', ts)"
        );
    }

    #[test]
    fn interval_arithmetic() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.now_minus(7, "day"),
            "CURRENT_TIMESTAMP - INTERVAL '7 day'"
        );
        assert_eq!(
            dialect.period_start("month"),
            "DATE_TRUNC('month', CURRENT_TIMESTAMP)"
        );
    }
}
