//! BigQuery (GoogleSQL) dialect implementation.

use crate::query::TimeGranularity;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct BigQueryDialect;

impl Dialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn time_trunc(&self, column: &str, granularity: TimeGranularity) -> String {
        let part = match granularity {
            TimeGranularity::Minute => "MINUTE",
            TimeGranularity::Hour => "HOUR",
            TimeGranularity::Day => "DAY",
            TimeGranularity::Week => "WEEK",
            TimeGranularity::Month => "MONTH",
        };
        format!("TIMESTAMP_TRUNC({column}, {part})")
    }

    fn now_minus(&self, n: u32, unit: &str) -> String {
        format!(
            "TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL {n} {})",
            unit.to_uppercase()
        )
    }

    fn period_start(&self, unit: &str) -> String {
        format!(
            "TIMESTAMP_TRUNC(CURRENT_TIMESTAMP(), {})",
            unit.to_uppercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_with_timestamp_trunc() {
        let dialect = BigQueryDialect;
        assert_eq!(
            dialect.time_trunc("ts", TimeGranularity::Hour),
            "TIMESTAMP_TRUNC(ts, HOUR)"
        );
    }

    #[test]
    fn relative_ranges_use_timestamp_sub() {
        let dialect = BigQueryDialect;
        assert_eq!(
            dialect.now_minus(30, "day"),
            "TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL 30 DAY)"
        );
        assert_eq!(
            dialect.period_start("month"),
            "TIMESTAMP_TRUNC(CURRENT_TIMESTAMP(), MONTH)"
        );
    }
}
