//! ClickHouse dialect implementation.

use crate::query::TimeGranularity;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClickHouseDialect;

impl Dialect for ClickHouseDialect {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    fn time_trunc(&self, column: &str, granularity: TimeGranularity) -> String {
        let func = match granularity {
            TimeGranularity::Minute => "toStartOfMinute",
            TimeGranularity::Hour => "toStartOfHour",
            TimeGranularity::Day => "toStartOfDay",
            TimeGranularity::Week => "toStartOfWeek",
            TimeGranularity::Month => "toStartOfMonth",
        };
        format!("{func}({column})")
    }

    fn now_minus(&self, n: u32, unit: &str) -> String {
        format!("now() - INTERVAL {n} {unit}")
    }

    fn period_start(&self, unit: &str) -> String {
        let func = match unit {
            "minute" => "toStartOfMinute",
            "hour" => "toStartOfHour",
            "day" => "toStartOfDay",
            "week" => "toStartOfWeek",
            "month" => "toStartOfMonth",
            "quarter" => "toStartOfQuarter",
            _ => "toStartOfYear",
        };
        format!("{func}(now())")
    }

    fn count_subquery_alias(&self) -> Option<&'static str> {
        Some("sub_query")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_with_to_start_of() {
        let dialect = ClickHouseDialect;
        assert_eq!(
            dialect.time_trunc("ts", TimeGranularity::Day),
            "toStartOfDay(ts)"
        );
        assert_eq!(
            dialect.time_trunc("ts", TimeGranularity::Month),
            "toStartOfMonth(ts)"
        );
    }

    #[test]
    fn relative_ranges_use_now() {
        let dialect = ClickHouseDialect;
        assert_eq!(dialect.now_minus(3, "hour"), "now() - INTERVAL 3 hour");
        assert_eq!(dialect.period_start("week"), "toStartOfWeek(now())");
    }

    #[test]
    fn count_wrapper_needs_alias() {
        assert_eq!(ClickHouseDialect.count_subquery_alias(), Some("sub_query"));
    }
}
