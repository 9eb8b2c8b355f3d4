//! Snowflake dialect implementation.

use crate::query::TimeGranularity;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct SnowflakeDialect;

impl Dialect for SnowflakeDialect {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn time_trunc(&self, column: &str, granularity: TimeGranularity) -> String {
        format!("DATE_TRUNC('{}', {column})", granularity.as_str())
    }

    fn now_minus(&self, n: u32, unit: &str) -> String {
        format!("DATEADD({unit}, -{n}, CURRENT_TIMESTAMP())")
    }

    fn period_start(&self, unit: &str) -> String {
        format!("DATE_TRUNC('{unit}', CURRENT_TIMESTAMP())")
    }
}
