//! Time-range clause rendering.
//!
//! `custom` ranges become BETWEEN/one-sided comparisons on the supplied
//! bounds; `last_<N>_<unit>` and `this_<unit>` lean on the dialect's
//! interval hooks. Without a column no clause is emitted at all.

use crate::dialect::Dialect;
use crate::query::TimeRange;

use super::filters::escape;

const UNITS: [&str; 7] = ["minute", "hour", "day", "week", "month", "quarter", "year"];

pub(crate) fn render_time_range(
    dialect: &(dyn Dialect + Send + Sync),
    time_range: &TimeRange,
) -> Option<String> {
    let column = time_range.column.as_deref()?;
    let range = time_range.range.as_str();

    if range == "custom" {
        if let Some(custom) = &time_range.custom_range {
            let from = custom.from.as_deref().filter(|b| !b.is_empty());
            let to = custom.to.as_deref().filter(|b| !b.is_empty());
            match (from, to) {
                (Some(from), Some(to)) => {
                    return Some(format!(
                        "{column} BETWEEN '{}' AND '{}'",
                        escape(from),
                        escape(to)
                    ))
                }
                (Some(from), None) => return Some(format!("{column} >= '{}'", escape(from))),
                (None, Some(to)) => return Some(format!("{column} <= '{}'", escape(to))),
                (None, None) => {}
            }
        }
    } else if let Some(rest) = range.strip_prefix("last_") {
        if let Some((count, unit)) = rest.split_once('_') {
            if let Ok(count) = count.parse::<u32>() {
                if UNITS.contains(&unit) {
                    return Some(format!("{column} >= {}", dialect.now_minus(count, unit)));
                }
            }
        }
    } else if let Some(unit) = range.strip_prefix("this_") {
        if UNITS.contains(&unit) {
            return Some(format!("{column} >= {}", dialect.period_start(unit)));
        }
    }

    tracing::warn!(range, "unsupported time range, skipping");
    None
}
