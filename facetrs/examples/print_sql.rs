//! Render the SQL for a sample query model in every supported dialect.

use facet::dialect::{
    BigQueryDialect, ClickHouseDialect, Dialect, PostgresDialect, SnowflakeDialect,
};
use facet::query::QueryModel;
use facet::Translator;

fn main() -> anyhow::Result<()> {
    let query: QueryModel = serde_json::from_value(serde_json::json!({
        "source": {"connectionId": "c1", "table": "events"},
        "filters": [
            {"column": "status", "operator": "=", "value": "active"},
            {"logic": "or", "conditions": [
                {"column": "country", "operator": "=", "value": "US"},
                {"column": "country", "operator": "=", "value": "CA"}
            ]}
        ],
        "groupBy": ["ts", "service"],
        "agg": [{"function": "count", "alias": "n"}],
        "timeRange": {"column": "ts", "range": "last_30_day"},
        "visualization": {"type": "line", "config": {}},
        "granularity": "day",
        "sort": [{"column": "n", "direction": "desc"}],
        "limit": 100
    }))?;

    let dialects: [&(dyn Dialect + Send + Sync); 4] = [
        &PostgresDialect,
        &ClickHouseDialect,
        &BigQueryDialect,
        &SnowflakeDialect,
    ];

    for dialect in dialects {
        let translator = Translator::new(dialect);
        println!("-- {} --", dialect.name());
        println!("{}\n", translator.translate(&query)?);
        println!("-- {} count --", dialect.name());
        println!("{}\n", translator.translate_count(&query)?);
    }
    Ok(())
}
