//! Integration tests for SQL translation across the four dialects.

use facet::dialect::{
    BigQueryDialect, ClickHouseDialect, Dialect, PostgresDialect, SnowflakeDialect,
};
use facet::query::{
    AggFunction, Aggregation, CustomRange, FilterLogic, FilterNode, QueryModel, QuerySource,
    SortDirection, SortOrder, TimeGranularity, TimeRange, Visualization,
};
use facet::{FacetError, Translator};

fn source(table: &str) -> Option<QuerySource> {
    Some(QuerySource {
        connection_id: "c1".to_string(),
        table: table.to_string(),
    })
}

fn condition(column: &str, operator: &str, value: serde_json::Value) -> FilterNode {
    FilterNode::Condition {
        column: column.to_string(),
        operator: operator.to_string(),
        value: Some(value),
    }
}

fn count_agg(alias: &str) -> Aggregation {
    Aggregation {
        column: None,
        function: AggFunction::Count,
        alias: Some(alias.to_string()),
    }
}

fn visualization(kind: &str) -> Option<Visualization> {
    Some(Visualization {
        kind: kind.to_string(),
        config: Default::default(),
    })
}

#[test]
fn minimal_postgres_select() {
    let query = QueryModel {
        source: source("events"),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert_eq!(sql, "SELECT *\nFROM public.events\n\n\n\n");
}

#[test]
fn qualified_table_is_not_reprefixed() {
    let query = QueryModel {
        source: source("analytics.events"),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("FROM analytics.events"));
}

#[test]
fn grouped_count_with_filter_sort_and_limit() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![condition("status", "=", serde_json::json!("active"))],
        group_by: vec!["service".to_string()],
        agg: vec![count_agg("event_count")],
        sort: vec![SortOrder {
            column: "event_count".to_string(),
            direction: SortDirection::Desc,
        }],
        limit: Some(10),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("SELECT service, COUNT(*) AS event_count"));
    assert!(sql.contains("FROM public.events"));
    assert!(sql.contains("WHERE status = 'active'"));
    assert!(sql.contains("GROUP BY service"));
    assert!(sql.contains("ORDER BY event_count DESC"));
    assert!(sql.contains("LIMIT 10"));
}

#[test]
fn nested_or_group_renders_in_order() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![
            condition("ts", ">=", serde_json::json!("2025-03-01T00:00:00Z")),
            FilterNode::Group {
                logic: FilterLogic::Or,
                conditions: vec![
                    condition("country", "=", serde_json::json!("US")),
                    condition("country", "=", serde_json::json!("CA")),
                ],
            },
        ],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains(
        "WHERE ts >= '2025-03-01T00:00:00Z' AND (country = 'US' OR country = 'CA')"
    ));
}

#[test]
fn deeply_nested_groups() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![FilterNode::Group {
            logic: FilterLogic::And,
            conditions: vec![
                condition("a", "=", serde_json::json!(1)),
                FilterNode::Group {
                    logic: FilterLogic::Or,
                    conditions: vec![
                        condition("b", "=", serde_json::json!(2)),
                        condition("c", "=", serde_json::json!(3)),
                    ],
                },
            ],
        }],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE (a = 1 AND (b = 2 OR c = 3))"));
}

#[test]
fn clickhouse_time_bucketing_for_line_charts() {
    let query = QueryModel {
        source: source("events"),
        visualization: visualization("line"),
        granularity: Some(TimeGranularity::Day),
        time_range: Some(TimeRange {
            column: Some("ts".to_string()),
            range: "last_7_day".to_string(),
            granularity: None,
            custom_range: None,
        }),
        group_by: vec!["ts".to_string(), "service".to_string()],
        agg: vec![count_agg("n")],
        ..Default::default()
    };
    let sql = Translator::new(&ClickHouseDialect).translate(&query).unwrap();
    assert!(sql.contains("toStartOfDay(ts) AS trunc_ts_day, service, COUNT(*) AS n"));
    assert!(sql.contains("GROUP BY trunc_ts_day, service"));
    // the raw column must not appear in the GROUP BY
    assert!(!sql.contains("GROUP BY ts"));
}

#[test]
fn bucketing_requires_time_column_in_group_by() {
    let query = QueryModel {
        source: source("events"),
        visualization: visualization("line"),
        granularity: Some(TimeGranularity::Day),
        time_range: Some(TimeRange {
            column: Some("ts".to_string()),
            range: "last_7_day".to_string(),
            granularity: None,
            custom_range: None,
        }),
        group_by: vec!["service".to_string()],
        agg: vec![count_agg("n")],
        ..Default::default()
    };
    let sql = Translator::new(&ClickHouseDialect).translate(&query).unwrap();
    assert!(!sql.contains("toStartOfDay"));
    assert!(sql.contains("GROUP BY service"));
}

#[test]
fn bucketing_alias_flattens_dotted_columns() {
    let query = QueryModel {
        source: source("events"),
        visualization: visualization("line"),
        granularity: Some(TimeGranularity::Month),
        time_range: Some(TimeRange {
            column: Some("events.ts".to_string()),
            range: "this_year".to_string(),
            granularity: None,
            custom_range: None,
        }),
        group_by: vec!["events.ts".to_string()],
        agg: vec![count_agg("n")],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("DATE_TRUNC('month', events.ts) AS trunc_events_ts_month"));
    assert!(sql.contains("GROUP BY trunc_events_ts_month"));
}

#[test]
fn pagination_emits_limit_and_offset() {
    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        limit: Some(50),
        offset: Some(100),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("LIMIT 50 OFFSET 100"));
}

#[test]
fn pagination_offset_zero_still_emitted() {
    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        limit: Some(25),
        offset: Some(0),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("LIMIT 25 OFFSET 0"));
}

#[test]
fn pagination_requires_limit_and_offset() {
    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        limit: Some(50),
        ..Default::default()
    };
    let err = Translator::new(&PostgresDialect).translate(&query).unwrap_err();
    assert!(matches!(err, FacetError::InvalidQuery(_)));

    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        offset: Some(0),
        ..Default::default()
    };
    assert!(Translator::new(&PostgresDialect).translate(&query).is_err());
}

#[test]
fn offset_without_pagination_is_rejected() {
    let query = QueryModel {
        source: source("events"),
        offset: Some(10),
        ..Default::default()
    };
    let err = Translator::new(&PostgresDialect).translate(&query).unwrap_err();
    assert!(matches!(err, FacetError::InvalidQuery(_)));
}

#[test]
fn count_wrapper_strips_pagination() {
    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        limit: Some(50),
        offset: Some(100),
        ..Default::default()
    };

    let translator = Translator::new(&PostgresDialect);
    let count_sql = translator.translate_count(&query).unwrap();
    assert!(count_sql.starts_with("SELECT COUNT(*) AS count FROM ("));
    assert!(!count_sql.contains("LIMIT"));
    assert!(!count_sql.contains("OFFSET"));

    // the wrapped query matches a translation with pagination cleared
    let mut inner = query.clone();
    inner.limit = None;
    inner.offset = None;
    inner.is_server_pagination = false;
    let inner_sql = translator.translate(&inner).unwrap();
    assert_eq!(count_sql, format!("SELECT COUNT(*) AS count FROM ({inner_sql})"));
}

#[test]
fn clickhouse_count_wrapper_aliases_the_subquery() {
    let query = QueryModel {
        source: source("events"),
        is_server_pagination: true,
        limit: Some(50),
        offset: Some(0),
        ..Default::default()
    };
    let count_sql = Translator::new(&ClickHouseDialect)
        .translate_count(&query)
        .unwrap();
    assert!(count_sql.ends_with(") AS sub_query"));
}

#[test]
fn contains_operator_dialect_split() {
    let query = QueryModel {
        source: source("users"),
        filters: vec![condition("name", "contains", serde_json::json!("Jo"))],
        ..Default::default()
    };
    let pg = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(pg.contains("name ILIKE '%Jo%'"));
    let ch = Translator::new(&ClickHouseDialect).translate(&query).unwrap();
    assert!(ch.contains("name LIKE '%Jo%'"));
}

#[test]
fn starts_and_ends_with_place_wildcards() {
    let query = QueryModel {
        source: source("users"),
        filters: vec![
            condition("name", "starts_with", serde_json::json!("Jo")),
            condition("email", "ends_with", serde_json::json!(".io")),
        ],
        ..Default::default()
    };
    let sql = Translator::new(&SnowflakeDialect).translate(&query).unwrap();
    assert!(sql.contains("name LIKE 'Jo%'"));
    assert!(sql.contains("email LIKE '%.io'"));
}

#[test]
fn in_and_not_in_render_lists() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![
            condition("country", "in", serde_json::json!(["US", "CA"])),
            condition("tier", "not_in", serde_json::json!([1, 2])),
        ],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("country IN ('US', 'CA')"));
    assert!(sql.contains("tier NOT IN (1, 2)"));
}

#[test]
fn null_operators_ignore_value() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![
            FilterNode::Condition {
                column: "deleted_at".to_string(),
                operator: "is_null".to_string(),
                value: None,
            },
            FilterNode::Condition {
                column: "user_id".to_string(),
                operator: "is_not_null".to_string(),
                value: None,
            },
        ],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE deleted_at IS NULL AND user_id IS NOT NULL"));
}

#[test]
fn unknown_operator_is_skipped_not_fatal() {
    let query = QueryModel {
        source: source("events"),
        filters: vec![
            condition("a", "between", serde_json::json!(5)),
            condition("status", "=", serde_json::json!("ok")),
        ],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE status = 'ok'"));
    assert!(!sql.contains("between"));
}

#[test]
fn string_values_escape_single_quotes() {
    let query = QueryModel {
        source: source("users"),
        filters: vec![condition("name", "=", serde_json::json!("O'Brien"))],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("name = 'O''Brien'"));
}

#[test]
fn custom_time_range_bounds() {
    let mut query = QueryModel {
        source: source("events"),
        time_range: Some(TimeRange {
            column: Some("ts".to_string()),
            range: "custom".to_string(),
            granularity: None,
            custom_range: Some(CustomRange {
                from: Some("2025-01-01".to_string()),
                to: Some("2025-02-01".to_string()),
            }),
        }),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE ts BETWEEN '2025-01-01' AND '2025-02-01'"));

    query.time_range.as_mut().unwrap().custom_range = Some(CustomRange {
        from: Some("2025-01-01".to_string()),
        to: None,
    });
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE ts >= '2025-01-01'"));

    query.time_range.as_mut().unwrap().custom_range = Some(CustomRange {
        from: None,
        to: Some("2025-02-01".to_string()),
    });
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("WHERE ts <= '2025-02-01'"));
}

#[test]
fn relative_time_ranges_per_dialect() {
    let make = |range: &str| QueryModel {
        source: source("events"),
        time_range: Some(TimeRange {
            column: Some("ts".to_string()),
            range: range.to_string(),
            granularity: None,
            custom_range: None,
        }),
        ..Default::default()
    };

    let query = make("last_7_day");
    let pg = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(pg.contains("ts >= CURRENT_TIMESTAMP - INTERVAL '7 day'"));
    let ch = Translator::new(&ClickHouseDialect).translate(&query).unwrap();
    assert!(ch.contains("ts >= now() - INTERVAL 7 day"));
    let bq = Translator::new(&BigQueryDialect).translate(&query).unwrap();
    assert!(bq.contains("ts >= TIMESTAMP_SUB(CURRENT_TIMESTAMP(), INTERVAL 7 DAY)"));
    let sf = Translator::new(&SnowflakeDialect).translate(&query).unwrap();
    assert!(sf.contains("ts >= DATEADD(day, -7, CURRENT_TIMESTAMP())"));

    let query = make("this_month");
    let pg = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(pg.contains("ts >= DATE_TRUNC('month', CURRENT_TIMESTAMP)"));
    let ch = Translator::new(&ClickHouseDialect).translate(&query).unwrap();
    assert!(ch.contains("ts >= toStartOfMonth(now())"));
}

#[test]
fn time_range_without_column_emits_no_clause() {
    let query = QueryModel {
        source: source("events"),
        time_range: Some(TimeRange {
            column: None,
            range: "last_7_day".to_string(),
            granularity: None,
            custom_range: None,
        }),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(!sql.contains("WHERE"));
}

#[test]
fn unknown_time_range_is_skipped() {
    let query = QueryModel {
        source: source("events"),
        time_range: Some(TimeRange {
            column: Some("ts".to_string()),
            range: "yesterday_ish".to_string(),
            granularity: None,
            custom_range: None,
        }),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(!sql.contains("WHERE"));
}

#[test]
fn table_view_applies_aggregation_to_selected_fields() {
    let query = QueryModel {
        source: source("orders"),
        visualization: visualization("table"),
        group_by: vec!["region".to_string()],
        agg: vec![Aggregation {
            column: None,
            function: AggFunction::Sum,
            alias: None,
        }],
        selected_fields: vec!["orders.price".to_string(), "region".to_string()],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    // the grouped dimension is projected once, the rest aggregated
    assert!(sql.contains("SELECT region, SUM(orders.price) AS sum_price"));
}

#[test]
fn table_view_count_collapses_selected_fields() {
    let query = QueryModel {
        source: source("orders"),
        visualization: visualization("table"),
        group_by: vec!["region".to_string()],
        agg: vec![count_agg("total")],
        selected_fields: vec!["price".to_string(), "quantity".to_string()],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("SELECT region, COUNT(*) AS total"));
    assert!(!sql.contains("price"));
}

#[test]
fn table_view_without_agg_projects_fields() {
    let query = QueryModel {
        source: source("orders"),
        visualization: visualization("table"),
        selected_fields: vec!["id".to_string(), "price".to_string()],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.starts_with("SELECT id, price\n"));
}

#[test]
fn aggregation_missing_column_falls_back_to_selected_field() {
    let query = QueryModel {
        source: source("orders"),
        group_by: vec!["region".to_string()],
        agg: vec![Aggregation {
            column: None,
            function: AggFunction::Avg,
            alias: None,
        }],
        selected_fields: vec!["orders.price".to_string()],
        visualization: visualization("bar"),
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("AVG(orders.price) AS avg_price"));
}

#[test]
fn aggregation_missing_column_with_no_fields_fails() {
    let query = QueryModel {
        source: source("orders"),
        group_by: vec!["region".to_string()],
        agg: vec![Aggregation {
            column: None,
            function: AggFunction::Sum,
            alias: None,
        }],
        visualization: visualization("bar"),
        ..Default::default()
    };
    let err = Translator::new(&PostgresDialect).translate(&query).unwrap_err();
    match err {
        FacetError::InvalidQuery(msg) => assert!(msg.contains("SUM")),
        other => panic!("expected InvalidQuery, got {other}"),
    }
}

#[test]
fn explicit_agg_alias_wins_over_derived() {
    let query = QueryModel {
        source: source("orders"),
        group_by: vec!["region".to_string()],
        agg: vec![Aggregation {
            column: Some("price".to_string()),
            function: AggFunction::Max,
            alias: Some("peak".to_string()),
        }],
        ..Default::default()
    };
    let sql = Translator::new(&PostgresDialect).translate(&query).unwrap();
    assert!(sql.contains("MAX(price) AS peak"));
}

#[test]
fn missing_source_is_invalid() {
    let query = QueryModel::default();
    assert!(matches!(
        Translator::new(&PostgresDialect).translate(&query),
        Err(FacetError::InvalidQuery(_))
    ));
}

#[test]
fn dialect_names_match_wire_tags() {
    assert_eq!(PostgresDialect.name(), "postgresql");
    assert_eq!(ClickHouseDialect.name(), "clickhouse");
    assert_eq!(BigQueryDialect.name(), "bigquery");
    assert_eq!(SnowflakeDialect.name(), "snowflake");
}
