//! Execute a query against the first connection of a connections.yaml.
//!
//! Usage: `cargo run --example run_query -- connections.yaml events`

use facet::query::{QueryModel, QuerySource};
use facet::{ConnectionRegistry, MetadataService, QueryService, Translator};
use futures::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facet=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "connections.yaml".to_string());
    let table = args.next().unwrap_or_else(|| "events".to_string());

    let registry = ConnectionRegistry::from_file(&config_path)?;
    let connection = registry
        .list()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no connections configured in {config_path}"))?;
    println!("using connection {} ({})", connection.id, connection.kind);

    let metadata = MetadataService::new();
    let tables = metadata.get_tables(&connection).await?;
    println!("{} tables discovered", tables.len());

    let query = QueryModel {
        source: Some(QuerySource {
            connection_id: connection.id.clone(),
            table,
        }),
        limit: Some(10),
        ..Default::default()
    };

    let service = QueryService::new();
    let result = service.execute(&registry, &query).await?;

    println!("sql:\n{}", result.sql);
    match &result.error {
        Some(error) => println!("query failed: {error}"),
        None => {
            println!(
                "{} rows in {:.3}s",
                result.row_count, result.execution_time
            );
            for row in result.data.iter().take(10) {
                println!("{}", serde_json::to_string(row)?);
            }
        }
    }

    // The same query again, but pulled through the streaming path
    let mut driver = facet::create_driver(&connection)?;
    driver.connect().await?;
    let sql = Translator::new(driver.dialect()).translate(&query)?;
    let mut rows = driver.stream_query(&sql).await?;
    let mut streamed = 0usize;
    while let Some(row) = rows.next().await {
        row?;
        streamed += 1;
    }
    driver.close().await?;
    println!("streamed {streamed} rows");
    Ok(())
}
