pub mod backends;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod metadata;
pub mod metadata_service;
pub mod query;
pub mod query_service;
pub mod registry;
pub mod translator;

pub use backends::{create_driver, test_connection, BackendDriver, RawQueryOutput, RowStream};
pub use connection::{Connection, ConnectionConfig, ConnectionKind, ConnectionTestResult};
pub use error::{FacetError, Result};
pub use metadata::{ColumnMetadata, DatabaseCatalog, RelationshipMetadata, TableMetadata};
pub use metadata_service::MetadataService;
pub use query::{QueryModel, QueryResult};
pub use query_service::QueryService;
pub use registry::ConnectionRegistry;
pub use translator::Translator;

// Dialect re-exports
pub use dialect::Dialect;
pub use dialect::{BigQueryDialect, ClickHouseDialect, PostgresDialect, SnowflakeDialect};

// Driver re-exports
#[cfg(feature = "postgres")]
pub use backends::PostgresDriver;
#[cfg(feature = "clickhouse")]
pub use backends::ClickHouseDriver;
#[cfg(feature = "bigquery")]
pub use backends::BigQueryDriver;
#[cfg(feature = "snowflake")]
pub use backends::SnowflakeDriver;
