//! Integration tests for the connection registry: a connections.yaml
//! round trip from disk, predefined immutability, and session CRUD.

use std::io::Write;

use facet::{ConnectionConfig, ConnectionKind, ConnectionRegistry, FacetError};

fn write_config(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    file.write_all(yaml.as_bytes()).expect("write temp config");
    file.flush().expect("flush temp config");
    file
}

fn scratch_config(host: &str) -> ConnectionConfig {
    ConnectionConfig {
        host: Some(host.to_string()),
        database: Some("scratch".to_string()),
        ..Default::default()
    }
}

#[test]
fn loads_predefined_connections_from_file() {
    let file = write_config(
        r#"
connections:
  - name: Analytics
    type: postgres
    config:
      host: db.internal
      port: 5432
      database: analytics
      user: facet
      password: secret
  - name: Events
    type: clickhouse
    config:
      host: ch.internal
      port: 8123
      database: events
"#,
    );

    let registry = ConnectionRegistry::from_file(file.path()).unwrap();
    let all = registry.list();
    assert_eq!(all.len(), 2);

    assert_eq!(all[0].id, "predef_0_postgres");
    assert_eq!(all[0].name, "Analytics");
    assert_eq!(all[0].kind, ConnectionKind::Postgres);
    assert_eq!(all[0].config.database.as_deref(), Some("analytics"));

    assert_eq!(all[1].id, "predef_1_clickhouse");
    assert_eq!(all[1].kind, ConnectionKind::Clickhouse);

    // ids are stable across lookups
    let fetched = registry.get("predef_1_clickhouse").unwrap();
    assert_eq!(fetched.config.host.as_deref(), Some("ch.internal"));
}

#[test]
fn file_load_substitutes_facet_env_vars() {
    std::env::set_var("FACET_REGISTRY_IT_SECRET", "from-env");
    let file = write_config(
        r#"
connections:
  - name: Analytics
    type: postgres
    config:
      host: db.internal
      password: ${FACET_REGISTRY_IT_SECRET}
      user: ${FACET_REGISTRY_IT_UNSET}
"#,
    );

    let registry = ConnectionRegistry::from_file(file.path()).unwrap();
    let conn = registry.resolve("predef_0_postgres").unwrap();
    assert_eq!(conn.config.password.as_deref(), Some("from-env"));
    // a missing variable substitutes the empty string
    assert_eq!(conn.config.user.as_deref(), Some(""));
    std::env::remove_var("FACET_REGISTRY_IT_SECRET");
}

#[test]
fn predefined_entries_are_read_only() {
    let file = write_config(
        r#"
connections:
  - name: Analytics
    type: postgres
    config:
      host: db.internal
"#,
    );
    let registry = ConnectionRegistry::from_file(file.path()).unwrap();

    assert!(registry.is_predefined("predef_0_postgres"));
    assert!(matches!(
        registry.update(
            "predef_0_postgres",
            "Renamed",
            ConnectionKind::Postgres,
            scratch_config("elsewhere")
        ),
        Err(FacetError::InvalidQuery(_))
    ));
    assert!(matches!(
        registry.delete("predef_0_postgres"),
        Err(FacetError::InvalidQuery(_))
    ));
    // still intact afterwards
    assert_eq!(
        registry.get("predef_0_postgres").unwrap().name,
        "Analytics"
    );
}

#[test]
fn session_connection_crud_round_trip() {
    let registry = ConnectionRegistry::new(Vec::new());

    let created = registry.create("Scratch", ConnectionKind::Snowflake, scratch_config("sf"));
    assert!(created.id.starts_with("sess_"));
    assert!(!registry.is_predefined(&created.id));

    let fetched = registry.get(&created.id).unwrap();
    assert_eq!(fetched.name, "Scratch");
    assert_eq!(fetched.kind, ConnectionKind::Snowflake);

    let updated = registry
        .update(
            &created.id,
            "Scratch 2",
            ConnectionKind::Clickhouse,
            scratch_config("ch"),
        )
        .unwrap();
    assert_eq!(updated.name, "Scratch 2");
    assert_eq!(updated.kind, ConnectionKind::Clickhouse);
    assert!(updated.updated_at >= updated.created_at);

    registry.delete(&created.id).unwrap();
    assert!(registry.get(&created.id).is_none());
    assert!(matches!(
        registry.delete(&created.id),
        Err(FacetError::NotFound(_))
    ));
}

#[test]
fn list_merges_predefined_and_session_entries() {
    let file = write_config(
        r#"
connections:
  - name: Analytics
    type: postgres
    config:
      host: db.internal
"#,
    );
    let registry = ConnectionRegistry::from_file(file.path()).unwrap();
    let session = registry.create("Scratch", ConnectionKind::Bigquery, scratch_config("bq"));

    let all = registry.list();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "predef_0_postgres");
    assert_eq!(all[1].id, session.id);

    let missing = registry.resolve("predef_9_postgres");
    assert!(matches!(missing, Err(FacetError::NotFound(_))));
}
