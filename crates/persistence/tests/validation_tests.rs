//! Vault-pattern validation against real SQLite tenant databases.

mod common;

use std::sync::Arc;

use onevault_persistence::backends::sqlite::SqliteBackend;
use onevault_persistence::config::ValidationSettings;
use onevault_persistence::pool::ConnectionPoolCache;
use onevault_persistence::tenant::{StaticDirectory, TenantId};
use onevault_persistence::validation::SchemaValidator;

use common::{create_vault_database, small_pool_settings, sqlite_url};

fn validator_for(directory: StaticDirectory) -> SchemaValidator<SqliteBackend> {
    let pools = Arc::new(ConnectionPoolCache::new(
        SqliteBackend::new(),
        Arc::new(directory),
        small_pool_settings(),
    ));
    SchemaValidator::new(pools, ValidationSettings::default())
}

#[tokio::test]
async fn test_partial_vault_reports_missing_schema_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    create_vault_database(
        dir.path(),
        "acme",
        &[
            ("auth", &["user_h", "user_s"]),
            ("business", &["order_h"]),
            ("util", &[]),
            ("ref", &[]),
        ],
    );
    let validator =
        validator_for(StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")));

    let report = validator.validate(&TenantId::new("acme")).await;

    assert!(!report.is_structurally_valid);
    assert!(report.error.is_none());
    assert_eq!(report.missing_schemas, vec!["audit"]);
    assert_eq!(report.existing_schemas, vec!["auth", "business", "util", "ref"]);
    assert_eq!(report.hub_table_count, 2);
    assert_eq!(report.satellite_table_count, 1);
    assert_eq!(report.link_table_count, 0);
    assert_eq!(report.total_table_count, 3);
}

#[tokio::test]
async fn test_complete_vault_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    create_vault_database(
        dir.path(),
        "acme",
        &[
            ("auth", &["tenant_h", "user_h", "user_profile_s", "user_role_l"]),
            ("business", &["order_h", "order_detail_s"]),
            ("audit", &["audit_event_h", "schema_migrations"]),
            ("util", &[]),
            ("ref", &["country_r"]),
        ],
    );
    let validator =
        validator_for(StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")));

    let report = validator.validate(&TenantId::new("acme")).await;

    assert!(report.is_structurally_valid, "{report:?}");
    assert!(report.missing_schemas.is_empty());
    assert_eq!(report.hub_table_count, 4);
    assert_eq!(report.satellite_table_count, 2);
    assert_eq!(report.link_table_count, 1);
    // Tables outside the data schemas are not counted.
    assert_eq!(report.total_table_count, 8);
}

#[tokio::test]
async fn test_reports_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    create_vault_database(dir.path(), "acme", &[("auth", &["user_h"]), ("business", &[])]);
    let validator =
        validator_for(StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")));
    let tenant = TenantId::new("acme");

    assert_eq!(validator.validate(&tenant).await.link_table_count, 0);

    let conn = rusqlite::Connection::open(dir.path().join("acme.business.db")).unwrap();
    conn.execute_batch("CREATE TABLE customer_order_l (id INTEGER)").unwrap();
    drop(conn);

    assert_eq!(validator.validate(&tenant).await.link_table_count, 1);
}

#[tokio::test]
async fn test_schema_created_after_first_validation_is_seen() {
    let dir = tempfile::tempdir().unwrap();
    create_vault_database(
        dir.path(),
        "acme",
        &[("auth", &["user_h"]), ("business", &[]), ("util", &[]), ("ref", &[])],
    );
    let validator =
        validator_for(StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")));
    let tenant = TenantId::new("acme");

    let before = validator.validate(&tenant).await;
    assert_eq!(before.missing_schemas, vec!["audit"]);
    assert_eq!(before.hub_table_count, 1);

    create_vault_database(dir.path(), "acme", &[("audit", &["event_h"])]);

    let after = validator.validate(&tenant).await;
    assert!(after.missing_schemas.is_empty(), "{after:?}");
    assert!(after.is_structurally_valid);
    assert_eq!(after.hub_table_count, 2);
}

#[tokio::test]
async fn test_unreachable_tenant_yields_error_report() {
    let validator = validator_for(StaticDirectory::new());

    let report = validator.validate(&TenantId::new("ghost")).await;

    assert!(!report.is_structurally_valid);
    assert!(report.error.as_deref().unwrap().contains("ghost"));
    assert_eq!(report.total_table_count, 0);
}

#[tokio::test]
async fn test_validate_all_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    create_vault_database(
        dir.path(),
        "acme",
        &[
            ("auth", &["user_h"]),
            ("business", &[]),
            ("audit", &[]),
            ("util", &[]),
            ("ref", &[]),
        ],
    );
    let validator = validator_for(
        StaticDirectory::new()
            .with_tenant("acme", sqlite_url(dir.path(), "acme"))
            .with_tenant("broken", "sqlite:///nonexistent-onevault/broken.db"),
    );

    let reports = validator.validate_all().await.unwrap();

    assert_eq!(reports.len(), 2);
    let acme = reports.iter().find(|r| r.tenant_id.as_str() == "acme").unwrap();
    let broken = reports.iter().find(|r| r.tenant_id.as_str() == "broken").unwrap();
    assert!(acme.is_structurally_valid);
    assert!(!broken.is_structurally_valid);
    assert!(broken.error.is_some());
}
