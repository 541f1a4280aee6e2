//! PostgreSQL backend integration tests.
//!
//! Tests that need a server start one with testcontainers, so Docker must be
//! available.
//!
//! Run with: `cargo test -p onevault-persistence --features postgres -- postgres`

#![cfg(feature = "postgres")]

use onevault_persistence::backends::postgres::{PostgresBackend, PostgresBackendConfig};
use onevault_persistence::core::{Backend, BackendKind};

#[test]
fn test_postgres_backend_defaults() {
    let config = PostgresBackendConfig::default();
    assert_eq!(config.application_name, "onevault");
    assert!(config.statement_timeout_ms.is_none());

    let backend = PostgresBackend::new();
    assert_eq!(backend.kind(), BackendKind::Postgres);
    assert_eq!(backend.name(), "postgres");
}

#[test]
fn test_postgres_backend_config_deserialization() {
    let config: PostgresBackendConfig =
        serde_json::from_str(r#"{"statement_timeout_ms": 15000}"#).unwrap();
    assert_eq!(config.statement_timeout_ms, Some(15000));
    assert_eq!(config.application_name, "onevault");
}

/// Integration tests against a real PostgreSQL instance.
///
/// Skip if no Docker:
///   cargo test -p onevault-persistence --features postgres -- --skip postgres_integration
mod postgres_integration {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    use onevault_persistence::backends::postgres::PostgresBackend;
    use onevault_persistence::config::{PoolSettings, ValidationSettings};
    use onevault_persistence::core::{AsyncSession, SqlValue, SyncSession};
    use onevault_persistence::error::{PoolError, StorageError};
    use onevault_persistence::pool::ConnectionPoolCache;
    use onevault_persistence::router::TenantSessionRouter;
    use onevault_persistence::tenant::{StaticDirectory, TenantId};
    use onevault_persistence::validation::SchemaValidator;

    /// PostgreSQL container shared by every test in this module.
    struct SharedPg {
        host: String,
        port: u16,
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();
    static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");
                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");
                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();
                SharedPg {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    fn url(pg: &SharedPg, dbname: &str) -> String {
        format!(
            "postgres://postgres:postgres@{}:{}/{}",
            pg.host, pg.port, dbname
        )
    }

    /// Creates a fresh database and returns its URL.
    async fn create_tenant_database() -> String {
        let pg = shared_pg().await;
        let dbname = format!(
            "tenant_{}_{}",
            std::process::id(),
            NEXT_DB.fetch_add(1, Ordering::SeqCst)
        );
        let (client, connection) = tokio_postgres::connect(&url(pg, "postgres"), tokio_postgres::NoTls)
            .await
            .expect("Failed to connect to PostgreSQL");
        tokio::spawn(connection);
        client
            .batch_execute(&format!("CREATE DATABASE {dbname}"))
            .await
            .expect("Failed to create tenant database");
        url(pg, &dbname)
    }

    fn router_for(url: String, settings: PoolSettings) -> TenantSessionRouter<PostgresBackend> {
        let directory = StaticDirectory::new().with_tenant("acme", url);
        TenantSessionRouter::new(Arc::new(ConnectionPoolCache::new(
            PostgresBackend::new(),
            Arc::new(directory),
            settings,
        )))
    }

    fn small_pool() -> PoolSettings {
        PoolSettings::new()
            .with_pool_size(2)
            .with_max_overflow(0)
            .with_acquire_timeout(Duration::from_millis(500))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_postgres_validation_counts_vault_tables() {
        let router = router_for(create_tenant_database().await, small_pool());
        let tenant = TenantId::new("acme");

        for statement in [
            "CREATE SCHEMA auth",
            "CREATE SCHEMA business",
            "CREATE SCHEMA util",
            "CREATE SCHEMA ref",
            "CREATE TABLE auth.user_h (user_hk BYTEA PRIMARY KEY)",
            "CREATE TABLE auth.user_s (user_hk BYTEA, load_date TIMESTAMPTZ)",
            "CREATE TABLE business.order_h (order_hk BYTEA PRIMARY KEY)",
            "CREATE VIEW business.order_v AS SELECT * FROM business.order_h",
        ] {
            router.execute_raw(&tenant, statement, &[]).await.unwrap();
        }

        let validator = SchemaValidator::new(Arc::clone(router.pools()), ValidationSettings::default());
        let report = validator.validate(&tenant).await;

        assert!(!report.is_structurally_valid);
        assert_eq!(report.missing_schemas, vec!["audit"]);
        assert_eq!(report.hub_table_count, 2);
        assert_eq!(report.satellite_table_count, 1);
        assert_eq!(report.link_table_count, 0);
        assert_eq!(report.total_table_count, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_postgres_rollback_and_cancellation() {
        let router = router_for(create_tenant_database().await, small_pool());
        let tenant = TenantId::new("acme");
        router
            .execute_raw(&tenant, "CREATE TABLE ledger (amount BIGINT)", &[])
            .await
            .unwrap();

        let failed: Result<(), StorageError> = router
            .with_session(&tenant, |session| {
                Box::pin(async move {
                    session
                        .execute("INSERT INTO ledger (amount) VALUES ($1)", &[SqlValue::Int(10)])
                        .await?;
                    session.execute("INSERT INTO missing VALUES (1)", &[]).await?;
                    Ok::<_, StorageError>(())
                })
            })
            .await;
        assert!(failed.is_err());

        let slow = router.with_session(&tenant, |session| {
            Box::pin(async move {
                session
                    .execute("INSERT INTO ledger (amount) VALUES ($1)", &[SqlValue::Int(20)])
                    .await?;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, StorageError>(())
            })
        });
        assert!(tokio::time::timeout(Duration::from_millis(300), slow).await.is_err());

        // Give the spawned rollback a moment to run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = router
            .execute_raw(&tenant, "SELECT COUNT(*) FROM ledger", &[])
            .await
            .unwrap();
        assert_eq!(count.scalar(), Some(&SqlValue::Int(0)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_postgres_pool_exhaustion() {
        let settings = PoolSettings::new()
            .with_pool_size(1)
            .with_max_overflow(0)
            .with_acquire_timeout(Duration::from_millis(200));
        let router = router_for(create_tenant_database().await, settings);
        let tenant = TenantId::new("acme");

        let (held_tx, held_rx) = tokio::sync::oneshot::channel();
        let holder = {
            let router = router.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move {
                router
                    .with_session(&tenant, move |_session| {
                        Box::pin(async move {
                            let _ = held_tx.send(());
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            Ok::<_, StorageError>(())
                        })
                    })
                    .await
            })
        };
        held_rx.await.unwrap();

        let err = router.execute_raw(&tenant, "SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Pool(PoolError::Exhausted { .. })));
        holder.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_postgres_blocking_session() {
        let router = router_for(create_tenant_database().await, small_pool());

        let rows = tokio::task::spawn_blocking(move || {
            let tenant = TenantId::new("acme");
            router.with_session_blocking(&tenant, |session| {
                session.execute("CREATE TABLE events (name TEXT)", &[])?;
                session.execute("INSERT INTO events (name) VALUES ($1)", &["login".into()])?;
                session.query("SELECT name FROM events", &[])
            })
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(rows.rows, vec![vec![SqlValue::Text("login".to_string())]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_postgres_failed_blocking_session_is_not_reused() {
        let settings = small_pool().with_pool_size(1);
        let router = router_for(create_tenant_database().await, settings);

        let (first, second) = tokio::task::spawn_blocking(move || {
            let tenant = TenantId::new("acme");
            let first = router.with_session_blocking(&tenant, |session| {
                session.query("SELECT pg_terminate_backend(pg_backend_pid())", &[])
            });
            let second = router.execute_raw_blocking(&tenant, "SELECT 1::BIGINT", &[]);
            (first, second)
        })
        .await
        .unwrap();

        assert!(first.is_err());
        assert_eq!(second.unwrap().scalar(), Some(&SqlValue::Int(1)));
    }
}
