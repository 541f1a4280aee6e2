//! Shared fixtures for the integration tests.
//!
//! Tenant databases are SQLite files in a temporary directory. A tenant's
//! schemas are sibling files (`<tenant>.<schema>.db`) that the SQLite backend
//! attaches on connect.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use onevault_persistence::backends::sqlite::{
    SqliteAsyncSession, SqliteBackend, SqlitePool, SqliteSession,
};
use onevault_persistence::config::PoolSettings;
use onevault_persistence::core::{Backend, BackendKind, PoolStatus};
use onevault_persistence::error::StorageResult;
use onevault_persistence::pool::ConnectionPoolCache;
use onevault_persistence::router::TenantSessionRouter;
use onevault_persistence::tenant::{StaticDirectory, TenantDirectory};

/// Returns the connection string of tenant `name` inside `dir`.
pub fn sqlite_url(dir: &Path, name: &str) -> String {
    format!("sqlite://{}", dir.join(format!("{name}.db")).display())
}

/// Creates the schema files of tenant `name`, each with the given tables.
pub fn create_vault_database(dir: &Path, name: &str, schemas: &[(&str, &[&str])]) {
    rusqlite::Connection::open(dir.join(format!("{name}.db"))).unwrap();
    for (schema, tables) in schemas {
        let conn = rusqlite::Connection::open(dir.join(format!("{name}.{schema}.db"))).unwrap();
        for table in *tables {
            conn.execute_batch(&format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY)"))
                .unwrap();
        }
    }
}

/// Small pools with short timeouts.
pub fn small_pool_settings() -> PoolSettings {
    PoolSettings::new()
        .with_pool_size(2)
        .with_max_overflow(0)
        .with_acquire_timeout(Duration::from_millis(500))
}

/// Builds a router over a fresh SQLite pool cache.
pub fn sqlite_router(
    directory: Arc<dyn TenantDirectory>,
    settings: PoolSettings,
) -> TenantSessionRouter<SqliteBackend> {
    TenantSessionRouter::new(Arc::new(ConnectionPoolCache::new(
        SqliteBackend::new(),
        directory,
        settings,
    )))
}

/// Directory with a single tenant `acme` in `dir`.
pub fn acme_directory(dir: &Path) -> Arc<StaticDirectory> {
    Arc::new(StaticDirectory::new().with_tenant("acme", sqlite_url(dir, "acme")))
}

/// A SQLite backend that counts pool constructions.
///
/// Construction is slowed down so that concurrent first requests overlap.
#[derive(Debug, Default)]
pub struct CountingBackend {
    inner: SqliteBackend,
    pub sync_created: AtomicUsize,
    pub async_created: AtomicUsize,
    delay: Duration,
}

impl CountingBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn sync_created(&self) -> usize {
        self.sync_created.load(Ordering::SeqCst)
    }

    pub fn async_created(&self) -> usize {
        self.async_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for CountingBackend {
    type SyncPool = SqlitePool;
    type AsyncPool = SqlitePool;
    type SyncSession = SqliteSession;
    type AsyncSession = SqliteAsyncSession;

    fn kind(&self) -> BackendKind {
        BackendKind::Custom("counting-sqlite")
    }

    fn create_sync_pool(&self, url: &str, settings: &PoolSettings) -> StorageResult<SqlitePool> {
        self.sync_created.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.create_sync_pool(url, settings)
    }

    async fn create_async_pool(
        &self,
        url: &str,
        settings: &PoolSettings,
    ) -> StorageResult<SqlitePool> {
        self.async_created.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.create_async_pool(url, settings).await
    }

    fn begin_sync(&self, pool: &SqlitePool) -> StorageResult<SqliteSession> {
        self.inner.begin_sync(pool)
    }

    async fn begin_async(&self, pool: &SqlitePool) -> StorageResult<SqliteAsyncSession> {
        self.inner.begin_async(pool).await
    }

    fn sync_pool_status(&self, pool: &SqlitePool) -> PoolStatus {
        self.inner.sync_pool_status(pool)
    }

    fn async_pool_status(&self, pool: &SqlitePool) -> PoolStatus {
        self.inner.async_pool_status(pool)
    }
}
