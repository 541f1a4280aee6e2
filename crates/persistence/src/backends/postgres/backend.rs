//! PostgreSQL backend implementation.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use r2d2_postgres::postgres::{Client, NoTls};
use serde::{Deserialize, Serialize};

use crate::config::PoolSettings;
use crate::core::{Backend, BackendKind, PoolStatus};
use crate::error::{BackendError, PoolError, StorageError, StorageResult};

use super::session::{PostgresAsyncSession, PostgresSession};

const BACKEND_NAME: &str = "postgres";

/// A blocking pool of PostgreSQL connections.
pub type PostgresSyncPool = r2d2::Pool<PostgresManager>;

/// A pooled blocking client that remembers whether a transaction is open.
pub struct TrackedClient {
    pub(crate) client: Client,
    pub(crate) in_transaction: bool,
}

impl TrackedClient {
    /// Returns `true` while a session on this client has not finished.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

/// Connection manager for blocking pools.
///
/// Delegates to [`PostgresConnectionManager`], and additionally discards a
/// client that comes back with its transaction still open.
pub struct PostgresManager {
    inner: PostgresConnectionManager<NoTls>,
}

impl std::fmt::Debug for PostgresManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresManager").finish_non_exhaustive()
    }
}

impl ManageConnection for PostgresManager {
    type Connection = TrackedClient;
    type Error = r2d2_postgres::postgres::Error;

    fn connect(&self) -> Result<TrackedClient, Self::Error> {
        Ok(TrackedClient {
            client: self.inner.connect()?,
            in_transaction: false,
        })
    }

    fn is_valid(&self, conn: &mut TrackedClient) -> Result<(), Self::Error> {
        self.inner.is_valid(&mut conn.client)
    }

    fn has_broken(&self, conn: &mut TrackedClient) -> bool {
        if conn.in_transaction {
            tracing::warn!("Discarding PostgreSQL connection returned inside a transaction");
            return true;
        }
        self.inner.has_broken(&mut conn.client)
    }
}

/// PostgreSQL backend.
///
/// Async pools are deadpool pools; blocking pools are r2d2 pools over the
/// synchronous `postgres` client. Blocking pools must not be built or used
/// from inside an async runtime thread.
#[derive(Debug, Clone, Default)]
pub struct PostgresBackend {
    config: PostgresBackendConfig,
}

/// Configuration for the PostgreSQL backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresBackendConfig {
    /// Statement timeout applied to every new connection, in milliseconds.
    #[serde(default)]
    pub statement_timeout_ms: Option<u64>,

    /// Application name reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_application_name() -> String {
    "onevault".to_string()
}

impl Default for PostgresBackendConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: None,
            application_name: default_application_name(),
        }
    }
}

impl PostgresBackend {
    /// Creates a backend with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with custom configuration.
    pub fn with_config(config: PostgresBackendConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> Option<String> {
        self.config
            .statement_timeout_ms
            .map(|ms| format!("-c statement_timeout={}", ms))
    }
}

fn connection_failed(message: impl Into<String>) -> StorageError {
    BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: message.into(),
    }
    .into()
}

fn map_checkout_error(pool: &Pool, err: deadpool_postgres::PoolError) -> StorageError {
    let status = pool.status();
    match err {
        deadpool_postgres::PoolError::Timeout(_) if status.size >= status.max_size => {
            PoolError::Exhausted {
                target: BACKEND_NAME.to_string(),
                timeout_ms: u64::try_from(
                    pool.timeouts().wait.unwrap_or_default().as_millis(),
                )
                .unwrap_or(u64::MAX),
            }
            .into()
        }
        other => connection_failed(other.to_string()),
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    type SyncPool = PostgresSyncPool;
    type AsyncPool = Pool;
    type SyncSession = PostgresSession;
    type AsyncSession = PostgresAsyncSession;

    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn create_sync_pool(
        &self,
        url: &str,
        settings: &PoolSettings,
    ) -> StorageResult<PostgresSyncPool> {
        let mut pg_config: r2d2_postgres::postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| connection_failed(e.to_string()))?;
        pg_config.connect_timeout(settings.connect_timeout());
        pg_config.application_name(&self.config.application_name);
        if let Some(options) = self.options() {
            pg_config.options(&options);
        }

        let manager = PostgresManager {
            inner: PostgresConnectionManager::new(pg_config, NoTls),
        };
        r2d2::Pool::builder()
            .max_size(settings.max_size())
            .min_idle(Some(settings.effective_min_idle()))
            .connection_timeout(settings.acquire_timeout())
            .idle_timeout(settings.overflow_idle_timeout())
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))
    }

    async fn create_async_pool(&self, url: &str, settings: &PoolSettings) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.application_name = Some(self.config.application_name.clone());
        cfg.options = self.options();
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| connection_failed(format!("invalid connection URL: {}", e)))?
            .max_size(settings.max_size() as usize)
            .wait_timeout(Some(settings.acquire_timeout()))
            .create_timeout(Some(settings.connect_timeout()))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| connection_failed(e.to_string()))?;

        if settings.verify_on_create {
            let client = pool
                .get()
                .await
                .map_err(|e| connection_failed(e.to_string()))?;
            drop(client);
        }

        Ok(pool)
    }

    fn begin_sync(&self, pool: &PostgresSyncPool) -> StorageResult<PostgresSession> {
        let conn = pool.get().map_err(|e| {
            let state = pool.state();
            if state.connections >= pool.max_size() && state.idle_connections == 0 {
                PoolError::Exhausted {
                    target: BACKEND_NAME.to_string(),
                    timeout_ms: u64::try_from(pool.connection_timeout().as_millis())
                        .unwrap_or(u64::MAX),
                }
                .into()
            } else {
                connection_failed(e.to_string())
            }
        })?;
        PostgresSession::begin(conn)
    }

    async fn begin_async(&self, pool: &Pool) -> StorageResult<PostgresAsyncSession> {
        let client = pool
            .get()
            .await
            .map_err(|e| map_checkout_error(pool, e))?;
        PostgresAsyncSession::begin(client).await
    }

    fn sync_pool_status(&self, pool: &PostgresSyncPool) -> PoolStatus {
        let state = pool.state();
        PoolStatus {
            size: state.connections,
            idle: state.idle_connections,
            max_size: pool.max_size(),
        }
    }

    fn async_pool_status(&self, pool: &Pool) -> PoolStatus {
        let status = pool.status();
        PoolStatus {
            size: status.size as u32,
            idle: status.available.max(0) as u32,
            max_size: status.max_size as u32,
        }
    }

    fn close_async_pool(&self, pool: &Pool) {
        pool.close();
    }
}
