//! Tenant-scoped transactional sessions.
//!
//! [`TenantSessionRouter`] is the entry point application code uses to talk
//! to a tenant database. It resolves the tenant's pool through the
//! [`ConnectionPoolCache`], checks out a connection, opens a transaction,
//! runs the caller's operation and then commits or rolls back. The
//! connection always goes back to the pool, including when the caller's
//! future is dropped mid-operation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RouterSettings;
use crate::core::{AsyncSession, Backend, QueryResult, SqlValue, SyncSession};
use crate::error::{BackendError, PoolError, StorageError, StorageResult};
use crate::pool::ConnectionPoolCache;
use crate::tenant::{TenantDirectory, TenantId};

/// Future returned by an operation passed to [`TenantSessionRouter::with_session`].
pub type SessionFuture<'s, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 's>>;

/// Result of a connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    /// Tenant that was probed.
    pub tenant_id: TenantId,
    /// Backend that served the probe.
    pub backend: String,
    /// Whether a round trip succeeded.
    pub connected: bool,
    /// Round-trip time of the probe, in milliseconds.
    pub latency_ms: u64,
    /// Why the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the probe ran.
    pub checked_at: DateTime<Utc>,
}

/// Routes work to the right tenant database inside a transaction.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use onevault_persistence::backends::sqlite::SqliteBackend;
/// use onevault_persistence::config::PoolSettings;
/// use onevault_persistence::core::{AsyncSession, SqlValue};
/// use onevault_persistence::error::StorageError;
/// use onevault_persistence::pool::ConnectionPoolCache;
/// use onevault_persistence::router::TenantSessionRouter;
/// use onevault_persistence::tenant::{StaticDirectory, TenantId};
///
/// # async fn example() -> Result<(), StorageError> {
/// let directory = StaticDirectory::new()
///     .with_tenant("acme", "sqlite:///var/lib/onevault/acme.db");
/// let router = TenantSessionRouter::new(Arc::new(ConnectionPoolCache::new(
///     SqliteBackend::new(),
///     Arc::new(directory),
///     PoolSettings::default(),
/// )));
///
/// let tenant = TenantId::new("acme");
/// let inserted = router
///     .with_session(&tenant, |session| {
///         Box::pin(async move {
///             session
///                 .execute("INSERT INTO audit.event_h (event_bk) VALUES (?1)", &[SqlValue::from("login")])
///                 .await
///         })
///     })
///     .await?;
/// assert_eq!(inserted, 1);
/// # Ok(())
/// # }
/// ```
pub struct TenantSessionRouter<B: Backend> {
    pools: Arc<ConnectionPoolCache<B>>,
}

impl<B: Backend> Clone for TenantSessionRouter<B> {
    fn clone(&self) -> Self {
        Self {
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<B: Backend> std::fmt::Debug for TenantSessionRouter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSessionRouter")
            .field("pools", &self.pools)
            .finish()
    }
}

impl<B: Backend> TenantSessionRouter<B> {
    /// Creates a router over an existing pool cache.
    pub fn new(pools: Arc<ConnectionPoolCache<B>>) -> Self {
        Self { pools }
    }

    /// Creates a router and its pool cache from settings.
    pub fn from_settings(
        backend: B,
        directory: Arc<dyn TenantDirectory>,
        settings: &RouterSettings,
    ) -> Self {
        Self::new(Arc::new(ConnectionPoolCache::from_settings(
            backend, directory, settings,
        )))
    }

    /// Returns the pool cache.
    pub fn pools(&self) -> &Arc<ConnectionPoolCache<B>> {
        &self.pools
    }

    /// Runs `op` inside a transaction on the tenant's async pool.
    ///
    /// The transaction commits if `op` returns `Ok` and rolls back if it
    /// returns `Err`; the caller's error is returned unchanged after the
    /// rollback. Routing and infrastructure failures are converted into `E`.
    ///
    /// Dropping the returned future before it completes rolls the
    /// transaction back before the connection is released.
    pub async fn with_session<T, E, F>(&self, tenant: &TenantId, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut B::AsyncSession) -> SessionFuture<'s, T, E> + Send,
        E: From<StorageError> + Send,
        T: Send,
    {
        self.run_session(tenant, self.pools.get_async_pool(tenant), op)
            .await
    }

    /// Runs `op` inside a transaction on the shared platform database.
    ///
    /// Same contract as [`with_session`](Self::with_session). The platform
    /// database is not reachable through any tenant id.
    pub async fn with_system_session<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut B::AsyncSession) -> SessionFuture<'s, T, E> + Send,
        E: From<StorageError> + Send,
        T: Send,
    {
        self.run_session(&TenantId::system(), self.pools.get_system_async_pool(), op)
            .await
    }

    async fn run_session<T, E, F, P>(&self, owner: &TenantId, pool: P, op: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut B::AsyncSession) -> SessionFuture<'s, T, E> + Send,
        P: Future<Output = StorageResult<Arc<B::AsyncPool>>>,
        E: From<StorageError> + Send,
        T: Send,
    {
        let session_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "tenant_session",
            tenant = %owner,
            mode = "async",
            session_id = %session_id
        );

        async move {
            let pool = pool.await.map_err(|e| E::from(for_tenant(owner, e)))?;
            let mut session = self
                .pools
                .backend()
                .begin_async(&pool)
                .await
                .map_err(|e| E::from(self.infrastructure_error(owner, e)))?;

            match op(&mut session).await {
                Ok(value) => {
                    session
                        .commit()
                        .await
                        .map_err(|e| E::from(self.infrastructure_error(owner, e)))?;
                    tracing::debug!("Session committed");
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = session.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    } else {
                        tracing::debug!("Session rolled back");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs `op` inside a transaction on the tenant's blocking pool.
    ///
    /// Same contract as [`with_session`](Self::with_session). Must not be
    /// called from an async task; use `spawn_blocking` there.
    pub fn with_session_blocking<T, E, F>(&self, tenant: &TenantId, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut B::SyncSession) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.run_session_blocking(tenant, || self.pools.get_sync_pool(tenant), op)
    }

    /// Blocking form of [`with_system_session`](Self::with_system_session).
    pub fn with_system_session_blocking<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut B::SyncSession) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.run_session_blocking(&TenantId::system(), || self.pools.get_system_sync_pool(), op)
    }

    fn run_session_blocking<T, E, F, P>(&self, owner: &TenantId, pool: P, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut B::SyncSession) -> Result<T, E>,
        P: FnOnce() -> StorageResult<Arc<B::SyncPool>>,
        E: From<StorageError>,
    {
        let session_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "tenant_session",
            tenant = %owner,
            mode = "sync",
            session_id = %session_id
        );
        let _entered = span.enter();

        let pool = pool().map_err(|e| E::from(for_tenant(owner, e)))?;
        let mut session = self
            .pools
            .backend()
            .begin_sync(&pool)
            .map_err(|e| E::from(self.infrastructure_error(owner, e)))?;

        match op(&mut session) {
            Ok(value) => {
                session
                    .commit()
                    .map_err(|e| E::from(self.infrastructure_error(owner, e)))?;
                tracing::debug!("Session committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback() {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                } else {
                    tracing::debug!("Session rolled back");
                }
                Err(err)
            }
        }
    }

    /// Runs one statement in its own transaction.
    ///
    /// Row-returning statements (`SELECT`, `WITH`, `VALUES`, `PRAGMA`,
    /// `SHOW`, `EXPLAIN`, or anything with `RETURNING`) yield their rows;
    /// other statements yield only `rows_affected`. A failing statement is
    /// logged with the tenant and returned.
    pub async fn execute_raw(
        &self,
        tenant: &TenantId,
        statement: &str,
        params: &[SqlValue],
    ) -> StorageResult<QueryResult> {
        let statement = statement.to_string();
        let params = params.to_vec();
        self.with_session(tenant, move |session| {
            Box::pin(async move { run_statement(session, &statement, &params).await })
        })
        .await
        .inspect_err(|e| log_statement_failure(tenant, e))
    }

    /// Runs one statement on the shared platform database.
    pub async fn execute_system_raw(
        &self,
        statement: &str,
        params: &[SqlValue],
    ) -> StorageResult<QueryResult> {
        let statement = statement.to_string();
        let params = params.to_vec();
        self.with_system_session(move |session| {
            Box::pin(async move { run_statement(session, &statement, &params).await })
        })
        .await
        .inspect_err(|e| log_statement_failure(&TenantId::system(), e))
    }

    /// Blocking form of [`execute_raw`](Self::execute_raw).
    pub fn execute_raw_blocking(
        &self,
        tenant: &TenantId,
        statement: &str,
        params: &[SqlValue],
    ) -> StorageResult<QueryResult> {
        self.with_session_blocking(tenant, |session| {
            if returns_rows(statement) {
                session.query(statement, params)
            } else {
                let affected = session.execute(statement, params)?;
                Ok(QueryResult::affected(affected))
            }
        })
        .inspect_err(|e| log_statement_failure(tenant, e))
    }

    /// Probes the shared platform database with a trivial query.
    pub async fn check_system_connectivity(&self) -> ConnectivityReport {
        let started = Instant::now();
        let result = self.execute_system_raw("SELECT 1", &[]).await;
        self.connectivity_report(&TenantId::system(), started, result)
    }

    /// Probes a tenant database with a trivial query.
    pub async fn check_connectivity(&self, tenant: &TenantId) -> ConnectivityReport {
        let started = Instant::now();
        let result = self.execute_raw(tenant, "SELECT 1", &[]).await;
        self.connectivity_report(tenant, started, result)
    }

    fn connectivity_report(
        &self,
        tenant: &TenantId,
        started: Instant,
        result: StorageResult<QueryResult>,
    ) -> ConnectivityReport {
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let error = result.err().map(|e| e.to_string());
        if let Some(message) = &error {
            tracing::warn!(tenant = %tenant, error = %message, "Connectivity check failed");
        }

        ConnectivityReport {
            tenant_id: tenant.clone(),
            backend: self.pools.backend().name().to_string(),
            connected: error.is_none(),
            latency_ms,
            error,
            checked_at: Utc::now(),
        }
    }

    fn infrastructure_error(&self, tenant: &TenantId, err: StorageError) -> StorageError {
        let err = for_tenant(tenant, err);
        tracing::error!(
            tenant = %tenant,
            backend = self.pools.backend().name(),
            error = %err,
            "Session infrastructure failure"
        );
        err
    }
}

async fn run_statement<S: AsyncSession>(
    session: &mut S,
    statement: &str,
    params: &[SqlValue],
) -> StorageResult<QueryResult> {
    if returns_rows(statement) {
        session.query(statement, params).await
    } else {
        let affected = session.execute(statement, params).await?;
        Ok(QueryResult::affected(affected))
    }
}

/// Statement errors are not logged anywhere else; routing and
/// infrastructure failures already were.
fn log_statement_failure(tenant: &TenantId, err: &StorageError) {
    if let StorageError::Backend(BackendError::Statement { backend_name, .. }) = err {
        tracing::warn!(
            tenant = %tenant,
            backend = %backend_name,
            error = %err,
            "Statement failed"
        );
    }
}

/// Attributes pool exhaustion to the tenant instead of the driver.
fn for_tenant(tenant: &TenantId, err: StorageError) -> StorageError {
    match err {
        StorageError::Pool(PoolError::Exhausted { timeout_ms, .. }) => PoolError::Exhausted {
            target: tenant.to_string(),
            timeout_ms,
        }
        .into(),
        other => other,
    }
}

fn returns_rows(statement: &str) -> bool {
    let trimmed = statement.trim_start().trim_start_matches('(');
    let keyword: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "SHOW" | "EXPLAIN" | "TABLE"
    ) || statement.to_ascii_uppercase().contains("RETURNING")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  select * from auth.user_h"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("(SELECT 1) UNION (SELECT 2)"));
        assert!(returns_rows("INSERT INTO t VALUES (1) RETURNING id"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET v = 1"));
        assert!(!returns_rows("CREATE TABLE t (v INTEGER)"));
    }

    #[test]
    fn test_exhaustion_is_attributed_to_tenant() {
        let err = for_tenant(
            &TenantId::new("acme"),
            PoolError::Exhausted {
                target: "sqlite".to_string(),
                timeout_ms: 100,
            }
            .into(),
        );
        assert_eq!(
            err.to_string(),
            "connection pool exhausted for acme after 100ms"
        );
    }
}
