//! Backend abstraction for database drivers.
//!
//! This module defines the [`Backend`] trait. A backend knows how to build
//! synchronous and asynchronous connection pools from a connection string and
//! how to open a transactional session on either kind of pool. The pool cache
//! and the router are generic over it, so SQLite and PostgreSQL share one
//! routing implementation.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PoolSettings;
use crate::error::StorageResult;
use crate::tenant::TenantId;

use super::catalog::Catalog;
use super::session::{AsyncSession, SyncSession};

/// Identifies the type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SQLite database files.
    Sqlite,
    /// PostgreSQL database.
    Postgres,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Execution mode of a pool: blocking callers or async tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// Blocking connections for synchronous callers.
    Sync,
    /// Connections driven by the async runtime.
    Async,
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolMode::Sync => write!(f, "sync"),
            PoolMode::Async => write!(f, "async"),
        }
    }
}

/// Key of one cached pool: a tenant and an execution mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Execution mode.
    pub mode: PoolMode,
}

impl PoolKey {
    /// Creates a key.
    pub fn new(tenant_id: TenantId, mode: PoolMode) -> Self {
        Self { tenant_id, mode }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.mode)
    }
}

/// Point-in-time occupancy of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Open connections, idle or checked out.
    pub size: u32,
    /// Open connections not currently checked out.
    pub idle: u32,
    /// Configured upper bound.
    pub max_size: u32,
}

impl PoolStatus {
    /// Connections currently checked out.
    pub fn in_use(&self) -> u32 {
        self.size.saturating_sub(self.idle)
    }
}

/// A database backend that builds pools and opens sessions.
///
/// Pools are owned by the caller (the pool cache); the backend only knows
/// how to construct them and how to check out a session. Session types must
/// roll back on drop so that an abandoned session never releases a connection
/// with an open transaction.
#[async_trait]
pub trait Backend: Send + Sync + Debug + 'static {
    /// Pool used by blocking callers.
    type SyncPool: Send + Sync + 'static;

    /// Pool used by async tasks.
    type AsyncPool: Send + Sync + 'static;

    /// Transactional session on a sync pool.
    type SyncSession: SyncSession;

    /// Transactional session on an async pool.
    type AsyncSession: AsyncSession + Catalog;

    /// Returns the kind of this backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for logs and errors.
    fn name(&self) -> &'static str {
        match self.kind() {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
            BackendKind::Custom(name) => name,
        }
    }

    /// Builds a blocking pool for `url`.
    ///
    /// May block while the initial idle connections are established.
    fn create_sync_pool(&self, url: &str, settings: &PoolSettings)
    -> StorageResult<Self::SyncPool>;

    /// Builds an async pool for `url`.
    async fn create_async_pool(
        &self,
        url: &str,
        settings: &PoolSettings,
    ) -> StorageResult<Self::AsyncPool>;

    /// Checks out a connection and begins a transaction on it.
    fn begin_sync(&self, pool: &Self::SyncPool) -> StorageResult<Self::SyncSession>;

    /// Checks out a connection and begins a transaction on it.
    async fn begin_async(&self, pool: &Self::AsyncPool) -> StorageResult<Self::AsyncSession>;

    /// Reports occupancy of a blocking pool.
    fn sync_pool_status(&self, pool: &Self::SyncPool) -> PoolStatus;

    /// Reports occupancy of an async pool.
    fn async_pool_status(&self, pool: &Self::AsyncPool) -> PoolStatus;

    /// Stops an async pool from handing out new connections.
    ///
    /// Connections already checked out are closed when returned.
    fn close_async_pool(&self, _pool: &Self::AsyncPool) {}
}
