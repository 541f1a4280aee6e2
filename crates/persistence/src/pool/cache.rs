//! Lazily-populated cache of per-tenant connection pools.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{EvictionSettings, PoolSettings, RouterSettings};
use crate::core::{Backend, PoolKey, PoolMode, PoolStatus};
use crate::error::{PoolError, StorageError, StorageResult, TenantError};
use crate::tenant::{TenantDirectory, TenantId};

/// A cache slot for one pool.
///
/// The slot is inserted before the pool exists; the cell guarantees that
/// concurrent first requests build the pool once. A failed build leaves the
/// cell empty so the next request retries.
///
/// `last_used` holds nanoseconds since the owning cache's epoch.
struct Slot<C> {
    cell: C,
    last_used: AtomicU64,
}

fn nanos_since(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

impl<C: Default> Slot<C> {
    fn new(epoch: Instant) -> Self {
        Self {
            cell: C::default(),
            last_used: AtomicU64::new(nanos_since(epoch)),
        }
    }
}

impl<C> Slot<C> {
    fn touch(&self, epoch: Instant) {
        self.last_used.fetch_max(nanos_since(epoch), Ordering::Relaxed);
    }

    fn idle_for(&self, epoch: Instant) -> Duration {
        let last = self.last_used.load(Ordering::Relaxed);
        Duration::from_nanos(nanos_since(epoch).saturating_sub(last))
    }
}

type SyncSlot<P> = Slot<once_cell::sync::OnceCell<Arc<P>>>;
type AsyncSlot<P> = Slot<tokio::sync::OnceCell<Arc<P>>>;

/// Occupancy report for one cached pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Tenant owning the pool.
    pub tenant_id: TenantId,
    /// Execution mode of the pool.
    pub mode: PoolMode,
    /// Connection counts reported by the driver.
    pub status: PoolStatus,
    /// Time since the pool was last handed out.
    #[serde(with = "duration_as_humantime")]
    pub idle_for: Duration,
}

mod duration_as_humantime {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let rounded = Duration::from_secs(d.as_secs());
        s.serialize_str(&humantime::format_duration(rounded).to_string())
    }
}

/// A pool of either mode, as returned by [`ConnectionPoolCache::get_pool`].
pub enum TenantPool<B: Backend> {
    /// Blocking pool.
    Sync(Arc<B::SyncPool>),
    /// Async pool.
    Async(Arc<B::AsyncPool>),
}

impl<B: Backend> TenantPool<B> {
    /// Returns the mode of this pool.
    pub fn mode(&self) -> PoolMode {
        match self {
            TenantPool::Sync(_) => PoolMode::Sync,
            TenantPool::Async(_) => PoolMode::Async,
        }
    }
}

impl<B: Backend> fmt::Debug for TenantPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantPool::{}", self.mode())
    }
}

/// Per-tenant, per-mode cache of connection pools.
///
/// Pools are created on first request, from the connection string the
/// [`TenantDirectory`] reports for the tenant, and reused for every later
/// request. Lookups of an existing pool take only a shared read lock.
/// Concurrent first requests for the same tenant and mode build exactly one
/// pool; requests for other tenants proceed in parallel.
///
/// Resolution failures (unknown tenant, missing connection string) never
/// create an entry, so a tenant added to the directory later is picked up on
/// its next request.
///
/// The shared platform database lives in its own slots, outside the tenant
/// key space. It is reachable only through the `get_system_*` methods; the
/// reserved [`TenantId::system`] id is never resolved as a tenant.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use onevault_persistence::backends::sqlite::SqliteBackend;
/// use onevault_persistence::config::PoolSettings;
/// use onevault_persistence::pool::ConnectionPoolCache;
/// use onevault_persistence::tenant::{StaticDirectory, TenantId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let directory = StaticDirectory::new()
///     .with_tenant("acme", "sqlite:///var/lib/onevault/acme.db");
/// let cache = ConnectionPoolCache::new(
///     SqliteBackend::new(),
///     Arc::new(directory),
///     PoolSettings::default(),
/// );
///
/// let first = cache.get_async_pool(&TenantId::new("acme")).await?;
/// let second = cache.get_async_pool(&TenantId::new("ACME")).await?;
/// assert!(Arc::ptr_eq(&first, &second));
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPoolCache<B: Backend> {
    backend: Arc<B>,
    directory: Arc<dyn TenantDirectory>,
    settings: PoolSettings,
    eviction: EvictionSettings,
    system_url: Option<String>,
    sync_pools: RwLock<HashMap<TenantId, Arc<SyncSlot<B::SyncPool>>>>,
    async_pools: RwLock<HashMap<TenantId, Arc<AsyncSlot<B::AsyncPool>>>>,
    system_sync: RwLock<Arc<SyncSlot<B::SyncPool>>>,
    system_async: RwLock<Arc<AsyncSlot<B::AsyncPool>>>,
    epoch: Instant,
    pools_created: AtomicU64,
}

impl<B: Backend> fmt::Debug for ConnectionPoolCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPoolCache")
            .field("backend", &self.backend)
            .field("settings", &self.settings)
            .field("eviction", &self.eviction)
            .field("sync_pools", &self.sync_pools.read().len())
            .field("async_pools", &self.async_pools.read().len())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> ConnectionPoolCache<B> {
    /// Creates an empty cache.
    pub fn new(backend: B, directory: Arc<dyn TenantDirectory>, settings: PoolSettings) -> Self {
        let epoch = Instant::now();
        Self {
            backend: Arc::new(backend),
            directory,
            settings,
            eviction: EvictionSettings::default(),
            system_url: None,
            sync_pools: RwLock::new(HashMap::new()),
            async_pools: RwLock::new(HashMap::new()),
            system_sync: RwLock::new(Arc::new(Slot::new(epoch))),
            system_async: RwLock::new(Arc::new(Slot::new(epoch))),
            epoch,
            pools_created: AtomicU64::new(0),
        }
    }

    /// Creates a cache from router settings.
    pub fn from_settings(
        backend: B,
        directory: Arc<dyn TenantDirectory>,
        settings: &RouterSettings,
    ) -> Self {
        let mut cache = Self::new(backend, directory, settings.pool.clone())
            .with_eviction(settings.eviction.clone());
        cache.system_url = settings.system_database_url.clone();
        cache
    }

    /// Sets the URL of the shared platform database.
    pub fn with_system_url(mut self, url: impl Into<String>) -> Self {
        self.system_url = Some(url.into());
        self
    }

    /// Sets the eviction policy.
    pub fn with_eviction(mut self, eviction: EvictionSettings) -> Self {
        self.eviction = eviction;
        self
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the tenant directory pools are resolved through.
    pub fn directory(&self) -> &Arc<dyn TenantDirectory> {
        &self.directory
    }

    /// Returns the pool settings.
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Returns the blocking pool for `tenant`, creating it on first use.
    ///
    /// May block while the pool's initial connections are established.
    pub fn get_sync_pool(&self, tenant: &TenantId) -> StorageResult<Arc<B::SyncPool>> {
        if let Some(pool) = self.cached_sync(tenant) {
            return Ok(pool);
        }

        let url = self.resolve_url(tenant)?;
        let slot = {
            let mut pools = self.sync_pools.write();
            Arc::clone(
                pools
                    .entry(tenant.clone())
                    .or_insert_with(|| Arc::new(Slot::new(self.epoch))),
            )
        };
        self.init_sync(&slot, tenant, &url)
    }

    fn init_sync(
        &self,
        slot: &SyncSlot<B::SyncPool>,
        owner: &TenantId,
        url: &str,
    ) -> StorageResult<Arc<B::SyncPool>> {
        let pool = slot.cell.get_or_try_init(|| {
            let pool = self
                .backend
                .create_sync_pool(url, &self.settings)
                .map_err(|e| self.creation_failed(owner, PoolMode::Sync, e))?;
            self.record_created(owner, PoolMode::Sync);
            Ok::<_, StorageError>(Arc::new(pool))
        })?;
        slot.touch(self.epoch);
        Ok(Arc::clone(pool))
    }

    /// Returns the async pool for `tenant`, creating it on first use.
    pub async fn get_async_pool(&self, tenant: &TenantId) -> StorageResult<Arc<B::AsyncPool>> {
        if let Some(pool) = self.cached_async(tenant) {
            return Ok(pool);
        }

        let url = {
            let directory = Arc::clone(&self.directory);
            let tenant = tenant.clone();
            tokio::task::spawn_blocking(move || resolve_url(directory.as_ref(), &tenant)).await??
        };
        let slot = {
            let mut pools = self.async_pools.write();
            Arc::clone(
                pools
                    .entry(tenant.clone())
                    .or_insert_with(|| Arc::new(Slot::new(self.epoch))),
            )
        };
        self.init_async(&slot, tenant, &url).await
    }

    async fn init_async(
        &self,
        slot: &AsyncSlot<B::AsyncPool>,
        owner: &TenantId,
        url: &str,
    ) -> StorageResult<Arc<B::AsyncPool>> {
        let pool = slot
            .cell
            .get_or_try_init(|| async {
                let pool = self
                    .backend
                    .create_async_pool(url, &self.settings)
                    .await
                    .map_err(|e| self.creation_failed(owner, PoolMode::Async, e))?;
                self.record_created(owner, PoolMode::Async);
                Ok::<_, StorageError>(Arc::new(pool))
            })
            .await?;
        slot.touch(self.epoch);
        Ok(Arc::clone(pool))
    }

    /// Returns the pool of the requested mode.
    ///
    /// A blocking pool is built on the calling thread; drivers that cannot
    /// connect from inside a runtime should use [`get_sync_pool`](Self::get_sync_pool)
    /// from a blocking context instead.
    pub async fn get_pool(&self, tenant: &TenantId, mode: PoolMode) -> StorageResult<TenantPool<B>> {
        match mode {
            PoolMode::Sync => self.get_sync_pool(tenant).map(TenantPool::Sync),
            PoolMode::Async => self.get_async_pool(tenant).await.map(TenantPool::Async),
        }
    }

    /// Returns the blocking pool for the shared platform database.
    pub fn get_system_sync_pool(&self) -> StorageResult<Arc<B::SyncPool>> {
        let slot = Arc::clone(&*self.system_sync.read());
        if let Some(pool) = slot.cell.get() {
            slot.touch(self.epoch);
            return Ok(Arc::clone(pool));
        }
        let url = self.system_url()?;
        self.init_sync(&slot, &TenantId::system(), &url)
    }

    /// Returns the async pool for the shared platform database.
    pub async fn get_system_async_pool(&self) -> StorageResult<Arc<B::AsyncPool>> {
        let slot = Arc::clone(&*self.system_async.read());
        if let Some(pool) = slot.cell.get() {
            slot.touch(self.epoch);
            return Ok(Arc::clone(pool));
        }
        let url = self.system_url()?;
        self.init_async(&slot, &TenantId::system(), &url).await
    }

    fn system_url(&self) -> StorageResult<String> {
        self.system_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                TenantError::MissingConnectionString {
                    tenant_id: TenantId::system(),
                }
                .into()
            })
    }

    fn cached_sync(&self, tenant: &TenantId) -> Option<Arc<B::SyncPool>> {
        let pools = self.sync_pools.read();
        let slot = pools.get(tenant)?;
        let pool = slot.cell.get()?;
        slot.touch(self.epoch);
        Some(Arc::clone(pool))
    }

    fn cached_async(&self, tenant: &TenantId) -> Option<Arc<B::AsyncPool>> {
        let pools = self.async_pools.read();
        let slot = pools.get(tenant)?;
        let pool = slot.cell.get()?;
        slot.touch(self.epoch);
        Some(Arc::clone(pool))
    }

    fn resolve_url(&self, tenant: &TenantId) -> StorageResult<String> {
        resolve_url(self.directory.as_ref(), tenant)
    }

    fn creation_failed(&self, tenant: &TenantId, mode: PoolMode, err: StorageError) -> StorageError {
        tracing::warn!(
            tenant = %tenant,
            mode = %mode,
            backend = self.backend.name(),
            error = %err,
            "Failed to create connection pool"
        );
        PoolError::Creation {
            target: tenant.to_string(),
            mode,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
        .into()
    }

    fn record_created(&self, tenant: &TenantId, mode: PoolMode) {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            tenant = %tenant,
            mode = %mode,
            backend = self.backend.name(),
            max_size = self.settings.max_size(),
            "Created connection pool"
        );
    }

    /// Returns `true` if a pool for `tenant` and `mode` has been built.
    ///
    /// Platform pools are not tenant pools and are never reported here.
    pub fn contains(&self, tenant: &TenantId, mode: PoolMode) -> bool {
        match mode {
            PoolMode::Sync => self
                .sync_pools
                .read()
                .get(tenant)
                .is_some_and(|slot| slot.cell.get().is_some()),
            PoolMode::Async => self
                .async_pools
                .read()
                .get(tenant)
                .is_some_and(|slot| slot.cell.get().is_some()),
        }
    }

    /// Number of pools currently built, across both modes, platform pools
    /// included.
    pub fn cached_pool_count(&self) -> usize {
        let system = usize::from(self.system_sync.read().cell.get().is_some())
            + usize::from(self.system_async.read().cell.get().is_some());
        let sync = self
            .sync_pools
            .read()
            .values()
            .filter(|slot| slot.cell.get().is_some())
            .count();
        let async_ = self
            .async_pools
            .read()
            .values()
            .filter(|slot| slot.cell.get().is_some())
            .count();
        sync + async_ + system
    }

    /// Number of pools built since the cache was created, evicted ones included.
    pub fn pools_created(&self) -> u64 {
        self.pools_created.load(Ordering::Relaxed)
    }

    /// Reports occupancy of every built pool, ordered by tenant then mode.
    ///
    /// Platform pools are reported under [`TenantId::system`].
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        let mut stats = Vec::new();
        let system_sync = Arc::clone(&*self.system_sync.read());
        let system_async = Arc::clone(&*self.system_async.read());
        let system = TenantId::system();
        let sync_pools = self.sync_pools.read();
        let async_pools = self.async_pools.read();

        let sync_slots = sync_pools
            .iter()
            .chain(std::iter::once((&system, &system_sync)));
        for (tenant, slot) in sync_slots {
            if let Some(pool) = slot.cell.get() {
                stats.push(PoolStats {
                    tenant_id: tenant.clone(),
                    mode: PoolMode::Sync,
                    status: self.backend.sync_pool_status(pool),
                    idle_for: slot.idle_for(self.epoch),
                });
            }
        }
        let async_slots = async_pools
            .iter()
            .chain(std::iter::once((&system, &system_async)));
        for (tenant, slot) in async_slots {
            if let Some(pool) = slot.cell.get() {
                stats.push(PoolStats {
                    tenant_id: tenant.clone(),
                    mode: PoolMode::Async,
                    status: self.backend.async_pool_status(pool),
                    idle_for: slot.idle_for(self.epoch),
                });
            }
        }
        stats.sort_by(|a, b| {
            a.tenant_id
                .cmp(&b.tenant_id)
                .then_with(|| (a.mode == PoolMode::Async).cmp(&(b.mode == PoolMode::Async)))
        });
        stats
    }

    /// Drops both pools of `tenant`. Returns `true` if anything was removed.
    ///
    /// Sessions already holding a connection finish normally; the pool is
    /// released once its last user is done.
    pub fn evict(&self, tenant: &TenantId) -> bool {
        let removed_sync = self.remove(&PoolKey::new(tenant.clone(), PoolMode::Sync));
        let removed_async = self.remove(&PoolKey::new(tenant.clone(), PoolMode::Async));
        removed_sync || removed_async
    }

    fn remove(&self, key: &PoolKey) -> bool {
        let removed = match key.mode {
            PoolMode::Sync => self
                .sync_pools
                .write()
                .remove(&key.tenant_id)
                .is_some_and(|slot| slot.cell.get().is_some()),
            PoolMode::Async => match self.async_pools.write().remove(&key.tenant_id) {
                Some(slot) => match slot.cell.get() {
                    Some(pool) => {
                        self.backend.close_async_pool(pool);
                        true
                    }
                    None => false,
                },
                None => false,
            },
        };
        if removed {
            tracing::info!(tenant = %key.tenant_id, mode = %key.mode, "Evicted connection pool");
        }
        removed
    }

    /// Applies the eviction policy and returns the pools it removed.
    ///
    /// Pools idle for longer than the idle timeout go first; if more than
    /// `max_pools` remain, the least recently used are removed. With no
    /// limits configured this is a no-op.
    pub fn evict_idle(&self) -> Vec<PoolKey> {
        if !self.eviction.is_enabled() {
            return Vec::new();
        }

        let mut candidates = self.usage();
        let mut evicted = Vec::new();

        if let Some(secs) = self.eviction.idle_timeout_secs {
            let timeout = Duration::from_secs(secs);
            let (idle, active): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .partition(|(_, idle_for)| *idle_for > timeout);
            evicted.extend(idle.into_iter().map(|(key, _)| key));
            candidates = active;
        }

        if let Some(max_pools) = self.eviction.max_pools {
            if candidates.len() > max_pools {
                // Longest idle first.
                candidates.sort_by(|a, b| b.1.cmp(&a.1));
                let excess = candidates.len() - max_pools;
                evicted.extend(candidates.into_iter().take(excess).map(|(key, _)| key));
            }
        }

        evicted.retain(|key| self.remove(key));
        evicted
    }

    fn usage(&self) -> Vec<(PoolKey, Duration)> {
        let mut usage = Vec::new();
        for (tenant, slot) in self.sync_pools.read().iter() {
            if slot.cell.get().is_some() {
                let key = PoolKey::new(tenant.clone(), PoolMode::Sync);
                usage.push((key, slot.idle_for(self.epoch)));
            }
        }
        for (tenant, slot) in self.async_pools.read().iter() {
            if slot.cell.get().is_some() {
                let key = PoolKey::new(tenant.clone(), PoolMode::Async);
                usage.push((key, slot.idle_for(self.epoch)));
            }
        }
        usage
    }

    /// Closes every pool and empties the cache.
    pub fn shutdown(&self) {
        let sync_count = {
            let mut pools = self.sync_pools.write();
            let count = pools.len();
            pools.clear();
            count
        };
        let async_slots: Vec<_> = self.async_pools.write().drain().collect();
        for (_, slot) in &async_slots {
            if let Some(pool) = slot.cell.get() {
                self.backend.close_async_pool(pool);
            }
        }
        *self.system_sync.write() = Arc::new(Slot::new(self.epoch));
        let system_async =
            std::mem::replace(&mut *self.system_async.write(), Arc::new(Slot::new(self.epoch)));
        if let Some(pool) = system_async.cell.get() {
            self.backend.close_async_pool(pool);
        }
        tracing::info!(
            sync_pools = sync_count,
            async_pools = async_slots.len(),
            "Connection pool cache shut down"
        );
    }
}

/// Maps a tenant to its connection string.
///
/// The reserved platform id is never a tenant, whatever the directory holds.
fn resolve_url(directory: &dyn TenantDirectory, tenant: &TenantId) -> StorageResult<String> {
    if tenant.is_system() {
        return Err(TenantError::NotFound {
            tenant_id: tenant.clone(),
        }
        .into());
    }

    let info = directory
        .resolve(tenant)?
        .ok_or_else(|| TenantError::NotFound {
            tenant_id: tenant.clone(),
        })?;
    if !info.is_active {
        return Err(TenantError::Suspended {
            tenant_id: tenant.clone(),
        }
        .into());
    }
    info.connection_string
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            TenantError::MissingConnectionString {
                tenant_id: tenant.clone(),
            }
            .into()
        })
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteBackend;
    use crate::tenant::{StaticDirectory, TenantConnectionInfo};

    fn sqlite_url(dir: &std::path::Path, name: &str) -> String {
        format!("sqlite://{}", dir.join(format!("{}.db", name)).display())
    }

    fn cache_for(directory: StaticDirectory) -> ConnectionPoolCache<SqliteBackend> {
        ConnectionPoolCache::new(
            SqliteBackend::new(),
            Arc::new(directory),
            PoolSettings::new().with_pool_size(1).with_max_overflow(1),
        )
    }

    #[test]
    fn test_sync_pool_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(
            StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")),
        );

        let first = cache.get_sync_pool(&TenantId::new("acme")).unwrap();
        let second = cache.get_sync_pool(&TenantId::new("Acme")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.pools_created(), 1);
        assert!(cache.contains(&TenantId::new("acme"), PoolMode::Sync));
        assert!(!cache.contains(&TenantId::new("acme"), PoolMode::Async));
    }

    #[test]
    fn test_unknown_tenant_creates_no_entry() {
        let cache = cache_for(StaticDirectory::new());
        let err = cache.get_sync_pool(&TenantId::new("ghost")).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Tenant(TenantError::NotFound { .. })
        ));
        assert_eq!(cache.cached_pool_count(), 0);
        assert!(cache.sync_pools.read().is_empty());
    }

    #[test]
    fn test_missing_connection_string() {
        let directory = StaticDirectory::new();
        directory.insert(
            TenantId::new("acme"),
            TenantConnectionInfo {
                connection_string: None,
                is_active: true,
            },
        );
        let cache = cache_for(directory);
        let err = cache.get_sync_pool(&TenantId::new("acme")).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Tenant(TenantError::MissingConnectionString { .. })
        ));
    }

    #[test]
    fn test_suspended_tenant() {
        let directory = StaticDirectory::new();
        directory.insert(
            TenantId::new("acme"),
            TenantConnectionInfo {
                connection_string: Some("sqlite:///tmp/acme.db".to_string()),
                is_active: false,
            },
        );
        let cache = cache_for(directory);
        let err = cache.get_sync_pool(&TenantId::new("acme")).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Tenant(TenantError::Suspended { .. })
        ));
    }

    #[test]
    fn test_creation_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("later");
        let directory = StaticDirectory::new().with_tenant(
            "acme",
            format!("sqlite://{}", missing.join("acme.db").display()),
        );
        let cache = cache_for(directory);

        let err = cache.get_sync_pool(&TenantId::new("acme")).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Pool(PoolError::Creation {
                mode: PoolMode::Sync,
                ..
            })
        ));
        assert_eq!(cache.cached_pool_count(), 0);

        std::fs::create_dir(&missing).unwrap();
        assert!(cache.get_sync_pool(&TenantId::new("acme")).is_ok());
        assert_eq!(cache.pools_created(), 1);
    }

    #[test]
    fn test_system_pool_requires_url() {
        let cache = cache_for(StaticDirectory::new());
        assert!(matches!(
            cache.get_system_sync_pool().unwrap_err(),
            StorageError::Tenant(TenantError::MissingConnectionString { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(StaticDirectory::new()).with_system_url(sqlite_url(dir.path(), "system"));
        assert!(cache.get_system_sync_pool().is_ok());
    }

    #[tokio::test]
    async fn test_system_pool_is_not_a_tenant_pool() {
        let dir = tempfile::tempdir().unwrap();
        let directory = StaticDirectory::new();
        directory.insert(
            TenantId::system(),
            TenantConnectionInfo {
                connection_string: Some(sqlite_url(dir.path(), "spoofed")),
                is_active: true,
            },
        );
        let cache = cache_for(directory).with_system_url(sqlite_url(dir.path(), "system"));

        let system = cache.get_system_sync_pool().unwrap();
        assert!(Arc::ptr_eq(&system, &cache.get_system_sync_pool().unwrap()));
        cache.get_system_async_pool().await.unwrap();

        for id in ["__system__", "__SYSTEM__", " __System__ "] {
            let tenant = TenantId::new(id);
            assert!(matches!(
                cache.get_sync_pool(&tenant).unwrap_err(),
                StorageError::Tenant(TenantError::NotFound { .. })
            ));
            assert!(matches!(
                cache.get_async_pool(&tenant).await.unwrap_err(),
                StorageError::Tenant(TenantError::NotFound { .. })
            ));
        }
        assert!(!cache.contains(&TenantId::system(), PoolMode::Sync));
        assert!(cache.sync_pools.read().is_empty());
        assert_eq!(cache.cached_pool_count(), 2);
        assert_eq!(cache.pools_created(), 2);

        cache.shutdown();
        assert_eq!(cache.cached_pool_count(), 0);
    }

    #[test]
    fn test_idle_time_tracks_last_use() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(
            StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")),
        );
        let tenant = TenantId::new("acme");
        cache.get_sync_pool(&tenant).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.pool_stats()[0].idle_for >= Duration::from_millis(50));

        cache.get_sync_pool(&tenant).unwrap();
        assert!(cache.pool_stats()[0].idle_for < Duration::from_millis(50));
    }

    #[test]
    fn test_evict_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(
            StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")),
        );
        let tenant = TenantId::new("acme");

        let first = cache.get_sync_pool(&tenant).unwrap();
        assert!(cache.evict(&tenant));
        assert!(!cache.evict(&tenant));

        let second = cache.get_sync_pool(&tenant).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.pools_created(), 2);
    }

    #[test]
    fn test_evict_idle_respects_max_pools() {
        let dir = tempfile::tempdir().unwrap();
        let directory = StaticDirectory::new()
            .with_tenant("a", sqlite_url(dir.path(), "a"))
            .with_tenant("b", sqlite_url(dir.path(), "b"))
            .with_tenant("c", sqlite_url(dir.path(), "c"));
        let cache = cache_for(directory).with_eviction(EvictionSettings {
            idle_timeout_secs: None,
            max_pools: Some(2),
        });

        for name in ["a", "b", "c"] {
            cache.get_sync_pool(&TenantId::new(name)).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        cache.get_sync_pool(&TenantId::new("a")).unwrap();

        let evicted = cache.evict_idle();
        assert_eq!(evicted, vec![PoolKey::new(TenantId::new("b"), PoolMode::Sync)]);
        assert_eq!(cache.cached_pool_count(), 2);
    }

    #[test]
    fn test_evict_idle_disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(
            StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")),
        );
        cache.get_sync_pool(&TenantId::new("acme")).unwrap();
        assert!(cache.evict_idle().is_empty());
        assert_eq!(cache.cached_pool_count(), 1);
    }

    #[tokio::test]
    async fn test_async_and_sync_pools_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_for(
            StaticDirectory::new().with_tenant("acme", sqlite_url(dir.path(), "acme")),
        );
        let tenant = TenantId::new("acme");

        let async_pool = cache.get_async_pool(&tenant).await.unwrap();
        let again = cache.get_async_pool(&tenant).await.unwrap();
        assert!(Arc::ptr_eq(&async_pool, &again));
        assert_eq!(cache.cached_pool_count(), 1);

        let stats = cache.pool_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].mode, PoolMode::Async);

        let pool = cache.get_pool(&tenant, PoolMode::Sync).await.unwrap();
        assert_eq!(pool.mode(), PoolMode::Sync);
        assert_eq!(cache.cached_pool_count(), 2);

        cache.shutdown();
        assert_eq!(cache.cached_pool_count(), 0);
    }
}
