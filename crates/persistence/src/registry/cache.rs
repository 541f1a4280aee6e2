//! Freshness-windowed configuration cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::RegistrySettings;
use crate::error::ConfigError;
use crate::tenant::{TenantConnectionInfo, TenantDirectory, TenantId};

use super::config::{LocationsSummary, PlatformConfig, TenantConfig};
use super::source::ConfigSource;

struct Fresh<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Fresh<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Caches tenant and platform configuration fetched from a [`ConfigSource`].
///
/// Each entry carries its own fetch time and is refetched once it is older
/// than the freshness window. Only positive lookups are cached, so a tenant
/// added to the source becomes visible on the next lookup.
pub struct ConfigCache {
    source: Arc<dyn ConfigSource>,
    ttl: Duration,
    tenants: RwLock<HashMap<TenantId, Fresh<Arc<TenantConfig>>>>,
    platform: RwLock<Option<Fresh<Arc<PlatformConfig>>>>,
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("source", &self.source.name())
            .field("ttl", &self.ttl)
            .field("cached_tenants", &self.tenants.read().len())
            .finish()
    }
}

impl ConfigCache {
    /// Creates a cache over `source` with the given freshness window.
    pub fn new(source: Arc<dyn ConfigSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            tenants: RwLock::new(HashMap::new()),
            platform: RwLock::new(None),
        }
    }

    /// Creates a cache using the configured freshness window.
    pub fn from_settings(source: Arc<dyn ConfigSource>, settings: &RegistrySettings) -> Self {
        Self::new(source, settings.config_ttl())
    }

    /// Returns the freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a tenant's configuration, fetching it if absent or stale.
    pub fn tenant_config(&self, tenant: &TenantId) -> Result<Option<Arc<TenantConfig>>, ConfigError> {
        if let Some(entry) = self.tenants.read().get(tenant) {
            if entry.is_fresh(self.ttl) {
                return Ok(Some(Arc::clone(&entry.value)));
            }
        }

        match self.source.fetch_tenant(tenant)? {
            Some(config) => {
                let config = Arc::new(config);
                self.tenants
                    .write()
                    .insert(tenant.clone(), Fresh::new(Arc::clone(&config)));
                tracing::debug!(tenant = %tenant, source = self.source.name(), "Loaded tenant config");
                Ok(Some(config))
            }
            None => {
                self.tenants.write().remove(tenant);
                Ok(None)
            }
        }
    }

    /// Returns the platform configuration, or the built-in defaults when the
    /// source has none.
    pub fn platform_config(&self) -> Result<Arc<PlatformConfig>, ConfigError> {
        if let Some(entry) = self.platform.read().as_ref() {
            if entry.is_fresh(self.ttl) {
                return Ok(Arc::clone(&entry.value));
            }
        }

        let platform = match self.source.fetch_platform()? {
            Some(platform) => Arc::new(platform),
            None => {
                tracing::debug!(source = self.source.name(), "Using default platform config");
                Arc::new(PlatformConfig::default())
            }
        };
        *self.platform.write() = Some(Fresh::new(Arc::clone(&platform)));
        Ok(platform)
    }

    /// Lists every configured tenant. Not cached.
    pub fn tenant_ids(&self) -> Result<Vec<TenantId>, ConfigError> {
        self.source.list_tenant_ids()
    }

    /// Finds the tenant served under `domain` and caches its configuration.
    pub fn tenant_by_domain(&self, domain: &str) -> Result<Option<Arc<TenantConfig>>, ConfigError> {
        if let Some(entry) = self
            .tenants
            .read()
            .values()
            .find(|e| e.is_fresh(self.ttl) && e.value.serves_domain(domain))
        {
            return Ok(Some(Arc::clone(&entry.value)));
        }

        match self.source.find_by_domain(domain)? {
            Some(config) => {
                let config = Arc::new(config);
                self.tenants
                    .write()
                    .insert(config.tenant_id.clone(), Fresh::new(Arc::clone(&config)));
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// Compliance frameworks of a tenant; empty when the tenant is unknown.
    pub fn compliance_frameworks(&self, tenant: &TenantId) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .tenant_config(tenant)?
            .map(|c| c.compliance_frameworks.clone())
            .unwrap_or_default())
    }

    /// Location counts of a tenant; zeroed when the tenant is unknown.
    pub fn locations_summary(&self, tenant: &TenantId) -> Result<LocationsSummary, ConfigError> {
        Ok(self
            .tenant_config(tenant)?
            .map(|c| LocationsSummary::from(c.as_ref()))
            .unwrap_or_default())
    }

    /// Drops every cached entry.
    pub fn reload(&self) {
        let dropped = {
            let mut tenants = self.tenants.write();
            let n = tenants.len();
            tenants.clear();
            n
        };
        *self.platform.write() = None;
        tracing::info!(dropped, source = self.source.name(), "Configuration cache cleared");
    }

    /// Number of tenant entries currently held, fresh or not.
    pub fn cached_tenant_count(&self) -> usize {
        self.tenants.read().len()
    }
}

impl TenantDirectory for ConfigCache {
    fn resolve(&self, tenant: &TenantId) -> Result<Option<TenantConnectionInfo>, ConfigError> {
        Ok(self.tenant_config(tenant)?.map(|c| c.connection_info()))
    }

    fn list_tenants(&self) -> Result<Vec<TenantId>, ConfigError> {
        self.tenant_ids()
    }
}
