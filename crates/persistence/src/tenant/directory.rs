//! Tenant directory: the narrow lookup the pool cache consumes.
//!
//! The directory maps a [`TenantId`] to the connection information of its
//! database. It is deliberately transport-agnostic; the crate ships
//! [`ConfigCache`](crate::registry::ConfigCache) as the production
//! implementation and [`StaticDirectory`] for embedding and tests.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::TenantId;

/// Connection information for one tenant database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConnectionInfo {
    /// Database URL; `None` when the tenant is configured without one.
    pub connection_string: Option<String>,
    /// Whether the tenant is active.
    pub is_active: bool,
}

impl TenantConnectionInfo {
    /// Creates connection info for an active tenant.
    pub fn active(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            is_active: true,
        }
    }
}

/// Resolves tenants to their database connection information.
///
/// `Ok(None)` means the tenant is unknown and is distinct from a transport
/// failure, which is reported as `Err`. Implementations must not cache
/// negative results on behalf of the pool cache.
pub trait TenantDirectory: Send + Sync + 'static {
    /// Looks up the connection information for a tenant.
    fn resolve(&self, tenant: &TenantId) -> Result<Option<TenantConnectionInfo>, ConfigError>;

    /// Lists every tenant the directory knows about.
    fn list_tenants(&self) -> Result<Vec<TenantId>, ConfigError>;
}

/// An in-memory tenant directory.
///
/// Entries can be added and removed at runtime, which makes it useful for
/// embedding and for exercising "tenant becomes known later" flows.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    entries: RwLock<HashMap<TenantId, TenantConnectionInfo>>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active tenant with the given connection string (builder style).
    pub fn with_tenant(self, tenant: impl Into<TenantId>, url: impl Into<String>) -> Self {
        self.insert(tenant, TenantConnectionInfo::active(url));
        self
    }

    /// Inserts or replaces a tenant entry.
    pub fn insert(&self, tenant: impl Into<TenantId>, info: TenantConnectionInfo) {
        self.entries.write().insert(tenant.into(), info);
    }

    /// Removes a tenant entry.
    pub fn remove(&self, tenant: &TenantId) -> Option<TenantConnectionInfo> {
        self.entries.write().remove(tenant)
    }
}

impl TenantDirectory for StaticDirectory {
    fn resolve(&self, tenant: &TenantId) -> Result<Option<TenantConnectionInfo>, ConfigError> {
        Ok(self.entries.read().get(tenant).cloned())
    }

    fn list_tenants(&self) -> Result<Vec<TenantId>, ConfigError> {
        let mut tenants: Vec<_> = self.entries.read().keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory_resolve() {
        let directory = StaticDirectory::new().with_tenant("Acme", "sqlite:///tmp/acme.db");

        let info = directory.resolve(&TenantId::new("acme")).unwrap().unwrap();
        assert_eq!(info.connection_string.as_deref(), Some("sqlite:///tmp/acme.db"));
        assert!(info.is_active);

        assert!(directory.resolve(&TenantId::new("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_static_directory_mutation() {
        let directory = StaticDirectory::new();
        let tenant = TenantId::new("late");
        assert!(directory.resolve(&tenant).unwrap().is_none());

        directory.insert("late", TenantConnectionInfo::active("sqlite:///tmp/late.db"));
        assert!(directory.resolve(&tenant).unwrap().is_some());

        directory.remove(&tenant);
        assert!(directory.list_tenants().unwrap().is_empty());
    }
}
