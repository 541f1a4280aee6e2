//! Configuration sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::ConfigError;
use crate::tenant::TenantId;

use super::config::{PlatformConfig, TenantConfig};

/// Where tenant and platform configuration comes from.
///
/// Calls may block on I/O. `Ok(None)` means "not configured" and is distinct
/// from the source being unavailable.
pub trait ConfigSource: Send + Sync + 'static {
    /// Short name used in error messages and logs.
    fn name(&self) -> &str;

    /// Fetches one tenant's configuration.
    fn fetch_tenant(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, ConfigError>;

    /// Fetches the platform configuration.
    fn fetch_platform(&self) -> Result<Option<PlatformConfig>, ConfigError>;

    /// Lists every configured tenant.
    fn list_tenant_ids(&self) -> Result<Vec<TenantId>, ConfigError>;

    /// Finds the tenant served under `domain`.
    fn find_by_domain(&self, domain: &str) -> Result<Option<TenantConfig>, ConfigError> {
        for tenant in self.list_tenant_ids()? {
            if let Some(config) = self.fetch_tenant(&tenant)? {
                if config.serves_domain(domain) {
                    return Ok(Some(config));
                }
            }
        }
        Ok(None)
    }
}

/// In-memory configuration source.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    tenants: RwLock<BTreeMap<TenantId, TenantConfig>>,
    platform: RwLock<Option<PlatformConfig>>,
}

impl StaticConfigSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tenant (builder style).
    pub fn with_tenant(self, config: TenantConfig) -> Self {
        self.upsert(config);
        self
    }

    /// Sets the platform configuration (builder style).
    pub fn with_platform(self, platform: PlatformConfig) -> Self {
        *self.platform.write() = Some(platform);
        self
    }

    /// Inserts or replaces a tenant.
    pub fn upsert(&self, config: TenantConfig) {
        self.tenants.write().insert(config.tenant_id.clone(), config);
    }

    /// Removes a tenant.
    pub fn remove(&self, tenant: &TenantId) -> Option<TenantConfig> {
        self.tenants.write().remove(tenant)
    }
}

impl ConfigSource for StaticConfigSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_tenant(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, ConfigError> {
        Ok(self.tenants.read().get(tenant).cloned())
    }

    fn fetch_platform(&self) -> Result<Option<PlatformConfig>, ConfigError> {
        Ok(self.platform.read().clone())
    }

    fn list_tenant_ids(&self) -> Result<Vec<TenantId>, ConfigError> {
        Ok(self.tenants.read().keys().cloned().collect())
    }
}

const PLATFORM_FILE: &str = "platform.json";

/// Reads configuration from a directory of JSON documents.
///
/// Each tenant lives in `<tenant>.json`; `platform.json`, if present, holds
/// the platform configuration. Files are read on every call.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    dir: PathBuf,
}

impl FileConfigSource {
    /// Creates a source over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory being read.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn source_error(&self, err: impl std::fmt::Display) -> ConfigError {
        ConfigError::Source {
            source_name: self.dir.display().to_string(),
            message: err.to_string(),
        }
    }

    fn read_json(&self, path: &Path) -> Result<Option<serde_json::Value>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.source_error(format!("{}: {e}", path.display()))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                key: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

impl ConfigSource for FileConfigSource {
    fn name(&self) -> &str {
        "file"
    }

    fn fetch_tenant(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, ConfigError> {
        if tenant.is_system() {
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.json", tenant.as_str()));
        match self.read_json(&path)? {
            Some(value) => TenantConfig::from_json(tenant, value).map(Some),
            None => Ok(None),
        }
    }

    fn fetch_platform(&self) -> Result<Option<PlatformConfig>, ConfigError> {
        let path = self.dir.join(PLATFORM_FILE);
        match self.read_json(&path)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ConfigError::Parse {
                    key: PLATFORM_FILE.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn list_tenant_ids(&self) -> Result<Vec<TenantId>, ConfigError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.source_error(e))?;
        let mut tenants = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.source_error(e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(PLATFORM_FILE) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match TenantId::parse(stem) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "Skipping config file"),
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        std::fs::write(dir.join(name), value.to_string()).unwrap();
    }

    #[test]
    fn test_file_source_reads_tenants_and_platform() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "acme.json",
            json!({"tenantId": "acme", "databaseUrl": "sqlite:///tmp/acme.db", "domain": "acme.io"}),
        );
        write(dir.path(), "globex.json", json!({"tenantId": "globex"}));
        write(dir.path(), "platform.json", json!({"supportedIndustries": ["healthcare"]}));
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = FileConfigSource::new(dir.path());
        assert_eq!(
            source.list_tenant_ids().unwrap(),
            vec![TenantId::new("acme"), TenantId::new("globex")]
        );

        let acme = source.fetch_tenant(&TenantId::new("acme")).unwrap().unwrap();
        assert_eq!(acme.database_url.as_deref(), Some("sqlite:///tmp/acme.db"));
        assert!(source.fetch_tenant(&TenantId::new("initech")).unwrap().is_none());

        let platform = source.fetch_platform().unwrap().unwrap();
        assert_eq!(platform.supported_industries, vec!["healthcare"]);

        let by_domain = source.find_by_domain("ACME.io").unwrap().unwrap();
        assert_eq!(by_domain.tenant_id, TenantId::new("acme"));
    }

    #[test]
    fn test_file_source_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("acme.json"), "{not json").unwrap();
        let source = FileConfigSource::new(dir.path());
        let err = source.fetch_tenant(&TenantId::new("acme")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_file_source_missing_directory() {
        let source = FileConfigSource::new("/nonexistent/onevault-config");
        assert!(matches!(
            source.list_tenant_ids().unwrap_err(),
            ConfigError::Source { .. }
        ));
        assert!(source.fetch_platform().unwrap().is_none());
    }
}
