//! Typed settings for the routing layer.
//!
//! Settings are validated once, where they enter the crate, so internal
//! components never perform key-presence checks. Every struct deserializes
//! with per-field defaults, so a partial document is enough:
//!
//! ```
//! use onevault_persistence::config::RouterSettings;
//!
//! let settings: RouterSettings = serde_json::from_str(r#"{
//!     "system_database_url": "sqlite:///var/lib/onevault/system.db",
//!     "pool": { "pool_size": 2, "max_overflow": 0 }
//! }"#).unwrap();
//!
//! assert_eq!(settings.pool.max_size(), 2);
//! assert_eq!(settings.validation.required_schemas.len(), 5);
//! assert!(settings.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::vault::DEFAULT_RECORD_SOURCE;

/// Sizing and timeouts applied to every tenant pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Connections kept open per pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Extra connections allowed above `pool_size` under load.
    #[serde(default = "default_max_overflow")]
    pub max_overflow: u32,

    /// Idle connections established when the pool is built.
    ///
    /// With a non-zero value, pool construction fails fast on an unreachable
    /// database.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,

    /// How long a caller waits for a free connection before giving up.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// How long establishing a single connection may take.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle time after which overflow connections are closed.
    #[serde(default = "default_overflow_idle_timeout_ms")]
    pub overflow_idle_timeout_ms: Option<u64>,

    /// Whether asynchronous pools borrow one connection right after
    /// construction to verify connectivity.
    #[serde(default = "default_true")]
    pub verify_on_create: bool,
}

fn default_pool_size() -> u32 {
    5
}

fn default_max_overflow() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    1
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_overflow_idle_timeout_ms() -> Option<u64> {
    Some(600_000) // 10 minutes
}

fn default_true() -> bool {
    true
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            min_idle: default_min_idle(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            overflow_idle_timeout_ms: default_overflow_idle_timeout_ms(),
            verify_on_create: true,
        }
    }
}

impl PoolSettings {
    /// Creates settings with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base pool size.
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the overflow allowance.
    pub fn with_max_overflow(mut self, overflow: u32) -> Self {
        self.max_overflow = overflow;
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the number of idle connections established at construction.
    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Hard upper bound on open connections.
    pub fn max_size(&self) -> u32 {
        self.pool_size + self.max_overflow
    }

    /// Idle connections to maintain, never above `max_size`.
    pub fn effective_min_idle(&self) -> u32 {
        self.min_idle.min(self.pool_size).min(self.max_size())
    }

    /// Acquire timeout as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Overflow idle timeout as a [`Duration`].
    pub fn overflow_idle_timeout(&self) -> Option<Duration> {
        self.overflow_idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Reclamation policy for tenant pools.
///
/// Both limits are off by default, in which case a pool lives until
/// [`ConnectionPoolCache::shutdown`](crate::pool::ConnectionPoolCache::shutdown).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionSettings {
    /// Pools unused for longer than this are closed by `evict_idle`.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Maximum number of tenant pools; least recently used pools beyond this
    /// are closed by `evict_idle`.
    #[serde(default)]
    pub max_pools: Option<usize>,
}

impl EvictionSettings {
    /// Returns `true` if any eviction limit is configured.
    pub fn is_enabled(&self) -> bool {
        self.idle_timeout_secs.is_some() || self.max_pools.is_some()
    }
}

/// Structural convention checked by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Schema namespaces every tenant database must have.
    #[serde(default = "default_required_schemas")]
    pub required_schemas: Vec<String>,

    /// Schemas whose base tables are classified into hubs, satellites and links.
    #[serde(default = "default_data_schemas")]
    pub data_schemas: Vec<String>,

    /// Table-name suffix marking a hub.
    #[serde(default = "default_hub_suffix")]
    pub hub_suffix: String,

    /// Table-name suffix marking a satellite.
    #[serde(default = "default_satellite_suffix")]
    pub satellite_suffix: String,

    /// Table-name suffix marking a link.
    #[serde(default = "default_link_suffix")]
    pub link_suffix: String,
}

fn default_required_schemas() -> Vec<String> {
    ["auth", "business", "audit", "util", "ref"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_data_schemas() -> Vec<String> {
    ["auth", "business", "audit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_hub_suffix() -> String {
    "_h".to_string()
}

fn default_satellite_suffix() -> String {
    "_s".to_string()
}

fn default_link_suffix() -> String {
    "_l".to_string()
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            required_schemas: default_required_schemas(),
            data_schemas: default_data_schemas(),
            hub_suffix: default_hub_suffix(),
            satellite_suffix: default_satellite_suffix(),
            link_suffix: default_link_suffix(),
        }
    }
}

/// Freshness policy for cached tenant configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// How long a fetched tenant configuration stays fresh.
    #[serde(default = "default_config_ttl_secs")]
    pub config_ttl_secs: u64,
}

fn default_config_ttl_secs() -> u64 {
    300 // 5 minutes
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            config_ttl_secs: default_config_ttl_secs(),
        }
    }
}

impl RegistrySettings {
    /// Freshness window as a [`Duration`].
    pub fn config_ttl(&self) -> Duration {
        Duration::from_secs(self.config_ttl_secs)
    }
}

/// Top-level settings for the routing layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// URL of the shared platform database.
    #[serde(default)]
    pub system_database_url: Option<String>,

    /// Record source stamped on vault records.
    #[serde(default = "default_record_source")]
    pub record_source: String,

    /// Pool sizing and timeouts.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Pool reclamation policy.
    #[serde(default)]
    pub eviction: EvictionSettings,

    /// Vault-pattern structural convention.
    #[serde(default)]
    pub validation: ValidationSettings,

    /// Configuration cache policy.
    #[serde(default)]
    pub registry: RegistrySettings,
}

fn default_record_source() -> String {
    DEFAULT_RECORD_SOURCE.to_string()
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            system_database_url: None,
            record_source: default_record_source(),
            pool: PoolSettings::default(),
            eviction: EvictionSettings::default(),
            validation: ValidationSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl RouterSettings {
    /// Validates the settings and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pool.max_size() == 0 {
            errors.push("pool_size + max_overflow must be at least 1".to_string());
        }
        if self.pool.acquire_timeout_ms == 0 {
            errors.push("acquire_timeout_ms cannot be 0".to_string());
        }
        if self.validation.required_schemas.is_empty() {
            errors.push("required_schemas cannot be empty".to_string());
        }
        let suffixes = [
            &self.validation.hub_suffix,
            &self.validation.satellite_suffix,
            &self.validation.link_suffix,
        ];
        if suffixes.iter().any(|s| s.is_empty()) {
            errors.push("table suffixes cannot be empty".to_string());
        }
        if self.eviction.max_pools == Some(0) {
            errors.push("max_pools must be at least 1 when set".to_string());
        }
        if self.record_source.trim().is_empty() {
            errors.push("record_source cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
