//! Typed tenant and platform configuration documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::tenant::{TenantConnectionInfo, TenantId};

/// One physical location operated by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    /// Location identifier, unique within the tenant.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the location is operating.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Configuration of one tenant.
///
/// Branding, pricing and other presentation settings are carried verbatim in
/// `extra` and are never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Industry vertical, e.g. `spa_wellness`.
    #[serde(default)]
    pub industry: Option<String>,
    /// Whether the tenant may be served.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Database URL of the tenant's dedicated database.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Primary domain the tenant is served under.
    #[serde(default)]
    pub domain: Option<String>,
    /// Compliance frameworks the tenant is subject to.
    #[serde(default)]
    pub compliance_frameworks: Vec<String>,
    /// Physical locations.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    /// Uninterpreted remainder of the document.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl TenantConfig {
    /// Creates an active tenant configuration with a database URL.
    pub fn new(tenant_id: impl Into<TenantId>, database_url: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            name: String::new(),
            industry: None,
            is_active: true,
            database_url: Some(database_url.into()),
            domain: None,
            compliance_frameworks: Vec::new(),
            locations: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the serving domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Adds a location.
    pub fn with_location(mut self, location: LocationConfig) -> Self {
        self.locations.push(location);
        self
    }

    /// Sets the compliance frameworks.
    pub fn with_compliance(mut self, frameworks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.compliance_frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the tenant active or suspended.
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Parses a configuration document, checking that it names `expected`.
    pub fn from_json(expected: &TenantId, value: Value) -> Result<Self, ConfigError> {
        let config: TenantConfig = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
            key: expected.to_string(),
            message: e.to_string(),
        })?;
        if &config.tenant_id != expected {
            return Err(ConfigError::Parse {
                key: expected.to_string(),
                message: format!("document declares tenant '{}'", config.tenant_id),
            });
        }
        Ok(config)
    }

    /// Connection information handed to the pool cache.
    pub fn connection_info(&self) -> TenantConnectionInfo {
        TenantConnectionInfo {
            connection_string: self.database_url.clone(),
            is_active: self.is_active,
        }
    }

    /// Returns `true` if the tenant is served under `domain`.
    pub fn serves_domain(&self, domain: &str) -> bool {
        self.domain
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case(domain.trim()))
    }
}

/// Feature switches of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFeatures {
    /// Tenants are isolated in separate databases.
    #[serde(default = "default_true")]
    pub multi_tenant: bool,
    /// Tenant branding replaces platform branding.
    #[serde(default = "default_true")]
    pub white_label: bool,
    /// Industry-specific modules are available.
    #[serde(default = "default_true")]
    pub industry_modules: bool,
    /// Records follow the hub/satellite/link convention.
    #[serde(default = "default_true")]
    pub data_vault: bool,
    /// Writes are audit logged.
    #[serde(default = "default_true")]
    pub audit_logging: bool,
    /// Storage is encrypted at rest.
    #[serde(default = "default_true")]
    pub encryption_at_rest: bool,
}

impl Default for PlatformFeatures {
    fn default() -> Self {
        Self {
            multi_tenant: true,
            white_label: true,
            industry_modules: true,
            data_vault: true,
            audit_logging: true,
            encryption_at_rest: true,
        }
    }
}

/// Platform-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Industries tenants may belong to.
    #[serde(default = "default_industries")]
    pub supported_industries: Vec<String>,
    /// Compliance frameworks the platform supports.
    #[serde(default = "default_compliance_frameworks")]
    pub compliance_frameworks: Vec<String>,
    /// Feature switches.
    #[serde(default)]
    pub features: PlatformFeatures,
}

fn default_industries() -> Vec<String> {
    [
        "spa_wellness",
        "financial_services",
        "equestrian",
        "property_management",
        "healthcare",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_compliance_frameworks() -> Vec<String> {
    ["hipaa", "hitech", "sox", "pci_dss", "gdpr", "ccpa", "glba"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            supported_industries: default_industries(),
            compliance_frameworks: default_compliance_frameworks(),
            features: PlatformFeatures::default(),
        }
    }
}

/// Location counts for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocationsSummary {
    /// Number of configured locations.
    pub total: usize,
    /// Number of active locations.
    pub active: usize,
    /// The locations themselves.
    pub locations: Vec<LocationSummary>,
}

/// Summary line for one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSummary {
    /// Location identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the location is operating.
    pub is_active: bool,
}

impl From<&TenantConfig> for LocationsSummary {
    fn from(config: &TenantConfig) -> Self {
        let locations: Vec<LocationSummary> = config
            .locations
            .iter()
            .map(|l| LocationSummary {
                id: l.id.clone(),
                name: l.name.clone(),
                is_active: l.is_active,
            })
            .collect();
        Self {
            total: locations.len(),
            active: locations.iter().filter(|l| l.is_active).count(),
            locations,
        }
    }
}
