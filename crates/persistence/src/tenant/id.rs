//! Tenant identifier type.
//!
//! This module defines the [`TenantId`] type, an opaque, case-normalized
//! identifier that keys every pooled resource in the crate.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TenantError;

/// The system tenant identifier, used for the shared platform database.
pub const SYSTEM_TENANT: &str = "__system__";

/// Maximum length of a tenant identifier (PostgreSQL identifier limit).
pub const MAX_TENANT_ID_LENGTH: usize = 63;

static TENANT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("static pattern is valid"));

/// An opaque, case-normalized tenant identifier.
///
/// Identifiers are trimmed and ASCII-lowercased on construction, so `"ACME"`,
/// `" acme "` and `"acme"` all name the same tenant and share the same pools.
///
/// # Examples
///
/// ```
/// use onevault_persistence::tenant::TenantId;
///
/// let tenant = TenantId::new("  Acme-Corp ");
/// assert_eq!(tenant.as_str(), "acme-corp");
/// assert_eq!(tenant, TenantId::new("ACME-CORP"));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID, normalizing case and surrounding whitespace.
    ///
    /// No validation is performed; use [`TenantId::parse`] at trust
    /// boundaries.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_ascii_lowercase())
    }

    /// Parses and validates a tenant ID.
    ///
    /// After normalization the identifier must be non-empty, at most
    /// [`MAX_TENANT_ID_LENGTH`] characters, and match `^[a-z0-9][a-z0-9_-]*$`.
    ///
    /// # Examples
    ///
    /// ```
    /// use onevault_persistence::tenant::TenantId;
    ///
    /// assert!(TenantId::parse("tenant-001").is_ok());
    /// assert!(TenantId::parse("").is_err());
    /// assert!(TenantId::parse("drop table;").is_err());
    /// ```
    pub fn parse(id: impl AsRef<str>) -> Result<Self, TenantError> {
        let tenant = Self::new(id.as_ref());
        let invalid = |reason: &str| TenantError::InvalidTenant {
            value: id.as_ref().to_string(),
            reason: reason.to_string(),
        };

        if tenant.0.is_empty() {
            return Err(invalid("tenant id is empty"));
        }
        if tenant.0.len() > MAX_TENANT_ID_LENGTH {
            return Err(invalid("tenant id exceeds 63 characters"));
        }
        if !TENANT_ID_PATTERN.is_match(&tenant.0) {
            return Err(invalid(
                "tenant id may only contain a-z, 0-9, '_' and '-' and must start with a letter or digit",
            ));
        }
        Ok(tenant)
    }

    /// Returns the system tenant ID.
    pub fn system() -> Self {
        Self(SYSTEM_TENANT.to_string())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this is the system tenant.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_TENANT
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::parse(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::new(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
