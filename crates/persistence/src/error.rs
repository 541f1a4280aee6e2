//! Error types for the routing and identity layer.
//!
//! This module defines all error types used throughout the crate, following a
//! hierarchy that separates tenant resolution errors, pool errors, backend
//! (statement and connection) errors, hashing errors and configuration source
//! errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::core::PoolMode;
use crate::tenant::TenantId;

/// Boxed driver error kept as the `source` of backend errors.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all routing operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Tenant resolution errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Pool construction and acquisition errors
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Identity hashing errors
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Configuration source errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Returns `true` if retrying the same call later may succeed.
    ///
    /// Pool creation and exhaustion are transient; unknown tenants, missing
    /// connection strings, rejected statements and encoding errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Pool(_) => true,
            StorageError::Backend(BackendError::ConnectionFailed { .. }) => true,
            StorageError::Config(ConfigError::Source { .. }) => true,
            _ => false,
        }
    }
}

/// Errors related to resolving a tenant to its database.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The tenant is not known to the configuration source.
    #[error("tenant not found: {tenant_id}")]
    NotFound { tenant_id: TenantId },

    /// The tenant is configured but has no database URL.
    #[error("no database URL configured for tenant: {tenant_id}")]
    MissingConnectionString { tenant_id: TenantId },

    /// The tenant is configured but marked inactive.
    #[error("tenant suspended: {tenant_id}")]
    Suspended { tenant_id: TenantId },

    /// The tenant identifier is malformed.
    #[error("invalid tenant id '{value}': {reason}")]
    InvalidTenant { value: String, reason: String },
}

/// Errors related to connection pools.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool for a tenant could not be constructed.
    #[error("failed to create {mode} pool for {target}: {message}")]
    Creation {
        target: String,
        mode: PoolMode,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// No connection became available within the acquire timeout.
    #[error("connection pool exhausted for {target} after {timeout_ms}ms")]
    Exhausted { target: String, timeout_ms: u64 },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store rejected a statement.
    #[error("statement failed on {backend_name}: {message}")]
    Statement {
        backend_name: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl BackendError {
    /// Wraps a driver error that rejected a statement.
    pub fn statement<E>(backend_name: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BackendError::Statement {
            backend_name: backend_name.to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Builds an internal error without an underlying source.
    pub fn internal(backend_name: &str, message: impl Into<String>) -> Self {
        BackendError::Internal {
            backend_name: backend_name.to_string(),
            message: message.into(),
            source: None,
        }
    }
}

/// Errors produced while computing identity hashes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// A component has no canonical string form.
    #[error("hash component {index} cannot be encoded: {reason}")]
    Encoding { index: usize, reason: String },

    /// No components were supplied.
    #[error("no values provided for hashing")]
    EmptyInput,
}

/// Errors from the external configuration source.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The source could not be reached or read.
    #[error("configuration source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// The source returned a document that does not match the expected shape.
    #[error("invalid configuration for {key}: {message}")]
    Parse { key: String, message: String },
}

/// Result type alias for routing operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for hashing operations.
pub type HashResult<T> = Result<T, HashError>;

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "runtime".to_string(),
            message: format!("blocking task failed: {}", err),
            source: Some(Box::new(err)),
        })
    }
}
