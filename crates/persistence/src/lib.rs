//! OneVault Persistence Layer
//!
//! Routes work to per-tenant databases in a multi-tenant platform where every
//! tenant owns a physically separate database. The crate resolves a tenant to
//! its database, lazily creates and caches connection pools for it, validates
//! that the database follows the hub/satellite/link ("vault") convention, and
//! derives the deterministic identity hashes those records are keyed by.
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! onevault-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - SQLite via `r2d2` pools; schemas are attached sibling files
//! - `postgres` - PostgreSQL via `deadpool-postgres` (async) and `r2d2_postgres` (sync)
//!
//! # Architecture
//!
//! - [`hash`] - Deterministic hash keys and hash diffs
//! - [`vault`] - Hub, satellite and link record construction
//! - [`tenant`] - Tenant identifiers and the tenant directory
//! - [`registry`] - Cached tenant and platform configuration
//! - [`core`] - Backend, session and catalog traits
//! - [`backends`] - Backend implementations
//! - [`pool`] - Per-tenant pool cache
//! - [`router`] - Transactional tenant sessions
//! - [`validation`] - Vault-pattern structural validation
//! - [`config`] - Settings
//! - [`error`] - Error types
//!
//! # Identity hashing
//!
//! ```
//! use onevault_persistence::hash::{compute_hash_key, KeyPart};
//!
//! let a = compute_hash_key(["acme", "alice"]).unwrap();
//! let b = compute_hash_key(["acme", "alice"]).unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.to_hex().len(), 64);
//!
//! // An absent component is not the same as an empty one.
//! let absent = compute_hash_key([KeyPart::from("acme"), KeyPart::Null]).unwrap();
//! let empty = compute_hash_key(["acme", ""]).unwrap();
//! assert_ne!(absent, empty);
//! ```
//!
//! # Tenant sessions
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use onevault_persistence::backends::sqlite::SqliteBackend;
//! use onevault_persistence::config::RouterSettings;
//! use onevault_persistence::core::{AsyncSession, SqlValue};
//! use onevault_persistence::registry::{ConfigCache, FileConfigSource};
//! use onevault_persistence::router::TenantSessionRouter;
//! use onevault_persistence::{StorageError, TenantId};
//!
//! # async fn example() -> Result<(), StorageError> {
//! let settings = RouterSettings::default();
//! let configs = ConfigCache::from_settings(
//!     Arc::new(FileConfigSource::new("/etc/onevault/tenants")),
//!     &settings.registry,
//! );
//! let router = TenantSessionRouter::from_settings(SqliteBackend::new(), Arc::new(configs), &settings);
//!
//! let rows = router
//!     .with_session(&TenantId::new("acme"), |session| {
//!         Box::pin(async move {
//!             session
//!                 .query("SELECT user_bk FROM auth.user_h WHERE user_bk = ?1", &[SqlValue::from("alice")])
//!                 .await
//!         })
//!     })
//!     .await?;
//! println!("{} rows", rows.rows.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod hash;
pub mod pool;
pub mod registry;
pub mod router;
pub mod tenant;
pub mod validation;
pub mod vault;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use hash::{HashDiff, HashKey, KeyPart, compute_hash_diff, compute_hash_key};
pub use pool::ConnectionPoolCache;
pub use registry::ConfigCache;
pub use router::TenantSessionRouter;
pub use tenant::{TenantDirectory, TenantId};
pub use validation::{SchemaValidationReport, SchemaValidator};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
