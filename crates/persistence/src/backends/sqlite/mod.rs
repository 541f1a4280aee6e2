//! SQLite backend implementation.
//!
//! Each tenant database is a main SQLite file plus one sibling file per
//! schema namespace:
//!
//! ```text
//! /var/lib/onevault/acme.db           main database
//! /var/lib/onevault/acme.auth.db      schema "auth"
//! /var/lib/onevault/acme.business.db  schema "business"
//! ```
//!
//! Pools are built with r2d2 and every connection attaches the schema files,
//! so qualified names such as `auth.user_h` work unchanged. Async sessions
//! run statements on the blocking thread pool.
//!
//! # Example
//!
//! ```no_run
//! use onevault_persistence::backends::sqlite::SqliteBackend;
//! use onevault_persistence::config::PoolSettings;
//! use onevault_persistence::core::{Backend, SyncSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::new();
//! let pool = backend.create_sync_pool("sqlite:///var/lib/onevault/acme.db", &PoolSettings::default())?;
//!
//! let mut session = backend.begin_sync(&pool)?;
//! session.execute("CREATE TABLE IF NOT EXISTS auth.user_h (user_hk BLOB PRIMARY KEY)", &[])?;
//! session.commit()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod session;

pub use backend::{
    SQLITE_SCHEME, SqliteBackend, SqliteBackendConfig, SqliteManager, SqlitePool, database_path,
};
pub use session::{SqliteAsyncSession, SqliteSession};
