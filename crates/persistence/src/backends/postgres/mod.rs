//! PostgreSQL backend implementation.
//!
//! Tenant databases are addressed with standard `postgres://` URLs. Async
//! pools use deadpool-postgres; blocking pools use r2d2 over the synchronous
//! `postgres` client. Schema and table discovery reads `information_schema`.

mod backend;
mod session;
mod values;

pub use backend::{
    PostgresBackend, PostgresBackendConfig, PostgresManager, PostgresSyncPool, TrackedClient,
};
pub use session::{PostgresAsyncSession, PostgresSession};
