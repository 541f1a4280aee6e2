//! Core traits shared by every backend.
//!
//! - [`Backend`] builds pools and opens sessions
//! - [`SyncSession`] / [`AsyncSession`] run statements inside a transaction
//! - [`Catalog`] inspects schemas and tables

mod backend;
mod catalog;
mod session;

pub use backend::{Backend, BackendKind, PoolKey, PoolMode, PoolStatus};
pub use catalog::{Catalog, TableRef};
pub use session::{AsyncSession, QueryResult, SqlValue, SyncSession};
