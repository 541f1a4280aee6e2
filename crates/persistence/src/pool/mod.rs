//! Per-tenant connection pool caching.
//!
//! See [`ConnectionPoolCache`].

mod cache;

pub use cache::{ConnectionPoolCache, PoolStats, TenantPool};
