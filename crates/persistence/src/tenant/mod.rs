//! Tenant identity and resolution.
//!
//! - [`TenantId`] - Case-normalized tenant identifier used as the key for all pools
//! - [`TenantDirectory`] - Lookup from tenant to database connection information
//! - [`StaticDirectory`] - In-memory directory

mod directory;
mod id;

pub use directory::{StaticDirectory, TenantConnectionInfo, TenantDirectory};
pub use id::{MAX_TENANT_ID_LENGTH, SYSTEM_TENANT, TenantId};
