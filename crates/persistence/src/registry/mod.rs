//! Tenant and platform configuration.
//!
//! - [`ConfigSource`] - Where configuration documents come from
//! - [`StaticConfigSource`] / [`FileConfigSource`] - In-memory and JSON-directory sources
//! - [`ConfigCache`] - Freshness-windowed cache; the production [`TenantDirectory`](crate::tenant::TenantDirectory)

mod cache;
mod config;
mod source;

pub use cache::ConfigCache;
pub use config::{
    LocationConfig, LocationSummary, LocationsSummary, PlatformConfig, PlatformFeatures,
    TenantConfig,
};
pub use source::{ConfigSource, FileConfigSource, StaticConfigSource};
