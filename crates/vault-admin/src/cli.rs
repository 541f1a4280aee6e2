//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use onevault_persistence::config::{PoolSettings, RouterSettings};

/// Operator tooling for OneVault tenant databases.
#[derive(Debug, Parser)]
#[command(name = "vault-admin", version, about)]
pub struct Cli {
    /// Directory holding `<tenant>.json` documents and an optional `platform.json`.
    #[arg(long, env = "ONEVAULT_CONFIG_DIR", default_value = "config/tenants")]
    pub config_dir: PathBuf,

    /// Database backend tenant URLs point at.
    #[arg(long, env = "ONEVAULT_BACKEND", value_enum, default_value = "sqlite")]
    pub backend: BackendChoice,

    /// URL of the shared platform database.
    #[arg(long, env = "ONEVAULT_SYSTEM_DATABASE_URL")]
    pub system_database_url: Option<String>,

    /// Base connections per tenant pool.
    #[arg(long, env = "ONEVAULT_POOL_SIZE", default_value = "5")]
    pub pool_size: u32,

    /// How long to wait for a free connection (e.g. `500ms`, `30s`).
    #[arg(
        long,
        env = "ONEVAULT_ACQUIRE_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub acquire_timeout: Duration,

    /// Log level.
    #[arg(long, env = "ONEVAULT_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// `sqlite://` URLs.
    Sqlite,
    /// `postgres://` URLs.
    Postgres,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the hash key of ordered components.
    ///
    /// Each component is read as a JSON scalar when it parses as one
    /// (`42`, `true`, `null`), otherwise as text.
    Hash {
        /// Components, in order.
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Check tenant databases against the vault convention.
    Validate {
        /// Tenant to validate; every configured tenant when omitted.
        tenant: Option<String>,
    },

    /// Probe connectivity of a tenant database, or the platform database.
    Health {
        /// Tenant to probe; the platform database when omitted.
        tenant: Option<String>,
    },

    /// List configured tenants.
    Tenants,
}

impl Cli {
    /// Router settings derived from the command line.
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            system_database_url: self.system_database_url.clone(),
            pool: PoolSettings::new()
                .with_pool_size(self.pool_size)
                .with_acquire_timeout(self.acquire_timeout),
            ..RouterSettings::default()
        }
    }
}

/// Reads a component argument as a JSON scalar, falling back to text.
pub fn parse_component(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if !value.is_array() && !value.is_object() => value,
        _ => serde_json::Value::String(raw.to_string()),
    }
}
