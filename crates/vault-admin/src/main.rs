//! OneVault administration CLI.
//!
//! Validates tenant databases, probes connectivity and computes vault hash
//! keys from the command line.

mod cli;

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use onevault_persistence::core::Backend;
use onevault_persistence::hash::hash_values;
use onevault_persistence::registry::{ConfigCache, FileConfigSource};
use onevault_persistence::router::TenantSessionRouter;
use onevault_persistence::tenant::TenantId;
use onevault_persistence::validation::SchemaValidator;

use cli::{BackendChoice, Cli, Command};

/// Initializes the tracing subscriber, honouring `RUST_LOG` when set.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "vault_admin={level},onevault_persistence={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let settings = cli.router_settings();
    if let Err(errors) = settings.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(2);
    }

    let healthy = match cli.backend {
        BackendChoice::Sqlite => run_sqlite(&cli).await?,
        BackendChoice::Postgres => run_postgres(&cli).await?,
    };
    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn run_sqlite(cli: &Cli) -> anyhow::Result<bool> {
    use onevault_persistence::backends::sqlite::SqliteBackend;
    run(SqliteBackend::new(), cli).await
}

#[cfg(not(feature = "sqlite"))]
async fn run_sqlite(_cli: &Cli) -> anyhow::Result<bool> {
    anyhow::bail!(
        "The sqlite backend requires the 'sqlite' feature. \
         Build with: cargo build -p onevault-admin --features sqlite"
    )
}

#[cfg(feature = "postgres")]
async fn run_postgres(cli: &Cli) -> anyhow::Result<bool> {
    use onevault_persistence::backends::postgres::PostgresBackend;
    run(PostgresBackend::new(), cli).await
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(_cli: &Cli) -> anyhow::Result<bool> {
    anyhow::bail!(
        "The postgres backend requires the 'postgres' feature. \
         Build with: cargo build -p onevault-admin --features postgres"
    )
}

/// Runs the selected subcommand. Returns `false` when a check failed.
async fn run<B: Backend>(backend: B, cli: &Cli) -> anyhow::Result<bool> {
    let settings = cli.router_settings();
    let configs = Arc::new(ConfigCache::from_settings(
        Arc::new(FileConfigSource::new(&cli.config_dir)),
        &settings.registry,
    ));
    let router = TenantSessionRouter::from_settings(backend, configs.clone(), &settings);

    info!(
        config_dir = %cli.config_dir.display(),
        backend = router.pools().backend().name(),
        "vault-admin starting"
    );

    let healthy = match &cli.command {
        Command::Hash { values } => {
            let values: Vec<_> = values.iter().map(|v| cli::parse_component(v)).collect();
            print_json(&hash_values(&values)?)?;
            true
        }
        Command::Validate { tenant } => {
            let validator =
                SchemaValidator::new(Arc::clone(router.pools()), settings.validation.clone());
            let reports = match tenant {
                Some(tenant) => vec![validator.validate(&TenantId::parse(tenant)?).await],
                None => validator.validate_all().await?,
            };
            print_json(&reports)?;
            reports.iter().all(|r| r.is_structurally_valid)
        }
        Command::Health { tenant } => {
            let report = match tenant {
                Some(tenant) => router.check_connectivity(&TenantId::parse(tenant)?).await,
                None => router.check_system_connectivity().await,
            };
            print_json(&report)?;
            report.connected
        }
        Command::Tenants => {
            let tenants = configs.tenant_ids()?;
            print_json(&tenants)?;
            true
        }
    };

    router.pools().shutdown();
    Ok(healthy)
}
