//! SQLite backend implementation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::config::PoolSettings;
use crate::core::{Backend, BackendKind, PoolStatus};
use crate::error::{BackendError, PoolError, StorageResult};

use super::session::{SqliteAsyncSession, SqliteSession};

const BACKEND_NAME: &str = "sqlite";

/// URL scheme accepted by this backend.
pub const SQLITE_SCHEME: &str = "sqlite://";

static SCHEMA_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static pattern is valid"));

/// A pool of SQLite connections to one tenant database.
pub type SqlitePool = Pool<SqliteManager>;

/// Connection manager for tenant pools.
///
/// Delegates to [`SqliteConnectionManager`], but treats a connection that
/// comes back with a transaction still open as broken, so r2d2 discards it
/// instead of handing it to the next borrower.
#[derive(Debug)]
pub struct SqliteManager {
    inner: SqliteConnectionManager,
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        self.inner.connect()
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        self.inner.is_valid(conn)
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        if conn.is_autocommit() {
            return false;
        }
        tracing::warn!("Discarding SQLite connection returned inside a transaction");
        true
    }
}

/// SQLite backend.
///
/// A tenant database is addressed as `sqlite://<path>`. Schema namespaces
/// live in sibling files named `<stem>.<schema>.db` next to the main file,
/// and every pooled connection attaches them under their schema name. For
/// `sqlite:///data/acme.db`, the file `/data/acme.auth.db` becomes schema
/// `auth`, so `auth.user_h` resolves as it would on PostgreSQL.
#[derive(Debug, Clone, Default)]
pub struct SqliteBackend {
    config: SqliteBackendConfig,
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode on the main database file.
    #[serde(default)]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,

    /// Attach sibling schema files on every connection.
    #[serde(default = "default_true")]
    pub attach_schema_files: bool,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: false,
            enable_foreign_keys: true,
            attach_schema_files: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a backend with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with custom configuration.
    pub fn with_config(config: SqliteBackendConfig) -> Self {
        Self { config }
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    fn build_pool(
        config: &SqliteBackendConfig,
        url: &str,
        settings: &PoolSettings,
    ) -> StorageResult<SqlitePool> {
        let path = database_path(url)?;
        let attachments = if config.attach_schema_files {
            schema_files(&path)?
        } else {
            Vec::new()
        };

        tracing::debug!(
            path = %path.display(),
            schemas = attachments.len(),
            max_size = settings.max_size(),
            "Building SQLite pool"
        );

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let enable_wal = config.enable_wal;
        let enable_foreign_keys = config.enable_foreign_keys;
        let attachments = Arc::new(attachments);

        let inner = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            }
            if enable_foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON")?;
            }
            for (schema, file) in attachments.iter() {
                conn.execute(
                    "ATTACH DATABASE ?1 AS ?2",
                    params![file.to_string_lossy().into_owned(), schema],
                )?;
            }
            Ok(())
        });
        let manager = SqliteManager { inner };

        let mut builder = Pool::builder()
            .max_size(settings.max_size())
            .min_idle(Some(settings.effective_min_idle()))
            .connection_timeout(settings.acquire_timeout());
        if let Some(idle) = settings.overflow_idle_timeout() {
            builder = builder.idle_timeout(Some(idle));
        }

        builder.build(manager).map_err(|e| {
            BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    fn status(pool: &SqlitePool) -> PoolStatus {
        let state = pool.state();
        PoolStatus {
            size: state.connections,
            idle: state.idle_connections,
            max_size: pool.max_size(),
        }
    }
}

/// Checks out a connection, distinguishing exhaustion from connect failures.
pub(crate) fn checkout(pool: &SqlitePool) -> StorageResult<PooledConnection<SqliteManager>> {
    pool.get().map_err(|e| {
        let state = pool.state();
        if state.connections >= pool.max_size() && state.idle_connections == 0 {
            PoolError::Exhausted {
                target: BACKEND_NAME.to_string(),
                timeout_ms: u64::try_from(pool.connection_timeout().as_millis())
                    .unwrap_or(u64::MAX),
            }
            .into()
        } else {
            BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            }
            .into()
        }
    })
}

/// Extracts the database file path from a `sqlite://` URL.
pub fn database_path(url: &str) -> StorageResult<PathBuf> {
    let path = url
        .strip_prefix(SQLITE_SCHEME)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("expected a {}<path> URL", SQLITE_SCHEME),
            }
        })?;
    Ok(PathBuf::from(path))
}

/// Names of every database attached to `conn`, `main` and `temp` excluded.
pub(crate) fn attached_databases(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names
        .into_iter()
        .filter(|name| name != "main" && name != "temp")
        .collect())
}

/// Attaches schema files that appeared since the connection was opened.
///
/// Must run outside a transaction; SQLite refuses `ATTACH` inside one.
pub(crate) fn attach_new_schema_files(conn: &Connection) -> StorageResult<()> {
    let Some(path) = conn.path().filter(|p| !p.is_empty()).map(PathBuf::from) else {
        return Ok(());
    };
    let attached = attached_databases(conn).map_err(|e| BackendError::statement(BACKEND_NAME, e))?;
    for (schema, file) in schema_files(&path)? {
        if attached.contains(&schema) {
            continue;
        }
        tracing::debug!(schema = %schema, file = %file.display(), "Attaching new schema file");
        conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            params![file.to_string_lossy().into_owned(), schema],
        )
        .map_err(|e| BackendError::statement(BACKEND_NAME, e))?;
    }
    Ok(())
}

/// Finds `<stem>.<schema>.db` files next to the main database file.
fn schema_files(path: &Path) -> StorageResult<Vec<(String, PathBuf)>> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{}.", stem);

    let entries = fs::read_dir(&dir).map_err(|e| BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: format!("cannot read {}: {}", dir.display(), e),
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(BackendError::from)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let schema = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".db"));
        if let Some(schema) = schema {
            if SCHEMA_NAME.is_match(schema) && schema != "main" && schema != "temp" {
                found.push((schema.to_string(), entry.path()));
            }
        }
    }
    found.sort();
    Ok(found)
}

#[async_trait]
impl Backend for SqliteBackend {
    type SyncPool = SqlitePool;
    type AsyncPool = SqlitePool;
    type SyncSession = SqliteSession;
    type AsyncSession = SqliteAsyncSession;

    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn create_sync_pool(&self, url: &str, settings: &PoolSettings) -> StorageResult<SqlitePool> {
        Self::build_pool(&self.config, url, settings)
    }

    async fn create_async_pool(
        &self,
        url: &str,
        settings: &PoolSettings,
    ) -> StorageResult<SqlitePool> {
        let config = self.config.clone();
        let url = url.to_string();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || Self::build_pool(&config, &url, &settings)).await?
    }

    fn begin_sync(&self, pool: &SqlitePool) -> StorageResult<SqliteSession> {
        SqliteSession::begin(checkout(pool)?, self.config.attach_schema_files)
    }

    async fn begin_async(&self, pool: &SqlitePool) -> StorageResult<SqliteAsyncSession> {
        let pool = pool.clone();
        let attach = self.config.attach_schema_files;
        let session =
            tokio::task::spawn_blocking(move || SqliteSession::begin(checkout(&pool)?, attach))
                .await??;
        Ok(SqliteAsyncSession::new(session))
    }

    fn sync_pool_status(&self, pool: &SqlitePool) -> PoolStatus {
        Self::status(pool)
    }

    fn async_pool_status(&self, pool: &SqlitePool) -> PoolStatus {
        Self::status(pool)
    }
}
