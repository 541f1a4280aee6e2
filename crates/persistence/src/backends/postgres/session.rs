//! Transactional sessions for the PostgreSQL backend.

use async_trait::async_trait;
use deadpool_postgres::Client;
use r2d2::PooledConnection;

use crate::core::{AsyncSession, Catalog, QueryResult, SqlValue, SyncSession, TableRef};
use crate::error::{BackendError, StorageError, StorageResult};

use super::backend::PostgresManager;
use super::values::{param_refs, row_values};

const BACKEND_NAME: &str = "postgres";

fn statement_error(e: tokio_postgres::Error) -> StorageError {
    BackendError::statement(BACKEND_NAME, e).into()
}

fn closed_error() -> StorageError {
    BackendError::internal(BACKEND_NAME, "session already finished").into()
}

/// An async PostgreSQL session.
///
/// Wraps a pooled client with an open transaction. A session dropped while
/// still active (for example because the owning task was cancelled) spawns a
/// rollback on the current runtime; the client returns to the pool only after
/// the rollback completes, and is discarded if the rollback fails.
pub struct PostgresAsyncSession {
    client: Option<Client>,
    active: bool,
}

impl std::fmt::Debug for PostgresAsyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAsyncSession")
            .field("active", &self.active)
            .finish()
    }
}

impl PostgresAsyncSession {
    pub(crate) async fn begin(client: Client) -> StorageResult<Self> {
        client
            .batch_execute("BEGIN")
            .await
            .map_err(statement_error)?;
        Ok(Self {
            client: Some(client),
            active: true,
        })
    }

    fn client(&self) -> StorageResult<&Client> {
        match &self.client {
            Some(client) if self.active => Ok(client),
            _ => Err(closed_error()),
        }
    }

    async fn finish(&mut self, statement: &str) -> StorageResult<()> {
        self.client()?
            .batch_execute(statement)
            .await
            .map_err(statement_error)?;
        self.active = false;
        Ok(())
    }
}

#[async_trait]
impl AsyncSession for PostgresAsyncSession {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        let client = self.client()?;
        client
            .execute(sql, &param_refs(params))
            .await
            .map_err(statement_error)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let client = self.client()?;
        let statement = client.prepare_cached(sql).await.map_err(statement_error)?;
        let rows = client
            .query(&statement, &param_refs(params))
            .await
            .map_err(statement_error)?;

        Ok(QueryResult {
            columns: statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            rows: rows
                .iter()
                .map(row_values)
                .collect::<Result<_, _>>()
                .map_err(statement_error)?,
            rows_affected: 0,
        })
    }

    async fn commit(mut self) -> StorageResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self) -> StorageResult<()> {
        self.finish("ROLLBACK").await
    }
}

#[async_trait]
impl Catalog for PostgresAsyncSession {
    async fn schemas(&mut self, names: &[String]) -> StorageResult<Vec<String>> {
        let wanted = names.to_vec();
        let rows = self
            .client()?
            .query(
                "SELECT schema_name::text FROM information_schema.schemata \
                 WHERE schema_name = ANY($1)",
                &[&wanted],
            )
            .await
            .map_err(statement_error)?;
        let found: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
        Ok(wanted.into_iter().filter(|n| found.contains(n)).collect())
    }

    async fn base_tables(&mut self, schemas: &[String]) -> StorageResult<Vec<TableRef>> {
        let wanted = schemas.to_vec();
        let rows = self
            .client()?
            .query(
                "SELECT table_schema::text, table_name::text FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' AND table_schema = ANY($1) \
                 ORDER BY table_schema, table_name",
                &[&wanted],
            )
            .await
            .map_err(statement_error)?;
        Ok(rows
            .iter()
            .map(|row| TableRef::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }
}

impl Drop for PostgresAsyncSession {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!(
                            error = %e,
                            "Rollback of abandoned session failed, discarding connection"
                        );
                        drop(deadpool_postgres::Object::take(client));
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Session dropped outside a runtime, discarding connection");
                drop(deadpool_postgres::Object::take(client));
            }
        }
    }
}

/// A blocking PostgreSQL session.
///
/// The pooled client stays marked as in a transaction until `COMMIT` or
/// `ROLLBACK` succeeds; a client still marked when it goes back to the pool
/// is discarded.
pub struct PostgresSession {
    conn: PooledConnection<PostgresManager>,
    active: bool,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("active", &self.active)
            .finish()
    }
}

impl PostgresSession {
    pub(crate) fn begin(mut conn: PooledConnection<PostgresManager>) -> StorageResult<Self> {
        conn.in_transaction = true;
        conn.client.batch_execute("BEGIN").map_err(statement_error)?;
        Ok(Self { conn, active: true })
    }

    fn finish(&mut self, statement: &str) -> StorageResult<()> {
        if !self.active {
            return Err(closed_error());
        }
        self.conn
            .client
            .batch_execute(statement)
            .map_err(statement_error)?;
        self.conn.in_transaction = false;
        self.active = false;
        Ok(())
    }
}

impl SyncSession for PostgresSession {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        if !self.active {
            return Err(closed_error());
        }
        self.conn
            .client
            .execute(sql, &param_refs(params))
            .map_err(statement_error)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        if !self.active {
            return Err(closed_error());
        }
        let statement = self.conn.client.prepare(sql).map_err(statement_error)?;
        let rows = self
            .conn
            .client
            .query(&statement, &param_refs(params))
            .map_err(statement_error)?;

        Ok(QueryResult {
            columns: statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            rows: rows
                .iter()
                .map(row_values)
                .collect::<Result<_, _>>()
                .map_err(statement_error)?,
            rows_affected: 0,
        })
    }

    fn commit(mut self) -> StorageResult<()> {
        self.finish("COMMIT")
    }

    fn rollback(mut self) -> StorageResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if self.active {
            tracing::debug!("Rolling back abandoned PostgreSQL session");
            match self.conn.client.batch_execute("ROLLBACK") {
                Ok(()) => self.conn.in_transaction = false,
                Err(e) => tracing::warn!(
                    error = %e,
                    "Rollback of abandoned session failed, discarding connection"
                ),
            }
        }
    }
}
