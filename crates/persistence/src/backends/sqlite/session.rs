//! Transactional sessions for the SQLite backend.

use async_trait::async_trait;
use r2d2::PooledConnection;
use rusqlite::params_from_iter;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

use crate::core::{AsyncSession, Catalog, QueryResult, SqlValue, SyncSession, TableRef};
use crate::error::{BackendError, StorageError, StorageResult};

use super::backend::{SqliteManager, attach_new_schema_files, attached_databases};

const BACKEND_NAME: &str = "sqlite";

fn statement_error(e: rusqlite::Error) -> StorageError {
    BackendError::statement(BACKEND_NAME, e).into()
}

fn closed_error() -> StorageError {
    BackendError::internal(BACKEND_NAME, "session already finished").into()
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlValue::Timestamp(t) => ToSqlOutput::Owned(Value::Text(t.to_rfc3339())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
    }
}

/// A blocking SQLite session.
///
/// Holds a pooled connection with an open transaction. Dropping the session
/// without committing rolls the transaction back before the connection goes
/// back to the pool. Schema files created since the connection was opened
/// are attached when the session begins.
pub struct SqliteSession {
    conn: PooledConnection<SqliteManager>,
    active: bool,
}

impl std::fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSession")
            .field("active", &self.active)
            .finish()
    }
}

impl SqliteSession {
    pub(crate) fn begin(
        conn: PooledConnection<SqliteManager>,
        attach_schema_files: bool,
    ) -> StorageResult<Self> {
        if attach_schema_files {
            attach_new_schema_files(&conn)?;
        }
        conn.execute_batch("BEGIN").map_err(statement_error)?;
        Ok(Self { conn, active: true })
    }

    /// Returns `true` until the session is committed or rolled back.
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn finish(&mut self, statement: &str) -> StorageResult<()> {
        if !self.active {
            return Err(closed_error());
        }
        self.conn.execute_batch(statement).map_err(statement_error)?;
        self.active = false;
        Ok(())
    }


    fn tables_in(&mut self, schema: &str) -> StorageResult<Vec<TableRef>> {
        let sql = format!(
            "SELECT name FROM \"{}\".sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            schema.replace('"', "\"\"")
        );
        let mut stmt = self.conn.prepare(&sql).map_err(statement_error)?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(statement_error)?
            .map(|name| name.map(|name| TableRef::new(schema, name)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(statement_error)?;
        Ok(tables)
    }

    fn find_schemas(&mut self, names: &[String]) -> StorageResult<Vec<String>> {
        let attached = attached_databases(&self.conn).map_err(statement_error)?;
        Ok(names
            .iter()
            .filter(|name| attached.contains(name))
            .cloned()
            .collect())
    }

    fn find_base_tables(&mut self, schemas: &[String]) -> StorageResult<Vec<TableRef>> {
        let present = self.find_schemas(schemas)?;
        let mut tables = Vec::new();
        for schema in &present {
            tables.extend(self.tables_in(schema)?);
        }
        Ok(tables)
    }
}

impl SyncSession for SqliteSession {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        if !self.active {
            return Err(closed_error());
        }
        let changed = self
            .conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(statement_error)?;
        Ok(changed as u64)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        if !self.active {
            return Err(closed_error());
        }
        let mut stmt = self.conn.prepare(sql).map_err(statement_error)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut result_rows = Vec::new();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(statement_error)?;
        while let Some(row) = rows.next().map_err(statement_error)? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(from_value_ref(row.get_ref(index).map_err(statement_error)?));
            }
            result_rows.push(values);
        }

        Ok(QueryResult {
            columns,
            rows: result_rows,
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

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.active {
            tracing::debug!("Rolling back abandoned SQLite session");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Rollback of abandoned SQLite session failed");
            }
        }
    }
}

/// An async SQLite session.
///
/// Each statement runs on the blocking thread pool. The underlying session
/// moves into the blocking task and back, so a caller cancelled mid-statement
/// still rolls back once the statement finishes.
#[derive(Debug)]
pub struct SqliteAsyncSession {
    inner: Option<SqliteSession>,
}

impl SqliteAsyncSession {
    pub(crate) fn new(session: SqliteSession) -> Self {
        Self {
            inner: Some(session),
        }
    }

    async fn run<T, F>(&mut self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteSession) -> StorageResult<T> + Send + 'static,
    {
        let mut session = self.inner.take().ok_or_else(closed_error)?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut session);
            (session, result)
        })
        .await?;
        self.inner = Some(session);
        result
    }

    async fn finish(mut self, commit: bool) -> StorageResult<()> {
        let session = self.inner.take().ok_or_else(closed_error)?;
        tokio::task::spawn_blocking(move || {
            if commit {
                session.commit()
            } else {
                session.rollback()
            }
        })
        .await?
    }
}

#[async_trait]
impl AsyncSession for SqliteAsyncSession {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |session| session.execute(&sql, &params)).await
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |session| session.query(&sql, &params)).await
    }

    async fn commit(self) -> StorageResult<()> {
        self.finish(true).await
    }

    async fn rollback(self) -> StorageResult<()> {
        self.finish(false).await
    }
}

#[async_trait]
impl Catalog for SqliteAsyncSession {
    async fn schemas(&mut self, names: &[String]) -> StorageResult<Vec<String>> {
        let names = names.to_vec();
        self.run(move |session| session.find_schemas(&names)).await
    }

    async fn base_tables(&mut self, schemas: &[String]) -> StorageResult<Vec<TableRef>> {
        let schemas = schemas.to_vec();
        self.run(move |session| session.find_base_tables(&schemas))
            .await
    }
}
