//! Transactional sessions and the values that flow through them.
//!
//! A session is a checked-out connection with an open transaction. It is
//! finished exactly once, by [`commit`](SyncSession::commit) or
//! [`rollback`](SyncSession::rollback); a session dropped without either
//! rolls back before its connection returns to the pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// A single SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer of any width.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Timestamp with time zone, normalized to UTC.
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Returns `true` for SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Returns the text value, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(v $(as $cast)?)
                }
            }
        )*
    };
}

sql_value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int as i64,
    u32 => Int as i64,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Row values, each aligned with `columns`.
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by a data-modifying statement.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Builds the result of a statement that returns no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    /// Returns `true` if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns the first cell of the first row.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// A transactional session for blocking callers.
pub trait SyncSession: Send + 'static {
    /// Executes a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64>;

    /// Runs a query and collects every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult>;

    /// Commits the transaction and releases the connection.
    fn commit(self) -> StorageResult<()>;

    /// Rolls back the transaction and releases the connection.
    fn rollback(self) -> StorageResult<()>;
}

/// A transactional session for async tasks.
#[async_trait]
pub trait AsyncSession: Send + 'static {
    /// Executes a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<u64>;

    /// Runs a query and collects every row.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> StorageResult<QueryResult>;

    /// Commits the transaction and releases the connection.
    async fn commit(self) -> StorageResult<()>;

    /// Rolls back the transaction and releases the connection.
    async fn rollback(self) -> StorageResult<()>;
}
