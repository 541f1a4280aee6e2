//! Read-only access to a database's catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// A base table qualified by its schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema namespace.
    pub schema: String,
    /// Unqualified table name.
    pub name: String,
}

impl TableRef {
    /// Creates a table reference.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Catalog queries run inside an open session.
#[async_trait]
pub trait Catalog {
    /// Returns which of `names` exist as schemas.
    async fn schemas(&mut self, names: &[String]) -> StorageResult<Vec<String>>;

    /// Lists base tables (no views) in the given schemas.
    async fn base_tables(&mut self, schemas: &[String]) -> StorageResult<Vec<TableRef>>;
}
