//! Structural validation report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ValidationSettings;
use crate::core::TableRef;
use crate::tenant::TenantId;

/// Kind of a vault-pattern table, derived from its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Identity table (`_h`).
    Hub,
    /// Historized attribute table (`_s`).
    Satellite,
    /// Relationship table (`_l`).
    Link,
    /// Any other table.
    Other,
}

impl TableKind {
    /// Classifies a table name by the configured suffixes.
    pub fn classify(name: &str, settings: &ValidationSettings) -> Self {
        if name.ends_with(&settings.hub_suffix) {
            TableKind::Hub
        } else if name.ends_with(&settings.satellite_suffix) {
            TableKind::Satellite
        } else if name.ends_with(&settings.link_suffix) {
            TableKind::Link
        } else {
            TableKind::Other
        }
    }
}

/// Outcome of validating one tenant database against the vault convention.
///
/// A missing schema is reported here, not raised as an error. `error` is set
/// only when the database could not be inspected at all, in which case every
/// count is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValidationReport {
    /// Tenant that was validated.
    pub tenant_id: TenantId,
    /// `true` when every required schema exists and inspection succeeded.
    pub is_structurally_valid: bool,
    /// Required schemas that exist, in configured order.
    pub existing_schemas: Vec<String>,
    /// Required schemas that do not exist, in configured order.
    pub missing_schemas: Vec<String>,
    /// Tables ending in the hub suffix.
    pub hub_table_count: usize,
    /// Tables ending in the satellite suffix.
    pub satellite_table_count: usize,
    /// Tables ending in the link suffix.
    pub link_table_count: usize,
    /// All base tables in the data schemas.
    pub total_table_count: usize,
    /// When the inspection ran.
    pub validated_at: DateTime<Utc>,
    /// Why the database could not be inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchemaValidationReport {
    /// Builds a report from catalog results.
    pub fn from_catalog(
        tenant_id: TenantId,
        settings: &ValidationSettings,
        existing: &[String],
        tables: &[TableRef],
    ) -> Self {
        let (existing_schemas, missing_schemas): (Vec<String>, Vec<String>) = settings
            .required_schemas
            .iter()
            .cloned()
            .partition(|schema| existing.contains(schema));

        let mut report = Self {
            tenant_id,
            is_structurally_valid: missing_schemas.is_empty(),
            existing_schemas,
            missing_schemas,
            hub_table_count: 0,
            satellite_table_count: 0,
            link_table_count: 0,
            total_table_count: tables.len(),
            validated_at: Utc::now(),
            error: None,
        };
        for table in tables {
            match TableKind::classify(&table.name, settings) {
                TableKind::Hub => report.hub_table_count += 1,
                TableKind::Satellite => report.satellite_table_count += 1,
                TableKind::Link => report.link_table_count += 1,
                TableKind::Other => {}
            }
        }
        report
    }

    /// Builds the report for a database that could not be inspected.
    pub fn failed(tenant_id: TenantId, error: impl Into<String>) -> Self {
        Self {
            tenant_id,
            is_structurally_valid: false,
            existing_schemas: Vec::new(),
            missing_schemas: Vec::new(),
            hub_table_count: 0,
            satellite_table_count: 0,
            link_table_count: 0,
            total_table_count: 0,
            validated_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}
