//! Vault-pattern structural validator.

use std::sync::Arc;

use crate::config::ValidationSettings;
use crate::core::{AsyncSession, Backend, Catalog, TableRef};
use crate::error::StorageResult;
use crate::pool::ConnectionPoolCache;
use crate::tenant::TenantId;

use super::report::SchemaValidationReport;

/// Checks tenant databases against the vault-pattern convention.
///
/// Every call inspects the live catalog inside a transaction that is always
/// rolled back. Results are never cached, so a structural change is visible
/// on the next call.
pub struct SchemaValidator<B: Backend> {
    pools: Arc<ConnectionPoolCache<B>>,
    settings: ValidationSettings,
}

impl<B: Backend> std::fmt::Debug for SchemaValidator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> SchemaValidator<B> {
    /// Creates a validator that borrows connections from `pools`.
    pub fn new(pools: Arc<ConnectionPoolCache<B>>, settings: ValidationSettings) -> Self {
        Self { pools, settings }
    }

    /// Returns the convention being checked.
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validates one tenant.
    ///
    /// Never fails: if the database cannot be reached, the report carries
    /// the error and is marked invalid.
    pub async fn validate(&self, tenant: &TenantId) -> SchemaValidationReport {
        match self.inspect(tenant).await {
            Ok(report) => {
                tracing::info!(
                    tenant = %tenant,
                    valid = report.is_structurally_valid,
                    missing = ?report.missing_schemas,
                    hubs = report.hub_table_count,
                    satellites = report.satellite_table_count,
                    links = report.link_table_count,
                    "Validated tenant schema"
                );
                report
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "Schema validation failed");
                SchemaValidationReport::failed(tenant.clone(), e.to_string())
            }
        }
    }

    /// Validates several tenants; one failure never aborts the batch.
    pub async fn validate_many(&self, tenants: &[TenantId]) -> Vec<SchemaValidationReport> {
        let mut reports = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            reports.push(self.validate(tenant).await);
        }
        reports
    }

    /// Validates every tenant the directory knows about.
    pub async fn validate_all(&self) -> StorageResult<Vec<SchemaValidationReport>> {
        let directory = Arc::clone(self.pools.directory());
        let tenants = tokio::task::spawn_blocking(move || directory.list_tenants()).await??;
        Ok(self.validate_many(&tenants).await)
    }

    async fn inspect(&self, tenant: &TenantId) -> StorageResult<SchemaValidationReport> {
        let pool = self.pools.get_async_pool(tenant).await?;
        let mut session = self.pools.backend().begin_async(&pool).await?;

        let surveyed = self.survey(&mut session).await;
        if let Err(e) = session.rollback().await {
            tracing::warn!(tenant = %tenant, error = %e, "Rollback after validation failed");
        }
        let (existing, tables) = surveyed?;

        Ok(SchemaValidationReport::from_catalog(
            tenant.clone(),
            &self.settings,
            &existing,
            &tables,
        ))
    }

    async fn survey(
        &self,
        session: &mut B::AsyncSession,
    ) -> StorageResult<(Vec<String>, Vec<TableRef>)> {
        let existing = session.schemas(&self.settings.required_schemas).await?;
        let tables = session.base_tables(&self.settings.data_schemas).await?;
        Ok((existing, tables))
    }
}
