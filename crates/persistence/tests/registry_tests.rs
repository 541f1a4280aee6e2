//! Configuration cache as the tenant directory of a live router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use onevault_persistence::error::{StorageError, TenantError};
use onevault_persistence::registry::{ConfigCache, FileConfigSource};
use onevault_persistence::tenant::TenantId;

use common::{small_pool_settings, sqlite_router, sqlite_url};

fn write_tenant(dir: &std::path::Path, file: &str, document: serde_json::Value) {
    std::fs::write(dir.join(file), document.to_string()).unwrap();
}

#[tokio::test]
async fn test_router_resolves_tenants_from_config_files() {
    let data = tempfile::tempdir().unwrap();
    let configs = tempfile::tempdir().unwrap();
    write_tenant(
        configs.path(),
        "acme.json",
        json!({
            "tenantId": "acme",
            "name": "Acme Corp",
            "databaseUrl": sqlite_url(data.path(), "acme"),
            "complianceFrameworks": ["sox"]
        }),
    );
    write_tenant(
        configs.path(),
        "dormant.json",
        json!({
            "tenantId": "dormant",
            "isActive": false,
            "databaseUrl": sqlite_url(data.path(), "dormant")
        }),
    );

    let cache = Arc::new(ConfigCache::new(
        Arc::new(FileConfigSource::new(configs.path())),
        Duration::from_secs(300),
    ));
    let router = sqlite_router(cache.clone(), small_pool_settings());

    let result = router
        .execute_raw(&TenantId::new("acme"), "SELECT 1", &[])
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);

    let err = router
        .execute_raw(&TenantId::new("dormant"), "SELECT 1", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Tenant(TenantError::Suspended { .. })));

    assert_eq!(
        cache.tenant_ids().unwrap(),
        vec![TenantId::new("acme"), TenantId::new("dormant")]
    );
    assert_eq!(cache.compliance_frameworks(&TenantId::new("acme")).unwrap(), vec!["sox"]);
}

#[tokio::test]
async fn test_new_tenant_file_is_picked_up_without_reload() {
    let data = tempfile::tempdir().unwrap();
    let configs = tempfile::tempdir().unwrap();
    let cache = Arc::new(ConfigCache::new(
        Arc::new(FileConfigSource::new(configs.path())),
        Duration::from_secs(300),
    ));
    let router = sqlite_router(cache.clone(), small_pool_settings());
    let tenant = TenantId::new("newco");

    let err = router.execute_raw(&tenant, "SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, StorageError::Tenant(TenantError::NotFound { .. })));

    write_tenant(
        configs.path(),
        "newco.json",
        json!({"tenantId": "newco", "databaseUrl": sqlite_url(data.path(), "newco")}),
    );
    router.execute_raw(&tenant, "SELECT 1", &[]).await.unwrap();
}

#[test]
fn test_reload_picks_up_changed_documents() {
    let configs = tempfile::tempdir().unwrap();
    write_tenant(
        configs.path(),
        "acme.json",
        json!({"tenantId": "acme", "databaseUrl": "sqlite:///srv/acme-v1.db"}),
    );
    let cache = ConfigCache::new(
        Arc::new(FileConfigSource::new(configs.path())),
        Duration::from_secs(300),
    );
    let tenant = TenantId::new("acme");
    assert_eq!(
        cache.tenant_config(&tenant).unwrap().unwrap().database_url.as_deref(),
        Some("sqlite:///srv/acme-v1.db")
    );

    write_tenant(
        configs.path(),
        "acme.json",
        json!({"tenantId": "acme", "databaseUrl": "sqlite:///srv/acme-v2.db"}),
    );
    assert_eq!(
        cache.tenant_config(&tenant).unwrap().unwrap().database_url.as_deref(),
        Some("sqlite:///srv/acme-v1.db")
    );

    cache.reload();
    assert_eq!(
        cache.tenant_config(&tenant).unwrap().unwrap().database_url.as_deref(),
        Some("sqlite:///srv/acme-v2.db")
    );
}
