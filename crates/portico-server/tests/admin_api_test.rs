//! End-to-end tests over the assembled server router: admin endpoints,
//! toggle management, and the gated module surface

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use tower::util::ServiceExt;

use portico_core::descriptor::{ApiRoutes, DatabaseSpec, EndpointSpec, ModuleDescriptor};
use portico_core::error::Result;
use portico_core::stores::{
    PermissionCatalog, TableDefinition, TableDeployer, TenantDirectory, ToggleState, ToggleStore,
};
use portico_core::tenant::{NewTenant, TenantId, TenantRecord, TenantStatus};
use portico_hotswap::HotswapCoordinator;
use portico_registry::{
    DescriptorStore, HandlerRegistry, LifecycleService, RouteMountTable, StaticModuleHandlers,
};
use portico_tenancy::TenantConnectionManager;

use portico_server::app::{self, AppState};
use portico_server::health::HealthState;

// ---- In-memory control-plane stand-ins ----

struct InMemoryTenants {
    records: Mutex<Vec<TenantRecord>>,
}

impl InMemoryTenants {
    fn with_tenant(record: TenantRecord) -> Self {
        Self {
            records: Mutex::new(vec![record]),
        }
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenants {
    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord> {
        let record = TenantRecord {
            id: TenantId::new(),
            code: tenant.code,
            name: tenant.name,
            schema_name: portico_core::schema_name::generate_schema_name(&tenant.domain)?,
            domain: tenant.domain,
            status: TenantStatus::Provisioning,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<()> {
        for record in self.records.lock().unwrap().iter_mut() {
            if record.id == id {
                record.status = status;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryToggles {
    global: Mutex<HashMap<String, bool>>,
    tenant: Mutex<HashMap<(TenantId, String), bool>>,
}

#[async_trait]
impl ToggleStore for InMemoryToggles {
    async fn effective(&self, tenant: TenantId, module_id: &str) -> Result<ToggleState> {
        Ok(ToggleState {
            enabled_global: self
                .global
                .lock()
                .unwrap()
                .get(module_id)
                .copied()
                .unwrap_or(false),
            enabled_tenant: self
                .tenant
                .lock()
                .unwrap()
                .get(&(tenant, module_id.to_string()))
                .copied()
                .unwrap_or(false),
        })
    }

    async fn set_global(&self, module_id: &str, enabled: bool) -> Result<()> {
        self.global
            .lock()
            .unwrap()
            .insert(module_id.to_string(), enabled);
        Ok(())
    }

    async fn set_tenant(&self, tenant: TenantId, module_id: &str, enabled: bool) -> Result<()> {
        self.tenant
            .lock()
            .unwrap()
            .insert((tenant, module_id.to_string()), enabled);
        Ok(())
    }

    async fn list_global(&self) -> Result<Vec<(String, bool)>> {
        Ok(self.global.lock().unwrap().clone().into_iter().collect())
    }

    async fn list_tenant(&self, tenant: TenantId) -> Result<Vec<(String, bool)>> {
        Ok(self
            .tenant
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == tenant)
            .map(|((_, module), enabled)| (module.clone(), *enabled))
            .collect())
    }
}

struct Noop;

#[async_trait]
impl TableDeployer for Noop {
    async fn deploy(&self, _tenant: &TenantRecord, _tables: &[TableDefinition]) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl PermissionCatalog for Noop {
    async fn record(&self, _module_id: &str, _permissions: &[String]) -> Result<()> {
        Ok(())
    }
}

// ---- Fixture ----

struct Fixture {
    router: Router,
    tenant_id: TenantId,
    _modules_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let tenant = TenantRecord {
        id: TenantId::new(),
        code: "t1".to_string(),
        name: "Tenant One".to_string(),
        domain: "t1.example.com".to_string(),
        schema_name: "t_t1_example_com".to_string(),
        status: TenantStatus::Active,
    };
    let tenant_id = tenant.id;

    let directory = Arc::new(InMemoryTenants::with_tenant(tenant));
    let toggles = Arc::new(InMemoryToggles::default());
    let handlers = Arc::new(HandlerRegistry::new());
    let modules_dir = tempfile::tempdir().unwrap();

    let lifecycle = Arc::new(LifecycleService::new(
        Arc::new(DescriptorStore::new()),
        Arc::new(RouteMountTable::new()),
        handlers.clone(),
        Arc::new(Noop),
        directory.clone(),
        Arc::new(Noop),
        modules_dir.path(),
    ));

    // Billing module: declared prefix /api/billing, one endpoint.
    handlers.register(
        "billing",
        Arc::new(StaticModuleHandlers::new(
            Router::new().route("/invoices", get(|| async { "invoice-list" })),
        )),
    );
    lifecycle
        .register_and_mount(ModuleDescriptor {
            id: "billing".to_string(),
            name: "Billing".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            dependencies: vec![],
            permissions: vec!["billing.read".to_string()],
            database: DatabaseSpec::default(),
            api_routes: ApiRoutes {
                prefix: "/api/billing".to_string(),
                endpoints: vec![EndpointSpec {
                    path: "/invoices".to_string(),
                    methods: vec!["GET".to_string()],
                    permissions: vec![],
                }],
            },
            navigation: serde_json::Value::Null,
            features: serde_json::Value::Null,
            settings: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let coordinator = Arc::new(HotswapCoordinator::new(lifecycle.clone()));

    // Lazy pool: never connects in these tests; the provisioning endpoints
    // are not exercised here.
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/portico_unused")
        .unwrap();
    let provisioner = Arc::new(TenantConnectionManager::new(
        pool,
        "postgres://localhost/portico_unused".to_string(),
        directory.clone(),
    ));

    let state = AppState {
        lifecycle,
        coordinator: coordinator.clone(),
        toggles,
        tenants: directory,
        provisioner,
    };
    let health = HealthState {
        checks: vec![],
        coordinator,
    };

    Fixture {
        router: app::build_router(state, health),
        tenant_id,
        _modules_dir: modules_dir,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    tenant: Option<TenantId>,
    body: Option<serde_json::Value>,
) -> (StatusCode, Option<String>, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant-id", tenant.to_string());
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let denied = response
        .headers()
        .get("x-plugin-denied")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, denied, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn modules_status_lists_mounted_module() {
    let fixture = fixture().await;
    let (status, _, body) = send(&fixture.router, "GET", "/modules/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"id\":\"billing\""));
    assert!(body.contains("\"mounted\":true"));
    assert!(body.contains("\"route_prefix\":\"/plugins/billing\""));
}

#[tokio::test]
async fn gate_scenario_end_to_end() {
    let fixture = fixture().await;
    let tenant = fixture.tenant_id;
    let tenants_uri = format!("/tenants/{}/plugins/billing", tenant);

    // Both flags default off: global denial wins and is distinguishable.
    let (status, denied, _) = send(
        &fixture.router,
        "GET",
        "/plugins/billing/invoices",
        Some(tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(denied.as_deref(), Some("global-off"));

    // Enable globally; tenant flag still off.
    let (status, _, _) = send(
        &fixture.router,
        "PUT",
        "/plugins/billing/global",
        None,
        Some(serde_json::json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, denied, _) = send(
        &fixture.router,
        "GET",
        "/plugins/billing/invoices",
        Some(tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(denied.as_deref(), Some("tenant-off"));

    // Enable for the tenant: the module's own router answers.
    let (status, _, _) = send(
        &fixture.router,
        "PUT",
        &tenants_uri,
        None,
        Some(serde_json::json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, denied, body) = send(
        &fixture.router,
        "GET",
        "/plugins/billing/invoices",
        Some(tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(denied.is_none());
    assert_eq!(body, "invoice-list");

    // The legacy declared prefix serves the same gated surface.
    let (status, _, body) = send(
        &fixture.router,
        "GET",
        "/api/billing/invoices",
        Some(tenant),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "invoice-list");
}

#[tokio::test]
async fn module_health_requires_no_tenant() {
    let fixture = fixture().await;
    let (status, _, body) = send(&fixture.router, "GET", "/plugins/billing/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"version\":\"1.0.0\""));
}

#[tokio::test]
async fn unresolvable_tenant_is_401() {
    let fixture = fixture().await;
    let (status, denied, _) = send(
        &fixture.router,
        "GET",
        "/plugins/billing/invoices",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(denied.is_none());
}

#[tokio::test]
async fn toggles_visible_in_plugin_listings() {
    let fixture = fixture().await;
    let tenant = fixture.tenant_id;

    let (status, _, body) = send(&fixture.router, "GET", "/plugins", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"enabled_global\":false"));

    send(
        &fixture.router,
        "PUT",
        "/plugins/billing/global",
        None,
        Some(serde_json::json!({ "enabled": true })),
    )
    .await;

    let (_, _, body) = send(&fixture.router, "GET", "/plugins", None, None).await;
    assert!(body.contains("\"enabled_global\":true"));

    let uri = format!("/tenants/{}/plugins", tenant);
    let (status, _, body) = send(&fixture.router, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"effective\":false"));
}

#[tokio::test]
async fn toggling_unknown_module_is_404() {
    let fixture = fixture().await;
    let (status, _, body) = send(
        &fixture.router,
        "PUT",
        "/plugins/ghost/global",
        None,
        Some(serde_json::json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("NOT_FOUND"));
}

#[tokio::test]
async fn import_with_bad_path_is_400() {
    let fixture = fixture().await;
    let package = serde_json::json!({
        "id": "evil",
        "config": {
            "id": "evil",
            "name": "Evil",
            "version": "1.0.0",
            "api_routes": { "prefix": "/api/evil" }
        },
        "files": { "../../etc/passwd": "root:x:0:0" },
        "exported_at": "2025-01-01T00:00:00Z",
        "version": "1"
    });
    let (status, _, body) = send(
        &fixture.router,
        "POST",
        "/modules/import",
        None,
        Some(package),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("SECURITY_VIOLATION"));
}

#[tokio::test]
async fn export_returns_package_as_download() {
    let fixture = fixture().await;
    let response = fixture
        .router
        .clone()
        .oneshot(
            Request::get("/modules/export/billing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(disposition.contains("billing-module.json"));
}

#[tokio::test]
async fn tenant_status_transitions() {
    let fixture = fixture().await;
    let uri = format!("/tenants/{}/status", fixture.tenant_id);

    let (status, _, body) = send(
        &fixture.router,
        "PUT",
        &uri,
        None,
        Some(serde_json::json!({ "status": "suspended" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"suspended\""));

    let (status, _, body) = send(
        &fixture.router,
        "PUT",
        &uri,
        None,
        Some(serde_json::json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"active\""));
}

#[tokio::test]
async fn readyz_reports_ready_without_fatal_modules() {
    let fixture = fixture().await;
    let (status, _, body) = send(&fixture.router, "GET", "/readyz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ready"));
}
