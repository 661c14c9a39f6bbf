//! Health endpoints
//!
//! - `/healthz` - liveness probe, 200 whenever the process serves requests
//! - `/readyz`  - readiness probe: control-plane database reachable and no
//!   module stuck in a fatal swap state

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use portico_hotswap::HotswapCoordinator;

/// One named readiness dependency, e.g. the control-plane database.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn is_ready(&self) -> bool;
}

/// Control-plane database probe.
pub struct DatabaseCheck {
    pool: sqlx::PgPool,
}

impl DatabaseCheck {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadinessCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "control-plane-database"
    }

    async fn is_ready(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub checks: Vec<Arc<dyn ReadinessCheck>>,
    pub coordinator: Arc<HotswapCoordinator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failing_checks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fatal_modules: Vec<String>,
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Ready only when every dependency answers and no module is in a fatal
/// swap state. A fatal module means degraded health until an operator
/// intervenes.
async fn readyz(State(state): State<HealthState>) -> Response {
    let mut failing = Vec::new();
    for check in &state.checks {
        if !check.is_ready().await {
            failing.push(check.name().to_string());
        }
    }
    let fatal_modules = state.coordinator.fatal_modules();

    if failing.is_empty() && fatal_modules.is_empty() {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                failing_checks: vec![],
                fatal_modules: vec![],
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready".to_string(),
                failing_checks: failing,
                fatal_modules,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use portico_core::stores::{PermissionCatalog, TableDefinition, TableDeployer, TenantDirectory};
    use portico_core::tenant::{NewTenant, TenantId, TenantRecord, TenantStatus};
    use portico_registry::{DescriptorStore, HandlerRegistry, LifecycleService, RouteMountTable};
    use tower::util::ServiceExt;

    struct StubCheck {
        ready: bool,
    }

    #[async_trait]
    impl ReadinessCheck for StubCheck {
        fn name(&self) -> &str {
            "stub"
        }
        async fn is_ready(&self) -> bool {
            self.ready
        }
    }

    struct Nothing;

    #[async_trait]
    impl TenantDirectory for Nothing {
        async fn create(&self, _tenant: NewTenant) -> portico_core::Result<TenantRecord> {
            unimplemented!()
        }
        async fn get(&self, _id: TenantId) -> portico_core::Result<Option<TenantRecord>> {
            Ok(None)
        }
        async fn list(&self) -> portico_core::Result<Vec<TenantRecord>> {
            Ok(vec![])
        }
        async fn list_active(&self) -> portico_core::Result<Vec<TenantRecord>> {
            Ok(vec![])
        }
        async fn set_status(
            &self,
            _id: TenantId,
            _status: TenantStatus,
        ) -> portico_core::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl TableDeployer for Nothing {
        async fn deploy(
            &self,
            _tenant: &TenantRecord,
            _tables: &[TableDefinition],
        ) -> portico_core::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PermissionCatalog for Nothing {
        async fn record(
            &self,
            _module_id: &str,
            _permissions: &[String],
        ) -> portico_core::Result<()> {
            Ok(())
        }
    }

    fn coordinator() -> Arc<HotswapCoordinator> {
        let lifecycle = Arc::new(LifecycleService::new(
            Arc::new(DescriptorStore::new()),
            Arc::new(RouteMountTable::new()),
            Arc::new(HandlerRegistry::new()),
            Arc::new(Nothing),
            Arc::new(Nothing),
            Arc::new(Nothing),
            "/tmp/unused",
        ));
        Arc::new(HotswapCoordinator::new(lifecycle))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let state = HealthState {
            checks: vec![Arc::new(StubCheck { ready: false })],
            coordinator: coordinator(),
        };
        let app = health_router(state);
        assert_eq!(get_status(app, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_ready() {
        let state = HealthState {
            checks: vec![Arc::new(StubCheck { ready: true })],
            coordinator: coordinator(),
        };
        let app = health_router(state);
        assert_eq!(get_status(app, "/readyz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_failing_dependency() {
        let state = HealthState {
            checks: vec![Arc::new(StubCheck { ready: false })],
            coordinator: coordinator(),
        };
        let app = health_router(state);
        assert_eq!(
            get_status(app, "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
