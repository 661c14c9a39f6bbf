//! Per-request enablement gate and module dispatch
//!
//! Every module request flows through three layers:
//! 1. `GET /plugins/<id>/health`: always reachable, no auth, no tenant gate
//! 2. the gate, which resolves the caller's tenant, reads that module's toggle
//!    state, and rejects with a distinguishable reason when either the
//!    global or the tenant flag is off
//! 3. the module's own router, reached by forwarding the request through
//!    the mount table's router handle
//!
//! Dispatch looks the module up in the mount table on every request, so an
//! unmount is effective on the live listener immediately.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tower::util::ServiceExt;
use tracing::{debug, warn};

use portico_core::stores::ToggleStore;
use portico_core::tenant::TenantId;

use crate::mount::{MountedRoute, RouteMountTable};

/// Header carrying the resolved tenant, injected by the external
/// authentication layer in front of this server.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Response header distinguishing why the gate rejected a request.
pub const DENIED_HEADER: &str = "x-plugin-denied";
pub const DENIED_GLOBAL: &str = "global-off";
pub const DENIED_TENANT: &str = "tenant-off";

#[derive(Clone)]
pub struct GateState {
    pub mounts: Arc<RouteMountTable>,
    pub toggles: Arc<dyn ToggleStore>,
}

/// The whole module-facing surface: the namespaced `/plugins` routes plus
/// a fallback serving self-declared legacy prefixes. Merge this into the
/// server's router; the fallback travels with the merge.
pub fn module_surface(state: GateState) -> Router {
    Router::new()
        .route("/plugins/{module_id}/health", get(module_health))
        .route("/plugins/{module_id}", any(dispatch_root))
        .route("/plugins/{module_id}/{*rest}", any(dispatch))
        .fallback(legacy_dispatch)
        .with_state(state)
}

/// Fallback handler serving modules on their self-declared legacy
/// prefixes. Same gate, same dispatch; kept for a migration window.
pub async fn legacy_dispatch(State(state): State<GateState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    match state.mounts.resolve(&path) {
        Some((mount, rest)) => gate_and_forward(&state, mount, &rest, req).await,
        None => not_found("No module mounted for this path"),
    }
}

async fn module_health(
    State(state): State<GateState>,
    Path(module_id): Path<String>,
) -> Response {
    match state.mounts.get(&module_id) {
        Some(mount) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "module": mount.module_id,
                "version": mount.version,
                "mounted": true,
            })),
        )
            .into_response(),
        None => not_found(&format!("Module '{}' is not mounted", module_id)),
    }
}

async fn dispatch_root(
    State(state): State<GateState>,
    Path(module_id): Path<String>,
    req: Request,
) -> Response {
    dispatch_inner(state, module_id, String::new(), req).await
}

async fn dispatch(
    State(state): State<GateState>,
    Path((module_id, rest)): Path<(String, String)>,
    req: Request,
) -> Response {
    dispatch_inner(state, module_id, rest, req).await
}

async fn dispatch_inner(
    state: GateState,
    module_id: String,
    rest: String,
    req: Request,
) -> Response {
    let mount = match state.mounts.get(&module_id) {
        Some(mount) => mount,
        None => return not_found(&format!("Module '{}' is not mounted", module_id)),
    };

    let rest = if rest.starts_with('/') {
        rest
    } else {
        format!("/{}", rest)
    };

    gate_and_forward(&state, mount, &rest, req).await
}

/// The gate itself: tenant resolution, toggle check, then forward.
async fn gate_and_forward(
    state: &GateState,
    mount: Arc<MountedRoute>,
    rest: &str,
    req: Request,
) -> Response {
    // Health stays reachable through the legacy prefix as well.
    if rest == "/health" {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "module": mount.module_id,
                "version": mount.version,
                "mounted": true,
            })),
        )
            .into_response();
    }

    let tenant = match req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| TenantId::parse(value).ok())
    {
        Some(tenant) => tenant,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "code": "TENANT_UNRESOLVED",
                    "message": "Request carries no resolvable tenant",
                })),
            )
                .into_response();
        }
    };

    let toggles = match state.toggles.effective(tenant, &mount.module_id).await {
        Ok(toggles) => toggles,
        Err(e) => {
            warn!(
                module_id = %mount.module_id,
                tenant_id = %tenant,
                error = %e,
                "Failed to read toggle state"
            );
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "code": "TOGGLE_READ_FAILED",
                    "message": "Could not read module enablement state",
                })),
            )
                .into_response();
        }
    };

    if !toggles.enabled_global {
        return denied(DENIED_GLOBAL, "GLOBALLY_DISABLED", &mount.module_id);
    }
    if !toggles.enabled_tenant {
        return denied(DENIED_TENANT, "TENANT_DISABLED", &mount.module_id);
    }

    forward(mount, rest, req).await
}

fn denied(reason: &'static str, code: &str, module_id: &str) -> Response {
    let mut response = (
        StatusCode::FORBIDDEN,
        Json(json!({
            "code": code,
            "message": format!("Module '{}' is disabled", module_id),
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(DENIED_HEADER, HeaderValue::from_static(reason));
    response
}

/// Rewrite the request to the module-relative path and run it through the
/// mounted router handle.
async fn forward(mount: Arc<MountedRoute>, rest: &str, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", rest, query),
        None => rest.to_string(),
    };
    parts.uri = match path_and_query.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            warn!(module_id = %mount.module_id, error = %e, "Failed to rewrite dispatch URI");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "code": "DISPATCH_FAILED",
                    "message": "Could not rewrite request for module router",
                })),
            )
                .into_response();
        }
    };

    debug!(
        module_id = %mount.module_id,
        path = %parts.uri,
        "Dispatching to module router"
    );

    let req = Request::from_parts(parts, body);
    match mount.router.clone().oneshot(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "NOT_FOUND",
            "message": message,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use mockall::mock;
    use mockall::predicate::*;
    use portico_core::error::Result as CoreResult;
    use portico_core::stores::ToggleState;

    mock! {
        pub Toggles {}

        #[async_trait::async_trait]
        impl ToggleStore for Toggles {
            async fn effective(&self, tenant: TenantId, module_id: &str) -> CoreResult<ToggleState>;
            async fn set_global(&self, module_id: &str, enabled: bool) -> CoreResult<()>;
            async fn set_tenant(&self, tenant: TenantId, module_id: &str, enabled: bool) -> CoreResult<()>;
            async fn list_global(&self) -> CoreResult<Vec<(String, bool)>>;
            async fn list_tenant(&self, tenant: TenantId) -> CoreResult<Vec<(String, bool)>>;
        }
    }

    fn mounted_billing() -> Arc<RouteMountTable> {
        let table = Arc::new(RouteMountTable::new());
        let router = Router::new().route("/invoices", get(|| async { "invoices-v1" }));
        table
            .mount(crate::mount::MountedRoute {
                module_id: "billing".to_string(),
                version: "1.0.0".to_string(),
                prefix: "/plugins/billing".to_string(),
                legacy_prefix: Some("/api/billing".to_string()),
                endpoints: vec![],
                router,
            })
            .unwrap();
        table
    }

    fn app_with(toggles: MockToggles) -> Router {
        let state = GateState {
            mounts: mounted_billing(),
            toggles: Arc::new(toggles),
        };
        module_surface(state)
    }

    async fn send(app: Router, uri: &str, tenant: Option<&str>) -> (StatusCode, Option<String>, String) {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header(TENANT_HEADER, tenant);
        }
        let response = app
            .oneshot(builder.body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let denied = response
            .headers()
            .get(DENIED_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, denied, String::from_utf8_lossy(&body).to_string())
    }

    fn toggles_returning(global: bool, tenant: bool) -> MockToggles {
        let mut toggles = MockToggles::new();
        toggles.expect_effective().returning(move |_, _| {
            Ok(ToggleState {
                enabled_global: global,
                enabled_tenant: tenant,
            })
        });
        toggles
    }

    #[tokio::test]
    async fn test_health_needs_no_tenant() {
        let app = app_with(MockToggles::new());
        let (status, _, body) = send(app, "/plugins/billing/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"version\":\"1.0.0\""));
    }

    #[tokio::test]
    async fn test_unknown_module_404s() {
        let app = app_with(MockToggles::new());
        let (status, _, _) = send(app, "/plugins/ghost/health", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_401() {
        let app = app_with(MockToggles::new());
        let (status, denied, _) = send(app, "/plugins/billing/invoices", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(denied.is_none());
    }

    #[tokio::test]
    async fn test_toggle_algebra_at_the_gate() {
        let tenant = uuid::Uuid::new_v4().to_string();
        let cases = [
            (false, false, Some(DENIED_GLOBAL)),
            (false, true, Some(DENIED_GLOBAL)),
            (true, false, Some(DENIED_TENANT)),
            (true, true, None),
        ];
        for (global, tenant_flag, expected_denial) in cases {
            let app = app_with(toggles_returning(global, tenant_flag));
            let (status, denied, body) =
                send(app, "/plugins/billing/invoices", Some(&tenant)).await;
            match expected_denial {
                Some(reason) => {
                    assert_eq!(status, StatusCode::FORBIDDEN);
                    assert_eq!(denied.as_deref(), Some(reason));
                }
                None => {
                    assert_eq!(status, StatusCode::OK);
                    assert_eq!(body, "invoices-v1");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_denial_bodies_distinguish_reasons() {
        let tenant = uuid::Uuid::new_v4().to_string();

        let app = app_with(toggles_returning(false, true));
        let (_, _, body) = send(app, "/plugins/billing/invoices", Some(&tenant)).await;
        assert!(body.contains("GLOBALLY_DISABLED"));

        let app = app_with(toggles_returning(true, false));
        let (_, _, body) = send(app, "/plugins/billing/invoices", Some(&tenant)).await;
        assert!(body.contains("TENANT_DISABLED"));
    }

    #[tokio::test]
    async fn test_legacy_prefix_is_gated_too() {
        let tenant = uuid::Uuid::new_v4().to_string();
        let app = app_with(toggles_returning(true, true));
        let (status, _, body) = send(app, "/api/billing/invoices", Some(&tenant)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "invoices-v1");

        let app = app_with(toggles_returning(false, false));
        let (status, denied, _) = send(app, "/api/billing/invoices", Some(&tenant)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(denied.as_deref(), Some(DENIED_GLOBAL));
    }

    #[tokio::test]
    async fn test_legacy_health_is_ungated() {
        let app = app_with(MockToggles::new());
        let (status, _, body) = send(app, "/api/billing/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("billing"));
    }

    #[tokio::test]
    async fn test_toggle_store_failure_is_500() {
        let mut toggles = MockToggles::new();
        toggles.expect_effective().returning(|_, _| {
            Err(portico_core::Error::Database("connection refused".into()))
        });
        let tenant = uuid::Uuid::new_v4().to_string();
        let app = app_with(toggles);
        let (status, _, _) = send(app, "/plugins/billing/invoices", Some(&tenant)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
