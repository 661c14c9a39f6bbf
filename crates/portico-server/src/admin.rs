//! Administrative HTTP surface
//!
//! Super-admin only; authentication and RBAC run in front of this server
//! and are consumed as a capability, so the handlers here trust the
//! request. Responses carry a machine-readable `code` plus a human
//! message; error classes map onto HTTP statuses in [`ApiError`].

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use portico_core::error::Error;
use portico_core::package::ModulePackage;
use portico_core::tenant::{NewTenant, TenantId, TenantRecord, TenantStatus};

use crate::app::AppState;

/// Wraps a core error for the wire: status by error class, body
/// `{code, message}`.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_caller_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_conflict() {
            StatusCode::CONFLICT
        } else if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (
            status,
            Json(json!({
                "code": self.0.code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/modules/status", get(modules_status))
        .route("/modules/hotswap/{id}", post(hotswap_module))
        .route("/modules/import", post(import_module))
        .route("/modules/export/{id}", get(export_module))
        .route("/modules/rediscover", post(rediscover))
        // Param name matches the module surface's routes; the routers are
        // merged and matchit requires consistent names per segment.
        .route("/plugins", get(list_plugins))
        .route("/plugins/{module_id}/global", put(set_global_toggle))
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/{id}", get(get_tenant))
        .route("/tenants/{id}/status", put(set_tenant_status))
        .route("/tenants/{id}/provision", post(provision_tenant))
        .route("/tenants/{id}/plugins", get(tenant_plugins))
        .route("/tenants/{id}/plugins/{plugin_id}", put(set_tenant_toggle))
        .with_state(state)
}

// ---- Modules ----

async fn modules_status(State(state): State<AppState>) -> Response {
    Json(state.lifecycle.status()).into_response()
}

async fn hotswap_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let report = state.coordinator.hotswap(&id).await?;
    Ok(Json(report).into_response())
}

async fn import_module(
    State(state): State<AppState>,
    Json(package): Json<ModulePackage>,
) -> ApiResult<Response> {
    let report = state.coordinator.import_package(package).await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

async fn export_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let package = state.coordinator.export_package(&id).await?;
    let filename = format!("attachment; filename=\"{}-module.json\"", id);
    Ok((
        [(header::CONTENT_DISPOSITION, filename)],
        Json(package),
    )
        .into_response())
}

async fn rediscover(State(state): State<AppState>) -> ApiResult<Response> {
    let summary = state.lifecycle.discover_and_register().await?;
    info!(
        registered = summary.registered.len(),
        skipped = summary.skipped.len(),
        "Rediscovery sweep complete"
    );
    Ok(Json(summary).into_response())
}

// ---- Plugin toggles ----

#[derive(Debug, Serialize)]
struct PluginGlobalState {
    id: String,
    name: String,
    version: String,
    enabled_global: bool,
}

async fn list_plugins(State(state): State<AppState>) -> ApiResult<Response> {
    let global: HashMap<String, bool> = state.toggles.list_global().await?.into_iter().collect();

    let plugins: Vec<PluginGlobalState> = state
        .lifecycle
        .store()
        .list()
        .into_iter()
        .map(|descriptor| PluginGlobalState {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            enabled_global: global.get(&descriptor.id).copied().unwrap_or(false),
        })
        .collect();

    Ok(Json(plugins).into_response())
}

#[derive(Debug, Deserialize)]
struct ToggleBody {
    enabled: bool,
}

async fn set_global_toggle(
    State(state): State<AppState>,
    Path(plugin_id): Path<String>,
    Json(body): Json<ToggleBody>,
) -> ApiResult<Response> {
    if !state.lifecycle.store().contains(&plugin_id) {
        return Err(Error::NotFound(format!("Module '{}' is not registered", plugin_id)).into());
    }
    state.toggles.set_global(&plugin_id, body.enabled).await?;
    info!(module_id = %plugin_id, enabled = body.enabled, "Set global plugin toggle");
    Ok(Json(json!({ "id": plugin_id, "enabled_global": body.enabled })).into_response())
}

#[derive(Debug, Serialize)]
struct TenantPluginState {
    id: String,
    enabled_global: bool,
    enabled_tenant: bool,
    effective: bool,
}

async fn tenant_plugins(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let tenant = lookup_tenant(&state, &id).await?;

    let global: HashMap<String, bool> = state.toggles.list_global().await?.into_iter().collect();
    let per_tenant: HashMap<String, bool> = state
        .toggles
        .list_tenant(tenant.id)
        .await?
        .into_iter()
        .collect();

    let plugins: Vec<TenantPluginState> = state
        .lifecycle
        .store()
        .list()
        .into_iter()
        .map(|descriptor| {
            let enabled_global = global.get(&descriptor.id).copied().unwrap_or(false);
            let enabled_tenant = per_tenant.get(&descriptor.id).copied().unwrap_or(false);
            TenantPluginState {
                id: descriptor.id.clone(),
                enabled_global,
                enabled_tenant,
                effective: enabled_global && enabled_tenant,
            }
        })
        .collect();

    Ok(Json(plugins).into_response())
}

async fn set_tenant_toggle(
    State(state): State<AppState>,
    Path((id, plugin_id)): Path<(String, String)>,
    Json(body): Json<ToggleBody>,
) -> ApiResult<Response> {
    let tenant = lookup_tenant(&state, &id).await?;
    if !state.lifecycle.store().contains(&plugin_id) {
        return Err(Error::NotFound(format!("Module '{}' is not registered", plugin_id)).into());
    }

    state
        .toggles
        .set_tenant(tenant.id, &plugin_id, body.enabled)
        .await?;
    info!(
        tenant_id = %tenant.id,
        module_id = %plugin_id,
        enabled = body.enabled,
        "Set tenant plugin toggle"
    );
    Ok(Json(json!({
        "tenant_id": tenant.id,
        "id": plugin_id,
        "enabled_tenant": body.enabled,
    }))
    .into_response())
}

// ---- Tenants ----

async fn list_tenants(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.tenants.list().await?).into_response())
}

async fn get_tenant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let tenant = lookup_tenant(&state, &id).await?;
    Ok(Json(tenant).into_response())
}

/// Create a tenant and provision its schema. The record is created in
/// `Provisioning` first; if provisioning fails the record stays that way
/// and `POST /tenants/{id}/provision` retries it.
async fn create_tenant(
    State(state): State<AppState>,
    Json(tenant): Json<NewTenant>,
) -> ApiResult<Response> {
    let record = state.tenants.create(tenant).await?;
    info!(tenant_id = %record.id, schema = %record.schema_name, "Created tenant");

    state.provisioner.provision_schema(record.id).await?;

    let provisioned = state
        .tenants
        .get(record.id)
        .await?
        .ok_or_else(|| Error::TenantNotFound(record.id.to_string()))?;
    Ok((StatusCode::CREATED, Json(provisioned)).into_response())
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: TenantStatus,
}

/// Administrative status transition, e.g. Active <-> Suspended. Suspending
/// a tenant also drops its cached pinned connection so in-flight state
/// cannot outlive the suspension.
async fn set_tenant_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Response> {
    let tenant = lookup_tenant(&state, &id).await?;
    state.tenants.set_status(tenant.id, body.status).await?;

    if body.status != TenantStatus::Active {
        state.provisioner.evict(tenant.id).await;
    }

    info!(tenant_id = %tenant.id, status = %body.status, "Set tenant status");
    let updated = state
        .tenants
        .get(tenant.id)
        .await?
        .ok_or_else(|| Error::TenantNotFound(id))?;
    Ok(Json(updated).into_response())
}

async fn provision_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let tenant = lookup_tenant(&state, &id).await?;
    state.provisioner.provision_schema(tenant.id).await?;

    let provisioned = state
        .tenants
        .get(tenant.id)
        .await?
        .ok_or_else(|| Error::TenantNotFound(id))?;
    Ok(Json(provisioned).into_response())
}

async fn lookup_tenant(state: &AppState, id: &str) -> Result<TenantRecord, ApiError> {
    let tenant_id = TenantId::parse(id)?;
    state
        .tenants
        .get(tenant_id)
        .await?
        .ok_or_else(|| Error::TenantNotFound(id.to_string()).into())
}
