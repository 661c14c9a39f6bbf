//! Application state and router assembly
//!
//! All long-lived services are constructed once in `main` and injected by
//! reference; nothing is reached through global lookups. The full router
//! is assembled before the listener binds, so no request can observe a
//! module that is registered but not yet mounted.

use std::sync::Arc;

use axum::Router;

use portico_core::stores::{TenantDirectory, ToggleStore};
use portico_hotswap::HotswapCoordinator;
use portico_registry::{module_surface, GateState, LifecycleService};
use portico_tenancy::TenantConnectionManager;

use crate::admin;
use crate::health::{self, HealthState};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleService>,
    pub coordinator: Arc<HotswapCoordinator>,
    pub toggles: Arc<dyn ToggleStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub provisioner: Arc<TenantConnectionManager>,
}

/// Assemble the complete server router: administrative surface, health
/// endpoints, and the gated module surface with its legacy-prefix
/// fallback.
pub fn build_router(state: AppState, health: HealthState) -> Router {
    let gate = GateState {
        mounts: state.lifecycle.mounts().clone(),
        toggles: state.toggles.clone(),
    };

    admin::admin_router(state)
        .merge(health::health_router(health))
        .merge(module_surface(gate))
}
