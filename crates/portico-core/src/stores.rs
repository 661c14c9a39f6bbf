//! Store trait abstractions implemented by the control plane
//!
//! These traits are the seams between the in-process module runtime and the
//! PostgreSQL control plane in `portico-tenancy`. Tests substitute in-memory
//! implementations; the server wires in the Postgres ones.

use async_trait::async_trait;

use crate::error::Result;
use crate::tenant::{NewTenant, TenantId, TenantRecord, TenantStatus};

/// Lookup and lifecycle of tenant records.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Create a tenant in `Provisioning` state with a derived schema name.
    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord>;

    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>>;

    async fn list(&self) -> Result<Vec<TenantRecord>>;

    /// Tenants whose schemas receive module table deployments.
    async fn list_active(&self) -> Result<Vec<TenantRecord>>;

    async fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<()>;
}

/// Global and per-tenant module enablement, read on every gated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    pub enabled_global: bool,
    pub enabled_tenant: bool,
}

impl ToggleState {
    /// Access is granted iff both flags are set.
    pub fn effective(&self) -> bool {
        self.enabled_global && self.enabled_tenant
    }
}

#[async_trait]
pub trait ToggleStore: Send + Sync {
    /// Both flags for one (tenant, module) pair in a single round trip.
    /// Unknown modules and tenants read as disabled, not as errors.
    async fn effective(&self, tenant: TenantId, module_id: &str) -> Result<ToggleState>;

    async fn set_global(&self, module_id: &str, enabled: bool) -> Result<()>;

    async fn set_tenant(&self, tenant: TenantId, module_id: &str, enabled: bool) -> Result<()>;

    /// (module_id, enabled_global) for every module with recorded state.
    async fn list_global(&self) -> Result<Vec<(String, bool)>>;

    /// (module_id, enabled_tenant) for one tenant.
    async fn list_tenant(&self, tenant: TenantId) -> Result<Vec<(String, bool)>>;
}

/// Global permission catalog fed from descriptor declarations at
/// registration time.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    async fn record(&self, module_id: &str, permissions: &[String]) -> Result<()>;
}

/// A table a module wants deployed into tenant schemas.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    /// `CREATE TABLE IF NOT EXISTS ...` DDL, unqualified so it lands in the
    /// connection's pinned search path.
    pub ddl: String,
}

/// Deploys module tables into one tenant's schema.
#[async_trait]
pub trait TableDeployer: Send + Sync {
    async fn deploy(&self, tenant: &TenantRecord, tables: &[TableDefinition]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_algebra() {
        let cases = [
            (false, false, false),
            (false, true, false),
            (true, false, false),
            (true, true, true),
        ];
        for (global, tenant, expected) in cases {
            let state = ToggleState {
                enabled_global: global,
                enabled_tenant: tenant,
            };
            assert_eq!(state.effective(), expected);
        }
    }
}
