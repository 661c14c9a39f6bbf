//! PgToggleStore - ToggleStore implementation over the plugin_state and
//! tenant_plugin_state tables
//!
//! The gate reads toggle state on every request; correctness over latency is
//! the deliberate tradeoff, so there is no caching beyond the single query.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use portico_core::error::{Error, Result};
use portico_core::stores::{ToggleState, ToggleStore};
use portico_core::tenant::TenantId;

#[derive(Clone)]
pub struct PgToggleStore {
    pool: PgPool,
}

impl PgToggleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToggleStore for PgToggleStore {
    async fn effective(&self, tenant: TenantId, module_id: &str) -> Result<ToggleState> {
        // One round trip for both flags. Missing rows read as disabled.
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(g.enabled_global, FALSE) AS enabled_global,
                COALESCE(t.enabled, FALSE) AS enabled_tenant
            FROM (SELECT 1) AS probe
            LEFT JOIN plugin_state g ON g.module_id = $2
            LEFT JOIN tenant_plugin_state t
                ON t.tenant_id = $1 AND t.module_id = $2
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(module_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to read toggle state: {}", e)))?;

        Ok(ToggleState {
            enabled_global: row
                .try_get("enabled_global")
                .map_err(|e| Error::Database(format!("Failed to read enabled_global: {}", e)))?,
            enabled_tenant: row
                .try_get("enabled_tenant")
                .map_err(|e| Error::Database(format!("Failed to read enabled_tenant: {}", e)))?,
        })
    }

    async fn set_global(&self, module_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO plugin_state (module_id, enabled_global)
            VALUES ($1, $2)
            ON CONFLICT (module_id) DO UPDATE
            SET enabled_global = $2,
                updated_at = NOW()
            "#,
        )
        .bind(module_id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to set global toggle: {}", e)))?;
        Ok(())
    }

    async fn set_tenant(&self, tenant: TenantId, module_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_plugin_state (tenant_id, module_id, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, module_id) DO UPDATE
            SET enabled = $3,
                updated_at = NOW()
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(module_id)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .map(|db| db.is_foreign_key_violation())
                .unwrap_or(false)
            {
                Error::TenantNotFound(tenant.to_string())
            } else {
                Error::Database(format!("Failed to set tenant toggle: {}", e))
            }
        })?;
        Ok(())
    }

    async fn list_global(&self) -> Result<Vec<(String, bool)>> {
        let rows =
            sqlx::query("SELECT module_id, enabled_global FROM plugin_state ORDER BY module_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to list global toggles: {}", e)))?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("module_id").map_err(|e| {
                        Error::Database(format!("Failed to read module_id: {}", e))
                    })?,
                    row.try_get("enabled_global").map_err(|e| {
                        Error::Database(format!("Failed to read enabled_global: {}", e))
                    })?,
                ))
            })
            .collect()
    }

    async fn list_tenant(&self, tenant: TenantId) -> Result<Vec<(String, bool)>> {
        let rows = sqlx::query(
            r#"
            SELECT module_id, enabled
            FROM tenant_plugin_state
            WHERE tenant_id = $1
            ORDER BY module_id
            "#,
        )
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list tenant toggles: {}", e)))?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("module_id").map_err(|e| {
                        Error::Database(format!("Failed to read module_id: {}", e))
                    })?,
                    row.try_get("enabled").map_err(|e| {
                        Error::Database(format!("Failed to read enabled: {}", e))
                    })?,
                ))
            })
            .collect()
    }
}
