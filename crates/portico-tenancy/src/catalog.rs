//! PgPermissionCatalog - records module-declared permissions in the
//! control plane

use async_trait::async_trait;
use sqlx::PgPool;

use portico_core::error::{Error, Result};
use portico_core::stores::PermissionCatalog;

#[derive(Clone)]
pub struct PgPermissionCatalog {
    pool: PgPool,
}

impl PgPermissionCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionCatalog for PgPermissionCatalog {
    async fn record(&self, module_id: &str, permissions: &[String]) -> Result<()> {
        // Re-registration replaces the module's catalog entries wholesale so
        // a hot-swap cannot leave stale codes behind.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to start transaction: {}", e)))?;

        sqlx::query("DELETE FROM module_permissions WHERE module_id = $1")
            .bind(module_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to clear permission catalog: {}", e)))?;

        for permission in permissions {
            sqlx::query(
                r#"
                INSERT INTO module_permissions (module_id, permission)
                VALUES ($1, $2)
                ON CONFLICT (module_id, permission) DO NOTHING
                "#,
            )
            .bind(module_id)
            .bind(permission)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to record permission: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit permission catalog: {}", e)))?;

        Ok(())
    }
}
