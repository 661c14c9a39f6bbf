//! PgTenantDirectory - TenantDirectory implementation backed by the
//! control-plane `tenants` table

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use portico_core::error::{Error, Result};
use portico_core::schema_name;
use portico_core::stores::TenantDirectory;
use portico_core::tenant::{NewTenant, TenantId, TenantRecord, TenantStatus};

/// Tenant records live in the `public` schema and are never hard-deleted by
/// this runtime; lifecycle is soft via the `status` column.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> Result<TenantRecord> {
        let id: Uuid = row
            .try_get("id")
            .map_err(|e| Error::Database(format!("Failed to read tenant id: {}", e)))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::Database(format!("Failed to read tenant status: {}", e)))?;

        Ok(TenantRecord {
            id: TenantId::from_uuid(id),
            code: row
                .try_get("code")
                .map_err(|e| Error::Database(format!("Failed to read tenant code: {}", e)))?,
            name: row
                .try_get("name")
                .map_err(|e| Error::Database(format!("Failed to read tenant name: {}", e)))?,
            domain: row
                .try_get("domain")
                .map_err(|e| Error::Database(format!("Failed to read tenant domain: {}", e)))?,
            schema_name: row.try_get("schema_name").map_err(|e| {
                Error::Database(format!("Failed to read tenant schema_name: {}", e))
            })?,
            status: status.parse()?,
        })
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord> {
        if tenant.code.trim().is_empty() || tenant.name.trim().is_empty() {
            return Err(Error::Validation(
                "Tenant code and name must be non-empty".to_string(),
            ));
        }

        let schema = schema_name::generate_schema_name(&tenant.domain)?;

        let row = sqlx::query(
            r#"
            INSERT INTO tenants (code, name, domain, schema_name, status)
            VALUES ($1, $2, $3, $4, 'provisioning')
            RETURNING id, code, name, domain, schema_name, status
            "#,
        )
        .bind(&tenant.code)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(&schema)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false)
            {
                Error::Conflict(format!(
                    "Tenant with code '{}' or domain '{}' already exists",
                    tenant.code, tenant.domain
                ))
            } else {
                Error::Database(format!("Failed to create tenant: {}", e))
            }
        })?;

        Self::record_from_row(&row)
    }

    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        let row = sqlx::query(
            "SELECT id, code, name, domain, schema_name, status FROM tenants WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to query tenant: {}", e)))?;

        row.map(|r| Self::record_from_row(&r)).transpose()
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query(
            "SELECT id, code, name, domain, schema_name, status FROM tenants ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list tenants: {}", e)))?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, name, domain, schema_name, status
            FROM tenants
            WHERE status = 'active'
            ORDER BY code
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list active tenants: {}", e)))?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update tenant status: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::TenantNotFound(id.to_string()));
        }
        Ok(())
    }
}
