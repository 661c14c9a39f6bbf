//! Per-tenant pinned connections and transactional schema provisioning
//!
//! Each active tenant gets a lazily-created pool of exactly one physical
//! connection whose search path is set at connection time via a
//! parameterized `set_config` call. One connection per tenant means the
//! search path can never be silently reset by pool reuse; it also means a
//! single tenant's throughput is bounded by that connection. Simplicity
//! over throughput, on purpose.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use portico_core::error::{Error, Result};
use portico_core::schema_name::is_valid_identifier;
use portico_core::stores::{TableDefinition, TableDeployer, TenantDirectory};
use portico_core::tenant::{TenantId, TenantRecord, TenantStatus};

/// Foundation tables created in every tenant schema, in dependency order.
/// DDL is unqualified: it lands in whatever schema leads the transaction's
/// search path. All statements use IF NOT EXISTS so a retried provisioning
/// run converges instead of failing.
pub const FOUNDATION_TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
            email TEXT NOT NULL UNIQUE,
            display_name TEXT,
            password_hash TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "permissions",
        r#"
        CREATE TABLE IF NOT EXISTS permissions (
            id UUID PRIMARY KEY DEFAULT uuid_generate_v4(),
            code TEXT NOT NULL UNIQUE,
            description TEXT,
            module_id TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "user_roles",
        r#"
        CREATE TABLE IF NOT EXISTS user_roles (
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

            PRIMARY KEY (user_id, role_id)
        )
        "#,
    ),
    (
        "role_permissions",
        r#"
        CREATE TABLE IF NOT EXISTS role_permissions (
            role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
            permission_id UUID NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,

            PRIMARY KEY (role_id, permission_id)
        )
        "#,
    ),
    (
        "options",
        r#"
        CREATE TABLE IF NOT EXISTS options (
            key TEXT PRIMARY KEY,
            value JSONB,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

/// Owns one pinned connection pool per active tenant plus the control-plane
/// pool used for provisioning and schema inspection.
pub struct TenantConnectionManager {
    control: PgPool,
    database_url: String,
    directory: Arc<dyn TenantDirectory>,
    pools: DashMap<TenantId, PgPool>,
}

impl TenantConnectionManager {
    pub fn new(control: PgPool, database_url: String, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            control,
            database_url,
            directory,
            pools: DashMap::new(),
        }
    }

    /// Cached connection for a tenant, created on first access.
    ///
    /// Fails with `TenantNotFound` for unknown or non-active tenants and
    /// `InvalidSchema` if the stored schema name does not pass the
    /// identifier gate. Both are caller errors and not retryable.
    pub async fn connection(&self, tenant_id: TenantId) -> Result<PgPool> {
        if let Some(pool) = self.pools.get(&tenant_id) {
            return Ok(pool.clone());
        }

        let record = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))?;

        if record.status != TenantStatus::Active {
            return Err(Error::TenantNotFound(format!(
                "Tenant '{}' is not active (status: {})",
                tenant_id, record.status
            )));
        }

        if !is_valid_identifier(&record.schema_name) {
            return Err(Error::InvalidSchema(record.schema_name.clone()));
        }

        let pool = self.open_pinned_pool(&record.schema_name).await?;

        debug!(
            tenant_id = %tenant_id,
            schema = %record.schema_name,
            "Opened pinned tenant connection"
        );

        // A concurrent first access may have raced us here; keep the first
        // entry and let the duplicate pool close on drop.
        let entry = self.pools.entry(tenant_id).or_insert(pool);
        Ok(entry.clone())
    }

    /// Open a single-connection pool with the search path pinned to the
    /// tenant schema. The session config call is parameterized; the schema
    /// name is never interpolated here.
    async fn open_pinned_pool(&self, schema: &str) -> Result<PgPool> {
        let search_path = format!("{}, public", schema);

        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    sqlx::query("SELECT set_config('search_path', $1, false)")
                        .bind(search_path)
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&self.database_url)
            .await
            .map_err(|e| Error::Database(format!("Failed to open tenant connection: {}", e)))
    }

    /// Provision a tenant's schema and foundation tables in one transaction.
    ///
    /// Everything after `BEGIN` either commits as a whole or rolls back as a
    /// whole, so a tenant can never be left with a partial schema. The
    /// tenant record flips to `Active` only after the commit; a crash in
    /// between leaves it `Provisioning` and the operation is safe to retry.
    pub async fn provision_schema(&self, tenant_id: TenantId) -> Result<()> {
        let record = self
            .directory
            .get(tenant_id)
            .await?
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))?;

        if record.status == TenantStatus::Active {
            debug!(tenant_id = %tenant_id, "Tenant already active, provisioning is a no-op");
            return Ok(());
        }

        let schema = record.schema_name.clone();
        if !is_valid_identifier(&schema) {
            return Err(Error::InvalidSchema(schema));
        }

        let mut tx = self
            .control
            .begin()
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to start transaction: {}", e)))?;

        sqlx::query(r#"CREATE EXTENSION IF NOT EXISTS "uuid-ossp""#)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to ensure uuid extension: {}", e)))?;

        // Schema name passed the identifier gate above; DDL cannot be
        // parameterized.
        sqlx::query(&format!(r#"CREATE SCHEMA IF NOT EXISTS "{}""#, schema))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to create schema: {}", e)))?;

        // Transaction-local search path so the foundation DDL below lands in
        // the new schema without qualifying every statement.
        sqlx::query("SELECT set_config('search_path', $1, true)")
            .bind(format!("{}, public", schema))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to set search path: {}", e)))?;

        for (table, ddl) in FOUNDATION_TABLES {
            sqlx::query(ddl).execute(&mut *tx).await.map_err(|e| {
                Error::Provisioning(format!("Failed to create table '{}': {}", table, e))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Provisioning(format!("Failed to commit provisioning: {}", e)))?;

        self.directory
            .set_status(tenant_id, TenantStatus::Active)
            .await?;

        info!(tenant_id = %tenant_id, schema = %schema, "Provisioned tenant schema");
        Ok(())
    }

    /// Inspect `information_schema` for the schema and its foundation
    /// tables. Used by startup health checks and to refuse routing to a
    /// tenant whose schema is incomplete.
    pub async fn validate_schema(&self, schema: &str) -> Result<bool> {
        if !is_valid_identifier(schema) {
            return Err(Error::InvalidSchema(schema.to_string()));
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.control)
        .await
        .map_err(|e| Error::Database(format!("Failed to check schema existence: {}", e)))?;

        if !exists {
            return Ok(false);
        }

        let expected: Vec<String> = FOUNDATION_TABLES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = ANY($2)
            "#,
        )
        .bind(schema)
        .bind(&expected)
        .fetch_one(&self.control)
        .await
        .map_err(|e| Error::Database(format!("Failed to count foundation tables: {}", e)))?;

        Ok(count as usize >= FOUNDATION_TABLES.len())
    }

    /// Close every cached tenant pool. Run at process shutdown.
    pub async fn close_all(&self) {
        let tenant_ids: Vec<TenantId> = self.pools.iter().map(|entry| *entry.key()).collect();
        for tenant_id in tenant_ids {
            if let Some((_, pool)) = self.pools.remove(&tenant_id) {
                pool.close().await;
                debug!(tenant_id = %tenant_id, "Closed tenant connection");
            }
        }
    }

    /// Drop a single cached connection (e.g. after suspending a tenant).
    pub async fn evict(&self, tenant_id: TenantId) {
        if let Some((_, pool)) = self.pools.remove(&tenant_id) {
            pool.close().await;
        }
    }

    /// Number of currently cached tenant connections.
    pub fn cached_connections(&self) -> usize {
        self.pools.len()
    }
}

#[async_trait]
impl TableDeployer for TenantConnectionManager {
    /// Run module DDL inside the tenant's schema, in one transaction on the
    /// tenant's pinned connection.
    async fn deploy(&self, tenant: &TenantRecord, tables: &[TableDefinition]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }

        let pool = self.connection(tenant.id).await?;

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to start deployment: {}", e)))?;

        for table in tables {
            if !is_valid_identifier(&table.name) {
                return Err(Error::Validation(format!(
                    "Invalid table name '{}'",
                    table.name
                )));
            }
            sqlx::query(&table.ddl).execute(&mut *tx).await.map_err(|e| {
                Error::Database(format!(
                    "Failed to deploy table '{}' for tenant '{}': {}",
                    table.name, tenant.id, e
                ))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit deployment: {}", e)))?;

        debug!(
            tenant_id = %tenant.id,
            tables = tables.len(),
            "Deployed module tables"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foundation_tables_complete() {
        let names: Vec<&str> = FOUNDATION_TABLES.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "users",
                "roles",
                "permissions",
                "user_roles",
                "role_permissions",
                "options"
            ]
        );
    }

    #[test]
    fn test_foundation_ddl_is_idempotent_and_unqualified() {
        for (name, ddl) in FOUNDATION_TABLES {
            assert!(
                ddl.contains("IF NOT EXISTS"),
                "table '{}' must use IF NOT EXISTS",
                name
            );
            assert!(
                !ddl.contains("public."),
                "table '{}' DDL must be unqualified so it follows the search path",
                name
            );
        }
    }

    #[test]
    fn test_foundation_tables_reference_order() {
        // Referenced tables must appear before their referents so the DDL
        // can run top to bottom inside one transaction.
        let position = |name: &str| {
            FOUNDATION_TABLES
                .iter()
                .position(|(n, _)| *n == name)
                .unwrap()
        };
        assert!(position("users") < position("user_roles"));
        assert!(position("roles") < position("user_roles"));
        assert!(position("roles") < position("role_permissions"));
        assert!(position("permissions") < position("role_permissions"));
    }
}
