//! Database migration system for the control-plane schema
//!
//! Provides versioned schema migrations with tracking to ensure migrations
//! are applied exactly once and in the correct order. Control-plane tables
//! live in the `public` schema; per-tenant foundation tables are created by
//! [`crate::connections::TenantConnectionManager::provision_schema`], not
//! here.

use portico_core::{Error, Result};
use sqlx::PgPool;
use tracing::{debug, info};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to execute for this migration
    pub up_sql: &'static str,
}

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create tenants table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                domain TEXT NOT NULL UNIQUE,
                schema_name TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'provisioning',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT tenants_status_check CHECK (
                    status IN ('provisioning', 'active', 'suspended', 'inactive')
                )
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Create plugin_state table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS plugin_state (
                module_id TEXT PRIMARY KEY,
                enabled_global BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
    },
    Migration {
        version: 3,
        description: "Create tenant_plugin_state table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS tenant_plugin_state (
                tenant_id UUID NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
                module_id TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                PRIMARY KEY (tenant_id, module_id)
            )
        "#,
    },
    Migration {
        version: 4,
        description: "Create module_permissions catalog",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS module_permissions (
                module_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                PRIMARY KEY (module_id, permission)
            )
        "#,
    },
    Migration {
        version: 5,
        description: "Create control-plane indexes",
        up_sql: r#"
            CREATE INDEX IF NOT EXISTS idx_tenants_status
            ON tenants(status);

            CREATE INDEX IF NOT EXISTS idx_tenants_domain
            ON tenants(domain);

            CREATE INDEX IF NOT EXISTS idx_tenant_plugin_state_module
            ON tenant_plugin_state(module_id)
        "#,
    },
];

/// Run all pending migrations
///
/// Creates a `schema_migrations` table to track which migrations have been
/// applied, then runs any migrations that haven't been applied yet.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create schema_migrations table: {}", e)))?;

    let applied_versions: Vec<i32> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to fetch applied migrations: {}", e)))?;

    debug!(
        "Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            debug!(
                "Skipping migration {}: {} (already applied)",
                migration.version, migration.description
            );
            continue;
        }

        info!(
            "Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(migration.up_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description) VALUES ($1, $2)
                ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(migration.description)
        .execute(pool)
        .await
        .map_err(|e| {
            Error::Database(format!(
                "Failed to record migration {}: {}",
                migration.version, e
            ))
        })?;
    }

    Ok(())
}

/// Get the current schema version
pub async fn get_current_version(pool: &PgPool) -> Result<Option<i32>> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_name = 'schema_migrations'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to check for schema_migrations table: {}", e)))?;

    if !table_exists {
        return Ok(None);
    }

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get current schema version: {}", e)))?;

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_sequential() {
        let mut expected_version = 1;
        for migration in MIGRATIONS {
            assert_eq!(
                migration.version, expected_version,
                "Migration versions must be sequential"
            );
            expected_version += 1;
        }
    }

    #[test]
    fn test_migrations_have_descriptions() {
        for migration in MIGRATIONS {
            assert!(
                !migration.description.is_empty(),
                "Migration {} must have a description",
                migration.version
            );
        }
    }

    #[test]
    fn test_migrations_are_idempotent_by_construction() {
        for migration in MIGRATIONS {
            assert!(
                migration.up_sql.contains("IF NOT EXISTS"),
                "Migration {} must use IF NOT EXISTS semantics",
                migration.version
            );
        }
    }

    #[test]
    fn test_tenant_statuses_match_core_enum() {
        let tenants_sql = MIGRATIONS[0].up_sql;
        for status in ["provisioning", "active", "suspended", "inactive"] {
            assert!(
                tenants_sql.contains(status),
                "tenants status check must allow '{}'",
                status
            );
        }
    }
}
