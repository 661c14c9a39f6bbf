//! Error types for Portico Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Security violation: {0}")]
    Security(String),

    // Tenant and schema errors
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid schema name: {0}")]
    InvalidSchema(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    // Module registry errors
    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Missing dependency '{dependency}' for module '{module}'")]
    MissingDependency { module: String, dependency: String },

    #[error("Route prefix '{prefix}' already claimed by module '{owner}'")]
    RoutePrefixConflict { prefix: String, owner: String },

    // Hot-swap errors
    #[error("Swap failed: {0}")]
    Swap(String),

    #[error(
        "Swap failed and rollback failed, manual intervention required: swap error: {swap}; rollback error: {rollback}"
    )]
    Fatal { swap: String, rollback: String },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Machine-readable error code for administrative API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Security(_) => "SECURITY_VIOLATION",
            Error::InvalidDomain(_) => "INVALID_DOMAIN",
            Error::InvalidSchema(_) => "INVALID_SCHEMA",
            Error::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Error::Provisioning(_) => "PROVISIONING_FAILED",
            Error::DuplicateModule(_) => "DUPLICATE_MODULE",
            Error::MissingDependency { .. } => "MISSING_DEPENDENCY",
            Error::RoutePrefixConflict { .. } => "ROUTE_PREFIX_CONFLICT",
            Error::Swap(_) => "SWAP_FAILED",
            Error::Fatal { .. } => "FATAL",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// True for caller errors that never mutate state (400-class).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Security(_)
                | Error::InvalidDomain(_)
                | Error::InvalidSchema(_)
                | Error::Serialization(_)
        )
    }

    /// True for uniqueness/collision failures (409-class).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::DuplicateModule(_) | Error::RoutePrefixConflict { .. }
        )
    }

    /// True for unknown-resource failures (404-class).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::TenantNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
