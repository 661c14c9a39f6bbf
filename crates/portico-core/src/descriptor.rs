//! Module descriptors: the strongly-typed manifest every module ships
//!
//! Descriptors are deserialized from `modules/<id>/module.config.json` and
//! validated once at the boundary; after registration they are immutable
//! except through an explicit hot-swap.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema_name;

/// File name of the descriptor inside a module directory.
pub const DESCRIPTOR_FILE: &str = "module.config.json";

static MODULE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid module id regex"));

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// A module's manifest: identity, dependencies, declared permissions,
/// database tables, and HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    /// Semantic version, `major.minor.patch` with optional pre-release tag.
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Module ids this module depends on. Dependencies must be registered
    /// before this module; cycles are therefore structurally impossible.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Permission codes contributed to the global catalog.
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub database: DatabaseSpec,
    pub api_routes: ApiRoutes,
    #[serde(default)]
    pub navigation: serde_json::Value,
    #[serde(default)]
    pub features: serde_json::Value,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    /// Tables deployed into every active tenant schema.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub requires_seeding: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRoutes {
    /// The module's self-declared prefix, e.g. `/api/billing`. Mounting
    /// namespaces the module under `/plugins/<id>` regardless; the declared
    /// prefix is kept live as a legacy alias for a migration window.
    pub prefix: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Path relative to the prefix, e.g. `/invoices`.
    pub path: String,
    pub methods: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ModuleDescriptor {
    /// Structural validation of a single descriptor, independent of any
    /// registry state. Registry-level checks (duplicates, dependency
    /// presence, prefix ownership) live with the lifecycle service.
    pub fn validate_shape(&self) -> Result<()> {
        if !MODULE_ID_RE.is_match(&self.id) {
            return Err(Error::Validation(format!(
                "Module id '{}' must match ^[a-z][a-z0-9_-]*$",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Module '{}' is missing a name",
                self.id
            )));
        }
        parse_version(&self.version).map_err(|e| {
            Error::Validation(format!("Module '{}' version: {}", self.id, e))
        })?;

        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(Error::Validation(format!(
                "Module '{}' cannot depend on itself",
                self.id
            )));
        }

        validate_route_prefix(&self.api_routes.prefix)
            .map_err(|e| Error::Validation(format!("Module '{}': {}", self.id, e)))?;

        for endpoint in &self.api_routes.endpoints {
            if !endpoint.path.starts_with('/') {
                return Err(Error::Validation(format!(
                    "Module '{}' endpoint path '{}' must start with '/'",
                    self.id, endpoint.path
                )));
            }
            if endpoint.methods.is_empty() {
                return Err(Error::Validation(format!(
                    "Module '{}' endpoint '{}' declares no methods",
                    self.id, endpoint.path
                )));
            }
            for method in &endpoint.methods {
                if !ALLOWED_METHODS.contains(&method.as_str()) {
                    return Err(Error::Validation(format!(
                        "Module '{}' endpoint '{}' has unsupported method '{}'",
                        self.id, endpoint.path, method
                    )));
                }
            }
        }

        for table in &self.database.tables {
            if !schema_name::is_valid_identifier(table) {
                return Err(Error::Validation(format!(
                    "Module '{}' declares invalid table name '{}'",
                    self.id, table
                )));
            }
        }

        for code in &self.permissions {
            if code.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Module '{}' declares an empty permission code",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

/// Parse `major.minor.patch` with an optional `-pre` / `+build` suffix.
pub fn parse_version(version: &str) -> Result<(u64, u64, u64)> {
    let core = version
        .split_once(['-', '+'])
        .map(|(core, _)| core)
        .unwrap_or(version);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Validation(format!(
            "'{}' is not a semantic version (expected major.minor.patch)",
            version
        )));
    }

    let mut numbers = [0u64; 3];
    for (i, part) in parts.iter().enumerate() {
        numbers[i] = part.parse::<u64>().map_err(|_| {
            Error::Validation(format!(
                "'{}' is not a semantic version (component '{}' is not numeric)",
                version, part
            ))
        })?;
    }
    Ok((numbers[0], numbers[1], numbers[2]))
}

fn validate_route_prefix(prefix: &str) -> Result<()> {
    if !prefix.starts_with('/') || prefix.len() < 2 {
        return Err(Error::Validation(format!(
            "route prefix '{}' must start with '/' and be non-empty",
            prefix
        )));
    }
    if prefix.ends_with('/') {
        return Err(Error::Validation(format!(
            "route prefix '{}' must not end with '/'",
            prefix
        )));
    }
    if prefix
        .chars()
        .any(|c| c.is_whitespace() || c == '?' || c == '#')
    {
        return Err(Error::Validation(format!(
            "route prefix '{}' contains invalid characters",
            prefix
        )));
    }
    Ok(())
}
