//! Portable module packages for import/export
//!
//! A package bundles a module's descriptor and its on-disk files. On export
//! the contents are trusted; on import they are attacker-controlled and must
//! pass the sanitization rules in `portico-hotswap` before any filesystem
//! write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::descriptor::ModuleDescriptor;
use crate::error::{Error, Result};

/// Format version written by the exporter, checked by the importer.
pub const PACKAGE_FORMAT_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulePackage {
    pub id: String,
    pub config: ModuleDescriptor,
    /// Relative path -> UTF-8 content. `BTreeMap` keeps exports stable.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub exported_at: DateTime<Utc>,
    pub version: String,
}

impl ModulePackage {
    /// Shape checks that do not touch the filesystem. Path and content
    /// sanitization is a separate, mandatory step in the importer.
    pub fn validate_shape(&self) -> Result<()> {
        if self.id != self.config.id {
            return Err(Error::Validation(format!(
                "Package id '{}' does not match descriptor id '{}'",
                self.id, self.config.id
            )));
        }
        if self.version != PACKAGE_FORMAT_VERSION {
            return Err(Error::Validation(format!(
                "Unsupported package format version '{}' (expected '{}')",
                self.version, PACKAGE_FORMAT_VERSION
            )));
        }
        self.config.validate_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ApiRoutes, DatabaseSpec};

    fn package(id: &str) -> ModulePackage {
        ModulePackage {
            id: id.to_string(),
            config: ModuleDescriptor {
                id: id.to_string(),
                name: "Billing".into(),
                version: "1.0.0".into(),
                description: String::new(),
                dependencies: vec![],
                permissions: vec![],
                database: DatabaseSpec::default(),
                api_routes: ApiRoutes {
                    prefix: "/api/billing".into(),
                    endpoints: vec![],
                },
                navigation: serde_json::Value::Null,
                features: serde_json::Value::Null,
                settings: serde_json::Value::Null,
            },
            files: BTreeMap::new(),
            exported_at: Utc::now(),
            version: PACKAGE_FORMAT_VERSION.to_string(),
        }
    }

    #[test]
    fn test_valid_package() {
        package("billing").validate_shape().unwrap();
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let mut pkg = package("billing");
        pkg.id = "tasks".to_string();
        assert!(pkg.validate_shape().is_err());
    }

    #[test]
    fn test_unknown_format_version_rejected() {
        let mut pkg = package("billing");
        pkg.version = "7".to_string();
        assert!(pkg.validate_shape().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut pkg = package("billing");
        pkg.files
            .insert("README.md".to_string(), "# Billing".to_string());
        let json = serde_json::to_string(&pkg).unwrap();
        let back: ModulePackage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "billing");
        assert_eq!(back.files.get("README.md").unwrap(), "# Billing");
    }
}
