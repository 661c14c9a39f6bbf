//! Bootstrap configuration for the Portico server
//!
//! A minimal file (YAML or TOML by extension) read once at startup:
//! database connection, bind address, and the modules directory. Values
//! merge in order file -> environment -> CLI flags, later wins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// PostgreSQL connection string for the control plane and all tenant
    /// schemas.
    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `modules/<id>/module.config.json` trees.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Leave sqlx query logging off unless explicitly requested.
    #[serde(default)]
    pub log_sql_queries: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            host: default_host(),
            port: default_port(),
            modules_dir: default_modules_dir(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl BootstrapConfig {
    /// Load from a YAML or TOML file, with tilde expansion on the path.
    pub fn from_file(path: &str) -> Result<Self, BootstrapError> {
        let expanded = shellexpand::tilde(path);
        let path = PathBuf::from(expanded.as_ref());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            BootstrapError::FileRead(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .map_err(|e| BootstrapError::ParseError(format!("TOML parse error: {}", e)))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| BootstrapError::ParseError(format!("YAML parse error: {}", e)))?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence).
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("PORTICO_DATABASE_URL") {
            self.database_url = val;
        }
        if let Ok(val) = std::env::var("PORTICO_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("PORTICO_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("PORTICO_MODULES_DIR") {
            self.modules_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("PORTICO_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Final sanity check after every merge layer has run.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.database_url.is_empty() {
            return Err(BootstrapError::ValidationError(
                "database_url is required (config file, PORTICO_DATABASE_URL, or --database-url)"
                    .to_string(),
            ));
        }
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(BootstrapError::ValidationError(format!(
                "database_url '{}' is not a PostgreSQL connection string",
                self.database_url
            )));
        }
        Ok(())
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("./modules")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap configuration errors
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Failed to read bootstrap config: {0}")]
    FileRead(String),

    #[error("Failed to parse bootstrap config: {0}")]
    ParseError(String),

    #[error("Invalid bootstrap config: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.modules_dir, PathBuf::from("./modules"));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_parse() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "database_url: postgres://localhost/portico\nport: 9000\nmodules_dir: /srv/modules"
        )
        .unwrap();

        let config = BootstrapConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/portico");
        assert_eq!(config.port, 9000);
        assert_eq!(config.modules_dir, PathBuf::from("/srv/modules"));
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_parse() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "database_url = \"postgres://localhost/portico\"\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = BootstrapConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_error_reported() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "port: [not a number").unwrap();
        assert!(matches!(
            BootstrapConfig::from_file(file.path().to_str().unwrap()),
            Err(BootstrapError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file_reported() {
        assert!(matches!(
            BootstrapConfig::from_file("/definitely/not/here.yaml"),
            Err(BootstrapError::FileRead(_))
        ));
    }

    #[test]
    fn test_non_postgres_url_rejected() {
        let config = BootstrapConfig {
            database_url: "mysql://localhost/portico".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BootstrapError::ValidationError(_))
        ));
    }
}
