// ⚙️ Configuration
// Everything comes from environment variables with local-friendly defaults.
// The CLI and the server may override individual values with flags.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Deployment environment. Guards the administrative purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }

    pub fn purge_allowed(&self) -> bool {
        matches!(self, Environment::Local | Environment::Test)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(Environment::Local),
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(anyhow!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite audit database
    pub db_path: PathBuf,
    /// Directory scanned for `{retailer}-{transactionSet}.json` profiles
    pub mappings_dir: PathBuf,
    /// Root of the inbound/processed file store
    pub storage_dir: PathBuf,
    /// HTTP bind address for the server
    pub bind_addr: String,
    pub environment: Environment,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: PathBuf::from("edi_audit.db"),
            mappings_dir: PathBuf::from("mappings"),
            storage_dir: PathBuf::from("local-storage"),
            bind_addr: "0.0.0.0:8080".to_string(),
            environment: Environment::Local,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Build from `EDI_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup (the process environment, or a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let environment = match lookup("EDI_ENV") {
            Some(value) => value.parse()?,
            None => defaults.environment,
        };

        let log_json = match lookup("EDI_LOG_JSON") {
            Some(value) => parse_bool(&value)
                .ok_or_else(|| anyhow!("EDI_LOG_JSON must be true or false, got '{}'", value))?,
            None => defaults.log_json,
        };

        Ok(AppConfig {
            db_path: lookup("EDI_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            mappings_dir: lookup("EDI_MAPPINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.mappings_dir),
            storage_dir: lookup("EDI_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            bind_addr: lookup("EDI_BIND_ADDR").unwrap_or(defaults.bind_addr),
            environment,
            log_json,
        })
    }

    pub fn purge_allowed(&self) -> bool {
        self.environment.purge_allowed()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
