//! Configuration management for Jax services.
//!
//! Services share a configuration file at `~/.jax/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (JAX_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `JAX_CONFIG_DIR` → directory holding `config.json`
//! - `JAX_DATABASE_PATH` → database.path
//! - `JAX_DB_BUSY_TIMEOUT_MS` → database.busy_timeout_ms
//! - `JAX_DB_OPERATION_TIMEOUT_MS` → database.operation_timeout_ms
//! - `JAX_LOG_LEVEL` → observability.log_level
//! - `JAX_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
///
/// `JAX_CONFIG_DIR` wins over the home directory default.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("JAX_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".jax"),
        |dirs| dirs.home_dir().join(".jax"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Artifact database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Artifact builder settings
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("JAX_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(ms) = lookup("JAX_DB_BUSY_TIMEOUT_MS") {
            match ms.parse() {
                Ok(v) => self.database.busy_timeout_ms = v,
                Err(_) => tracing::warn!(value = %ms, "Ignoring invalid JAX_DB_BUSY_TIMEOUT_MS"),
            }
        }
        if let Some(ms) = lookup("JAX_DB_OPERATION_TIMEOUT_MS") {
            match ms.parse() {
                Ok(v) => self.database.operation_timeout_ms = v,
                Err(_) => {
                    tracing::warn!(value = %ms, "Ignoring invalid JAX_DB_OPERATION_TIMEOUT_MS")
                }
            }
        }
        if let Some(level) = lookup("JAX_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("JAX_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

/// Artifact database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. Defaults to `<config dir>/artifacts.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How long a connection waits on a locked database (milliseconds)
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Deadline applied to each gateway operation by operator tooling (milliseconds)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Resolved database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir().join("artifacts.db"))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets clamped to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

/// Artifact builder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Schema version stamped on newly built artifacts
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_operation_timeout_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_schema_version() -> String {
    "1.0.0".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.database.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.artifacts.schema_version, "1.0.0");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"database": {"path": "/tmp/a.db"}}"#).unwrap();
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/a.db")));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_observability_aliases() {
        let config: Config =
            serde_json::from_str(r#"{"observability": {"level": "debug", "format": "json"}}"#)
                .unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("JAX_DATABASE_PATH", "/var/lib/jax/artifacts.db"),
            ("JAX_DB_BUSY_TIMEOUT_MS", "250"),
            ("JAX_DB_OPERATION_TIMEOUT_MS", "not-a-number"),
            ("JAX_LOG_FORMAT", "json"),
        ]);

        let mut config = Config::default();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.database.resolved_path(),
            PathBuf::from("/var/lib/jax/artifacts.db")
        );
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(250));
        // invalid value leaves the default in place
        assert_eq!(config.database.operation_timeout_ms, 30_000);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"artifacts": {"schema_version": "2.0.0"}, "database": {"busy_timeout_ms": 10}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.artifacts.schema_version, "2.0.0");
        assert_eq!(config.database.busy_timeout_ms, 10);
    }

    #[test]
    fn test_load_from_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
