//! Configuration for failover-migrate
//!
//! The configuration document lists the cluster pairs to migrate plus
//! optional connection and logging sections. JSON is the default format;
//! files ending in `.toml` are read as TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::migration::{ClusterEntry, MigrationError, Result};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "configuration.json";

/// Environment variable overriding [`DEFAULT_CONFIG_FILE`].
pub const CONFIG_ENV_VAR: &str = "FAILOVER_MIGRATE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster pairs, migrated in order
    pub redis: Vec<ClusterEntry>,

    /// Client connection settings
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Path the configuration is read from: `$FAILOVER_MIGRATE_CONFIG` if
    /// set, otherwise `configuration.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate the configuration from [`Config::default_path`].
    pub fn load() -> Result<(Self, PathBuf)> {
        let path = Self::default_path();
        let config = Self::from_file(&path)?;
        config.validate()?;
        Ok((config, path))
    }

    /// Load configuration from a file, choosing the parser by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&contents),
            _ => Self::parse_json(&contents),
        }
    }

    /// Parse configuration from a JSON string
    pub fn parse_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| MigrationError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| MigrationError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.redis.is_empty() {
            return Err(MigrationError::Config(
                "No cluster entries configured".to_string(),
            ));
        }

        for (idx, entry) in self.redis.iter().enumerate() {
            for (role, ep) in [
                ("active_server", &entry.active_server),
                ("failover_server", &entry.failover_server),
            ] {
                if ep.host.trim().is_empty() {
                    return Err(MigrationError::Config(format!(
                        "Entry {}: {} endpoint cannot be empty",
                        idx + 1,
                        role
                    )));
                }
                if ep.port == 0 {
                    return Err(MigrationError::Config(format!(
                        "Entry {}: {} port cannot be 0",
                        idx + 1,
                        role
                    )));
                }
            }
        }

        if self.connection.connection_timeout_ms == 0 || self.connection.response_timeout_ms == 0 {
            return Err(MigrationError::Config(
                "Connection timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Cluster client connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Connect over TLS (`rediss://`)
    pub tls: bool,

    /// Verify server certificates when TLS is on
    pub verify_certificates: bool,

    /// Timeout for establishing a connection, in milliseconds
    pub connection_timeout_ms: u64,

    /// Timeout for a single command reply, in milliseconds
    pub response_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            tls: true,
            verify_certificates: false,
            connection_timeout_ms: 5_000,
            response_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::ClusterEndpoint;

    const SAMPLE: &str = r#"{
        "redis": [
            {
                "active_server": { "endpoint": "active-1.cache.local", "port": 6379 },
                "failover_server": { "endpoint": "failover-1.cache.local", "port": 6379 }
            },
            {
                "active_server": { "endpoint": "active-2.cache.local", "port": 6380 },
                "failover_server": { "endpoint": "failover-2.cache.local", "port": 6380 }
            }
        ]
    }"#;

    #[test]
    fn test_parse_json_with_defaults() {
        let config = Config::parse_json(SAMPLE).unwrap();
        assert_eq!(config.redis.len(), 2);
        assert_eq!(
            config.redis[1].active_server,
            ClusterEndpoint::new("active-2.cache.local", 6380)
        );
        assert_eq!(config.connection, ConnectionSettings::default());
        assert!(config.connection.tls);
        assert!(!config.connection.verify_certificates);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_json_overrides() {
        let config = Config::parse_json(
            r#"{
                "redis": [{
                    "active_server": { "endpoint": "a", "port": 1 },
                    "failover_server": { "endpoint": "b", "port": 2 }
                }],
                "connection": { "tls": false, "response_timeout_ms": 100 },
                "logging": { "level": "debug", "format": "json" }
            }"#,
        )
        .unwrap();
        assert!(!config.connection.tls);
        assert_eq!(config.connection.response_timeout_ms, 100);
        assert_eq!(config.connection.connection_timeout_ms, 5_000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse_toml(
            r#"
            [[redis]]
            active_server = { endpoint = "a.local", port = 6379 }
            failover_server = { endpoint = "b.local", port = 6379 }

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.redis[0].failover_server.host, "b.local");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_missing_redis_section_is_an_error() {
        let err = Config::parse_json(r#"{ "logging": {} }"#).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_entries() {
        let config = Config::parse_json(r#"{ "redis": [] }"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::parse_json(SAMPLE).unwrap();
        config.redis[1].failover_server.port = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: Entry 2: failover_server port cannot be 0"
        );
    }

    #[test]
    fn test_validate_rejects_blank_host() {
        let mut config = Config::parse_json(SAMPLE).unwrap();
        config.redis[0].active_server.host = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::parse_json(SAMPLE).unwrap();
        config.connection.connection_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
