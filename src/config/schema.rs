//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Application settings (name, debug mode, languages).
    pub app: AppConfig,

    /// HTTP server settings.
    pub server: ServerConfig,

    /// Database settings.
    pub database: DatabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Any other table, kept for application settings.
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Config {
    /// Value at a dotted key (`server.port`, `custom.feature.enabled`).
    pub fn get(&self, key: &str) -> Option<toml::Value> {
        let root = toml::Value::try_from(self).ok()?;
        key.split('.')
            .try_fold(&root, |value, segment| value.get(segment))
            .cloned()
    }

    /// Typed value at a dotted key.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        value.try_into().map_err(|e: toml::de::Error| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,

    /// Environment name (e.g., "localhost", "production").
    pub environment: String,

    /// Expose panic messages in 500 responses.
    pub debug: bool,

    /// Language used when `Accept-Language` matches nothing.
    pub default_language: String,

    /// Directory of `<tag>/*.json` language files.
    pub language_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "switchyard".to_string(),
            environment: "localhost".to_string(),
            debug: false,
            default_language: "en-US".to_string(),
            language_dir: None,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,

    /// Bind port. 0 lets the OS choose.
    pub port: u16,

    /// Public domain used in generated URLs instead of `host`.
    pub domain: Option<String>,

    /// `http` or `https`, used in generated URLs.
    pub protocol: String,

    /// Maximum request body size in MiB.
    pub max_upload_size: f64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Public address when running behind a reverse proxy.
    pub proxy: Option<ProxyConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            domain: None,
            protocol: "http".to_string(),
            max_upload_size: 10.0,
            max_connections: 10_000,
            request_timeout_secs: 30,
            proxy: None,
        }
    }
}

/// Reverse proxy public address.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub protocol: String,
    pub host: String,
    /// Defaults to the protocol's standard port.
    pub port: Option<u16>,
    /// Path prefix added by the proxy (e.g., "/app").
    pub base: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            host: String::new(),
            port: None,
            base: String::new(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection kind; "none" disables the database handle.
    pub connection: String,
}

impl DatabaseConfig {
    pub fn enabled(&self) -> bool {
        !self.connection.eq_ignore_ascii_case("none")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: "none".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.app.default_language, "en-US");
        assert!(!config.database.enabled());
    }

    #[test]
    fn dotted_lookup_covers_sections_and_extra_tables() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [proxy]
            ignored = true

            [custom.feature]
            enabled = true
            limit = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.get("server.port"), Some(toml::Value::Integer(9000)));
        assert!(config.get_as::<bool>("custom.feature.enabled").unwrap());
        assert_eq!(config.get_as::<u32>("custom.feature.limit").unwrap(), 12);
        assert!(config.get("custom.missing").is_none());
        assert!(matches!(
            config.get_as::<u32>("nope"),
            Err(ConfigError::MissingKey(_))
        ));
        assert!(matches!(
            config.get_as::<u32>("app.name"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
