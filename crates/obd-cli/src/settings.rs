//! Application settings
//!
//! Layered from built-in defaults, an optional TOML file and `OBD__*`
//! environment variables (e.g. `OBD__DRIVER__WATCHDOG_MS=800`).

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use elm327_driver::{DriverConfig, TransportConfig};
use obd_reader::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit log lines as JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub driver: DriverConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load settings, reading `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(Environment::with_prefix("OBD").separator("__").try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .context("Failed to load configuration")
    }

    /// Parse settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .context("Failed to parse configuration")
    }
}

/// Install the global log subscriber. Logs go to stderr so stdout carries
/// only records.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("Unknown log level {:?}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to set tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::ObdProtocol;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.driver.watchdog_ms, 600);
        assert_eq!(config.cache.ttl_ms, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [transport]
            kind = "tcp"
            address = "192.168.0.10:35000"

            [driver]
            watchdog_ms = 1500

            [driver.adapter]
            headers = false
            protocol = "j1850_pwm"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Tcp {
                address: "192.168.0.10:35000".to_string()
            }
        );
        assert_eq!(config.driver.watchdog_ms, 1500);
        assert_eq!(config.driver.ipg_ms, 150);
        assert!(!config.driver.adapter.headers);
        assert_eq!(config.driver.adapter.protocol, ObdProtocol::SaeJ1850Pwm);
        assert!(config.logging.json);
    }

    #[test]
    fn test_bad_level_is_rejected() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            json: false,
        };
        assert!(init_logging(&config).is_err());
    }
}
