/*!
 * Configuration management for beamwire.
 *
 * This module provides functionality to load, validate, and access
 * configuration settings for a beamline deployment: the beamline tag,
 * the visit root and numbering-service endpoint, and device-build
 * defaults.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for beamwire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Visit and numbering-service configuration
    #[serde(default)]
    pub visit: VisitConfig,

    /// Device-build configuration
    #[serde(default)]
    pub devices: DevicesConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Beamline tag used in filename stems (e.g. "bl1")
    #[serde(default = "default_beamline")]
    pub beamline: String,

    /// Deployment environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to stdout
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
}

/// Visit and numbering-service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitConfig {
    /// Absolute root directory for the current visit
    #[serde(default = "default_visit_root")]
    pub root: String,

    /// Base URL of the numbering service; empty means use the local
    /// in-process counter
    #[serde(default)]
    pub numbering_url: String,

    /// Timeout for numbering-service requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Device-build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Default timeout for a single factory build in milliseconds
    /// (0 means no timeout)
    #[serde(default = "default_build_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Whether to build all factories in mock mode
    #[serde(default)]
    pub mock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            logging: LoggingConfig::default(),
            visit: VisitConfig::default(),
            devices: DevicesConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            beamline: default_beamline(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
        }
    }
}

impl Default for VisitConfig {
    fn default() -> Self {
        Self {
            root: default_visit_root(),
            numbering_url: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_build_timeout_ms(),
            mock: false,
        }
    }
}

fn default_beamline() -> String {
    "bl1".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

fn default_visit_root() -> String {
    "/data/visit".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_build_timeout_ms() -> u64 {
    10_000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        // Start with default values
        let default_config = Config::default();
        config_builder = config_builder.add_source(
            config::Config::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        // Add configuration from file if specified
        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!(
                    "Configuration file {} does not exist, using defaults",
                    config_file
                );
            }
        }

        // Add configuration from environment variables if prefix is specified
        if let Some(prefix) = self.environment_prefix {
            debug!(
                "Loading configuration from environment variables with prefix {}",
                prefix
            );
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        // Build the config
        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        // Convert to our config type
        let mut config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        // Override with provided config if specified
        if let Some(override_config) = self.override_with {
            config = override_config;
        }

        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.beamline, "bl1");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.visit.root, "/data/visit");
        assert_eq!(config.visit.request_timeout_ms, 5000);
        assert!(!config.devices.mock);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.beamline, "bl1");
        assert_eq!(config.devices.default_timeout_ms, 10_000);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir().map_err(|e| Error::other(e.to_string()))?;
        let file_path = dir.path().join("config.toml");

        {
            let mut file = File::create(&file_path).map_err(|e| Error::other(e.to_string()))?;
            file.write_all(
                br#"
                [general]
                beamline = "i22"
                environment = "production"

                [visit]
                root = "/dls/i22/data/2026/cm-1"
                numbering_url = "http://numtracker.example:8080"
            "#,
            )
            .map_err(|e| Error::other(e.to_string()))?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.general.beamline, "i22");
        assert_eq!(config.general.environment, "production");
        assert_eq!(config.visit.root, "/dls/i22/data/2026/cm-1");
        assert_eq!(config.visit.numbering_url, "http://numtracker.example:8080");
        // Untouched sections keep their defaults
        assert_eq!(config.devices.default_timeout_ms, 10_000);

        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("BEAMWIRE__GENERAL__BEAMLINE", "p45");
        env::set_var("BEAMWIRE__DEVICES__MOCK", "true");

        let config = ConfigBuilder::new()
            .with_environment_prefix("beamwire")
            .build()?;

        assert_eq!(config.general.beamline, "p45");
        assert!(config.devices.mock);

        // Clean up
        env::remove_var("BEAMWIRE__GENERAL__BEAMLINE");
        env::remove_var("BEAMWIRE__DEVICES__MOCK");

        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let config = Config::default();
        let shared = SharedConfig::new(config);

        assert_eq!(shared.get().general.beamline, "bl1");

        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.beamline, "bl1");
    }
}
