/*!
 * Configuration management for AdapterFlow.
 *
 * This module provides functionality to load and access configuration
 * settings for AdapterFlow components.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::millis_to_duration;

/// Default time a device's cached operation stays authoritative
pub const DEFAULT_CACHE_DURATION_MS: u64 = 2000;

/// Core configuration for AdapterFlow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device state configuration
    #[serde(default)]
    pub device_state: DeviceStateConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error, or a directive list)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

/// Device state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateConfig {
    /// How long a per-device cached operation is reused, in milliseconds
    #[serde(default = "default_cache_duration_ms")]
    pub cache_duration_ms: u64,
}

impl DeviceStateConfig {
    /// The cache window as a duration
    pub fn cache_duration(&self) -> Duration {
        millis_to_duration(self.cache_duration_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for DeviceStateConfig {
    fn default() -> Self {
        Self {
            cache_duration_ms: default_cache_duration_ms(),
        }
    }
}

impl Config {
    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize configuration: {}", e)))
    }
}

fn default_app_name() -> String {
    "adapterflow".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_duration_ms() -> u64 {
    DEFAULT_CACHE_DURATION_MS
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
        if let Some(config) = self.override_with {
            debug!("Using provided configuration override");
            return Ok(config);
        }

        let mut config_builder = ConfigLib::builder().add_source(
            ConfigLib::try_from(&Config::default())
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!(
            cache_duration_ms = config.device_state.cache_duration_ms,
            "Configuration loaded successfully"
        );
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
        assert_eq!(config.general.app_name, "adapterflow");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.device_state.cache_duration_ms, 2000);
        assert_eq!(config.device_state.cache_duration(), Duration::from_millis(2000));
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "adapterflow");
        assert_eq!(config.device_state.cache_duration_ms, DEFAULT_CACHE_DURATION_MS);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("adapter.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [general]
                app_name = "living-room-adapter"

                [logging]
                level = "debug"

                [device_state]
                cache_duration_ms = 500
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.general.app_name, "living-room-adapter");
        assert_eq!(config.general.environment, "development");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.device_state.cache_duration_ms, 500);

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = ConfigBuilder::new()
            .with_config_file(dir.path().join("absent.toml"))
            .build()?;
        assert_eq!(config.device_state.cache_duration_ms, 2000);
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("AFTEST__DEVICE_STATE__CACHE_DURATION_MS", "750");
        env::set_var("AFTEST__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("aftest")
            .build()?;

        assert_eq!(config.device_state.cache_duration_ms, 750);
        assert_eq!(config.logging.level, "trace");

        env::remove_var("AFTEST__DEVICE_STATE__CACHE_DURATION_MS");
        env::remove_var("AFTEST__LOGGING__LEVEL");

        Ok(())
    }

    #[test]
    fn test_override_wins() -> Result<()> {
        let mut custom = Config::default();
        custom.device_state.cache_duration_ms = 10;

        let config = ConfigBuilder::new().override_with(custom).build()?;
        assert_eq!(config.device_state.cache_duration_ms, 10);
        Ok(())
    }

    #[test]
    fn test_to_toml_string() -> Result<()> {
        let rendered = Config::default().to_toml_string()?;
        assert!(rendered.contains("cache_duration_ms = 2000"));
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().device_state.cache_duration_ms, 2000);
        assert_eq!(shared.as_ref().general.app_name, "adapterflow");
    }
}
