/*!
 * Configuration management for BeamFlow.
 *
 * Configuration is layered: built-in defaults, then an optional file, then
 * environment variables (`BEAMFLOW__SECTION__KEY`).
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::millis_to_duration;

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "BEAMFLOW";

/// Core configuration for BeamFlow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Attribute mediation configuration
    #[serde(default)]
    pub mediator: MediatorConfig,

    /// Static per-kind attribute limits
    #[serde(default)]
    pub limits: LimitsConfig,
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
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to print the event target in log lines
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

/// What an attribute read reports when the controller cannot produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetFailurePolicy {
    /// Surface the failure to the caller
    #[default]
    Propagate,
    /// Substitute zero (or `false` for actuators), the historical behaviour
    DefaultZero,
}

/// Attribute mediation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorConfig {
    /// Prefix of every notification namespace (`<prefix>/<attribute>`)
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Buffered notifications per namespace before slow subscribers lag
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Upper bound for a single move in milliseconds (0 means no timeout)
    #[serde(default)]
    pub move_timeout_ms: u64,

    /// Read failure policy, applied to every attribute
    #[serde(default)]
    pub get_failure_policy: GetFailurePolicy,
}

/// Limits as `[min, max, step]`, keyed by attribute kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Energy limits (keV)
    #[serde(default = "default_numeric_limits")]
    pub energy: [f64; 3],

    /// Transmission limits (%)
    #[serde(default = "default_numeric_limits")]
    pub transmission: [f64; 3],

    /// Resolution limits (Å)
    #[serde(default = "default_numeric_limits")]
    pub resolution: [f64; 3],

    /// Fast shutter limits
    #[serde(default = "default_binary_limits")]
    pub fast_shutter: [f64; 3],
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
            with_target: default_with_target(),
        }
    }
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: default_namespace_prefix(),
            channel_capacity: default_channel_capacity(),
            move_timeout_ms: 0,
            get_failure_policy: GetFailurePolicy::default(),
        }
    }
}

impl MediatorConfig {
    /// The move timeout, if one is configured
    pub fn move_timeout(&self) -> Option<Duration> {
        match self.move_timeout_ms {
            0 => None,
            ms => Some(millis_to_duration(ms)),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            energy: default_numeric_limits(),
            transmission: default_numeric_limits(),
            resolution: default_numeric_limits(),
            fast_shutter: default_binary_limits(),
        }
    }
}

fn default_app_name() -> String {
    "beamflow".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

fn default_namespace_prefix() -> String {
    "beamline".to_string()
}

fn default_channel_capacity() -> usize {
    crate::event::DEFAULT_CHANNEL_CAPACITY
}

fn default_numeric_limits() -> [f64; 3] {
    [0.0, 1000.0, 0.1]
}

fn default_binary_limits() -> [f64; 3] {
    [0.0, 1.0, 1.0]
}

impl Config {
    /// Load configuration from an optional file plus `BEAMFLOW__*` variables
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = ConfigBuilder::new().with_environment_prefix(ENV_PREFIX);
        if let Some(path) = path {
            builder = builder.with_config_file(path);
        }
        builder.build()
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
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

        let config: Config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

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
        assert_eq!(config.general.app_name, "beamflow");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.mediator.namespace_prefix, "beamline");
        assert_eq!(config.mediator.get_failure_policy, GetFailurePolicy::Propagate);
        assert_eq!(config.mediator.move_timeout(), None);
        assert_eq!(config.limits.energy, [0.0, 1000.0, 0.1]);
        assert_eq!(config.limits.fast_shutter, [0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.general.app_name, "beamflow");
        assert_eq!(config.mediator.channel_capacity, 1024);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("beamflow.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [logging]
                level = "debug"

                [mediator]
                namespace_prefix = "id29"
                move_timeout_ms = 1500
                get_failure_policy = "default_zero"

                [limits]
                energy = [5.0, 20.0, 0.001]
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.mediator.namespace_prefix, "id29");
        assert_eq!(config.mediator.move_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.mediator.get_failure_policy, GetFailurePolicy::DefaultZero);
        assert_eq!(config.limits.energy, [5.0, 20.0, 0.001]);
        assert_eq!(config.limits.transmission, [0.0, 1000.0, 0.1]);

        Ok(())
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() -> Result<()> {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/beamflow.toml")
            .build()?;
        assert_eq!(config.mediator.namespace_prefix, "beamline");
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("BFTEST__GENERAL__APP_NAME", "env-app");
        env::set_var("BFTEST__MEDIATOR__MOVE_TIMEOUT_MS", "250");

        let config = ConfigBuilder::new().with_environment_prefix("bftest").build()?;

        assert_eq!(config.general.app_name, "env-app");
        assert_eq!(config.mediator.move_timeout_ms, 250);

        env::remove_var("BFTEST__GENERAL__APP_NAME");
        env::remove_var("BFTEST__MEDIATOR__MOVE_TIMEOUT_MS");

        Ok(())
    }

    #[test]
    fn test_override_wins() -> Result<()> {
        let mut custom = Config::default();
        custom.mediator.namespace_prefix = "custom".to_string();
        let config = ConfigBuilder::new().override_with(custom).build()?;
        assert_eq!(config.mediator.namespace_prefix, "custom");
        Ok(())
    }

    #[test]
    fn test_to_toml_string() -> Result<()> {
        let rendered = Config::default().to_toml_string()?;
        assert!(rendered.contains("[mediator]"));
        assert!(rendered.contains("namespace_prefix = \"beamline\""));
        assert!(rendered.contains("get_failure_policy = \"propagate\""));
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().general.app_name, "beamflow");
        assert_eq!(shared.as_ref().logging.level, "info");
    }
}
