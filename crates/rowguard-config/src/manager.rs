//! Configuration manager

use crate::error::{ConfigError, ConfigResult};
use crate::types::RowguardConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Environment prefix for overrides, e.g. `ROWGUARD__SNAPSHOTS__TTL_SECS`
pub const DEFAULT_ENV_PREFIX: &str = "ROWGUARD";

/// Loads, validates and saves rowguard configuration
pub struct ConfigManager {
    config_path: PathBuf,
    env_prefix: String,
}

impl ConfigManager {
    /// Create a manager for the default config location
    pub fn new() -> Self {
        Self::with_path(Self::default_config_path())
    }

    /// Create a manager for a specific file
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Use a different environment prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// `<config dir>/rowguard/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rowguard")
            .join("config.toml")
    }

    /// Path this manager reads and writes
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the file (if present) and environment overrides, then validate
    pub fn load_config(&self) -> ConfigResult<RowguardConfig> {
        let settings = Config::builder()
            .add_source(File::from(self.config_path.clone()).required(false))
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: RowguardConfig = settings.try_deserialize()?;
        self.validate_config(&config)?;
        tracing::debug!(path = %self.config_path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Validate and write the configuration as TOML
    pub fn save_config(&self, config: &RowguardConfig) -> ConfigResult<()> {
        self.validate_config(config)?;
        let toml_string = toml::to_string_pretty(config)?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.config_path, toml_string)?;
        Ok(())
    }

    /// Check value ranges and the log filter directive
    pub fn validate_config(&self, config: &RowguardConfig) -> ConfigResult<()> {
        if config.snapshots.max_snapshots == 0 {
            return Err(ConfigError::validation(
                "snapshots.max_snapshots must be greater than 0",
            ));
        }
        if config.snapshots.sweep_interval_secs == 0 {
            return Err(ConfigError::validation(
                "snapshots.sweep_interval_secs must be greater than 0",
            ));
        }
        if config.undo.global_max == 0 {
            return Err(ConfigError::validation(
                "undo.global_max must be greater than 0",
            ));
        }
        if config.ledger.max_workflows == 0 {
            return Err(ConfigError::validation(
                "ledger.max_workflows must be greater than 0",
            ));
        }
        if EnvFilter::try_new(&config.logging.level).is_err() {
            return Err(ConfigError::validation(format!(
                "logging.level is not a valid filter: {}",
                config.logging.level
            )));
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
