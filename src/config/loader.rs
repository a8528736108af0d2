//! Configuration Loader
//!
//! Environment-aware configuration loading. Merges built-in defaults, an
//! optional TOML file and prefixed environment variables using the `config`
//! crate, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "TASKER_BATCH";
const DEFAULT_CONFIG_FILE: &str = "config/batch";

pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_layered(None, &Self::detect_environment())
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from_file(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(path));
        }
        Self::load_layered(Some(path), &Self::detect_environment())
    }

    fn load_layered(path: Option<&Path>, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = config::Config::try_from(&EngineConfig::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            "Configuration resolved: {}",
            serde_json::to_string(&config).unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            default_item_count = config.default_item_count,
            transaction_timeout_seconds = config.transaction_timeout_seconds,
            "⚙️ CONFIG: Batch engine configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_file: path.map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: EngineConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            source_file: None,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn detect_environment() -> String {
        env::var("BATCH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "default_item_count = 25\nsplit_timeout_seconds = 5").unwrap();

        let manager = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(manager.config().default_item_count, 25);
        assert_eq!(manager.config().split_timeout_seconds, 5);
        assert_eq!(manager.config().transaction_timeout_seconds, 180);
        assert_eq!(manager.source_file(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            ConfigManager::load_from_file(&missing),
            Err(ConfigurationError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_file_value_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "default_item_count = 0").unwrap();
        assert!(ConfigManager::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_from_config_validates() {
        let config = EngineConfig {
            partition_report_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(ConfigManager::from_config(config).is_err());
        assert!(ConfigManager::from_config(EngineConfig::default()).is_ok());
    }
}
