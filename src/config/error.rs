//! Configuration Error Types
//!
//! Errors raised while loading and validating engine configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: PathBuf },

    /// Layered sources could not be merged or deserialized
    #[error("Failed to load configuration: {error}")]
    LoadError { error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn config_file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigFileNotFound { path: path.into() }
    }

    pub fn load_error<E: std::fmt::Display>(error: E) -> Self {
        Self::LoadError {
            error: error.to_string(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::load_error(err)
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
