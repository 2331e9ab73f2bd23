//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::EngineConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid max_workers: {0}. Must be between 1 and 100")]
    InvalidMaxWorkers(usize),

    #[error("invalid event_buffer_size: {0}. Must be at least 1")]
    InvalidEventBufferSize(usize),

    #[error("invalid retry_backoff_factor: {0}. Must be positive")]
    InvalidBackoffFactor(f64),

    #[error("invalid requests_per_second: {0}. Must be at least 1")]
    InvalidRateLimit(u32),

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. hookflow.yaml in the working directory
    /// 3. Environment variables (`HOOKFLOW_` prefix, `__` separators)
    pub fn load() -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file("hookflow.yaml"))
            .merge(Env::prefixed("HOOKFLOW_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.max_workers == 0 || config.max_workers > 100 {
            return Err(ConfigError::InvalidMaxWorkers(config.max_workers));
        }
        if config.event_buffer_size == 0 {
            return Err(ConfigError::InvalidEventBufferSize(config.event_buffer_size));
        }
        if config.retry_backoff_factor <= 0.0 {
            return Err(ConfigError::InvalidBackoffFactor(
                config.retry_backoff_factor,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        if config.api.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit(config.api.requests_per_second));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
