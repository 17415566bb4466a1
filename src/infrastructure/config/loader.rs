use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid pool_size: {0}. Must be at least 1")]
    InvalidPoolSize(usize),

    #[error("Invalid recycle_threshold: {0}. Must be at least 1")]
    InvalidRecycleThreshold(u32),

    #[error("Invalid queue max_size: {0}. Must be at least 1")]
    InvalidQueueSize(usize),

    #[error("Invalid workers: {0}. Must be between 1 and 64")]
    InvalidWorkers(usize),

    #[error("Invalid max_concurrent_default: {0}. Must be at least 1")]
    InvalidMaxConcurrent(usize),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .taskhive/config.yaml (project config)
    /// 3. .taskhive/local.yaml (project local overrides, optional)
    /// 4. Environment variables (TASKHIVE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".taskhive/config.yaml"))
            .merge(Yaml::file(".taskhive/local.yaml"))
            .merge(Env::prefixed("TASKHIVE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.pool.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(config.pool.pool_size));
        }
        if config.pool.recycle_threshold == 0 {
            return Err(ConfigError::InvalidRecycleThreshold(
                config.pool.recycle_threshold,
            ));
        }

        if config.queue.max_size == 0 {
            return Err(ConfigError::InvalidQueueSize(config.queue.max_size));
        }

        if config.agents.max_concurrent_default == 0 {
            return Err(ConfigError::InvalidMaxConcurrent(
                config.agents.max_concurrent_default,
            ));
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.coordinator.workers == 0 || config.coordinator.workers > 64 {
            return Err(ConfigError::InvalidWorkers(config.coordinator.workers));
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
