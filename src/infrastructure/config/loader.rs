use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Main task id cannot be empty")]
    EmptyMainTaskId,

    #[error("Invalid max_concurrent_listeners: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid listener_timeout_ms: {0}. Must be positive")]
    InvalidListenerTimeout(u64),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid sandbox limit: {0}")]
    InvalidSandboxLimit(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conductor/config.yaml (project config)
    /// 3. .conductor/local.yaml (project local overrides, optional)
    /// 4. Environment variables (CONDUCTOR_* prefix, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(None)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Self::figment(Some(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(path) => figment.merge(Yaml::file(path)),
            None => figment
                .merge(Yaml::file(".conductor/config.yaml"))
                .merge(Yaml::file(".conductor/local.yaml")),
        };
        figment.merge(Env::prefixed("CONDUCTOR_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.runtime.main_task_id.trim().is_empty() {
            return Err(ConfigError::EmptyMainTaskId);
        }
        if config.runtime.max_concurrent_listeners == 0 {
            return Err(ConfigError::InvalidConcurrency(config.runtime.max_concurrent_listeners));
        }
        if config.runtime.listener_timeout_ms == 0 {
            return Err(ConfigError::InvalidListenerTimeout(config.runtime.listener_timeout_ms));
        }
        if config.runtime.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let agents = &config.agent_runtime;
        if agents.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "agent_runtime.base_url cannot be empty".to_string(),
            ));
        }
        if agents.initial_backoff_ms >= agents.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(agents.initial_backoff_ms, agents.max_backoff_ms));
        }

        if config.sandbox.max_steps == 0 {
            return Err(ConfigError::InvalidSandboxLimit("max_steps must be at least 1".to_string()));
        }
        if config.sandbox.max_source_len == 0 {
            return Err(ConfigError::InvalidSandboxLimit(
                "max_source_len must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
