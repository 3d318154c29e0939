//! Configuration loading and environment variable handling

use crate::domains::client::{BackoffStrategy, ClientConfig};
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::TubaConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::validation::validate_enum_choice;
use humantime_serde::re::humantime;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TUBA".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML (or `.json`) file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TubaConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut config: TubaConfig = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<TubaConfig> {
        let mut config = TubaConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TubaConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut TubaConfig) -> ConfigResult<()> {
        self.apply_client_overrides(&mut config.client)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply client, backoff and breaker overrides
    fn apply_client_overrides(&self, config: &mut ClientConfig) -> ConfigResult<()> {
        if let Some(attempts) = self.parse_env::<u32>("MAX_RETRY_ATTEMPTS")? {
            config.max_retry_attempts = attempts;
        }

        if let Some(timeout) = self.duration_env("PER_CALL_TIMEOUT")? {
            config.per_call_timeout = timeout;
        }

        if let Ok(strategy) = self.get_env_var("BACKOFF_STRATEGY") {
            validate_enum_choice(&strategy, &BackoffStrategy::CHOICES, "strategy", "client")?;
            config.backoff.strategy = BackoffStrategy::from_str(&strategy)
                .map_err(|e| ConfigError::EnvError(format!("Invalid BACKOFF_STRATEGY: {}", e)))?;
        }

        if let Some(interval) = self.duration_env("BACKOFF_INITIAL_INTERVAL")? {
            config.backoff.initial_interval = interval;
        }

        if let Some(interval) = self.duration_env("BACKOFF_MAX_INTERVAL")? {
            config.backoff.max_interval = interval;
        }

        if let Some(factor) = self.parse_env::<f64>("BACKOFF_EXPONENT_FACTOR")? {
            config.backoff.exponent_factor = factor;
        }

        let breaker = &mut config.breaker;

        if let Some(threshold) = self.parse_env::<u64>("BREAKER_FAILURE_THRESHOLD")? {
            breaker.failure_threshold = threshold;
        }

        if let Some(interval) = self.duration_env("BREAKER_COUNTER_RESET_INTERVAL")? {
            breaker.counter_reset_interval = interval;
        }

        if let Some(timeout) = self.duration_env("BREAKER_OPEN_TIMEOUT")? {
            breaker.open_timeout = timeout;
        }

        if let Some(successes) = self.parse_env::<u64>("BREAKER_HALF_OPEN_MAX_SUCCESSES")? {
            breaker.half_open_max_successes = successes;
        }

        if let Some(fail) = self.parse_env::<bool>("BREAKER_FAIL_ON_CANCEL")? {
            breaker.fail_on_cancel = fail;
        }

        if let Some(fail) = self.parse_env::<bool>("BREAKER_FAIL_ON_DEADLINE")? {
            breaker.fail_on_deadline = fail;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        if let Ok(filter) = self.get_env_var("LOG_FILTER") {
            config.filter = Some(filter);
        }

        Ok(())
    }

    /// Parse an optional environment variable with `FromStr`
    fn parse_env<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Parse an optional human-readable duration such as `250ms` or `1m`
    fn duration_env(&self, name: &str) -> ConfigResult<Option<Duration>> {
        match self.get_env_var(name) {
            Ok(raw) => humantime::parse_duration(raw.trim())
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
