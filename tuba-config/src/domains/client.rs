//! Resilient client configuration: retry backoff, retry budget, per-call
//! timeout and circuit breaker

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_factor, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Backoff strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `initial_interval * 2^attempt`; doubles on every attempt despite the name
    #[default]
    Constant,
    /// `min(initial_interval_ms + exponent_factor^attempt, max_interval_ms)`
    Exponential,
}

impl BackoffStrategy {
    /// Names accepted in configuration files and environment variables
    pub const CHOICES: [&'static str; 2] = ["constant", "exponential"];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::Constant => "constant",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant" => Ok(BackoffStrategy::Constant),
            "exponential" => Ok(BackoffStrategy::Exponential),
            _ => Err(format!("Invalid backoff strategy: {}", s)),
        }
    }
}

/// Parameters of one backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Which growth law to apply
    pub strategy: BackoffStrategy,

    /// Base interval
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,

    /// Upper bound, honoured by the exponential strategy
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,

    /// Exponent base for the exponential strategy
    pub exponent_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Constant,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            exponent_factor: 2.0,
        }
    }
}

impl BackoffSettings {
    /// Doubles from the default open timeout, so every failed trial lengthens it
    fn open_timeout_default() -> Self {
        Self {
            strategy: BackoffStrategy::Constant,
            initial_interval: Duration::from_secs(20),
            max_interval: Duration::from_secs(300),
            exponent_factor: 2.0,
        }
    }
}

impl Validatable for BackoffSettings {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.initial_interval, "initial_interval", self.domain_name())?;

        if self.strategy == BackoffStrategy::Exponential {
            validate_factor(self.exponent_factor, "exponent_factor", self.domain_name())?;

            if self.max_interval < self.initial_interval {
                return Err(self.validation_error(format!(
                    "max_interval ({:?}) must not be shorter than initial_interval ({:?})",
                    self.max_interval, self.initial_interval
                )));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "client.backoff"
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Failures within one counting window that open the breaker
    pub failure_threshold: u64,

    /// Length of the fixed failure-counting window
    #[serde(with = "humantime_serde")]
    pub counter_reset_interval: Duration,

    /// Initial time spent open before a half-open trial
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,

    /// Backoff applied to the open timeout each time a trial fails
    pub open_timeout_backoff: BackoffSettings,

    /// Successful trials needed to close again
    pub half_open_max_successes: u64,

    /// Count caller cancellations as failures
    pub fail_on_cancel: bool,

    /// Count deadline expiries as failures
    pub fail_on_deadline: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            counter_reset_interval: Duration::from_secs(60),
            open_timeout: Duration::from_secs(20),
            open_timeout_backoff: BackoffSettings::open_timeout_default(),
            half_open_max_successes: 10,
            fail_on_cancel: true,
            fail_on_deadline: true,
        }
    }
}

impl Validatable for BreakerSettings {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.failure_threshold, "failure_threshold", self.domain_name())?;
        validate_duration(
            self.counter_reset_interval,
            "counter_reset_interval",
            self.domain_name(),
        )?;
        validate_duration(self.open_timeout, "open_timeout", self.domain_name())?;
        validate_positive(
            self.half_open_max_successes,
            "half_open_max_successes",
            self.domain_name(),
        )?;
        self.open_timeout_backoff.validate()?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "client.breaker"
    }
}

/// Resilient client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Retry backoff (`strategy`, `initial_interval`, `max_interval`, `exponent_factor`)
    #[serde(flatten)]
    pub backoff: BackoffSettings,

    /// Retries after the initial attempt
    pub max_retry_attempts: u32,

    /// Deadline applied to every dispatched attempt
    #[serde(with = "humantime_serde")]
    pub per_call_timeout: Duration,

    /// Circuit breaker guarding the target
    pub breaker: BreakerSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffSettings::default(),
            max_retry_attempts: 0,
            per_call_timeout: Duration::from_secs(1),
            breaker: BreakerSettings::default(),
        }
    }
}

impl Validatable for ClientConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.backoff.validate()?;
        validate_duration(self.per_call_timeout, "per_call_timeout", self.domain_name())?;
        self.breaker.validate()?;

        if self.max_retry_attempts > 100 {
            log::warn!(
                "max_retry_attempts is {}; long retry loops hold the calling thread",
                self.max_retry_attempts
            );
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "client"
    }
}
