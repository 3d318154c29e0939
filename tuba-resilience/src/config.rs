//! Conversions from `tuba-config` settings into runtime policies

use tuba_config::{BackoffSettings, BackoffStrategy, BreakerSettings};

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::CircuitBreakerConfig;

impl From<&BackoffSettings> for BackoffPolicy {
    fn from(settings: &BackoffSettings) -> Self {
        match settings.strategy {
            BackoffStrategy::Constant => BackoffPolicy::constant(settings.initial_interval),
            BackoffStrategy::Exponential => BackoffPolicy::exponential(
                settings.initial_interval,
                settings.max_interval,
                settings.exponent_factor,
            ),
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            counter_reset_interval: settings.counter_reset_interval,
            open_timeout: settings.open_timeout,
            open_timeout_backoff: BackoffPolicy::from(&settings.open_timeout_backoff),
            half_open_max_successes: settings.half_open_max_successes,
            fail_on_cancel: settings.fail_on_cancel,
            fail_on_deadline: settings.fail_on_deadline,
        }
    }
}
