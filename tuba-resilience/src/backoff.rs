//! Backoff policies for retry loops and breaker open timeouts

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maps an attempt index to the wait before the next try
///
/// Policies are pure: the same attempt always yields the same duration, and
/// attempt `0` always yields zero so the first retry is immediate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Doubling backoff: `interval * 2^attempt`.
    ///
    /// The variant keeps its historical `constant` name because configuration
    /// files use it, but the wait doubles on every attempt. Callers relying on
    /// the observed latency curve depend on this growth law.
    Constant {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },

    /// `min(initial_ms + factor^attempt, max_ms)`, computed in whole
    /// milliseconds.
    ///
    /// `factor` must be positive and `max >= initial`; the policy does not
    /// check this itself.
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        factor: f64,
    },
}

impl BackoffPolicy {
    /// Doubling policy starting from `interval`
    pub fn constant(interval: Duration) -> Self {
        BackoffPolicy::Constant { interval }
    }

    /// Exponential policy capped at `max`
    pub fn exponential(initial: Duration, max: Duration, factor: f64) -> Self {
        BackoffPolicy::Exponential {
            initial,
            max,
            factor,
        }
    }

    /// Wait before retry number `attempt`
    pub fn next(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match *self {
            BackoffPolicy::Constant { interval } => 2u32
                .checked_pow(attempt)
                .and_then(|multiplier| interval.checked_mul(multiplier))
                .unwrap_or(Duration::MAX),

            BackoffPolicy::Exponential {
                initial,
                max,
                factor,
            } => {
                let initial_ms = initial.as_millis() as f64;
                let max_ms = max.as_millis() as f64;
                let exponent = attempt.min(i32::MAX as u32) as i32;

                let delay_ms = (initial_ms + factor.powi(exponent)).min(max_ms);
                // float-to-int casts saturate and map NaN to zero
                Duration::from_millis(delay_ms as u64)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::constant(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_waits_nothing() {
        let policies = [
            BackoffPolicy::constant(Duration::from_millis(100)),
            BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(2), 2.0),
        ];

        for policy in policies {
            assert_eq!(policy.next(0), Duration::ZERO);
        }
    }

    #[test]
    fn test_constant_doubles() {
        let policy = BackoffPolicy::constant(Duration::from_millis(100));

        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_constant_saturates() {
        let policy = BackoffPolicy::constant(Duration::from_secs(1));
        assert_eq!(policy.next(40), Duration::MAX);
        assert_eq!(policy.next(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_exponential_adds_power_in_millis() {
        let policy =
            BackoffPolicy::exponential(Duration::from_millis(1000), Duration::from_millis(2000), 2.0);

        assert_eq!(policy.next(1), Duration::from_millis(1002));
        assert_eq!(policy.next(2), Duration::from_millis(1004));
        assert_eq!(policy.next(3), Duration::from_millis(1008));
    }

    #[test]
    fn test_exponential_never_exceeds_max() {
        let max = Duration::from_millis(2000);
        let policy = BackoffPolicy::exponential(Duration::from_millis(1000), max, 2.0);

        for attempt in 0..64 {
            assert!(policy.next(attempt) <= max, "attempt {attempt} exceeded max");
        }
        assert_eq!(policy.next(10), max);
        assert_eq!(policy.next(u32::MAX), max);
    }

    #[test]
    fn test_serde_tagged_representation() {
        let policy: BackoffPolicy =
            serde_json::from_str(r#"{"type":"exponential","initial":"1s","max":"2s","factor":2.0}"#)
                .unwrap();
        assert_eq!(
            policy,
            BackoffPolicy::exponential(Duration::from_secs(1), Duration::from_secs(2), 2.0)
        );

        let json = serde_json::to_value(BackoffPolicy::constant(Duration::from_millis(50))).unwrap();
        assert_eq!(json["type"], "constant");
        assert_eq!(json["interval"], "50ms");
    }
}
