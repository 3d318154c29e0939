//! Circuit breaker pattern implementation

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Circuit is half-open, limited requests allowed to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within one counting window that open the circuit
    pub failure_threshold: u64,

    /// Length of the fixed failure-counting window; zero disables resets
    #[serde(with = "humantime_serde")]
    pub counter_reset_interval: Duration,

    /// Time spent open before the first half-open trial
    #[serde(with = "humantime_serde")]
    pub open_timeout: Duration,

    /// Grows the open timeout each time a half-open trial fails
    pub open_timeout_backoff: BackoffPolicy,

    /// Successful trials needed to close from half-open; zero behaves as one
    pub half_open_max_successes: u64,

    /// Count caller cancellations as failures
    pub fail_on_cancel: bool,

    /// Count deadline expiries as failures
    pub fail_on_deadline: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            counter_reset_interval: Duration::from_secs(60),
            open_timeout: Duration::from_secs(20),
            open_timeout_backoff: BackoffPolicy::constant(Duration::from_secs(20)),
            half_open_max_successes: 10,
            fail_on_cancel: true,
            fail_on_deadline: true,
        }
    }
}

/// Result of one protected call, as reported to the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub succeeded: bool,
    pub is_cancellation: bool,
    pub is_deadline_exceeded: bool,
    pub latency: Duration,
}

impl CallOutcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            succeeded: true,
            is_cancellation: false,
            is_deadline_exceeded: false,
            latency,
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            succeeded: false,
            ..Self::success(latency)
        }
    }

    pub fn cancelled(latency: Duration) -> Self {
        Self {
            is_cancellation: true,
            ..Self::failure(latency)
        }
    }

    pub fn deadline_exceeded(latency: Duration) -> Self {
        Self {
            is_deadline_exceeded: true,
            ..Self::failure(latency)
        }
    }
}

/// Callback invoked with `(from, to)` after every state change
pub type StateChangeObserver = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker metrics
#[derive(Debug, Clone, Default)]
pub struct CircuitMetrics {
    /// Number of reported outcomes
    pub total_requests: u64,
    /// Number of successful outcomes
    pub total_successes: u64,
    /// Number of outcomes counted as failures
    pub total_failures: u64,
    /// Cancellations and deadline expiries excluded from counting
    pub total_ignored: u64,
    /// Number of requests rejected while open
    pub total_rejected: u64,
    /// Number of state changes
    pub transitions: u64,
    /// Latency of the most recent reported outcome
    pub last_latency: Option<Duration>,
    /// Last failure time
    pub last_failure_time: Option<Instant>,
    /// Last success time
    pub last_success_time: Option<Instant>,
    /// Last state change time
    pub last_state_change: Option<Instant>,
}

/// Point-in-time view of the breaker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub reopen_count: u64,
    pub opened_at: Option<Instant>,
    pub open_timeout: Duration,
}

/// Thread-safe circuit breaker implementation
///
/// Every read-modify-write of the counters happens under one lock, and the
/// state-change observer runs after that lock is released.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
    clock: Arc<dyn Clock>,
    observer: Option<StateChangeObserver>,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    window_started_at: Instant,
    opened_at: Option<Instant>,
    reopen_count: u64,
    current_open_timeout: Duration,
    half_open_in_flight: u64,
    metrics: CircuitMetrics,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
}

enum Verdict {
    Success,
    Failure,
    Ignored,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerBuilder::new().config(config).build()
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Name used in log messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to dispatch one call.
    ///
    /// An expired open timeout moves the breaker to half-open and the caller
    /// that observes it becomes the first trial.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let (allowed, transition) = {
            let mut state = self.state.lock();
            let transition = self.update_state(&mut state, now);

            let allowed = match state.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    state.success_count + state.half_open_in_flight < self.half_open_budget()
                }
            };

            if allowed && state.state == CircuitState::HalfOpen {
                state.half_open_in_flight += 1;
            } else if !allowed {
                state.metrics.total_rejected += 1;
            }

            (allowed, transition)
        };

        self.notify(transition);
        allowed
    }

    /// Record the outcome of a call that `allow` admitted
    pub fn report(&self, outcome: CallOutcome) {
        let now = self.clock.now();
        let transition = {
            let mut state = self.state.lock();
            self.roll_window(&mut state, now);

            // Calls are not tagged with the phase that admitted them, so a call
            // admitted while closed that reports during half-open frees a trial
            // slot and counts as a trial outcome.
            if state.state == CircuitState::HalfOpen {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }

            state.metrics.total_requests += 1;
            state.metrics.last_latency = Some(outcome.latency);

            match self.classify(&outcome) {
                Verdict::Ignored => {
                    state.metrics.total_ignored += 1;
                    None
                }
                Verdict::Success => {
                    state.metrics.total_successes += 1;
                    state.metrics.last_success_time = Some(now);
                    self.on_success(&mut state, now)
                }
                Verdict::Failure => {
                    state.metrics.total_failures += 1;
                    state.metrics.last_failure_time = Some(now);
                    self.on_failure(&mut state, now)
                }
            }
        };

        self.notify(transition);
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.report(CallOutcome::success(Duration::ZERO));
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.report(CallOutcome::failure(Duration::ZERO));
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Check if the circuit breaker is open (requests should be blocked)
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Current counters, after applying any due window reset or timeout
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let (snapshot, transition) = {
            let mut state = self.state.lock();
            let transition = self.update_state(&mut state, now);
            let snapshot = BreakerSnapshot {
                state: state.state,
                failure_count: state.failure_count,
                success_count: state.success_count,
                reopen_count: state.reopen_count,
                opened_at: state.opened_at,
                open_timeout: state.current_open_timeout,
            };
            (snapshot, transition)
        };

        self.notify(transition);
        snapshot
    }

    /// Get current metrics
    pub fn metrics(&self) -> CircuitMetrics {
        self.state.lock().metrics.clone()
    }

    /// Reset the circuit breaker to closed state and clear its metrics
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut state = self.state.lock();
            let transition = if state.state != CircuitState::Closed {
                Some(self.transition(&mut state, CircuitState::Closed, now))
            } else {
                None
            };
            state.failure_count = 0;
            state.success_count = 0;
            state.window_started_at = now;
            state.metrics = CircuitMetrics {
                last_state_change: Some(now),
                ..CircuitMetrics::default()
            };
            transition
        };

        self.notify(transition);
    }

    // Internal methods

    fn half_open_budget(&self) -> u64 {
        self.config.half_open_max_successes.max(1)
    }

    fn classify(&self, outcome: &CallOutcome) -> Verdict {
        if outcome.succeeded {
            Verdict::Success
        } else if outcome.is_cancellation && !self.config.fail_on_cancel {
            Verdict::Ignored
        } else if outcome.is_deadline_exceeded && !self.config.fail_on_deadline {
            Verdict::Ignored
        } else {
            Verdict::Failure
        }
    }

    fn on_success(&self, state: &mut CircuitBreakerState, now: Instant) -> Option<Transition> {
        match state.state {
            CircuitState::Closed => {
                state.success_count += 1;
                None
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.half_open_budget() {
                    Some(self.transition(state, CircuitState::Closed, now))
                } else {
                    None
                }
            }
            // late result from a call admitted before the circuit opened
            CircuitState::Open => None,
        }
    }

    fn on_failure(&self, state: &mut CircuitBreakerState, now: Instant) -> Option<Transition> {
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    Some(self.transition(state, CircuitState::Open, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => Some(self.transition(state, CircuitState::Open, now)),
            CircuitState::Open => None,
        }
    }

    /// Apply a due window reset and the open-to-half-open timeout
    fn update_state(&self, state: &mut CircuitBreakerState, now: Instant) -> Option<Transition> {
        self.roll_window(state, now);

        if state.state != CircuitState::Open {
            return None;
        }

        let opened_at = state.opened_at.unwrap_or(now);
        if now.saturating_duration_since(opened_at) >= state.current_open_timeout {
            Some(self.transition(state, CircuitState::HalfOpen, now))
        } else {
            None
        }
    }

    /// Zero the closed-state counters once the current fixed window elapses
    fn roll_window(&self, state: &mut CircuitBreakerState, now: Instant) {
        let interval = self.config.counter_reset_interval;
        if state.state != CircuitState::Closed || interval.is_zero() {
            return;
        }

        let elapsed = now.saturating_duration_since(state.window_started_at);
        if elapsed < interval {
            return;
        }

        // stay on the fixed grid: the new window starts at the last boundary
        let into_window = elapsed.as_nanos() % interval.as_nanos();
        let into_window = Duration::from_nanos(u64::try_from(into_window).unwrap_or(u64::MAX));
        state.window_started_at = now.checked_sub(into_window).unwrap_or(now);
        state.failure_count = 0;
        state.success_count = 0;
    }

    fn transition(
        &self,
        state: &mut CircuitBreakerState,
        to: CircuitState,
        now: Instant,
    ) -> Transition {
        let from = state.state;
        state.state = to;
        state.metrics.transitions += 1;
        state.metrics.last_state_change = Some(now);

        match to {
            CircuitState::Open => {
                if from == CircuitState::HalfOpen {
                    state.reopen_count += 1;
                    let attempt = u32::try_from(state.reopen_count).unwrap_or(u32::MAX);
                    state.current_open_timeout = self
                        .config
                        .open_timeout
                        .max(self.config.open_timeout_backoff.next(attempt));
                } else {
                    state.current_open_timeout = self.config.open_timeout;
                }
                state.opened_at = Some(now);
                state.success_count = 0;
                state.half_open_in_flight = 0;
                if from == CircuitState::HalfOpen {
                    log::warn!(
                        "Circuit breaker '{}' reopened after failed trial (reopen #{}); retrying in {:?}",
                        self.name,
                        state.reopen_count,
                        state.current_open_timeout
                    );
                } else {
                    log::warn!(
                        "Circuit breaker '{}' opened after {} failures; retrying in {:?}",
                        self.name,
                        state.failure_count,
                        state.current_open_timeout
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.failure_count = 0;
                state.success_count = 0;
                state.half_open_in_flight = 0;
                log::info!("Circuit breaker '{}' transitioned to half-open state", self.name);
            }
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
                state.window_started_at = now;
                state.opened_at = None;
                state.reopen_count = 0;
                state.current_open_timeout = self.config.open_timeout;
                state.half_open_in_flight = 0;
                log::info!(
                    "Circuit breaker '{}' closed after successful recovery",
                    self.name
                );
            }
        }

        Transition { from, to }
    }

    fn notify(&self, transition: Option<Transition>) {
        if let (Some(observer), Some(Transition { from, to })) = (&self.observer, transition) {
            observer(from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state.lock().state)
            .finish_non_exhaustive()
    }
}

/// Builder for circuit breakers
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    observer: Option<StateChangeObserver>,
}

impl CircuitBreakerBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            name: "default".to_string(),
            config: CircuitBreakerConfig::default(),
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }

    /// Name used in log messages
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the fixed failure-counting window
    pub fn counter_reset_interval(mut self, interval: Duration) -> Self {
        self.config.counter_reset_interval = interval;
        self
    }

    /// Set timeout before attempting recovery
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    /// Set the backoff applied to the open timeout after failed trials
    pub fn open_timeout_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.config.open_timeout_backoff = backoff;
        self
    }

    /// Set successful trials needed to close
    pub fn half_open_max_successes(mut self, successes: u64) -> Self {
        self.config.half_open_max_successes = successes;
        self
    }

    /// Whether cancellations count as failures
    pub fn fail_on_cancel(mut self, fail: bool) -> Self {
        self.config.fail_on_cancel = fail;
        self
    }

    /// Whether deadline expiries count as failures
    pub fn fail_on_deadline(mut self, fail: bool) -> Self {
        self.config.fail_on_deadline = fail;
        self
    }

    /// Replace the time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a state-change callback
    pub fn on_state_change(mut self, observer: StateChangeObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let now = self.clock.now();
        CircuitBreaker {
            name: Arc::from(self.name),
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                window_started_at: now,
                opened_at: None,
                reopen_count: 0,
                current_open_timeout: self.config.open_timeout,
                half_open_in_flight: 0,
                metrics: CircuitMetrics::default(),
            })),
            config: Arc::new(self.config),
            clock: self.clock,
            observer: self.observer,
        }
    }
}

impl Default for CircuitBreakerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_breaker(builder: CircuitBreakerBuilder) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = builder.clock(Arc::new(clock.clone())).build();
        (breaker, clock)
    }

    fn recording_observer() -> (StateChangeObserver, Arc<Mutex<Vec<(CircuitState, CircuitState)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: StateChangeObserver =
            Arc::new(move |from: CircuitState, to: CircuitState| sink.lock().push((from, to)));
        (observer, seen)
    }

    #[test]
    fn test_circuit_breaker_basic_flow() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(3)
                .half_open_max_successes(2)
                .open_timeout(Duration::from_millis(100)),
        );

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.is_open());
        assert!(!breaker.allow());

        clock.advance(Duration::from_millis(100));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_rejects_until_open_timeout_elapses() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .open_timeout(Duration::from_secs(20)),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(19));
        assert!(!breaker.allow());
        assert!(!breaker.allow());
        assert_eq!(breaker.metrics().total_rejected, 2);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_failure_backs_off_open_timeout() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(2)
                .open_timeout(Duration::from_secs(10))
                .open_timeout_backoff(BackoffPolicy::constant(Duration::from_secs(10))),
        );

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().open_timeout, Duration::from_secs(10));

        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow());
        breaker.record_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.reopen_count, 1);
        assert_eq!(snapshot.open_timeout, Duration::from_secs(20));

        clock.advance(Duration::from_secs(10));
        assert!(!breaker.allow());
        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow());

        // a second failed trial doubles again
        breaker.record_failure();
        assert_eq!(breaker.snapshot().open_timeout, Duration::from_secs(40));
    }

    #[test]
    fn test_open_timeout_never_shrinks_below_configured() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .open_timeout(Duration::from_secs(30))
                .open_timeout_backoff(BackoffPolicy::constant(Duration::from_millis(1))),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(30));
        assert!(breaker.allow());
        breaker.record_failure();

        assert_eq!(breaker.snapshot().open_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_closing_resets_reopen_state() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(1)
                .open_timeout(Duration::from_secs(1)),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.snapshot().reopen_count, 1);

        clock.advance(Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_success();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.reopen_count, 0);
        assert_eq!(snapshot.open_timeout, Duration::from_secs(1));
        assert_eq!(snapshot.opened_at, None);
    }

    #[test]
    fn test_half_open_admits_limited_trials() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(2)
                .open_timeout(Duration::from_secs(1)),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        assert!(breaker.allow());
        assert!(!breaker.allow());

        breaker.record_success();
        // one success recorded, one trial still in flight
        assert!(!breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn test_zero_half_open_budget_admits_one_trial() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(0)
                .open_timeout(Duration::from_secs(1)),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        assert!(!breaker.allow());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());
    }

    #[test]
    fn test_late_closed_report_frees_half_open_slot() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(2)
                .open_timeout(Duration::from_secs(1))
                .fail_on_cancel(false),
        );

        // admitted while closed, reports only once the breaker is half-open
        assert!(breaker.allow());
        breaker.record_failure();
        clock.advance(Duration::from_secs(1));

        assert!(breaker.allow());
        assert!(breaker.allow());
        assert!(!breaker.allow());

        breaker.report(CallOutcome::cancelled(Duration::ZERO));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_default_config_lengthens_open_timeout_on_reopen() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let (breaker, clock) = manual_breaker(CircuitBreakerBuilder::new().config(config));

        breaker.record_failure();
        let first = breaker.snapshot().open_timeout;
        assert_eq!(first, Duration::from_secs(20));

        clock.advance(first);
        assert!(breaker.allow());
        breaker.record_failure();
        let second = breaker.snapshot().open_timeout;
        assert!(second > first);
        assert_eq!(second, Duration::from_secs(40));

        clock.advance(second);
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.snapshot().open_timeout, Duration::from_secs(80));
    }

    #[test]
    fn test_failure_window_resets_on_fixed_grid() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(3)
                .counter_reset_interval(Duration::from_secs(60)),
        );

        clock.advance(Duration::from_secs(50));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().failure_count, 2);

        // crossing the 60s boundary clears the counters
        clock.advance(Duration::from_secs(15));
        assert_eq!(breaker.snapshot().failure_count, 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // the next boundary is at 120s, not 65s + 60s
        clock.advance(Duration::from_secs(56));
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[test]
    fn test_zero_window_never_resets() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(3)
                .counter_reset_interval(Duration::ZERO),
        );

        breaker.record_failure();
        breaker.record_failure();
        clock.advance(Duration::from_secs(3600));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_cancellations_excluded_when_configured() {
        let (breaker, _clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .fail_on_cancel(false)
                .fail_on_deadline(false),
        );

        breaker.report(CallOutcome::cancelled(Duration::from_millis(5)));
        breaker.report(CallOutcome::deadline_exceeded(Duration::from_millis(5)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_ignored, 2);

        breaker.report(CallOutcome::failure(Duration::from_millis(5)));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_cancellations_count_by_default() {
        let (breaker, _clock) =
            manual_breaker(CircuitBreakerBuilder::new().failure_threshold(2));

        breaker.report(CallOutcome::cancelled(Duration::ZERO));
        breaker.report(CallOutcome::deadline_exceeded(Duration::ZERO));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_ignored_outcome_releases_trial_slot() {
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(1)
                .open_timeout(Duration::from_secs(1))
                .fail_on_cancel(false),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow());
        assert!(!breaker.allow());

        breaker.report(CallOutcome::cancelled(Duration::ZERO));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow());
    }

    #[test]
    fn test_observer_sees_every_transition() {
        let (observer, seen) = recording_observer();
        let (breaker, clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .half_open_max_successes(1)
                .open_timeout(Duration::from_secs(1))
                .on_state_change(observer),
        );

        breaker.record_failure();
        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow());
        breaker.record_success();

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_circuit_breaker_metrics() {
        let breaker = CircuitBreaker::with_defaults();

        breaker.record_success();
        breaker.record_success();
        breaker.report(CallOutcome::failure(Duration::from_millis(42)));

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.total_successes, 2);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.last_latency, Some(Duration::from_millis(42)));
        assert!(metrics.last_failure_time.is_some());
    }

    #[test]
    fn test_reset() {
        let (observer, seen) = recording_observer();
        let (breaker, _clock) = manual_breaker(
            CircuitBreakerBuilder::new()
                .failure_threshold(1)
                .on_state_change(observer),
        );

        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_failures, 0);
        assert_eq!(seen.lock().last(), Some(&(CircuitState::Open, CircuitState::Closed)));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 5, "open_timeout": "30s"}"#).unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_timeout, Duration::from_secs(30));
        assert_eq!(config.half_open_max_successes, 10);
        assert!(config.fail_on_cancel);
    }
}
