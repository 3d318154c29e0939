//! Resilient client: retry, circuit breaking and per-attempt deadlines
//! around a [`Transport`]

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tuba_config::validation::Validatable;
use tuba_config::{ClientConfig, ConfigResult};
use tuba_interfaces::{
    CallContext, LogEvent, LogLevel, SpanId, SpanStatus, Telemetry, Transport,
};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, CircuitState,
    StateChangeObserver,
};
use crate::clock::{Clock, SystemClock};
use crate::error::CallError;
use crate::retry::{Interrupt, Retrier, RetryError, Retryable};

const LOG_SOURCE: &str = "tuba-resilience";

/// Callback run with the rejected request whenever the breaker refuses a call
pub type OpenStateHook<R> = Arc<dyn Fn(&R) + Send + Sync>;

/// Wraps a transport with retries and a circuit breaker
///
/// One client guards one target. It is safe to share between threads; every
/// call observes the same breaker.
pub struct ResilientClient<T: Transport> {
    target: String,
    transport: T,
    breaker: CircuitBreaker,
    retrier: Retrier,
    max_retry_attempts: u32,
    per_call_timeout: Duration,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
    open_state_hook: Option<OpenStateHook<T::Request>>,
}

impl<T: Transport> ResilientClient<T> {
    /// Start building a client around `transport`
    pub fn builder(transport: T) -> ResilientClientBuilder<T> {
        ResilientClientBuilder::new(transport)
    }

    /// Client configured from validated settings, with no telemetry
    pub fn from_config(transport: T, config: &ClientConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::builder(transport).config(config).build())
    }

    /// Name of the guarded target
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The breaker guarding the target
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The retrier driving attempts
    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute `request` with the configured per-call timeout
    pub fn execute(&self, ctx: &CallContext, request: &T::Request) -> Result<T::Response, CallError> {
        self.execute_with_timeout(ctx, request, self.per_call_timeout)
    }

    /// Execute `request`, bounding every dispatched attempt by `per_call_timeout`.
    ///
    /// Each attempt gets a deadline of `min(caller deadline, now + per_call_timeout)`.
    /// Breaker rejections, client errors and cancellation end the call
    /// immediately; other failures are retried until the budget runs out.
    pub fn execute_with_timeout(
        &self,
        ctx: &CallContext,
        request: &T::Request,
        per_call_timeout: Duration,
    ) -> Result<T::Response, CallError> {
        let call_id = Uuid::new_v4().to_string();
        let span = self.telemetry.spans().start_span(
            "resilient_call",
            json!({
                "target": self.target,
                "call_id": call_id,
                "max_retry_attempts": self.max_retry_attempts,
                "per_call_timeout_ms": per_call_timeout.as_millis() as u64,
            }),
        );

        let result = self
            .retrier
            .execute_with_context(self.max_retry_attempts, ctx, |attempt| {
                self.attempt(ctx, request, per_call_timeout, attempt, &call_id, span)
            })
            .map_err(|error| match error {
                RetryError::Exhausted {
                    attempts,
                    elapsed,
                    last_error,
                } => CallError::RetriesExhausted {
                    attempts,
                    elapsed,
                    source: Box::new(last_error),
                },
                RetryError::Aborted { error, .. } => error,
                RetryError::Interrupted {
                    interrupt: Interrupt::Cancelled,
                    ..
                } => CallError::Cancelled,
                RetryError::Interrupted {
                    interrupt: Interrupt::DeadlineExceeded,
                    ..
                } => CallError::Timeout,
            });

        match &result {
            Ok(_) => self.telemetry.spans().end_span(span, SpanStatus::Ok),
            Err(error) => {
                self.emit(
                    LogLevel::Error,
                    format!("call to '{}' failed: {}", self.target, error),
                    &call_id,
                    span,
                    |event| event.with_field("error", error.to_string()),
                );
                self.telemetry
                    .spans()
                    .end_span(span, SpanStatus::Error(error.to_string()));
            }
        }

        result
    }

    /// One guarded dispatch
    fn attempt(
        &self,
        ctx: &CallContext,
        request: &T::Request,
        per_call_timeout: Duration,
        attempt: u32,
        call_id: &str,
        span: SpanId,
    ) -> Result<T::Response, CallError> {
        if ctx.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let started = self.clock.now();
        if ctx.is_expired(started) {
            return Err(CallError::Timeout);
        }

        if !self.breaker.allow() {
            if let Some(hook) = &self.open_state_hook {
                hook(request);
            }
            self.emit(
                LogLevel::Info,
                format!("circuit breaker for '{}' is open, rejecting call", self.target),
                call_id,
                span,
                |event| event.with_field("attempt", attempt),
            );
            return Err(CallError::BreakerOpen);
        }

        let attempt_ctx = ctx.shrink(started, per_call_timeout);
        let result = self
            .transport
            .send(request, &attempt_ctx)
            .map_err(CallError::from);
        let latency = self.clock.now().saturating_duration_since(started);

        self.breaker.report(match &result {
            Ok(_) => CallOutcome::success(latency),
            Err(error) => error.outcome(latency),
        });

        if let Err(error) = &result {
            let retryable = error.is_retryable();
            let budget_left = !self.retrier.is_null() && attempt < self.max_retry_attempts;
            self.emit(
                LogLevel::Warn,
                format!(
                    "attempt {} to '{}' failed: {}",
                    attempt + 1,
                    self.target,
                    error
                ),
                call_id,
                span,
                |event| {
                    let event = event
                        .with_field("attempt", attempt)
                        .with_field("error", error.to_string())
                        .with_field("retryable", retryable)
                        .with_field("latency_ms", latency.as_millis() as u64);
                    if retryable && budget_left {
                        let delay = self.retrier.next_interval(attempt);
                        event.with_field("next_delay_ms", delay.as_millis() as u64)
                    } else {
                        event
                    }
                },
            );
        }

        result
    }

    fn emit<F>(&self, level: LogLevel, message: String, call_id: &str, span: SpanId, fields: F)
    where
        F: FnOnce(LogEvent) -> LogEvent,
    {
        let logger = self.telemetry.logger();
        if !logger.should_log(level) {
            return;
        }

        let event = LogEvent::new(level, message)
            .with_source(LOG_SOURCE)
            .with_correlation_id(call_id)
            .with_span_id(span.0)
            .with_field("target", self.target.as_str());
        logger.log(fields(event));
    }
}

impl<T: Transport> fmt::Debug for ResilientClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("target", &self.target)
            .field("breaker", &self.breaker)
            .field("retrier", &self.retrier)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("per_call_timeout", &self.per_call_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResilientClient`]
pub struct ResilientClientBuilder<T: Transport> {
    transport: T,
    target: String,
    backoff: BackoffPolicy,
    retries_disabled: bool,
    max_retry_attempts: u32,
    per_call_timeout: Duration,
    breaker_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
    open_state_hook: Option<OpenStateHook<T::Request>>,
    state_observer: Option<StateChangeObserver>,
}

impl<T: Transport> ResilientClientBuilder<T> {
    /// Builder with the same defaults as [`ClientConfig::default`]
    pub fn new(transport: T) -> Self {
        let defaults = ClientConfig::default();
        Self {
            transport,
            target: "default".to_string(),
            backoff: BackoffPolicy::from(&defaults.backoff),
            retries_disabled: false,
            max_retry_attempts: defaults.max_retry_attempts,
            per_call_timeout: defaults.per_call_timeout,
            breaker_config: CircuitBreakerConfig::from(&defaults.breaker),
            clock: Arc::new(SystemClock),
            telemetry: Telemetry::noop(),
            open_state_hook: None,
            state_observer: None,
        }
    }

    /// Apply every setting from `config`
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.backoff = BackoffPolicy::from(&config.backoff);
        self.max_retry_attempts = config.max_retry_attempts;
        self.per_call_timeout = config.per_call_timeout;
        self.breaker_config = CircuitBreakerConfig::from(&config.breaker);
        self
    }

    /// Name of the guarded target, used in logs and spans
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Backoff between retries
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retries after the initial attempt
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Never retry, regardless of the retry budget
    pub fn disable_retries(mut self) -> Self {
        self.retries_disabled = true;
        self
    }

    /// Default deadline for each dispatched attempt
    pub fn per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    /// Circuit breaker settings
    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Time source shared by the retrier and the breaker
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Logger and span sink for diagnostics
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run `hook` with each request the open breaker rejects
    pub fn on_open_state(mut self, hook: OpenStateHook<T::Request>) -> Self {
        self.open_state_hook = Some(hook);
        self
    }

    /// Run `observer` on every breaker state change
    pub fn on_state_change(mut self, observer: StateChangeObserver) -> Self {
        self.state_observer = Some(observer);
        self
    }

    /// Build the client
    pub fn build(self) -> ResilientClient<T> {
        let retrier = if self.retries_disabled || self.max_retry_attempts == 0 {
            Retrier::null()
        } else {
            Retrier::new(self.backoff)
        }
        .with_clock(self.clock.clone());

        let observer = transition_logger(
            self.target.clone(),
            self.telemetry.clone(),
            self.state_observer,
        );
        let breaker = CircuitBreakerBuilder::new()
            .name(self.target.clone())
            .config(self.breaker_config)
            .clock(self.clock.clone())
            .on_state_change(observer)
            .build();

        ResilientClient {
            target: self.target,
            transport: self.transport,
            breaker,
            retrier,
            max_retry_attempts: self.max_retry_attempts,
            per_call_timeout: self.per_call_timeout,
            clock: self.clock,
            telemetry: self.telemetry,
            open_state_hook: self.open_state_hook,
        }
    }
}

/// Observer that reports breaker transitions through telemetry before
/// delegating to the caller's observer
fn transition_logger(
    target: String,
    telemetry: Telemetry,
    next: Option<StateChangeObserver>,
) -> StateChangeObserver {
    Arc::new(move |from: CircuitState, to: CircuitState| {
        let level = if to == CircuitState::Open {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };

        let logger = telemetry.logger();
        if logger.should_log(level) {
            logger.log(
                LogEvent::new(
                    level,
                    format!("circuit breaker for '{}' changed from {} to {}", target, from, to),
                )
                .with_source(LOG_SOURCE)
                .with_field("target", target.as_str())
                .with_field("from", from.to_string())
                .with_field("to", to.to_string()),
            );
        }

        if let Some(next) = &next {
            next(from, to);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tuba_interfaces::TransportError;

    /// Transport replaying scripted results
    struct Scripted {
        results: Mutex<Vec<Result<&'static str, TransportError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<&'static str, TransportError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for Scripted {
        type Request = String;
        type Response = &'static str;

        fn send(&self, _request: &String, _ctx: &CallContext) -> Result<&'static str, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .pop()
                .unwrap_or(Err(TransportError::connection("script exhausted")))
        }
    }

    fn client(
        transport: Arc<Scripted>,
        retries: u32,
    ) -> (ResilientClient<Arc<Scripted>>, ManualClock) {
        let clock = ManualClock::new();
        let client = ResilientClient::builder(transport)
            .target("inventory")
            .backoff(BackoffPolicy::constant(Duration::from_millis(50)))
            .max_retry_attempts(retries)
            .clock(Arc::new(clock.clone()))
            .build();
        (client, clock)
    }

    #[test]
    fn test_success_first_try() {
        let transport = Arc::new(Scripted::new(vec![Ok("stock: 4")]));
        let (client, clock) = client(transport.clone(), 2);

        let response = client
            .execute(&CallContext::background(), &"sku-1".to_string())
            .unwrap();

        assert_eq!(response, "stock: 4");
        assert_eq!(transport.calls(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_zero_budget_wraps_single_failure() {
        let transport = Arc::new(Scripted::new(vec![Err(TransportError::status(503, "busy"))]));
        let (client, _clock) = client(transport.clone(), 0);
        assert!(client.retrier().is_null());

        let error = client
            .execute(&CallContext::background(), &"sku-1".to_string())
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            error,
            CallError::RetriesExhausted { attempts: 1, .. }
        ));
    }

    #[test]
    fn test_client_error_not_counted_against_breaker() {
        let transport = Arc::new(Scripted::new(vec![Err(TransportError::status(404, "no sku"))]));
        let (client, _clock) = client(transport.clone(), 3);

        let error = client
            .execute(&CallContext::background(), &"sku-9".to_string())
            .unwrap_err();

        assert!(matches!(error, CallError::Client { code: 404, .. }));
        assert_eq!(client.breaker().snapshot().failure_count, 0);
        assert_eq!(client.breaker().metrics().total_successes, 1);
    }

    #[test]
    fn test_disable_retries() {
        let transport = Arc::new(Scripted::new(vec![
            Err(TransportError::connection("reset")),
            Ok("late"),
        ]));
        let clock = ManualClock::new();
        let client = ResilientClient::builder(transport.clone())
            .max_retry_attempts(5)
            .disable_retries()
            .clock(Arc::new(clock))
            .build();

        let error = client
            .execute(&CallContext::background(), &"sku-1".to_string())
            .unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            error.root_cause(),
            CallError::Transport(message) if message == "reset"
        ));
    }
}
