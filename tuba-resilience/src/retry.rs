//! Blocking retry executor

use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tuba_interfaces::CallContext;

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;
}

/// Why a retry loop stopped before its budget ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The caller cancelled the context
    Cancelled,
    /// The caller's deadline leaves no room for another attempt
    DeadlineExceeded,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Cancelled => f.write_str("cancelled"),
            Interrupt::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed
    #[error("Retries exhausted after {attempts} attempts in {elapsed:?}. Last error: {last_error}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: E,
    },

    /// An attempt failed with an error that must not be retried
    #[error("Non-retryable error after {attempts} attempts: {error}")]
    Aborted { attempts: u32, error: E },

    /// The caller's context ended the loop while waiting to retry
    #[error("Retry interrupted ({interrupt}) after {attempts} attempts. Last error: {last_error}")]
    Interrupted {
        attempts: u32,
        interrupt: Interrupt,
        last_error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Aborted { attempts, .. }
            | RetryError::Interrupted { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted { error, .. } => error,
            RetryError::Interrupted { last_error, .. } => last_error,
        }
    }
}

/// Runs work repeatedly, sleeping between failed attempts
///
/// A retrier built with [`Retrier::null`] never retries: the work runs once
/// and its error is reported as exhausted.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: Option<BackoffPolicy>,
    clock: Arc<dyn Clock>,
}

impl Retrier {
    /// Retrier sleeping according to `policy`
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy: Some(policy),
            clock: Arc::new(SystemClock),
        }
    }

    /// Retrier that never retries
    pub fn null() -> Self {
        Self {
            policy: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether this retrier never retries
    pub fn is_null(&self) -> bool {
        self.policy.is_none()
    }

    /// Backoff policy, absent for the null retrier
    pub fn policy(&self) -> Option<&BackoffPolicy> {
        self.policy.as_ref()
    }

    /// Wait applied after failed attempt number `attempt` (0-based)
    pub fn next_interval(&self, attempt: u32) -> Duration {
        self.policy
            .map(|policy| policy.next(attempt))
            .unwrap_or(Duration::ZERO)
    }

    /// Run `f` up to `max_retries + 1` times, retrying every error.
    pub fn execute<F, T, E>(&self, max_retries: u32, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Display,
    {
        self.run(max_retries, &CallContext::background(), |_| f(), |_| true)
    }

    /// Run `f` with the 0-based attempt number, retrying only
    /// [`Retryable`] errors and stopping as soon as `ctx` is cancelled or
    /// its deadline cannot accommodate the next wait.
    pub fn execute_with_context<F, T, E>(
        &self,
        max_retries: u32,
        ctx: &CallContext,
        f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Retryable + fmt::Display,
    {
        self.run(max_retries, ctx, f, |error: &E| error.is_retryable())
    }

    fn run<F, P, T, E>(
        &self,
        max_retries: u32,
        ctx: &CallContext,
        mut f: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let budget = if self.is_null() { 0 } else { max_retries };
        let started = self.clock.now();
        let mut attempt = 0u32;

        loop {
            debug!("Executing attempt {} of {}", attempt + 1, budget.saturating_add(1));

            match f(attempt) {
                Ok(result) => {
                    if attempt > 0 {
                        info!("Operation succeeded after {} attempts", attempt + 1);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    let attempts = attempt + 1;

                    if !should_retry(&error) {
                        debug!("Operation failed with non-retryable error: {}", error);
                        return Err(RetryError::Aborted { attempts, error });
                    }

                    if attempt >= budget {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                        return Err(RetryError::Exhausted {
                            attempts,
                            elapsed: self.clock.now().saturating_duration_since(started),
                            last_error: error,
                        });
                    }

                    let delay = self.next_interval(attempt);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempts, error, delay
                    );

                    if let Err(interrupt) = self.pause(delay, ctx) {
                        warn!("Retry loop stopped: {}", interrupt);
                        return Err(RetryError::Interrupted {
                            attempts,
                            interrupt,
                            last_error: error,
                        });
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Wait out `delay` within the bounds of `ctx`
    fn pause(&self, delay: Duration, ctx: &CallContext) -> Result<(), Interrupt> {
        if ctx.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        if let Some(remaining) = ctx.remaining(self.clock.now()) {
            if remaining <= delay {
                return Err(Interrupt::DeadlineExceeded);
            }
        }

        if delay.is_zero() || self.clock.sleep(delay, ctx.cancellation()) {
            Ok(())
        } else {
            Err(Interrupt::Cancelled)
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
