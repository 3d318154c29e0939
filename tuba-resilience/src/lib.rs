//! Resilience patterns for Tuba
//!
//! This crate provides backoff policies, a blocking retry executor, a
//! circuit breaker and the [`ResilientClient`] that combines them around a
//! [`tuba_interfaces::Transport`].

pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use circuit_breaker::{
    BreakerSnapshot, CallOutcome, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig,
    CircuitMetrics, CircuitState, StateChangeObserver,
};
pub use client::{OpenStateHook, ResilientClient, ResilientClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CallError;
pub use retry::{Interrupt, Retrier, RetryError, Retryable};
