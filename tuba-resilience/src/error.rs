//! Errors surfaced by the resilient client

use std::time::Duration;
use tuba_interfaces::TransportError;

use crate::circuit_breaker::CallOutcome;
use crate::retry::Retryable;

/// Error returned by [`crate::ResilientClient::execute`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The transport could not complete the exchange
    #[error("Transport error: {0}")]
    Transport(String),

    /// The attempt outlived its deadline
    #[error("Deadline exceeded")]
    Timeout,

    /// The remote side failed to process the request
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    /// The remote side rejected the request itself
    #[error("Client error {code}: {message}")]
    Client { code: u16, message: String },

    /// The circuit breaker refused to dispatch
    #[error("Circuit breaker is open")]
    BreakerOpen,

    /// The caller cancelled the call
    #[error("Call cancelled")]
    Cancelled,

    /// Every permitted attempt failed
    #[error("Retries exhausted after {attempts} attempts in {elapsed:?}: {source}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        source: Box<CallError>,
    },
}

impl CallError {
    /// The error of the final attempt, looking through `RetriesExhausted`
    pub fn root_cause(&self) -> &CallError {
        match self {
            CallError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this represents a circuit breaker rejection
    pub fn is_breaker_open(&self) -> bool {
        matches!(self.root_cause(), CallError::BreakerOpen)
    }

    /// How the breaker should count a dispatched attempt that ended this way
    pub(crate) fn outcome(&self, latency: Duration) -> CallOutcome {
        match self {
            // the target answered, so it is healthy even if the request was bad
            CallError::Client { .. } => CallOutcome::success(latency),
            CallError::Cancelled => CallOutcome::cancelled(latency),
            CallError::Timeout => CallOutcome::deadline_exceeded(latency),
            _ => CallOutcome::failure(latency),
        }
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::Transport(_) | CallError::Timeout | CallError::Server { .. }
        )
    }
}

impl From<TransportError> for CallError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Connection(message) => CallError::Transport(message),
            TransportError::Status { code, message } if (400..500).contains(&code) => {
                CallError::Client { code, message }
            }
            TransportError::Status { code, message } => CallError::Server { code, message },
            TransportError::DeadlineExceeded => CallError::Timeout,
            TransportError::Cancelled => CallError::Cancelled,
        }
    }
}
