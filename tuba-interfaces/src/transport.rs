//! Transport contract
//!
//! The transport owns connections, pooling and wire encoding. The resilient
//! call layer only borrows it for one request at a time.

use crate::context::CallContext;
use std::sync::Arc;

/// Executes one request against a downstream target
///
/// Implementations must stop work and return [`TransportError::Cancelled`]
/// or [`TransportError::DeadlineExceeded`] once `ctx` is cancelled or its
/// deadline passes.
pub trait Transport: Send + Sync {
    /// Request type accepted by the transport
    type Request;
    /// Response type produced on success
    type Response;

    /// Send `request`, honouring the deadline and cancellation of `ctx`
    fn send(
        &self,
        request: &Self::Request,
        ctx: &CallContext,
    ) -> Result<Self::Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    type Request = T::Request;
    type Response = T::Response;

    fn send(
        &self,
        request: &Self::Request,
        ctx: &CallContext,
    ) -> Result<Self::Response, TransportError> {
        (**self).send(request, ctx)
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    type Request = T::Request;
    type Response = T::Response;

    fn send(
        &self,
        request: &Self::Request,
        ctx: &CallContext,
    ) -> Result<Self::Response, TransportError> {
        (**self).send(request, ctx)
    }
}

/// Failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Dial or connection-level failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The downstream answered with an error status
    #[error("Status {code}: {message}")]
    Status { code: u16, message: String },

    /// The call did not finish before its deadline
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the call
    #[error("Call cancelled")]
    Cancelled,
}

impl TransportError {
    /// Shorthand for a connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Shorthand for an error status
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }
}
