//! # Tuba Interfaces
//!
//! Contracts between the resilient call layer and the collaborators it
//! borrows: the transport that actually performs a request, and the
//! observability sinks that receive diagnostics.
//!
//! ## Main Interfaces
//!
//! - [`Transport`] - executes one request within a [`CallContext`]
//! - [`CallContext`] / [`CancellationToken`] - deadline and cancellation propagation
//! - [`StructuredLogger`] - structured log events
//! - [`SpanSink`] - span start/end events
//! - [`Telemetry`] - the pair of sinks injected into clients, no-op by default

pub mod context;
pub mod logging;
pub mod spans;
pub mod transport;

// Re-export commonly used types
pub use context::{CallContext, CancellationToken};
pub use logging::{LogEvent, LogLevel, NoopLogger, StructuredLogger};
pub use spans::{NoopSpanSink, SpanId, SpanSink, SpanStatus, Telemetry};
pub use transport::{Transport, TransportError};
