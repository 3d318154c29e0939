//! Structured logging infrastructure for Tuba
//!
//! This crate connects the observability contracts of `tuba-interfaces` to
//! `tracing`:
//! - [`TracingLogger`] forwards structured log events
//! - [`TracingSpanSink`] opens and closes `tracing` spans
//! - [`init_simple_tracing`] and [`init_logging_from_config`] install a
//!   `tracing-subscriber` formatter

pub mod init;
pub mod logger;
pub mod spans;

// Re-export main types for convenience
pub use init::{init_logging_from_config, init_simple_tracing};
pub use logger::TracingLogger;
pub use spans::TracingSpanSink;

use std::sync::Arc;
use tuba_interfaces::{LogLevel, Telemetry};

/// Telemetry that routes events and spans through `tracing`
pub fn tracing_telemetry(min_level: LogLevel) -> Telemetry {
    Telemetry::new(
        Arc::new(TracingLogger::new(min_level)),
        Arc::new(TracingSpanSink::new()),
    )
}
