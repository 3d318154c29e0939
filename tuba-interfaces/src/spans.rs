//! Trace span sink and the telemetry bundle handed to clients

use crate::logging::{NoopLogger, StructuredLogger};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Identifier of a span opened on a [`SpanSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// How a span finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    /// The traced operation succeeded
    Ok,
    /// The traced operation failed with the given description
    Error(String),
}

/// Receives span start/end events
///
/// Used for diagnostics only; nothing in the call path depends on what the
/// sink does with the events.
pub trait SpanSink: Send + Sync {
    /// Open a span named `name` carrying `fields`
    fn start_span(&self, name: &'static str, fields: JsonValue) -> SpanId;

    /// Close a span previously returned by [`SpanSink::start_span`]
    fn end_span(&self, span: SpanId, status: SpanStatus);
}

/// Span sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSpanSink;

impl SpanSink for NoopSpanSink {
    fn start_span(&self, _name: &'static str, _fields: JsonValue) -> SpanId {
        SpanId(0)
    }

    fn end_span(&self, _span: SpanId, _status: SpanStatus) {}
}

/// Logger and span sink injected into a client
///
/// The default is fully no-op, so a client built without telemetry emits
/// nothing.
#[derive(Clone)]
pub struct Telemetry {
    logger: Arc<dyn StructuredLogger>,
    spans: Arc<dyn SpanSink>,
}

impl Telemetry {
    /// Bundle a logger and a span sink
    pub fn new(logger: Arc<dyn StructuredLogger>, spans: Arc<dyn SpanSink>) -> Self {
        Self { logger, spans }
    }

    /// No-op telemetry
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLogger), Arc::new(NoopSpanSink))
    }

    /// Replace the logger
    pub fn with_logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the span sink
    pub fn with_spans(mut self, spans: Arc<dyn SpanSink>) -> Self {
        self.spans = spans;
        self
    }

    /// The structured logger
    pub fn logger(&self) -> &dyn StructuredLogger {
        self.logger.as_ref()
    }

    /// The span sink
    pub fn spans(&self) -> &dyn SpanSink {
        self.spans.as_ref()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogEvent, LogLevel};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StructuredLogger for Recorder {
        fn log(&self, event: LogEvent) {
            self.events.lock().push(event.message);
        }
    }

    impl SpanSink for Recorder {
        fn start_span(&self, name: &'static str, _fields: JsonValue) -> SpanId {
            let mut events = self.events.lock();
            events.push(format!("start {name}"));
            SpanId(events.len() as u64)
        }

        fn end_span(&self, span: SpanId, status: SpanStatus) {
            self.events.lock().push(format!("end {} {:?}", span.0, status));
        }
    }

    #[test]
    fn test_telemetry_routes_to_injected_sinks() {
        let recorder = Arc::new(Recorder::default());
        let telemetry = Telemetry::noop()
            .with_logger(recorder.clone())
            .with_spans(recorder.clone());

        let span = telemetry.spans().start_span("call", JsonValue::Null);
        telemetry.logger().log(LogEvent::new(LogLevel::Info, "inside"));
        telemetry.spans().end_span(span, SpanStatus::Ok);

        let events = recorder.events.lock();
        assert_eq!(*events, vec!["start call", "inside", "end 1 Ok"]);
    }

    #[test]
    fn test_noop_span_sink() {
        let sink = NoopSpanSink;
        let span = sink.start_span("ignored", JsonValue::Null);
        assert_eq!(span, SpanId(0));
        sink.end_span(span, SpanStatus::Error("ignored".into()));
    }
}
