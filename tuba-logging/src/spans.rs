//! `SpanSink` backed by `tracing` spans

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::field::Empty;
use tuba_interfaces::{SpanId, SpanSink, SpanStatus};

/// Opens an info-level `tracing` span per [`SpanSink::start_span`] call and
/// closes it when the span is ended
#[derive(Debug)]
pub struct TracingSpanSink {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, tracing::Span>>,
}

impl TracingSpanSink {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Number of spans started but not yet ended
    pub fn open_spans(&self) -> usize {
        self.open.lock().len()
    }
}

impl Default for TracingSpanSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanSink for TracingSpanSink {
    fn start_span(&self, name: &'static str, fields: JsonValue) -> SpanId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!(
            target: "tuba",
            "tuba_span",
            operation = name,
            span_id = id,
            fields = %fields,
            status = Empty,
        );
        self.open.lock().insert(id, span);
        SpanId(id)
    }

    fn end_span(&self, span: SpanId, status: SpanStatus) {
        let Some(span) = self.open.lock().remove(&span.0) else {
            return;
        };

        match status {
            SpanStatus::Ok => {
                span.record("status", "ok");
            }
            SpanStatus::Error(message) => {
                span.record("status", "error");
                span.in_scope(|| tracing::debug!(target: "tuba", error = %message, "span failed"));
            }
        }
    }
}
