//! Logging interface definitions
//!
//! Provides structured logging interfaces that can be implemented
//! by different logging backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Log level enumeration
///
/// Defines the severity levels for log messages, following standard
/// logging conventions from most verbose (Trace) to least verbose (Error).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed tracing information for debugging
    Trace,
    /// Debug information useful during development
    Debug,
    /// Informational messages about normal operation
    Info,
    /// Warning messages about potential issues
    Warn,
    /// Error messages about failures
    Error,
}

impl LogLevel {
    /// Convert log level to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Check if this level should be logged given a minimum level
    pub fn should_log(&self, min_level: LogLevel) -> bool {
        self >= &min_level
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured log event
///
/// Represents a single log entry with structured metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Log level/severity
    pub level: LogLevel,
    /// Primary log message
    pub message: String,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Source component that generated the log
    pub source: Option<String>,
    /// Structured fields attached to the event
    pub context: JsonValue,
    /// Correlation ID shared by every event of one logical call
    pub correlation_id: Option<String>,
    /// Span the event was emitted in
    pub span_id: Option<u64>,
}

impl LogEvent {
    /// Create a new log event with minimal information
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            source: None,
            context: JsonValue::Null,
            correlation_id: None,
            span_id: None,
        }
    }

    /// Set the source component
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set correlation ID for request tracing
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the enclosing span
    pub fn with_span_id(mut self, span_id: u64) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Add a single key-value pair to the context
    pub fn with_field(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        if self.context.is_null() {
            self.context = JsonValue::Object(serde_json::Map::new());
        }

        if let JsonValue::Object(ref mut map) = self.context {
            map.insert(key.to_string(), value.into());
        }

        self
    }

    /// Look up a context field
    pub fn field(&self, key: &str) -> Option<&JsonValue> {
        self.context.get(key)
    }
}

/// Structured logger trait
///
/// Defines the interface for structured logging backends.
/// Implementations must not block for long: they are called inline on the
/// request path.
pub trait StructuredLogger: Send + Sync {
    /// Log a structured event
    fn log(&self, event: LogEvent);

    /// Check if a log level should be logged
    fn should_log(&self, _level: LogLevel) -> bool {
        true
    }
}

/// Logger that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl StructuredLogger for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn should_log(&self, _level: LogLevel) -> bool {
        false
    }
}
