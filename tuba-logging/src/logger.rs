//! `StructuredLogger` backed by `tracing` events

use tuba_interfaces::{LogEvent, LogLevel, StructuredLogger};

/// Forwards [`LogEvent`]s to the installed `tracing` subscriber
///
/// The message becomes the event message; source, correlation id, span id
/// and the JSON context are attached as fields.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    min_level: LogLevel,
}

impl TracingLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

macro_rules! forward {
    ($macro:ident, $event:expr, $fields:expr) => {
        tracing::$macro!(
            target: "tuba",
            source = $event.source.as_deref().unwrap_or("-"),
            correlation_id = $event.correlation_id.as_deref().unwrap_or("-"),
            span_id = $event.span_id.unwrap_or(0),
            fields = %$fields,
            "{}",
            $event.message
        )
    };
}

impl StructuredLogger for TracingLogger {
    fn log(&self, event: LogEvent) {
        if !self.should_log(event.level) {
            return;
        }

        let fields = if event.context.is_null() {
            String::new()
        } else {
            event.context.to_string()
        };

        match event.level {
            LogLevel::Trace => forward!(trace, event, fields),
            LogLevel::Debug => forward!(debug, event, fields),
            LogLevel::Info => forward!(info, event, fields),
            LogLevel::Warn => forward!(warn, event, fields),
            LogLevel::Error => forward!(error, event, fields),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level.should_log(self.min_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_level_filtering() {
        let logger = TracingLogger::new(LogLevel::Warn);
        assert!(logger.should_log(LogLevel::Error));
        assert!(logger.should_log(LogLevel::Warn));
        assert!(!logger.should_log(LogLevel::Info));
        assert_eq!(TracingLogger::default().min_level(), LogLevel::Info);
    }
}
