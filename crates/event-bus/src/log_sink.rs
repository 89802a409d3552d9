//! Logging and notification over the bus.
//!
//! Components publish [`LogData`] records as `log`/`error` events through a
//! [`LogPublisher`]; [`TracingLogSink`] is an ordinary subscriber that writes
//! them to `tracing`, and [`NotificationRelay`] forwards the important ones to
//! an outbound [`NotificationSink`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scan_trader_core::{LogData, LogLevel};
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{EventBusError, HandlerResult};
use crate::event::{Event, EventType, SharedEvent};
use crate::registry::{EventHandler, HandlerId};

/// Emits log records onto the bus on behalf of one component.
#[derive(Clone)]
pub struct LogPublisher {
    engine: Arc<Engine>,
    source: String,
}

impl fmt::Debug for LogPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPublisher")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl LogPublisher {
    pub fn new(engine: Arc<Engine>, source: impl Into<String>) -> Self {
        Self {
            engine,
            source: source.into(),
        }
    }

    /// Same bus, different source tag
    pub fn scoped(&self, source: impl Into<String>) -> Self {
        Self::new(Arc::clone(&self.engine), source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Error records travel as `error` events, the rest as `log` events.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        let record = LogData::new(level, self.source.clone(), message);
        let event = match level {
            LogLevel::Error => Event::error(record),
            _ => Event::log(record),
        };
        self.engine.publish(event)
    }

    pub fn debug(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.log(LogLevel::Error, message)
    }
}

/// Writes bus log records through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl TracingLogSink {
    /// Subscribes the sink to both `log` and `error` events.
    pub fn install(engine: &Engine) -> [HandlerId; 2] {
        [
            engine.register_handler(EventType::Log, TracingLogSink),
            engine.register_handler(EventType::Error, TracingLogSink),
        ]
    }
}

impl EventHandler for TracingLogSink {
    fn handle(&self, event: &SharedEvent) -> HandlerResult {
        let record = event
            .as_log()
            .ok_or_else(|| EventBusError::payload_mismatch(event, "log"))?;
        let source = record.source.as_str();
        match record.level {
            LogLevel::Debug => debug!(source, "{}", record.message),
            LogLevel::Info => info!(source, "{}", record.message),
            LogLevel::Warn => warn!(source, "{}", record.message),
            LogLevel::Error => error!(source, "{}", record.message),
        }
        Ok(())
    }
}

/// Outbound notification channel (chat bot, pager, e-mail).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: LogLevel, message: &str, timestamp: DateTime<Utc>) -> HandlerResult;
}

/// Forwards log records at or above `min_level` to a [`NotificationSink`].
pub struct NotificationRelay<S> {
    sink: S,
    min_level: LogLevel,
}

impl<S: NotificationSink> NotificationRelay<S> {
    pub fn new(sink: S, min_level: LogLevel) -> Self {
        Self { sink, min_level }
    }
}

impl<S> fmt::Debug for NotificationRelay<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRelay")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl<S: NotificationSink> EventHandler for NotificationRelay<S> {
    fn handle(&self, event: &SharedEvent) -> HandlerResult {
        let record = event
            .as_log()
            .ok_or_else(|| EventBusError::payload_mismatch(event, "log"))?;
        if record.level < self.min_level {
            return Ok(());
        }
        let message = format!("[{}] {}", record.source, record.message);
        self.sink.notify(record.level, &message, record.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<(LogLevel, String)>>,
    }

    impl NotificationSink for Arc<RecordingSink> {
        fn notify(&self, level: LogLevel, message: &str, _timestamp: DateTime<Utc>) -> HandlerResult {
            self.received.lock().push((level, message.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_relay_filters_by_level() {
        let sink = Arc::new(RecordingSink::default());
        let relay = NotificationRelay::new(Arc::clone(&sink), LogLevel::Warn);

        let info = Event::log(LogData::new(LogLevel::Info, "scanner", "scan complete")).into_shared();
        let warn = Event::log(LogData::new(LogLevel::Warn, "manager", "position veto")).into_shared();
        relay.handle(&info).unwrap();
        relay.handle(&warn).unwrap();

        let received = sink.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (LogLevel::Warn, "[manager] position veto".to_string()));
    }

    #[test]
    fn test_sinks_reject_non_log_payloads() {
        let event = Event::new(EventType::Log, EventPayload::Empty).into_shared();
        let err = TracingLogSink.handle(&event).unwrap_err();
        assert!(matches!(err, EventBusError::PayloadMismatch { expected: "log", .. }));
    }

    #[test]
    fn test_publisher_routes_errors_to_error_events() {
        let engine = Arc::new(Engine::default());
        let logger = LogPublisher::new(Arc::clone(&engine), "test");

        assert!(logger.info("hello"));
        assert!(logger.error("failure"));
        assert_eq!(engine.event_queue_size(), 2);
        assert_eq!(logger.scoped("other").source(), "other");
    }
}
