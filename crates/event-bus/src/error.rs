use thiserror::Error;

use crate::event::{Event, EventType};

/// Errors raised by the bus or reported by handlers.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Event payload did not have the shape its consumer expected
    #[error("{event_type} event carried a {found} payload, expected {expected}")]
    PayloadMismatch {
        event_type: EventType,
        expected: &'static str,
        found: &'static str,
    },

    /// Handler reported a failure from downstream code
    #[error("handler failed: {0}")]
    Upstream(String),

    /// Handler panicked while processing an event
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// Dispatch worker thread could not be spawned
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(String),
}

impl EventBusError {
    pub fn payload_mismatch(event: &Event, expected: &'static str) -> Self {
        EventBusError::PayloadMismatch {
            event_type: event.event_type(),
            expected,
            found: event.payload().kind(),
        }
    }
}

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<(), EventBusError>;
