//! In-process event bus.
//!
//! Exchange adapters and other producers publish [`Event`]s from any thread;
//! a single dispatch worker owned by the [`Engine`] delivers each event, in
//! publish order, to the handlers registered for its [`EventType`].

pub mod engine;
pub mod error;
pub mod event;
pub mod log_sink;
pub mod registry;

pub use engine::{Engine, EngineConfig};
pub use error::{EventBusError, HandlerResult};
pub use event::{Event, EventPayload, EventType, SharedEvent};
pub use log_sink::{LogPublisher, NotificationRelay, NotificationSink, TracingLogSink};
pub use registry::{BoxedHandler, EventHandler, HandlerId, HandlerRegistry};
