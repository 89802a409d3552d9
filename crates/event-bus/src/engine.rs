//! Single-worker event engine.
//!
//! Producers on any thread call [`Engine::put_event`]; one dedicated dispatch
//! thread pops events in FIFO order and runs every handler registered for the
//! event's type, in registration order. The queue (a crossbeam channel) and
//! the handler registry are synchronised independently and neither is held
//! while handler code runs, so handlers may publish, register or unregister
//! freely.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{EventBusError, HandlerResult};
use crate::event::{Event, EventType, SharedEvent};
use crate::registry::{BoxedHandler, EventHandler, HandlerId, HandlerRegistry};

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name given to the dispatch thread
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_name: "event-dispatch".to_string(),
        }
    }
}

enum QueueItem {
    Event(SharedEvent),
    /// Sent by `stop` so a blocked worker re-checks the running flag
    Wake,
}

struct Shared {
    registry: HandlerRegistry,
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    running: AtomicBool,
    pending: AtomicUsize,
    processed: AtomicU64,
}

thread_local! {
    /// Address of the `Shared` whose worker runs on this thread, 0 elsewhere
    static DISPATCHING: Cell<usize> = Cell::new(0);
}

impl Shared {
    fn run(&self) {
        DISPATCHING.with(|current| current.set(self as *const Shared as usize));
        debug!("dispatch worker running");
        loop {
            match self.receiver.recv() {
                Ok(QueueItem::Event(event)) => self.dispatch(event),
                Ok(QueueItem::Wake) => {
                    if self.running.load(Ordering::SeqCst) {
                        continue;
                    }
                    self.drain();
                    break;
                }
                Err(_) => break,
            }
        }
        debug!("dispatch worker exited");
    }

    /// Dispatches the backlog present when shutdown was observed. Events
    /// published by handlers during the drain stay queued for the next start.
    fn drain(&self) {
        let backlog = self.pending.load(Ordering::SeqCst);
        if backlog > 0 {
            debug!(backlog, "draining queued events before shutdown");
        }
        let mut remaining = backlog;
        while remaining > 0 {
            match self.receiver.try_recv() {
                Ok(QueueItem::Event(event)) => {
                    self.dispatch(event);
                    remaining -= 1;
                }
                Ok(QueueItem::Wake) => {}
                Err(_) => break,
            }
        }
    }

    fn dispatch(&self, event: SharedEvent) {
        let depth = self.pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let event_type = event.event_type();

        for (handler_id, handler) in self.registry.snapshot(event_type) {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    counter!("event_bus.handler_failures", 1, "event_type" => event_type.as_str());
                    error!(%event_type, handler_id, error = %err, "event handler failed");
                }
                Err(payload) => {
                    counter!("event_bus.handler_failures", 1, "event_type" => event_type.as_str());
                    let err = EventBusError::HandlerPanic(panic_message(payload.as_ref()));
                    error!(%event_type, handler_id, error = %err, "event handler panicked");
                }
            }
        }

        self.processed.fetch_add(1, Ordering::SeqCst);
        counter!("event_bus.events_processed", 1, "event_type" => event_type.as_str());
        gauge!("event_bus.queue_depth", depth as f64);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// In-process publish/subscribe bus with a single dispatch thread.
///
/// Construct once and share as `Arc<Engine>`. Dropping the engine stops the
/// worker after it drains the queue.
pub struct Engine {
    config: EngineConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("worker_name", &self.config.worker_name)
            .field("running", &self.is_running())
            .field("queued", &self.event_queue_size())
            .field("processed", &self.processed_event_count())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            config,
            shared: Arc::new(Shared {
                registry: HandlerRegistry::new(),
                sender,
                receiver,
                running: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                processed: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the dispatch worker. A second call while running is a no-op,
    /// as is a call made from this engine's own dispatch thread.
    pub fn start(&self) -> Result<(), EventBusError> {
        if self.on_dispatch_thread() {
            if !self.is_running() {
                warn!("cannot restart the event engine from its own dispatch thread");
            }
            return Ok(());
        }

        let mut worker = self.worker.lock();
        if self.shared.running.load(Ordering::SeqCst) {
            info!("event engine already running");
            return Ok(());
        }

        // Left behind by a stop issued from the dispatch thread
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                error!("previous dispatch worker panicked");
            }
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || shared.run())
            .map_err(|err| {
                self.shared.running.store(false, Ordering::SeqCst);
                EventBusError::Spawn(err.to_string())
            })?;
        *worker = Some(handle);

        info!(worker = %self.config.worker_name, queued = self.event_queue_size(), "event engine started");
        Ok(())
    }

    /// Signals the worker, lets it drain the queued backlog and joins it.
    /// If the engine is not running this only reaps a worker left behind by
    /// a stop from its own dispatch thread.
    ///
    /// Called from a handler, this only signals: the dispatch thread cannot
    /// join itself, so the worker exits once the current event completes.
    pub fn stop(&self) {
        if self.on_dispatch_thread() {
            if self.shared.running.swap(false, Ordering::SeqCst) {
                // The channel's receiver lives in `shared`, so this cannot fail
                let _ = self.shared.sender.send(QueueItem::Wake);
                debug!("stop requested from the dispatch thread");
            }
            return;
        }

        // Held through the join: a racing `start` waits until this worker is gone
        let mut worker = self.worker.lock();
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        if was_running {
            let _ = self.shared.sender.send(QueueItem::Wake);
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("dispatch worker panicked");
            }
        }
        drop(worker);

        if was_running {
            info!(
                processed = self.processed_event_count(),
                queued = self.event_queue_size(),
                "event engine stopped"
            );
        }
    }

    fn on_dispatch_thread(&self) -> bool {
        let id = Arc::as_ptr(&self.shared) as usize;
        DISPATCHING.with(|current| current.get() == id)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Registers a handler for one event type and returns its id.
    pub fn register_handler<H>(&self, event_type: EventType, handler: H) -> HandlerId
    where
        H: EventHandler + 'static,
    {
        self.register_shared(event_type, Arc::new(handler))
    }

    /// Closure form of [`Engine::register_handler`].
    pub fn register_fn<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&SharedEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_shared(event_type, Arc::new(handler))
    }

    /// Registers an already shared handler, e.g. one value subscribed to
    /// several event types.
    pub fn register_shared(&self, event_type: EventType, handler: BoxedHandler) -> HandlerId {
        let id = self.shared.registry.register(event_type, handler);
        debug!(%event_type, handler_id = id, "handler registered");
        id
    }

    /// Removes a handler; unknown ids are ignored. A call already in progress
    /// on the dispatch thread completes.
    pub fn unregister_handler(&self, event_type: EventType, handler_id: HandlerId) {
        if self.shared.registry.unregister(event_type, handler_id) {
            debug!(%event_type, handler_id, "handler unregistered");
        }
    }

    /// Enqueues an event for dispatch. Events whose type requires a payload
    /// but carry none are rejected and `false` is returned.
    pub fn put_event(&self, event: SharedEvent) -> bool {
        let event_type = event.event_type();
        if event.is_empty() {
            warn!(%event_type, "rejecting event without payload");
            return false;
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.shared.sender.send(QueueItem::Event(event)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            error!(%event_type, "event queue disconnected");
            return false;
        }
        counter!("event_bus.events_published", 1, "event_type" => event_type.as_str());
        true
    }

    /// Wraps and enqueues an owned event.
    pub fn publish(&self, event: Event) -> bool {
        self.put_event(event.into_shared())
    }

    /// Events queued and not yet dispatched.
    pub fn event_queue_size(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.shared.registry.handler_count(event_type)
    }

    /// Events fully dispatched (all handlers run) since construction.
    pub fn processed_event_count(&self) -> u64 {
        self.shared.processed.load(Ordering::SeqCst)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
