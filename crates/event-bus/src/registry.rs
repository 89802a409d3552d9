//! Handler registry keyed by event type.
//!
//! Handler ids come from one bus-wide counter and are never reused, so
//! iterating a type's `BTreeMap` yields handlers in registration order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::HandlerResult;
use crate::event::{EventType, SharedEvent};

/// Stable handle returned on registration.
pub type HandlerId = u64;

/// Callback invoked on the dispatch thread for each matching event.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SharedEvent) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&SharedEvent) -> HandlerResult + Send + Sync,
{
    fn handle(&self, event: &SharedEvent) -> HandlerResult {
        self(event)
    }
}

pub type BoxedHandler = Arc<dyn EventHandler>;

pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventType, BTreeMap<HandlerId, BoxedHandler>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let counts: BTreeMap<EventType, usize> =
            handlers.iter().map(|(ty, set)| (*ty, set.len())).collect();
        f.debug_struct("HandlerRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("handlers", &counts)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: EventType, handler: BoxedHandler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .insert(id, handler);
        id
    }

    /// Returns false if no such handler was registered for the type.
    pub fn unregister(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(set) = handlers.get_mut(&event_type) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            handlers.remove(&event_type);
        }
        removed
    }

    /// Copy of the type's handlers in registration order.
    pub fn snapshot(&self, event_type: EventType) -> Vec<(HandlerId, BoxedHandler)> {
        self.handlers
            .read()
            .get(&event_type)
            .map(|set| set.iter().map(|(id, h)| (*id, Arc::clone(h))).collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map_or(0, BTreeMap::len)
    }

    pub fn total_handlers(&self) -> usize {
        self.handlers.read().values().map(BTreeMap::len).sum()
    }
}
