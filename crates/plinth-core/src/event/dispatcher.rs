use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};

use crate::event::{Event, EventId};
use crate::utils::panic_message;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type OnceHandler<E> = Box<dyn FnOnce(&E) + Send>;

struct DispatcherState<E> {
    /// Persistent handlers; `None` kind matches every event
    handlers: Vec<(EventId, Option<&'static str>, Handler<E>)>,
    once: HashMap<(&'static str, String), Vec<OnceHandler<E>>>,
    next_handler_id: EventId,
}

/// Thread-safe typed event dispatcher
///
/// Cloning yields another handle onto the same handler tables.
pub struct EventDispatcher<E: Event> {
    state: Arc<Mutex<DispatcherState<E>>>,
}

impl<E: Event> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<E: Event> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let once_count: usize = state.once.values().map(|v| v.len()).sum();
        f.debug_struct("EventDispatcher")
            .field("handlers_count", &state.handlers.len())
            .field("once_count", &once_count)
            .field("next_handler_id", &state.next_handler_id)
            .finish()
    }
}

impl<E: Event> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DispatcherState {
                handlers: Vec::new(),
                once: HashMap::new(),
                next_handler_id: 1,
            })),
        }
    }

    // Handlers never run under the lock, so a poisoned guard still holds consistent tables.
    fn lock(&self) -> MutexGuard<'_, DispatcherState<E>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_handler(&self, kind: Option<&'static str>, handler: Handler<E>) -> EventId {
        let mut state = self.lock();
        let id = state.next_handler_id;
        state.next_handler_id += 1;
        state.handlers.push((id, kind, handler));
        id
    }

    /// Register a persistent handler for one event kind
    pub fn subscribe<F>(&self, kind: &'static str, handler: F) -> EventId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add_handler(Some(kind), Arc::new(handler))
    }

    /// Register a persistent handler for every event
    pub fn subscribe_all<F>(&self, handler: F) -> EventId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add_handler(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: EventId) -> bool {
        let mut state = self.lock();
        let len_before = state.handlers.len();
        state.handlers.retain(|(handler_id, _, _)| *handler_id != id);
        state.handlers.len() < len_before
    }

    /// Queue a callback for the next event of `kind` about `subject`
    pub fn once<F>(&self, kind: &'static str, subject: impl Into<String>, callback: F)
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.lock()
            .once
            .entry((kind, subject.into()))
            .or_default()
            .push(Box::new(callback));
    }

    /// Number of one-shot callbacks still waiting for `kind`/`subject`
    pub fn pending_once(&self, kind: &'static str, subject: &str) -> usize {
        self.lock()
            .once
            .get(&(kind, subject.to_string()))
            .map_or(0, |callbacks| callbacks.len())
    }

    /// Deliver `event` to every matching handler, returning how many ran.
    ///
    /// The one-shot list for the event's key is detached before any callback
    /// runs; callbacks registered while dispatching wait for the next event.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let (handlers, once) = {
            let mut state = self.lock();
            let handlers: Vec<Handler<E>> = state
                .handlers
                .iter()
                .filter(|(_, handler_kind, _)| handler_kind.is_none_or(|k| k == kind))
                .map(|(_, _, handler)| Arc::clone(handler))
                .collect();
            let once = state
                .once
                .remove(&(kind, event.subject().into_owned()))
                .unwrap_or_default();
            (handlers, once)
        };

        debug!(
            "Dispatching '{}' for '{}' to {} handler(s) and {} one-shot listener(s)",
            kind,
            event.subject(),
            handlers.len(),
            once.len()
        );

        let mut invoked = 0;
        for handler in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                error!("Event handler for '{}' panicked: {}", kind, panic_message(&*payload));
            }
            invoked += 1;
        }
        for callback in once {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(event))) {
                error!("One-shot listener for '{}' panicked: {}", kind, panic_message(&*payload));
            }
            invoked += 1;
        }
        invoked
    }
}
