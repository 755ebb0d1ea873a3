//! Generic event/observer system shared by every component that needs to
//! report a state change without holding a lock while doing it (spec.md
//! §5: "A state change invokes an optional observer asynchronously, never
//! inside the locked section").

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An observable event emitted by a core component (circuit breaker state
/// change, dispatcher transition, capability denial, ...).
pub trait CoreEvent: Send + Sync + fmt::Debug {
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> Instant;
    fn source(&self) -> &str;
}

/// Receives events of a specific type.
pub trait EventListener<E: CoreEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn EventListener<E>>;

/// A collection of listeners for one event type. Cloning is cheap (each
/// listener is reference-counted).
#[derive(Clone)]
pub struct EventListeners<E: CoreEvent> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: CoreEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CoreEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Notifies every listener on a separate execution context (spec.md
    /// §5: "dispatched on a separate execution context to avoid hook
    /// re-entry") rather than inline on the caller's thread — a slow or
    /// blocking listener must never stall whoever triggered the event. A
    /// panicking listener is caught so the rest still run.
    ///
    /// Falls back to running inline when no Tokio runtime is current
    /// (e.g. a plain `#[test]`, or a caller outside the async runtime
    /// entirely) rather than panicking on a missing reactor.
    pub fn emit(&self, event: &E)
    where
        E: Clone + Send + 'static,
    {
        if self.listeners.is_empty() {
            return;
        }
        let listeners = self.listeners.clone();
        let event = event.clone();
        let dispatch = move || {
            for listener in &listeners {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    listener.on_event(&event);
                }));
                if result.is_err() {
                    tracing::warn!(event_type = event.event_type(), "event listener panicked");
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(dispatch);
            }
            Err(_) => dispatch(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
