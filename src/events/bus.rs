//! Per-component publish/subscribe with middleware and caps
//!
//! The bus is single-threaded cooperative within its owner: an emission is
//! a linear sequence of middleware then listeners, run on the emitting
//! task. Snapshots are taken before running handlers so a listener may
//! re-enter the bus (subscribe, emit) without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::middleware::{Middleware, MiddlewareOutcome};
use super::types::{BusEvent, Envelope, EventMetadata};
use crate::utils::{EngineError, EngineResult};

type Listener<E> = Arc<dyn Fn(&Envelope<E>) -> Result<(), String> + Send + Sync>;

struct ListenerEntry<E> {
    id: u64,
    handler: Listener<E>,
}

struct BusInner<E: BusEvent> {
    next_listener_id: u64,
    listeners: HashMap<String, Vec<ListenerEntry<E>>>,
    middleware: Vec<Arc<dyn Middleware<E>>>,
}

/// A typed event bus owned by one component
pub struct EventBus<E: BusEvent> {
    name: String,
    max_listeners_per_event: usize,
    max_middleware: usize,
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E: BusEvent> EventBus<E> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_caps(name, 50, 20)
    }

    #[must_use]
    pub fn with_caps(
        name: impl Into<String>,
        max_listeners_per_event: usize,
        max_middleware: usize,
    ) -> Self {
        Self {
            name: name.into(),
            max_listeners_per_event,
            max_middleware,
            inner: Arc::new(Mutex::new(BusInner {
                next_listener_id: 0,
                listeners: HashMap::new(),
                middleware: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a middleware at the end of the chain
    ///
    /// Rejected with a warning once the middleware cap is reached.
    pub fn add_middleware(&self, middleware: Arc<dyn Middleware<E>>) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if inner.middleware.len() >= self.max_middleware {
            tracing::warn!(
                "Bus '{}': middleware cap ({}) reached, rejecting '{}'",
                self.name,
                self.max_middleware,
                middleware.name()
            );
            return Err(EngineError::validation(
                format!("middleware cap {} reached", self.max_middleware),
                vec![],
            ));
        }
        inner.middleware.push(middleware);
        Ok(())
    }

    /// Register a listener for one event name
    ///
    /// Returns an idempotent [`Subscription`]; cancelling it synchronously
    /// stops further callbacks. Registration beyond the per-event cap is
    /// rejected with a warning.
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> EngineResult<Subscription<E>>
    where
        F: Fn(&Envelope<E>) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_listener_id += 1;
        let id = inner.next_listener_id;

        let entries = inner.listeners.entry(event_name.to_string()).or_default();
        if entries.len() >= self.max_listeners_per_event {
            tracing::warn!(
                "Bus '{}': listener cap ({}) reached for '{event_name}', rejecting registration",
                self.name,
                self.max_listeners_per_event
            );
            return Err(EngineError::validation(
                format!(
                    "listener cap {} reached for '{event_name}'",
                    self.max_listeners_per_event
                ),
                vec![],
            ));
        }
        entries.push(ListenerEntry {
            id,
            handler: Arc::new(handler),
        });

        Ok(Subscription {
            bus: Arc::downgrade(&self.inner),
            event_name: event_name.to_string(),
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Emit an event: enrich, run middleware in order, deliver to listeners
    /// in registration order
    ///
    /// Middleware failures are isolated (logged, chain continues); a
    /// middleware halt stops the emission. Listener errors are logged with
    /// the correlation ID and never abort delivery.
    pub fn emit(&self, payload: E) {
        let event_name = payload.name();
        let mut envelope = Envelope {
            meta: EventMetadata::fresh(&self.name, event_name),
            payload,
        };

        // Snapshot handlers so listeners can re-enter the bus
        let (middleware, listeners) = {
            let inner = self.inner.lock();
            let middleware: Vec<_> = inner.middleware.iter().map(Arc::clone).collect();
            let listeners: Vec<_> = inner
                .listeners
                .get(event_name)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default();
            (middleware, listeners)
        };

        for mw in &middleware {
            match mw.handle(event_name, &mut envelope) {
                Ok(MiddlewareOutcome::Continue) => {}
                Ok(MiddlewareOutcome::Halt) => {
                    tracing::debug!(
                        "Bus '{}': middleware '{}' halted '{event_name}' [{}]",
                        self.name,
                        mw.name(),
                        envelope.meta.correlation_id
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Bus '{}': middleware '{}' failed on '{event_name}': {e}",
                        self.name,
                        mw.name()
                    );
                }
            }
        }

        for handler in &listeners {
            if let Err(e) = handler(&envelope) {
                tracing::warn!(
                    "Bus '{}': listener error on '{event_name}' [{}]: {e}",
                    self.name,
                    envelope.meta.correlation_id
                );
            }
        }
    }

    /// Current listener count for an event name (for diagnostics)
    #[must_use]
    pub fn listener_count(&self, event_name: &str) -> usize {
        self.inner
            .lock()
            .listeners
            .get(event_name)
            .map_or(0, Vec::len)
    }
}

impl<E: BusEvent> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("name", &self.name).finish()
    }
}

/// Cleanup handle returned by [`EventBus::subscribe`]
///
/// `cancel` is idempotent; dropping the handle does NOT deregister the
/// listener (buses outlive most subscribers by design).
pub struct Subscription<E: BusEvent> {
    bus: Weak<Mutex<BusInner<E>>>,
    event_name: String,
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl<E: BusEvent> Subscription<E> {
    /// Deregister the listener; subsequent calls are no-ops
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = inner.lock();
            if let Some(entries) = inner.listeners.get_mut(&self.event_name) {
                entries.retain(|e| e.id != self.id);
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl<E: BusEvent> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_name", &self.event_name)
            .field("id", &self.id)
            .finish()
    }
}
