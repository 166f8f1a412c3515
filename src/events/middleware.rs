//! Built-in bus middleware: logging, rate limiting, payload validation

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::types::{BusEvent, Envelope};

/// Result of one middleware step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareOutcome {
    /// Pass the (possibly mutated) envelope along
    Continue,
    /// Stop the emission; listeners never see it
    Halt,
}

/// A stage in a bus's emission chain
///
/// Runs in registration order. May mutate the envelope, halt the emission,
/// or fail. A failure is isolated: the bus logs it and continues with the
/// next stage.
pub trait Middleware<E: BusEvent>: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(
        &self,
        event_name: &str,
        envelope: &mut Envelope<E>,
    ) -> Result<MiddlewareOutcome, String>;
}

/// Logs every emission at debug level
pub struct LoggingMiddleware;

impl<E: BusEvent> Middleware<E> for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn handle(
        &self,
        event_name: &str,
        envelope: &mut Envelope<E>,
    ) -> Result<MiddlewareOutcome, String> {
        tracing::debug!(
            "[{}] {event_name} [{}]",
            envelope.meta.bus_name,
            envelope.meta.correlation_id
        );
        Ok(MiddlewareOutcome::Continue)
    }
}

/// Sliding-window rate limiter per event name
///
/// Emissions beyond `max_per_window` within `window` are halted with a
/// warning. Protects slow consumers from event storms (e.g. a flapping
/// monitor emitting status changes every few seconds).
pub struct RateLimitMiddleware {
    max_per_window: usize,
    window: Duration,
    recent: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimitMiddleware {
    #[must_use]
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: BusEvent> Middleware<E> for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn handle(
        &self,
        event_name: &str,
        envelope: &mut Envelope<E>,
    ) -> Result<MiddlewareOutcome, String> {
        let now = Instant::now();
        let mut recent = self.recent.lock();
        let stamps = recent.entry(event_name.to_string()).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.window);

        if stamps.len() >= self.max_per_window {
            tracing::warn!(
                "Rate limit hit for '{event_name}' ({} in {:?}) [{}]",
                stamps.len(),
                self.window,
                envelope.meta.correlation_id
            );
            return Ok(MiddlewareOutcome::Halt);
        }
        stamps.push(now);
        Ok(MiddlewareOutcome::Continue)
    }
}

/// Validates payloads before they reach listeners
///
/// The validator is supplied per bus so each domain can enforce its own
/// invariants; an invalid payload halts the emission.
pub struct ValidationMiddleware<E> {
    validate: Box<dyn Fn(&E) -> Result<(), String> + Send + Sync>,
}

impl<E: BusEvent> ValidationMiddleware<E> {
    #[must_use]
    pub fn new(validate: impl Fn(&E) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            validate: Box::new(validate),
        }
    }
}

impl<E: BusEvent> Middleware<E> for ValidationMiddleware<E> {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn handle(
        &self,
        event_name: &str,
        envelope: &mut Envelope<E>,
    ) -> Result<MiddlewareOutcome, String> {
        match (self.validate)(&envelope.payload) {
            Ok(()) => Ok(MiddlewareOutcome::Continue),
            Err(reason) => {
                tracing::warn!(
                    "Dropping invalid '{event_name}' [{}]: {reason}",
                    envelope.meta.correlation_id
                );
                Ok(MiddlewareOutcome::Halt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::events::types::{CacheInvalidatedPayload, EngineEvent};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn invalidated(cache: &str) -> EngineEvent {
        EngineEvent::CacheInvalidated(CacheInvalidatedPayload {
            cache: cache.into(),
            reason: "test".into(),
        })
    }

    fn counting_bus(bus: &EventBus<EngineEvent>) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        bus.subscribe("cache:invalidated", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        hits
    }

    #[test]
    fn test_rate_limit_halts_excess_emissions() {
        let bus = EventBus::<EngineEvent>::new("test");
        bus.add_middleware(Arc::new(RateLimitMiddleware::new(
            2,
            Duration::from_secs(60),
        )))
        .unwrap();
        let hits = counting_bus(&bus);

        for _ in 0..5 {
            bus.emit(invalidated("sites"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_validation_halts_invalid_payloads() {
        let bus = EventBus::<EngineEvent>::new("test");
        bus.add_middleware(Arc::new(ValidationMiddleware::new(|e: &EngineEvent| {
            match e {
                EngineEvent::CacheInvalidated(p) if p.cache.is_empty() => {
                    Err("cache name empty".into())
                }
                _ => Ok(()),
            }
        })))
        .unwrap();
        let hits = counting_bus(&bus);

        bus.emit(invalidated(""));
        bus.emit(invalidated("sites"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_middleware_is_isolated() {
        struct Broken;
        impl<E: BusEvent> Middleware<E> for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn handle(
                &self,
                _: &str,
                _: &mut Envelope<E>,
            ) -> Result<MiddlewareOutcome, String> {
                Err("middleware exploded".into())
            }
        }

        let bus = EventBus::<EngineEvent>::new("test");
        bus.add_middleware(Arc::new(Broken)).unwrap();
        let hits = counting_bus(&bus);

        bus.emit(invalidated("sites"));
        // The failure is logged and the emission still reaches listeners
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_middleware_cap_rejects_registration() {
        let bus = EventBus::<EngineEvent>::with_caps("test", 50, 1);
        assert!(bus.add_middleware(Arc::new(LoggingMiddleware)).is_ok());
        assert!(bus.add_middleware(Arc::new(LoggingMiddleware)).is_err());
    }
}
