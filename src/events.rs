//! Typed event buses
//!
//! Each component owns a bus. Event names and payloads are compile-time
//! known (closed enums), emissions are enriched with metadata, and a
//! middleware chain runs before listeners. Cross-bus forwarding is the
//! orchestrator's job: it copies the payload and re-emits on the target
//! bus, which mints fresh metadata.

pub mod bus;
pub mod middleware;
pub mod types;

pub use bus::{EventBus, Subscription};
pub use middleware::{
    LoggingMiddleware, Middleware, MiddlewareOutcome, RateLimitMiddleware, ValidationMiddleware,
};
pub use types::{
    BackupEventPayload, BusEvent, CacheInvalidatedPayload, CheckActivityPayload,
    CheckCompletedPayload, ConfigChangedPayload, DatabaseErrorPayload, EngineEvent, Envelope,
    EventMetadata, InternalEvent, MonitoringScopePayload, OperationPayload, PerformancePayload,
    SitePayload, SiteRemovedPayload, SitesSyncPayload, StatusChangedPayload, SystemPayload,
    TransactionPayload,
};
