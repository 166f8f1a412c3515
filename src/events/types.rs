//! Event payloads and envelopes
//!
//! Dynamic duck-typed payloads from the source design become closed sum
//! types here: one enum per bus domain, one payload struct per shape.

use serde::{Deserialize, Serialize};

use crate::core::{MonitorStatus, Site, now_ms};
use crate::utils::CorrelationId;

/// Implemented by every event enum a bus can carry
pub trait BusEvent: Clone + Send + Sync + serde::Serialize + 'static {
    /// Canonical event name, e.g. `monitor:status-changed`
    fn name(&self) -> &'static str;
}

/// Metadata slot attached to every emission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub correlation_id: CorrelationId,
    pub emitted_at_ms: i64,
    pub bus_name: String,
    pub event_name: String,
}

impl EventMetadata {
    #[must_use]
    pub fn fresh(bus_name: &str, event_name: &str) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            emitted_at_ms: now_ms(),
            bus_name: bus_name.to_string(),
            event_name: event_name.to_string(),
        }
    }
}

/// An enriched payload as delivered to middleware and listeners
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<E> {
    pub payload: E,
    pub meta: EventMetadata,
}

// ============================================================================
// Payload shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangedPayload {
    pub site_identifier: String,
    pub monitor_id: String,
    pub previous_status: MonitorStatus,
    pub new_status: MonitorStatus,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp_ms: i64,
}

/// Scope + run correlation for check lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckActivityPayload {
    pub site_identifier: String,
    pub monitor_id: String,
    /// Correlation of the scheduled run, rotated per cycle
    pub run_correlation: CorrelationId,
    pub manual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCompletedPayload {
    pub site_identifier: String,
    pub monitor_id: String,
    pub run_correlation: CorrelationId,
    pub status: MonitorStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePayload {
    pub site: Site,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRemovedPayload {
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitesSyncPayload {
    pub site_count: usize,
}

/// `monitor_id: None` addresses every monitor of the site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringScopePayload {
    pub site_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub operation: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseErrorPayload {
    pub operation: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEventPayload {
    pub size_bytes: u64,
    pub checksum_hex: String,
    pub schema_version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInvalidatedPayload {
    pub cache: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangedPayload {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformancePayload {
    pub name: String,
    pub value_ms: u64,
}

/// Operational-hook lifecycle payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub operation: String,
    pub correlation: CorrelationId,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Public canonical events
// ============================================================================

/// Events on the outward-facing bus, consumed by the host interface
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EngineEvent {
    MonitorStatusChanged(StatusChangedPayload),
    MonitorUp(StatusChangedPayload),
    MonitorDown(StatusChangedPayload),
    MonitorCheckStarted(CheckActivityPayload),
    MonitorManualCheckStarted(CheckActivityPayload),
    MonitorCheckCompleted(CheckCompletedPayload),
    MonitorTimeout(CheckActivityPayload),
    SiteAdded(SitePayload),
    SiteUpdated(SitePayload),
    SiteRemoved(SiteRemovedPayload),
    SitesStateSynchronized(SitesSyncPayload),
    MonitoringStarted(MonitoringScopePayload),
    MonitoringStopped(MonitoringScopePayload),
    DatabaseTransactionCompleted(TransactionPayload),
    DatabaseError(DatabaseErrorPayload),
    DatabaseBackupCreated(BackupEventPayload),
    DatabaseBackupRestored(BackupEventPayload),
    SystemStartup(SystemPayload),
    SystemShutdown(SystemPayload),
    SystemError(SystemPayload),
    CacheInvalidated(CacheInvalidatedPayload),
    ConfigChanged(ConfigChangedPayload),
    PerformanceMetric(PerformancePayload),
    PerformanceWarning(PerformancePayload),
    OperationStarted(OperationPayload),
    OperationCompleted(OperationPayload),
    OperationFailed(OperationPayload),
}

impl BusEvent for EngineEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::MonitorStatusChanged(_) => "monitor:status-changed",
            Self::MonitorUp(_) => "monitor:up",
            Self::MonitorDown(_) => "monitor:down",
            Self::MonitorCheckStarted(_) => "monitor:check-started",
            Self::MonitorManualCheckStarted(_) => "monitor:manual-check-started",
            Self::MonitorCheckCompleted(_) => "monitor:check-completed",
            Self::MonitorTimeout(_) => "monitor:timeout",
            Self::SiteAdded(_) => "site:added",
            Self::SiteUpdated(_) => "site:updated",
            Self::SiteRemoved(_) => "site:removed",
            Self::SitesStateSynchronized(_) => "sites:state-synchronized",
            Self::MonitoringStarted(_) => "monitoring:started",
            Self::MonitoringStopped(_) => "monitoring:stopped",
            Self::DatabaseTransactionCompleted(_) => "database:transaction-completed",
            Self::DatabaseError(_) => "database:error",
            Self::DatabaseBackupCreated(_) => "database:backup-created",
            Self::DatabaseBackupRestored(_) => "database:backup-restored",
            Self::SystemStartup(_) => "system:startup",
            Self::SystemShutdown(_) => "system:shutdown",
            Self::SystemError(_) => "system:error",
            Self::CacheInvalidated(_) => "cache:invalidated",
            Self::ConfigChanged(_) => "config:changed",
            Self::PerformanceMetric(_) => "performance:metric",
            Self::PerformanceWarning(_) => "performance:warning",
            Self::OperationStarted(_) => "operation:started",
            Self::OperationCompleted(_) => "operation:completed",
            Self::OperationFailed(_) => "operation:failed",
        }
    }
}

// ============================================================================
// Internal manager-bus events
// ============================================================================

/// Events emitted on per-manager buses; the orchestrator rewrites a fixed
/// subset into their public counterparts
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InternalEvent {
    SiteAdded(SitePayload),
    SiteUpdated(SitePayload),
    SiteRemoved(SiteRemovedPayload),
    SitesStateSynchronized(SitesSyncPayload),
    MonitoringStarted(MonitoringScopePayload),
    MonitoringStopped(MonitoringScopePayload),
    CacheInvalidated(CacheInvalidatedPayload),
    ConfigChanged(ConfigChangedPayload),
    DatabaseTransactionCompleted(TransactionPayload),
    DatabaseError(DatabaseErrorPayload),
    BackupCreated(BackupEventPayload),
    BackupRestored(BackupEventPayload),
}

impl BusEvent for InternalEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::SiteAdded(_) => "internal:site:added",
            Self::SiteUpdated(_) => "internal:site:updated",
            Self::SiteRemoved(_) => "internal:site:removed",
            Self::SitesStateSynchronized(_) => "internal:sites:state-synchronized",
            Self::MonitoringStarted(_) => "internal:monitor:started",
            Self::MonitoringStopped(_) => "internal:monitor:stopped",
            Self::CacheInvalidated(_) => "internal:cache:invalidated",
            Self::ConfigChanged(_) => "internal:config:changed",
            Self::DatabaseTransactionCompleted(_) => "internal:database:transaction-completed",
            Self::DatabaseError(_) => "internal:database:error",
            Self::BackupCreated(_) => "internal:database:backup-created",
            Self::BackupRestored(_) => "internal:database:backup-restored",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_names() {
        let payload = SiteRemovedPayload {
            identifier: "example".into(),
        };
        assert_eq!(EngineEvent::SiteRemoved(payload.clone()).name(), "site:removed");
        assert_eq!(
            InternalEvent::SiteRemoved(payload).name(),
            "internal:site:removed"
        );
    }

    #[test]
    fn test_envelope_serializes_payload_flat() {
        let event = EngineEvent::CacheInvalidated(CacheInvalidatedPayload {
            cache: "sites".into(),
            reason: "bulk-refresh".into(),
        });
        let meta = EventMetadata::fresh("public", event.name());
        let envelope = Envelope {
            payload: event,
            meta,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        // Untagged: the payload's own fields are directly addressable
        assert_eq!(json["payload"]["cache"], "sites");
        assert_eq!(json["meta"]["eventName"], "cache:invalidated");
        assert_eq!(json["meta"]["busName"], "public");
    }

    #[test]
    fn test_fresh_metadata_mints_new_correlation() {
        let a = EventMetadata::fresh("bus", "x");
        let b = EventMetadata::fresh("bus", "x");
        assert_ne!(a.correlation_id, b.correlation_id);
    }
}
