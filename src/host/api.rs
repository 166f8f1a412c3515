//! Typed request handlers over the orchestrator

use std::collections::BTreeSet;
use std::sync::Arc;

use super::response::ApiResponse;
use crate::checks::CheckOutcome;
use crate::core::{Monitor, Site};
use crate::events::{EngineEvent, Envelope, Subscription};
use crate::managers::{
    BackupArtifact, BackupMetadata, ImportPreview, PortableSnapshot, SiteUpdate,
};
use crate::orchestrator::UptimeOrchestrator;
use crate::registry::MonitorTypeSummary;
use crate::utils::{EngineError, EngineResult};

/// Every operation the host interface exposes, in registration order
pub const OPERATIONS: &[&str] = &[
    "sites.getAll",
    "sites.add",
    "sites.update",
    "sites.remove",
    "monitors.add",
    "monitors.remove",
    "monitoring.startForSite",
    "monitoring.stopForSite",
    "monitoring.checkNow",
    "settings.getHistoryLimit",
    "settings.updateHistoryLimit",
    "data.export",
    "data.import",
    "data.import.persist",
    "data.backup.download",
    "data.backup.restore",
    "monitorTypes.list",
];

/// Centralized handler registration; duplicates are rejected
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    names: BTreeSet<&'static str>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str) -> EngineResult<()> {
        if !self.names.insert(name) {
            return Err(EngineError::validation(
                format!("handler '{name}' already registered"),
                vec![],
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.names.iter().copied().collect()
    }
}

pub struct HostApi {
    orchestrator: Arc<UptimeOrchestrator>,
    handlers: HandlerRegistry,
}

impl HostApi {
    pub fn new(orchestrator: Arc<UptimeOrchestrator>) -> EngineResult<Self> {
        let mut handlers = HandlerRegistry::new();
        for operation in OPERATIONS {
            handlers.register(operation)?;
        }
        Ok(Self {
            orchestrator,
            handlers,
        })
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    // ------------------------------------------------------------------
    // Sites
    // ------------------------------------------------------------------

    pub async fn sites_get_all(&self) -> ApiResponse<Vec<Site>> {
        self.orchestrator.get_sites().await.into()
    }

    pub async fn sites_add(&self, draft: Site) -> ApiResponse<Site> {
        self.orchestrator.add_site(draft).await.into()
    }

    pub async fn sites_update(&self, identifier: &str, updates: SiteUpdate) -> ApiResponse<Site> {
        self.orchestrator.update_site(identifier, updates).await.into()
    }

    pub async fn sites_remove(&self, identifier: &str) -> ApiResponse<()> {
        self.orchestrator.remove_site(identifier).await.into()
    }

    // ------------------------------------------------------------------
    // Monitors
    // ------------------------------------------------------------------

    pub async fn monitors_add(
        &self,
        site_identifier: &str,
        draft: Monitor,
    ) -> ApiResponse<Monitor> {
        self.orchestrator.add_monitor(site_identifier, draft).await.into()
    }

    pub async fn monitors_remove(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> ApiResponse<Site> {
        self.orchestrator
            .remove_monitor(site_identifier, monitor_id)
            .await
            .into()
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    pub async fn monitoring_start_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> ApiResponse<bool> {
        self.orchestrator
            .start_monitoring_for_site(identifier, monitor_id)
            .await
            .into()
    }

    pub async fn monitoring_stop_for_site(
        &self,
        identifier: &str,
        monitor_id: Option<&str>,
    ) -> ApiResponse<bool> {
        self.orchestrator
            .stop_monitoring_for_site(identifier, monitor_id)
            .await
            .into()
    }

    pub async fn monitoring_check_now(
        &self,
        identifier: &str,
        monitor_id: &str,
    ) -> ApiResponse<CheckOutcome> {
        self.orchestrator.check_now(identifier, monitor_id).await.into()
    }

    // ------------------------------------------------------------------
    // Settings & data
    // ------------------------------------------------------------------

    pub async fn settings_get_history_limit(&self) -> ApiResponse<u32> {
        self.orchestrator.get_history_limit().await.into()
    }

    pub async fn settings_update_history_limit(&self, limit: u32) -> ApiResponse<u32> {
        self.orchestrator.set_history_limit(limit).await.into()
    }

    pub async fn data_export(&self) -> ApiResponse<PortableSnapshot> {
        self.orchestrator.export_data().await.into()
    }

    pub async fn data_import(&self, snapshot: PortableSnapshot) -> ApiResponse<ImportPreview> {
        self.orchestrator.import_data(&snapshot).await.into()
    }

    pub async fn data_import_persist(&self, snapshot: PortableSnapshot) -> ApiResponse<()> {
        self.orchestrator.persist_import(&snapshot).await.into()
    }

    pub async fn data_backup_download(&self) -> ApiResponse<BackupArtifact> {
        self.orchestrator.download_backup().await.into()
    }

    pub async fn data_backup_restore(
        &self,
        bytes: &[u8],
        claimed: Option<&BackupMetadata>,
    ) -> ApiResponse<BackupMetadata> {
        self.orchestrator.restore_backup(bytes, claimed).await.into()
    }

    pub fn monitor_types_list(&self) -> ApiResponse<Vec<MonitorTypeSummary>> {
        ApiResponse::ok(self.orchestrator.monitor_types())
    }

    // ------------------------------------------------------------------
    // Event stream
    // ------------------------------------------------------------------

    /// Subscribe to a canonical event; cancelling the returned handle
    /// synchronously stops further callbacks
    pub fn subscribe<F>(&self, event: &str, handler: F) -> EngineResult<Subscription<EngineEvent>>
    where
        F: Fn(&Envelope<EngineEvent>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.orchestrator.public_bus().subscribe(event, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_are_unique() {
        let mut registry = HandlerRegistry::new();
        for operation in OPERATIONS {
            registry.register(operation).unwrap();
        }
        assert_eq!(registry.names().len(), OPERATIONS.len());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("sites.add").unwrap();
        let err = registry.register("sites.add").unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert!(registry.is_registered("sites.add"));
    }
}
