//! Site CRUD with cross-entity invariants
//!
//! Validation happens before any write, duplicate checks and persistence
//! share one transaction, the cache is touched only after commit, and
//! scheduler jobs for removed monitors are halted before the delete lands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::BoundedCache;
use crate::config::CacheTuning;
use crate::core::{Monitor, Site};
use crate::events::{
    CacheInvalidatedPayload, EventBus, InternalEvent, SitePayload, SiteRemovedPayload,
};
use crate::ops::{self, RetryPolicy};
use crate::registry::MonitorTypeRegistry;
use crate::storage::{MonitorRepository, SiteRepository, StorageEngine};
use crate::utils::{EngineError, EngineResult};

use super::MonitoringOps;

/// Partial updates for `sites.update`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub monitoring: Option<bool>,
    /// Full replacement monitor set; omitted means "leave monitors alone"
    pub monitors: Option<Vec<Monitor>>,
}

pub struct SiteManager {
    engine: Arc<StorageEngine>,
    registry: Arc<MonitorTypeRegistry>,
    cache: Arc<BoundedCache<String, Site>>,
    bus: Arc<EventBus<InternalEvent>>,
    monitoring: Arc<dyn MonitoringOps>,
    policy: RetryPolicy,
}

impl SiteManager {
    #[must_use]
    pub fn new(
        engine: Arc<StorageEngine>,
        registry: Arc<MonitorTypeRegistry>,
        bus: Arc<EventBus<InternalEvent>>,
        monitoring: Arc<dyn MonitoringOps>,
        tuning: &CacheTuning,
    ) -> Self {
        let cache = Arc::new(BoundedCache::new(
            "sites",
            Duration::from_secs(tuning.sites_ttl_s),
            tuning.max_entries,
        ));
        // Broadcast cache invalidations on the manager bus
        let hook_bus = Arc::clone(&bus);
        cache.set_invalidation_hook(move |name, reason| {
            hook_bus.emit(InternalEvent::CacheInvalidated(CacheInvalidatedPayload {
                cache: name.to_string(),
                reason: reason.to_string(),
            }));
        });

        Self {
            engine,
            registry,
            cache,
            bus,
            monitoring,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus<InternalEvent>> {
        &self.bus
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BoundedCache<String, Site>> {
        &self.cache
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All sites with their monitors; refreshes the cache atomically
    pub async fn get_sites(&self) -> EngineResult<Vec<Site>> {
        let sites = ops::run_hooked("site.get_sites", &self.policy, None, None, || async move {
            self.engine.with_connection(|conn| {
                let mut sites = SiteRepository::get_all_internal(conn)?;
                for site in &mut sites {
                    site.monitors =
                        MonitorRepository::get_by_site_internal(conn, &site.identifier)?;
                }
                Ok(sites)
            })
        })
        .await?;

        let map: HashMap<String, Site> = sites
            .iter()
            .map(|s| (s.identifier.clone(), s.clone()))
            .collect();
        self.cache.swap_all(map);
        Ok(sites)
    }

    pub async fn get_site(&self, identifier: &str) -> EngineResult<Site> {
        if let Some(site) = self.cache.get(&identifier.to_string()) {
            return Ok(site);
        }
        let site = self
            .load_site(identifier)
            .await?
            .ok_or_else(|| EngineError::not_found("site", identifier))?;
        self.cache.insert(site.identifier.clone(), site.clone());
        Ok(site)
    }

    async fn load_site(&self, identifier: &str) -> EngineResult<Option<Site>> {
        self.engine.with_connection(|conn| {
            let Some(mut site) = SiteRepository::get_by_identifier_internal(conn, identifier)?
            else {
                return Ok(None);
            };
            site.monitors = MonitorRepository::get_by_site_internal(conn, identifier)?;
            Ok(Some(site))
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a site with its monitors
    pub async fn add_site(&self, mut site: Site) -> EngineResult<Site> {
        site.normalize();
        self.validate_site(&site)?;

        let draft = &site;
        ops::run_hooked("site.add", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                if SiteRepository::exists_internal(conn, &draft.identifier)? {
                    return Err(EngineError::DuplicateSiteIdentifier(
                        draft.identifier.clone(),
                    ));
                }
                SiteRepository::upsert_internal(conn, draft)?;
                for monitor in &draft.monitors {
                    MonitorRepository::upsert_internal(conn, monitor)?;
                }
                Ok(())
            })
        })
        .await?;

        // Cache and events only after the commit
        self.cache.insert(site.identifier.clone(), site.clone());
        self.bus
            .emit(InternalEvent::SiteAdded(SitePayload { site: site.clone() }));

        let ids: Vec<String> = site.monitors.iter().map(|m| m.id.clone()).collect();
        self.monitoring.setup_new_monitors(&site, &ids).await?;
        Ok(site)
    }

    /// Read-modify-write with monitor-set diffing
    pub async fn update_site(&self, identifier: &str, updates: SiteUpdate) -> EngineResult<Site> {
        let existing = self
            .load_site(identifier)
            .await?
            .ok_or_else(|| EngineError::not_found("site", identifier))?;

        let mut updated = existing.clone();
        if let Some(name) = updates.name {
            updated.name = name;
        }
        if let Some(monitoring) = updates.monitoring {
            updated.monitoring = monitoring;
        }
        if let Some(monitors) = updates.monitors {
            updated.monitors = monitors;
        }
        updated.normalize();
        self.validate_site(&updated)?;

        let old_ids: HashSet<String> =
            existing.monitors.iter().map(|m| m.id.clone()).collect();
        let new_ids: HashSet<String> =
            updated.monitors.iter().map(|m| m.id.clone()).collect();
        let removed: Vec<String> = old_ids.difference(&new_ids).cloned().collect();
        let added: Vec<String> = new_ids.difference(&old_ids).cloned().collect();

        // Halt jobs of removed monitors before their rows go away
        for monitor_id in &removed {
            self.monitoring.halt_jobs(identifier, Some(monitor_id));
        }

        let replacement = &updated;
        let dropped = &removed;
        ops::run_hooked("site.update", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                SiteRepository::upsert_internal(conn, replacement)?;
                for monitor_id in dropped {
                    MonitorRepository::delete_internal(conn, monitor_id)?;
                }
                for monitor in &replacement.monitors {
                    MonitorRepository::upsert_internal(conn, monitor)?;
                }
                Ok(())
            })
        })
        .await?;

        self.cache
            .insert(updated.identifier.clone(), updated.clone());
        self.bus.emit(InternalEvent::SiteUpdated(SitePayload {
            site: updated.clone(),
        }));

        if !added.is_empty() {
            self.monitoring.setup_new_monitors(&updated, &added).await?;
        }
        self.monitoring.sync_site_jobs(&updated).await?;
        Ok(updated)
    }

    /// Cascade delete; jobs are stopped before the commit
    pub async fn remove_site(&self, identifier: &str) -> EngineResult<()> {
        if self.load_site(identifier).await?.is_none() {
            return Err(EngineError::not_found("site", identifier));
        }

        self.monitoring.halt_jobs(identifier, None);

        ops::run_hooked("site.remove", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                SiteRepository::delete_internal(conn, identifier)?;
                Ok(())
            })
        })
        .await?;

        self.cache.remove(&identifier.to_string());
        self.bus.emit(InternalEvent::SiteRemoved(SiteRemovedPayload {
            identifier: identifier.to_string(),
        }));
        Ok(())
    }

    /// Attach a monitor to an existing site
    pub async fn add_monitor(
        &self,
        site_identifier: &str,
        mut monitor: Monitor,
    ) -> EngineResult<Monitor> {
        let site = self
            .load_site(site_identifier)
            .await?
            .ok_or_else(|| EngineError::not_found("site", site_identifier))?;

        monitor.id = monitor.id.trim().to_string();
        monitor.site_identifier = site.identifier.clone();
        self.validate_monitor(&monitor)?;
        if site.monitor(&monitor.id).is_some() {
            return Err(EngineError::DuplicateMonitorId(monitor.id));
        }

        let draft = &monitor;
        ops::run_hooked("monitor.add", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                MonitorRepository::upsert_internal(conn, draft)?;
                Ok(())
            })
        })
        .await
        .map_err(|e| match &e {
            // Monitor IDs are globally unique; a collision with another
            // site's monitor is still a duplicate-ID error to the caller
            EngineError::Storage(cause)
                if crate::utils::error::is_unique_violation(cause) =>
            {
                EngineError::DuplicateMonitorId(draft.id.clone())
            }
            _ => e,
        })?;

        let mut post = site;
        post.monitors.push(monitor.clone());
        self.cache.insert(post.identifier.clone(), post.clone());
        self.bus
            .emit(InternalEvent::SiteUpdated(SitePayload { site: post.clone() }));

        self.monitoring
            .setup_new_monitors(&post, std::slice::from_ref(&monitor.id))
            .await?;
        Ok(monitor)
    }

    /// Detach a monitor; a site never drops to zero monitors
    pub async fn remove_monitor(
        &self,
        site_identifier: &str,
        monitor_id: &str,
    ) -> EngineResult<Site> {
        let site = self
            .load_site(site_identifier)
            .await?
            .ok_or_else(|| EngineError::not_found("site", site_identifier))?;
        if site.monitor(monitor_id).is_none() {
            return Err(EngineError::not_found("monitor", monitor_id));
        }
        if site.monitors.len() == 1 {
            return Err(EngineError::NoMonitors(site.identifier));
        }

        self.monitoring.halt_jobs(site_identifier, Some(monitor_id));

        ops::run_hooked("monitor.remove", &self.policy, None, None, || async move {
            self.engine.execute_transaction(|conn| {
                MonitorRepository::delete_internal(conn, monitor_id)?;
                Ok(())
            })
        })
        .await?;

        let mut post = site;
        post.monitors.retain(|m| m.id != monitor_id);
        self.cache.insert(post.identifier.clone(), post.clone());
        self.bus
            .emit(InternalEvent::SiteUpdated(SitePayload { site: post.clone() }));
        Ok(post)
    }

    // ------------------------------------------------------------------

    fn validate_site(&self, site: &Site) -> EngineResult<()> {
        site.validate()?;
        for monitor in &site.monitors {
            self.validate_monitor(monitor)?;
        }
        Ok(())
    }

    fn validate_monitor(&self, monitor: &Monitor) -> EngineResult<()> {
        let result = self.registry.validate(&monitor.monitor_type, monitor);
        if result.success {
            Ok(())
        } else {
            Err(EngineError::validation(
                format!("monitor '{}' failed validation", monitor.id),
                result.issues,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::register_builtin_types;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    /// Records cross-manager calls instead of driving a scheduler
    #[derive(Default)]
    struct RecordingOps {
        halted: Mutex<Vec<(String, Option<String>)>>,
        setup: Mutex<Vec<Vec<String>>>,
        synced: Mutex<usize>,
    }

    impl MonitoringOps for RecordingOps {
        fn halt_jobs(&self, site_identifier: &str, monitor_id: Option<&str>) {
            self.halted
                .lock()
                .push((site_identifier.to_string(), monitor_id.map(str::to_string)));
        }

        fn setup_new_monitors<'a>(
            &'a self,
            _site: &'a Site,
            new_ids: &'a [String],
        ) -> BoxFuture<'a, EngineResult<()>> {
            Box::pin(async move {
                self.setup.lock().push(new_ids.to_vec());
                Ok(())
            })
        }

        fn sync_site_jobs<'a>(&'a self, _site: &'a Site) -> BoxFuture<'a, EngineResult<()>> {
            Box::pin(async move {
                *self.synced.lock() += 1;
                Ok(())
            })
        }
    }

    fn http_monitor(id: &str) -> Monitor {
        let mut m = Monitor::draft(id, "", "http");
        m.url = Some("http://127.0.0.1:9001/ok".into());
        m.check_interval_ms = 5_000;
        m.monitoring = true;
        m
    }

    fn draft_site(identifier: &str, monitor_ids: &[&str]) -> Site {
        Site {
            identifier: identifier.to_string(),
            name: format!("Site {identifier}"),
            monitoring: true,
            monitors: monitor_ids.iter().map(|id| http_monitor(id)).collect(),
        }
    }

    fn manager() -> (tempfile::TempDir, SiteManager, Arc<RecordingOps>) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::initialize(&dir.path().join("watch.db")).unwrap();
        let registry = Arc::new(MonitorTypeRegistry::new());
        register_builtin_types(&registry, &EngineConfig::default()).unwrap();
        let ops = Arc::new(RecordingOps::default());
        let manager = SiteManager::new(
            engine,
            registry,
            Arc::new(EventBus::new("site-manager")),
            Arc::clone(&ops) as Arc<dyn MonitoringOps>,
            &CacheTuning::default(),
        );
        (dir, manager, ops)
    }

    #[tokio::test]
    async fn test_add_site_persists_and_sets_up_monitors() {
        let (_dir, manager, ops) = manager();
        let added = manager.add_site(draft_site("example", &["m1", "m2"])).await.unwrap();
        assert_eq!(added.monitors.len(), 2);

        let sites = manager.get_sites().await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].monitors.len(), 2);

        let setups = ops.setup.lock();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].len(), 2);
    }

    #[tokio::test]
    async fn test_add_site_rejects_duplicate_identifier() {
        let (_dir, manager, _ops) = manager();
        manager.add_site(draft_site("example", &["m1"])).await.unwrap();

        // Trimmed identifiers collide too
        let mut dup = draft_site("  example  ", &["m9"]);
        dup.name = "Other".into();
        let err = manager.add_site(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateSiteIdentifier(id) if id == "example"));
    }

    #[tokio::test]
    async fn test_add_site_rejects_invalid_monitor_payload() {
        let (_dir, manager, _ops) = manager();
        let mut site = draft_site("example", &["m1"]);
        site.monitors[0].url = None;
        let err = manager.add_site(site).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_site_diffs_monitor_set() {
        let (_dir, manager, ops) = manager();
        manager.add_site(draft_site("example", &["m1", "m2"])).await.unwrap();

        let updates = SiteUpdate {
            name: Some("Renamed".into()),
            monitors: Some(vec![http_monitor("m2"), http_monitor("m3")]),
            ..SiteUpdate::default()
        };
        let updated = manager.update_site("example", updates).await.unwrap();
        assert_eq!(updated.name, "Renamed");

        // m1 halted before delete, m3 set up, jobs synced
        assert!(ops
            .halted
            .lock()
            .contains(&("example".to_string(), Some("m1".to_string()))));
        assert!(ops.setup.lock().iter().any(|ids| ids.contains(&"m3".to_string())));
        assert_eq!(*ops.synced.lock(), 1);

        let site = manager.get_site("example").await.unwrap();
        let ids: Vec<&str> = site.monitors.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_update_missing_site_is_not_found() {
        let (_dir, manager, _ops) = manager();
        let err = manager
            .update_site("ghost", SiteUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_site_halts_jobs_first() {
        let (_dir, manager, ops) = manager();
        manager.add_site(draft_site("example", &["m1"])).await.unwrap();
        manager.remove_site("example").await.unwrap();

        assert_eq!(
            ops.halted.lock().as_slice(),
            &[("example".to_string(), None)]
        );
        assert!(manager.get_sites().await.unwrap().is_empty());
        assert!(matches!(
            manager.get_site("example").await.unwrap_err(),
            EngineError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_add_monitor_rejects_duplicate_id() {
        let (_dir, manager, _ops) = manager();
        manager.add_site(draft_site("example", &["m1"])).await.unwrap();

        let err = manager
            .add_monitor("example", http_monitor("m1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateMonitorId(id) if id == "m1"));

        let added = manager.add_monitor("example", http_monitor("m2")).await.unwrap();
        assert_eq!(added.site_identifier, "example");
    }

    #[tokio::test]
    async fn test_monitor_ids_are_globally_unique() {
        let (_dir, manager, _ops) = manager();
        manager.add_site(draft_site("one", &["shared"])).await.unwrap();
        manager.add_site(draft_site("two", &["m2"])).await.unwrap();

        // Collision with another site's monitor row, caught by the unique
        // constraint rather than the aggregate check
        let err = manager
            .add_monitor("two", http_monitor("shared"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateMonitorId(id) if id == "shared"));
    }

    #[tokio::test]
    async fn test_remove_monitor_keeps_at_least_one() {
        let (_dir, manager, _ops) = manager();
        manager.add_site(draft_site("example", &["m1", "m2"])).await.unwrap();

        let post = manager.remove_monitor("example", "m1").await.unwrap();
        assert_eq!(post.monitors.len(), 1);

        let err = manager.remove_monitor("example", "m2").await.unwrap_err();
        assert!(matches!(err, EngineError::NoMonitors(_)));
    }

    #[tokio::test]
    async fn test_get_site_serves_from_cache_after_load() {
        let (_dir, manager, _ops) = manager();
        manager.add_site(draft_site("example", &["m1"])).await.unwrap();

        manager.get_site("example").await.unwrap();
        let stats_before = manager.cache().stats();
        manager.get_site("example").await.unwrap();
        let stats_after = manager.cache().stats();
        assert!(stats_after.hits > stats_before.hits);
    }
}
