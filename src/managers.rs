//! Domain managers
//!
//! Site CRUD with cross-entity invariants, monitoring lifecycle, and data
//! portability. Each manager owns a dedicated internal event bus; the
//! orchestrator rewrites a fixed subset of `internal:*` events into their
//! public counterparts.
//!
//! Cross-manager calls go through the narrow [`MonitoringOps`] trait the
//! orchestrator injects, so no manager holds another manager directly.

pub mod database_manager;
pub mod monitor_manager;
pub mod site_manager;

use futures::future::BoxFuture;

pub use database_manager::{BackupArtifact, BackupMetadata, DatabaseManager, ImportPreview, PortableSnapshot};
pub use monitor_manager::{CheckRecorder, MonitorManager};
pub use site_manager::{SiteManager, SiteUpdate};

use crate::core::Site;
use crate::utils::EngineResult;

/// The cross-manager operations the site manager needs from monitoring
///
/// A narrow seam instead of a manager reference: the orchestrator hands
/// the site manager exactly these calls and nothing else.
pub trait MonitoringOps: Send + Sync {
    /// Stop scheduler jobs without touching persistence
    ///
    /// `monitor_id: None` halts every job of the site. Used before
    /// destructive writes so no check races the delete.
    fn halt_jobs(&self, site_identifier: &str, monitor_id: Option<&str>);

    /// Initialize scheduler jobs for newly added monitors
    fn setup_new_monitors<'a>(
        &'a self,
        site: &'a Site,
        new_ids: &'a [String],
    ) -> BoxFuture<'a, EngineResult<()>>;

    /// Reconcile a site's scheduler jobs with its persisted monitors
    ///
    /// Jobs for `monitoring` monitors are (re)built with fresh state;
    /// jobs for disabled ones are stopped.
    fn sync_site_jobs<'a>(&'a self, site: &'a Site) -> BoxFuture<'a, EngineResult<()>>;
}
