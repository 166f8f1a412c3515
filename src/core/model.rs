//! Domain model: sites, monitors, status history, settings
//!
//! These are the aggregate shapes the repositories persist and the managers
//! enforce invariants over. Wire serialization is camelCase throughout.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};

use crate::utils::{EngineError, EngineResult, FieldIssue};

// ============================================================================
// Monitor status
// ============================================================================

/// Lifecycle status of a single monitor
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Pending,
    Up,
    Down,
    Paused,
    Unknown,
}

impl MonitorStatus {
    /// Only `up` and `down` are ever written to status history
    #[must_use]
    pub fn is_recordable(self) -> bool {
        matches!(self, MonitorStatus::Up | MonitorStatus::Down)
    }
}

// ============================================================================
// Site
// ============================================================================

/// A named collection of monitors sharing a user-facing identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Unique, trimmed, non-empty primary key
    pub identifier: String,
    pub name: String,
    /// Whether the site participates in scheduled checks
    #[serde(default)]
    pub monitoring: bool,
    pub monitors: Vec<Monitor>,
}

impl Site {
    /// Trim identifier and name in place
    pub fn normalize(&mut self) {
        self.identifier = self.identifier.trim().to_string();
        self.name = self.name.trim().to_string();
        for monitor in &mut self.monitors {
            monitor.id = monitor.id.trim().to_string();
            monitor.site_identifier = self.identifier.clone();
        }
    }

    /// Enforce the write-time invariants
    ///
    /// - identifier and name non-empty after trim
    /// - at least one monitor
    /// - monitor IDs unique within the site
    pub fn validate(&self) -> EngineResult<()> {
        let mut issues = Vec::new();
        if self.identifier.trim().is_empty() {
            issues.push(FieldIssue::new("identifier", "must not be empty"));
        }
        if self.name.trim().is_empty() {
            issues.push(FieldIssue::new("name", "must not be empty"));
        }
        if !issues.is_empty() {
            return Err(EngineError::validation("site fields invalid", issues));
        }

        if self.monitors.is_empty() {
            return Err(EngineError::NoMonitors(self.identifier.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for monitor in &self.monitors {
            if !seen.insert(monitor.id.as_str()) {
                return Err(EngineError::DuplicateMonitorId(monitor.id.clone()));
            }
            monitor.validate_basics()?;
        }
        Ok(())
    }

    /// Look up a monitor by id
    #[must_use]
    pub fn monitor(&self, monitor_id: &str) -> Option<&Monitor> {
        self.monitors.iter().find(|m| m.id == monitor_id)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// A single health check definition attached to a site
///
/// The common columns are always present; the type-specific fields are the
/// canonical dynamic columns; which of them a given monitor uses is decided
/// by its registered type descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub site_identifier: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    #[serde(default = "Monitor::default_status")]
    pub status: MonitorStatus,
    pub check_interval_ms: u64,
    #[serde(default = "Monitor::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Internal retries within a single check; distinct from scheduler backoff
    #[serde(default)]
    pub retry_attempts: u32,
    /// Per-monitor enable flag
    #[serde(default)]
    pub monitoring: bool,

    // Type-specific columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    /// Accepted HTTP statuses for `http-status`, e.g. "200,204,301-399"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_codes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_threshold_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_warning_days: Option<u32>,
}

/// Floor for `check_interval_ms`, mirrored by the scheduler's delay floor
pub const MIN_CHECK_INTERVAL_MS: u64 = 5_000;

impl Monitor {
    fn default_status() -> MonitorStatus {
        MonitorStatus::Pending
    }

    fn default_timeout_ms() -> u64 {
        30_000
    }

    /// A fresh monitor draft with spec defaults
    #[must_use]
    pub fn draft(
        id: impl Into<String>,
        site_identifier: impl Into<String>,
        monitor_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            site_identifier: site_identifier.into(),
            monitor_type: monitor_type.into(),
            status: MonitorStatus::Pending,
            check_interval_ms: 60_000,
            timeout_ms: Self::default_timeout_ms(),
            retry_attempts: 0,
            monitoring: false,
            url: None,
            host: None,
            port: None,
            record_type: None,
            expected_value: None,
            status_codes: None,
            header_name: None,
            keyword: None,
            json_path: None,
            latency_threshold_ms: None,
            expiry_warning_days: None,
        }
    }

    /// Field-level invariants shared by every monitor type
    pub fn validate_basics(&self) -> EngineResult<()> {
        let mut issues = Vec::new();
        if self.id.trim().is_empty() {
            issues.push(FieldIssue::new("id", "must not be empty"));
        }
        if self.check_interval_ms < MIN_CHECK_INTERVAL_MS {
            issues.push(FieldIssue::new(
                "checkIntervalMs",
                format!("must be at least {MIN_CHECK_INTERVAL_MS}"),
            ));
        }
        if self.timeout_ms == 0 {
            issues.push(FieldIssue::new("timeoutMs", "must be positive"));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::validation(
                format!("monitor '{}' invalid", self.id),
                issues,
            ))
        }
    }
}

impl Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.site_identifier, self.id, self.monitor_type
        )
    }
}

// ============================================================================
// Status history
// ============================================================================

/// One recorded check outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub monitor_id: String,
    /// Epoch milliseconds; monotonically non-decreasing per monitor
    pub timestamp_ms: i64,
    pub status: MonitorStatus,
    /// May be 0 on failure
    pub response_time_ms: u64,
    /// Short detail string: HTTP status code, error category, "timeout"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// Keys starting with this prefix are local-only and excluded from export
pub const RESERVED_SETTINGS_PREFIX: &str = "cloud.";

/// Canonical key for the per-monitor history cap
pub const HISTORY_LIMIT_KEY: &str = "historyLimit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.key.starts_with(RESERVED_SETTINGS_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site_with_monitors(monitors: Vec<Monitor>) -> Site {
        Site {
            identifier: "example".to_string(),
            name: "Example".to_string(),
            monitoring: false,
            monitors,
        }
    }

    fn http_monitor(id: &str) -> Monitor {
        let mut m = Monitor::draft(id, "example", "http");
        m.url = Some("http://127.0.0.1:9001/ok".to_string());
        m.check_interval_ms = 5_000;
        m
    }

    #[test]
    fn test_status_serialization_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&MonitorStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(MonitorStatus::Up.to_string(), "up");
    }

    #[test]
    fn test_only_up_down_are_recordable() {
        assert!(MonitorStatus::Up.is_recordable());
        assert!(MonitorStatus::Down.is_recordable());
        assert!(!MonitorStatus::Pending.is_recordable());
        assert!(!MonitorStatus::Paused.is_recordable());
        assert!(!MonitorStatus::Unknown.is_recordable());
    }

    #[test]
    fn test_site_validation_accepts_well_formed_site() {
        let site = site_with_monitors(vec![http_monitor("m1")]);
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_site_validation_rejects_blank_identifier() {
        let mut site = site_with_monitors(vec![http_monitor("m1")]);
        site.identifier = "   ".to_string();
        let err = site.validate().unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn test_site_validation_rejects_empty_monitor_set() {
        let site = site_with_monitors(vec![]);
        assert!(matches!(
            site.validate().unwrap_err(),
            EngineError::NoMonitors(_)
        ));
    }

    #[test]
    fn test_site_validation_rejects_duplicate_monitor_ids() {
        let site = site_with_monitors(vec![http_monitor("m1"), http_monitor("m1")]);
        assert!(matches!(
            site.validate().unwrap_err(),
            EngineError::DuplicateMonitorId(id) if id == "m1"
        ));
    }

    #[test]
    fn test_monitor_interval_floor() {
        let mut m = http_monitor("m1");
        m.check_interval_ms = 4_999;
        assert!(m.validate_basics().is_err());
        m.check_interval_ms = 5_000;
        assert!(m.validate_basics().is_ok());
    }

    #[test]
    fn test_normalize_trims_and_propagates_site_identifier() {
        let mut site = site_with_monitors(vec![http_monitor(" m1 ")]);
        site.identifier = "  example  ".to_string();
        site.name = " Example ".to_string();
        site.normalize();
        assert_eq!(site.identifier, "example");
        assert_eq!(site.monitors[0].id, "m1");
        assert_eq!(site.monitors[0].site_identifier, "example");
    }

    #[test]
    fn test_monitor_serde_uses_type_discriminator() {
        let m = http_monitor("m1");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "http");
        assert_eq!(json["checkIntervalMs"], 5_000);
        // Unused type-specific fields are omitted entirely
        assert!(json.get("host").is_none());
    }

    #[test]
    fn test_reserved_setting_prefix() {
        assert!(Setting::new("cloud.syncToken", "x").is_reserved());
        assert!(!Setting::new(HISTORY_LIMIT_KEY, "500").is_reserved());
    }
}
