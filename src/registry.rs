//! Monitor type registry
//!
//! Process-wide map from `type` string to descriptor: validation, display
//! metadata, and the check factory the scheduler uses to build a job's
//! executor. Written only at engine startup, before the scheduler runs;
//! read-only thereafter.

pub mod descriptor;
pub mod migrations;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::checks::{
    Checker, DnsChecker, HostRateLimiter, HttpChecker, HttpMode, PingChecker, PortChecker,
    SslChecker,
};
use crate::config::EngineConfig;
use crate::core::Monitor;
use crate::utils::{EngineResult, FieldIssue};

pub use descriptor::{
    FieldDescriptor, FieldKind, MonitorTypeDescriptor, MonitorTypeSummary, ValidationResult,
};
pub use migrations::{MigrationRegistry, MigrationRule};

#[derive(Debug, Default)]
pub struct MonitorTypeRegistry {
    types: RwLock<BTreeMap<String, Arc<MonitorTypeDescriptor>>>,
}

impl MonitorTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor
    pub fn register(&self, descriptor: MonitorTypeDescriptor) {
        let mut types = self.types.write();
        if types
            .insert(descriptor.type_name.clone(), Arc::new(descriptor))
            .is_some()
        {
            tracing::debug!("Monitor type descriptor replaced");
        }
    }

    #[must_use]
    pub fn get(&self, monitor_type: &str) -> Option<Arc<MonitorTypeDescriptor>> {
        self.types.read().get(monitor_type).cloned()
    }

    /// Stable-ordered snapshot of every registered descriptor
    #[must_use]
    pub fn list(&self) -> Vec<Arc<MonitorTypeDescriptor>> {
        self.types.read().values().cloned().collect()
    }

    #[must_use]
    pub fn is_registered(&self, monitor_type: &str) -> bool {
        self.types.read().contains_key(monitor_type)
    }

    /// Apply the type's schema to a monitor payload
    #[must_use]
    pub fn validate(&self, monitor_type: &str, monitor: &Monitor) -> ValidationResult {
        match self.get(monitor_type) {
            Some(descriptor) => (descriptor.validator)(monitor),
            None => ValidationResult::fail(vec![FieldIssue::new(
                "type",
                format!("unknown monitor type '{monitor_type}'"),
            )]),
        }
    }

    /// Build a fresh checker for the type
    #[must_use]
    pub fn make_checker(&self, monitor_type: &str) -> Option<Arc<dyn Checker>> {
        self.get(monitor_type).map(|d| (d.check_factory)())
    }
}

// ============================================================================
// Built-in types
// ============================================================================

/// Register the canonical monitor types
///
/// Called once by the composition root; the HTTP family shares one rate
/// limiter so monitors pointed at a single host spread out.
pub fn register_builtin_types(
    registry: &MonitorTypeRegistry,
    config: &EngineConfig,
) -> EngineResult<()> {
    let limiter = Arc::new(HostRateLimiter::new(
        config.http.per_host_burst,
        config.http.per_host_refill_per_s,
    ));

    let http_modes: &[(&str, &str, &str, HttpMode)] = &[
        (
            "http",
            "HTTP",
            "GET request; success statuses count as up",
            HttpMode::Basic,
        ),
        (
            "http-status",
            "HTTP Status",
            "GET request matched against an accepted status list",
            HttpMode::StatusList,
        ),
        (
            "http-keyword",
            "HTTP Keyword",
            "GET request whose body must contain a keyword",
            HttpMode::Keyword,
        ),
        (
            "http-header",
            "HTTP Header",
            "GET request whose named header must match",
            HttpMode::Header,
        ),
        (
            "http-json",
            "HTTP JSON",
            "GET request whose JSON body must resolve a path to a value",
            HttpMode::Json,
        ),
        (
            "http-latency",
            "HTTP Latency",
            "GET request that must answer within a latency threshold",
            HttpMode::Latency,
        ),
    ];

    for (type_name, display_name, description, mode) in http_modes {
        let checker: Arc<dyn Checker> =
            Arc::new(HttpChecker::new(*mode, &config.http, Arc::clone(&limiter))?);
        registry.register(MonitorTypeDescriptor {
            type_name: (*type_name).to_string(),
            display_name: (*display_name).to_string(),
            description: (*description).to_string(),
            version: semver::Version::new(1, 0, 0),
            fields: http_fields(*mode),
            validator: http_validator(*mode),
            check_factory: Box::new(move || Arc::clone(&checker)),
        });
    }

    let port_checker: Arc<dyn Checker> = Arc::new(PortChecker);
    registry.register(MonitorTypeDescriptor {
        type_name: "port".into(),
        display_name: "TCP Port".into(),
        description: "TCP handshake against host:port".into(),
        version: semver::Version::new(1, 0, 0),
        fields: vec![
            FieldDescriptor::required("host", "Host", FieldKind::Host),
            FieldDescriptor::required("port", "Port", FieldKind::Port),
        ],
        validator: Box::new(|monitor| {
            let mut issues = base_issues(monitor);
            if monitor.host.as_deref().is_none_or(str::is_empty) {
                issues.push(FieldIssue::new("host", "required"));
            }
            if monitor.port.is_none() {
                issues.push(FieldIssue::new("port", "required"));
            }
            ValidationResult::from_issues(issues)
        }),
        check_factory: Box::new(move || Arc::clone(&port_checker)),
    });

    let ping_checker: Arc<dyn Checker> = Arc::new(PingChecker);
    registry.register(MonitorTypeDescriptor {
        type_name: "ping".into(),
        display_name: "Ping".into(),
        description: "ICMP echo against host".into(),
        version: semver::Version::new(1, 0, 0),
        fields: vec![FieldDescriptor::required("host", "Host", FieldKind::Host)],
        validator: Box::new(|monitor| {
            let mut issues = base_issues(monitor);
            if monitor.host.as_deref().is_none_or(str::is_empty) {
                issues.push(FieldIssue::new("host", "required"));
            }
            ValidationResult::from_issues(issues)
        }),
        check_factory: Box::new(move || Arc::clone(&ping_checker)),
    });

    let dns_checker: Arc<dyn Checker> = Arc::new(DnsChecker);
    registry.register(MonitorTypeDescriptor {
        type_name: "dns".into(),
        display_name: "DNS".into(),
        description: "Record resolution, optionally matched against a value".into(),
        version: semver::Version::new(1, 0, 0),
        fields: vec![
            FieldDescriptor::required("host", "Host", FieldKind::Host),
            FieldDescriptor::optional("recordType", "Record type", FieldKind::Select),
            FieldDescriptor::optional("expectedValue", "Expected value", FieldKind::Text),
        ],
        validator: Box::new(|monitor| {
            let mut issues = base_issues(monitor);
            if monitor.host.as_deref().is_none_or(str::is_empty) {
                issues.push(FieldIssue::new("host", "required"));
            }
            let mut result = ValidationResult::from_issues(issues);
            if let Some(record_type) = monitor.record_type.as_deref() {
                const KNOWN: &[&str] = &["A", "AAAA", "MX", "TXT", "NS", "CNAME", "PTR", "SRV", "CAA"];
                if !KNOWN.contains(&record_type.to_uppercase().as_str()) {
                    result
                        .warnings
                        .push(format!("record type '{record_type}' may be unsupported"));
                }
            }
            result
        }),
        check_factory: Box::new(move || Arc::clone(&dns_checker)),
    });

    let ssl_checker: Arc<dyn Checker> = Arc::new(SslChecker::new(config.ssl.expiry_warning_days)?);
    registry.register(MonitorTypeDescriptor {
        type_name: "ssl".into(),
        display_name: "SSL Certificate".into(),
        description: "TLS handshake with certificate expiry window".into(),
        version: semver::Version::new(1, 0, 0),
        fields: vec![
            FieldDescriptor::required("host", "Host", FieldKind::Host),
            FieldDescriptor::optional("port", "Port", FieldKind::Port),
            FieldDescriptor::optional("expiryWarningDays", "Warning window (days)", FieldKind::Number),
        ],
        validator: Box::new(|monitor| {
            let mut issues = base_issues(monitor);
            if monitor.host.as_deref().is_none_or(str::is_empty) {
                issues.push(FieldIssue::new("host", "required"));
            }
            ValidationResult::from_issues(issues)
        }),
        check_factory: Box::new(move || Arc::clone(&ssl_checker)),
    });

    tracing::info!("Registered {} monitor types", registry.list().len());
    Ok(())
}

fn http_fields(mode: HttpMode) -> Vec<FieldDescriptor> {
    let mut fields = vec![FieldDescriptor::required("url", "URL", FieldKind::Url)];
    match mode {
        HttpMode::Basic => {}
        HttpMode::StatusList => {
            fields.push(FieldDescriptor::required(
                "statusCodes",
                "Accepted statuses",
                FieldKind::Text,
            ));
        }
        HttpMode::Keyword => {
            fields.push(FieldDescriptor::required("keyword", "Keyword", FieldKind::Text));
        }
        HttpMode::Header => {
            fields.push(FieldDescriptor::required(
                "headerName",
                "Header",
                FieldKind::Text,
            ));
            fields.push(FieldDescriptor::required(
                "expectedValue",
                "Expected value",
                FieldKind::Text,
            ));
        }
        HttpMode::Json => {
            fields.push(FieldDescriptor::required(
                "jsonPath",
                "JSON path",
                FieldKind::Text,
            ));
            fields.push(FieldDescriptor::required(
                "expectedValue",
                "Expected value",
                FieldKind::Text,
            ));
        }
        HttpMode::Latency => {
            fields.push(FieldDescriptor::required(
                "latencyThresholdMs",
                "Latency threshold (ms)",
                FieldKind::Number,
            ));
        }
    }
    fields
}

fn http_validator(
    mode: HttpMode,
) -> Box<dyn Fn(&Monitor) -> ValidationResult + Send + Sync> {
    Box::new(move |monitor| {
        let mut issues = base_issues(monitor);
        match monitor.url.as_deref() {
            None | Some("") => issues.push(FieldIssue::new("url", "required")),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                issues.push(FieldIssue::new("url", "must be an http(s) URL"));
            }
            Some(_) => {}
        }
        match mode {
            HttpMode::Basic => {}
            HttpMode::StatusList => {
                if monitor.status_codes.as_deref().is_none_or(str::is_empty) {
                    issues.push(FieldIssue::new("statusCodes", "required"));
                }
            }
            HttpMode::Keyword => {
                if monitor.keyword.as_deref().is_none_or(str::is_empty) {
                    issues.push(FieldIssue::new("keyword", "required"));
                }
            }
            HttpMode::Header => {
                if monitor.header_name.as_deref().is_none_or(str::is_empty) {
                    issues.push(FieldIssue::new("headerName", "required"));
                }
                if monitor.expected_value.is_none() {
                    issues.push(FieldIssue::new("expectedValue", "required"));
                }
            }
            HttpMode::Json => {
                if monitor.json_path.as_deref().is_none_or(str::is_empty) {
                    issues.push(FieldIssue::new("jsonPath", "required"));
                }
                if monitor.expected_value.is_none() {
                    issues.push(FieldIssue::new("expectedValue", "required"));
                }
            }
            HttpMode::Latency => {
                if monitor.latency_threshold_ms.is_none() {
                    issues.push(FieldIssue::new("latencyThresholdMs", "required"));
                }
            }
        }
        ValidationResult::from_issues(issues)
    })
}

/// Field issues shared by every type (interval floor, timeout, id)
fn base_issues(monitor: &Monitor) -> Vec<FieldIssue> {
    match monitor.validate_basics() {
        Ok(()) => Vec::new(),
        Err(crate::utils::EngineError::Validation { issues, .. }) => issues,
        Err(other) => vec![FieldIssue::new("monitor", other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MonitorTypeRegistry {
        let registry = MonitorTypeRegistry::new();
        register_builtin_types(&registry, &EngineConfig::default()).unwrap();
        registry
    }

    #[test]
    fn test_builtin_types_are_registered_in_stable_order() {
        let registry = registry();
        let names: Vec<String> = registry
            .list()
            .iter()
            .map(|d| d.type_name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        for expected in [
            "http",
            "http-status",
            "http-keyword",
            "http-header",
            "http-json",
            "http-latency",
            "port",
            "ping",
            "dns",
            "ssl",
        ] {
            assert!(registry.is_registered(expected), "missing {expected}");
        }
    }

    #[test]
    fn test_unknown_type_fails_validation() {
        let registry = registry();
        let monitor = Monitor::draft("m1", "s", "carrier-pigeon");
        let result = registry.validate("carrier-pigeon", &monitor);
        assert!(!result.success);
        assert_eq!(result.issues[0].field, "type");
    }

    #[test]
    fn test_http_requires_url() {
        let registry = registry();
        let mut monitor = Monitor::draft("m1", "s", "http");
        monitor.check_interval_ms = 5_000;

        let result = registry.validate("http", &monitor);
        assert!(!result.success);
        assert!(result.issues.iter().any(|i| i.field == "url"));

        monitor.url = Some("https://example.com".into());
        assert!(registry.validate("http", &monitor).success);
    }

    #[test]
    fn test_http_rejects_non_http_scheme() {
        let registry = registry();
        let mut monitor = Monitor::draft("m1", "s", "http");
        monitor.check_interval_ms = 5_000;
        monitor.url = Some("ftp://example.com".into());
        let result = registry.validate("http", &monitor);
        assert!(!result.success);
    }

    #[test]
    fn test_keyword_type_requires_keyword() {
        let registry = registry();
        let mut monitor = Monitor::draft("m1", "s", "http-keyword");
        monitor.check_interval_ms = 5_000;
        monitor.url = Some("https://example.com".into());

        assert!(!registry.validate("http-keyword", &monitor).success);
        monitor.keyword = Some("healthy".into());
        assert!(registry.validate("http-keyword", &monitor).success);
    }

    #[test]
    fn test_dns_warns_on_odd_record_type() {
        let registry = registry();
        let mut monitor = Monitor::draft("m1", "s", "dns");
        monitor.check_interval_ms = 5_000;
        monitor.host = Some("example.com".into());
        monitor.record_type = Some("SPF".into());

        let result = registry.validate("dns", &monitor);
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_make_checker_for_registered_type() {
        let registry = registry();
        assert!(registry.make_checker("port").is_some());
        assert!(registry.make_checker("nope").is_none());
    }
}
