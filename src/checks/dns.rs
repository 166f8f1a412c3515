//! DNS resolution check
//!
//! Resolves `host` for the configured record type. With an expected value
//! the check passes only when some record matches (case-insensitive,
//! trailing dots ignored); without one, successful resolution is enough.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::proto::rr::RecordType;

use super::{CheckFuture, CheckOutcome, Checker, elapsed_ms, run_cancellable};
use crate::core::Monitor;

pub struct DnsChecker;

impl DnsChecker {
    async fn run(monitor: &Monitor) -> CheckOutcome {
        let started = Instant::now();

        let Some(host) = monitor.host.as_deref() else {
            return CheckOutcome::down(0, "missing host", Some("monitor has no host".into()));
        };
        let record_type = monitor
            .record_type
            .as_deref()
            .unwrap_or("A")
            .to_uppercase();

        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        let attempt = tokio::time::timeout(
            Duration::from_millis(monitor.timeout_ms),
            lookup(&resolver, host, &record_type),
        )
        .await;

        let elapsed = elapsed_ms(started);
        let values = match attempt {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => return CheckOutcome::down(elapsed, "lookup failed", Some(e)),
            Err(_) => return CheckOutcome::timeout(elapsed),
        };

        if values.is_empty() {
            return CheckOutcome::down(
                elapsed,
                "no records",
                Some(format!("no {record_type} records for {host}")),
            );
        }

        match monitor.expected_value.as_deref() {
            Some(expected) => {
                if values.iter().any(|v| record_value_matches(v, expected)) {
                    CheckOutcome::up(elapsed, format!("{record_type} match"))
                } else {
                    CheckOutcome::down(
                        elapsed,
                        "record mismatch",
                        Some(format!("expected '{expected}', got: {}", values.join(", "))),
                    )
                }
            }
            None => CheckOutcome::up(elapsed, format!("{record_type} resolved")),
        }
    }
}

impl Checker for DnsChecker {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a> {
        Box::pin(run_cancellable(cancel, Self::run(monitor)))
    }
}

/// Look up one record type and render the answers as strings
async fn lookup(
    resolver: &TokioAsyncResolver,
    host: &str,
    record_type: &str,
) -> Result<Vec<String>, String> {
    match record_type {
        "A" => {
            let response = resolver.ipv4_lookup(host).await.map_err(|e| e.to_string())?;
            Ok(response.iter().map(|ip| ip.to_string()).collect())
        }
        "AAAA" => {
            let response = resolver.ipv6_lookup(host).await.map_err(|e| e.to_string())?;
            Ok(response.iter().map(|ip| ip.to_string()).collect())
        }
        "MX" => {
            let response = resolver.mx_lookup(host).await.map_err(|e| e.to_string())?;
            Ok(response
                .iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect())
        }
        "TXT" => {
            let response = resolver.txt_lookup(host).await.map_err(|e| e.to_string())?;
            Ok(response.iter().map(|txt| txt.to_string()).collect())
        }
        "NS" => {
            let response = resolver.ns_lookup(host).await.map_err(|e| e.to_string())?;
            Ok(response.iter().map(|ns| ns.to_string()).collect())
        }
        "CNAME" | "PTR" | "SRV" | "CAA" => {
            let rtype = match record_type {
                "CNAME" => RecordType::CNAME,
                "PTR" => RecordType::PTR,
                "SRV" => RecordType::SRV,
                _ => RecordType::CAA,
            };
            let response = resolver
                .lookup(host, rtype)
                .await
                .map_err(|e| e.to_string())?;
            Ok(response.iter().map(|r| r.to_string()).collect())
        }
        other => Err(format!("unsupported record type: {other}")),
    }
}

/// Case-insensitive comparison ignoring DNS trailing dots
fn record_value_matches(actual: &str, expected: &str) -> bool {
    let actual = actual.to_lowercase();
    let expected = expected.to_lowercase();
    actual == expected
        || actual.trim_end_matches('.') == expected.trim_end_matches('.')
}
