//! ICMP echo check
//!
//! Raw-socket ICMP usually needs elevated privileges; a permission error
//! comes back as a plain `down` with the cause in `error`, never a crash.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::{CheckFuture, CheckOutcome, Checker, elapsed_ms, run_cancellable};
use crate::core::Monitor;

pub struct PingChecker;

impl PingChecker {
    async fn run(monitor: &Monitor) -> CheckOutcome {
        let started = Instant::now();

        let Some(host) = monitor.host.as_deref() else {
            return CheckOutcome::down(0, "missing host", Some("monitor has no host".into()));
        };

        let address = match resolve_host(host).await {
            Ok(address) => address,
            Err(e) => return CheckOutcome::down(elapsed_ms(started), "resolve failed", Some(e)),
        };

        let attempt = tokio::time::timeout(
            Duration::from_millis(monitor.timeout_ms),
            surge_ping::ping(address, &[0; 8]),
        )
        .await;

        match attempt {
            Ok(Ok((_packet, round_trip))) => CheckOutcome::up(
                round_trip.as_millis() as u64,
                "icmp reply",
            ),
            Ok(Err(e)) => CheckOutcome::down(
                elapsed_ms(started),
                "ping failed",
                Some(e.to_string()),
            ),
            Err(_) => CheckOutcome::timeout(elapsed_ms(started)),
        }
    }
}

impl Checker for PingChecker {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a> {
        Box::pin(run_cancellable(cancel, Self::run(monitor)))
    }
}

/// Literal IPs pass through; names resolve via the system resolver
async fn resolve_host(host: &str) -> Result<IpAddr, String> {
    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(address);
    }
    let mut addresses = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| e.to_string())?;
    addresses
        .next()
        .map(|sock| sock.ip())
        .ok_or_else(|| format!("no addresses for '{host}'"))
}
