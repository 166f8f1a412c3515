//! TCP port connectivity check

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::{CheckFuture, CheckOutcome, Checker, elapsed_ms, run_cancellable};
use crate::core::Monitor;

/// `up` on a successful TCP handshake to `host:port`
pub struct PortChecker;

impl PortChecker {
    async fn run(monitor: &Monitor) -> CheckOutcome {
        let started = Instant::now();

        let (Some(host), Some(port)) = (monitor.host.as_deref(), monitor.port) else {
            return CheckOutcome::down(0, "missing host/port", Some("monitor has no target".into()));
        };

        let attempt = tokio::time::timeout(
            Duration::from_millis(monitor.timeout_ms),
            TcpStream::connect((host, port)),
        )
        .await;

        let elapsed = elapsed_ms(started);
        match attempt {
            Ok(Ok(_stream)) => CheckOutcome::up(elapsed, "connected"),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                CheckOutcome::down(elapsed, "connection refused", Some(e.to_string()))
            }
            Ok(Err(e)) => CheckOutcome::down(elapsed, "connect failed", Some(e.to_string())),
            Err(_) => CheckOutcome::timeout(elapsed),
        }
    }
}

impl Checker for PortChecker {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a> {
        Box::pin(run_cancellable(cancel, Self::run(monitor)))
    }
}
