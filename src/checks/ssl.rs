//! TLS certificate check
//!
//! Performs a real handshake against `host:port` and inspects the peer
//! certificate: `up` iff the chain validates and the leaf is not expiring
//! within the configured warning window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::sync::CancellationToken;
use x509_parser::prelude::FromDer;

use super::{CheckFuture, CheckOutcome, Checker, elapsed_ms, run_cancellable};
use crate::core::Monitor;
use crate::utils::EngineResult;

const DEFAULT_TLS_PORT: u16 = 443;
const SECONDS_PER_DAY: i64 = 86_400;

pub struct SslChecker {
    connector: TlsConnector,
    default_warning_days: u32,
}

impl SslChecker {
    pub fn new(default_warning_days: u32) -> EngineResult<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            default_warning_days,
        })
    }

    async fn run(&self, monitor: &Monitor) -> CheckOutcome {
        let started = Instant::now();

        let Some(host) = monitor.host.clone() else {
            return CheckOutcome::down(0, "missing host", Some("monitor has no host".into()));
        };
        let port = monitor.port.unwrap_or(DEFAULT_TLS_PORT);
        let warning_days = monitor
            .expiry_warning_days
            .unwrap_or(self.default_warning_days);

        let attempt = tokio::time::timeout(
            Duration::from_millis(monitor.timeout_ms),
            self.handshake(&host, port),
        )
        .await;

        let elapsed = elapsed_ms(started);
        let not_after_ts = match attempt {
            Ok(Ok(ts)) => ts,
            Ok(Err(e)) => return CheckOutcome::down(elapsed, "tls failure", Some(e)),
            Err(_) => return CheckOutcome::timeout(elapsed),
        };

        let now_ts = crate::core::now_ms() / 1_000;
        let (healthy, days_left) = judge_expiry(not_after_ts, now_ts, warning_days);
        if healthy {
            CheckOutcome::up(elapsed, format!("expires in {days_left} days"))
        } else if days_left < 0 {
            CheckOutcome::down(elapsed, "certificate expired", None)
        } else {
            CheckOutcome::down(
                elapsed,
                format!("expires in {days_left} days"),
                Some(format!("within {warning_days}-day warning window")),
            )
        }
    }

    /// Connect, handshake, and return the leaf certificate's notAfter as
    /// epoch seconds
    async fn handshake(&self, host: &str, port: u16) -> Result<i64, String> {
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| format!("invalid host: {e}"))?;
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| format!("connect failed: {e}"))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| format!("handshake failed: {e}"))?;

        let (_io, session) = tls.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| "no peer certificate".to_string())?;

        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| format!("certificate parse failed: {e}"))?;
        Ok(parsed.validity().not_after.timestamp())
    }
}

impl Checker for SslChecker {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a> {
        Box::pin(run_cancellable(cancel, self.run(monitor)))
    }
}

/// `(healthy, whole days until expiry)`; negative days mean expired
fn judge_expiry(not_after_ts: i64, now_ts: i64, warning_days: u32) -> (bool, i64) {
    let seconds_left = not_after_ts - now_ts;
    let days_left = seconds_left.div_euclid(SECONDS_PER_DAY);
    let healthy = seconds_left > 0 && days_left >= i64::from(warning_days);
    (healthy, days_left)
}
