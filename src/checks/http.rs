//! HTTP-family check executors
//!
//! One checker struct covers the whole family; the mode picks the verdict
//! rule applied to the response. All modes share a redirect-bounded client
//! and the per-host rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::rate_limit::HostRateLimiter;
use super::{CheckFuture, CheckOutcome, Checker, elapsed_ms, run_cancellable};
use crate::config::HttpTuning;
use crate::core::Monitor;
use crate::utils::{EngineError, EngineResult};

/// HTTP(S) responses in `[200, 400)` count as success
const SUCCESS_RANGE: std::ops::Range<u16> = 200..400;

/// Verdict rule applied to the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// `up` iff the final status is in `[200, 400)`
    Basic,
    /// `up` iff the status matches the monitor's configured list/ranges
    StatusList,
    /// `up` iff the body contains the keyword within the scan cap
    Keyword,
    /// `up` iff the named header matches the expected value
    Header,
    /// `up` iff the JSON body resolves the configured path to the value
    Json,
    /// `up` iff success status and response time ≤ threshold
    Latency,
}

pub struct HttpChecker {
    client: reqwest::Client,
    mode: HttpMode,
    keyword_scan_cap: usize,
    limiter: Arc<HostRateLimiter>,
}

impl HttpChecker {
    pub fn new(
        mode: HttpMode,
        tuning: &HttpTuning,
        limiter: Arc<HostRateLimiter>,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(tuning.max_redirects))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EngineError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            mode,
            keyword_scan_cap: tuning.keyword_scan_cap_bytes,
            limiter,
        })
    }

    async fn run(&self, monitor: &Monitor) -> CheckOutcome {
        let started = Instant::now();

        let Some(url) = monitor.url.as_deref() else {
            return CheckOutcome::down(0, "missing url", Some("monitor has no url".into()));
        };
        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return CheckOutcome::down(0, "invalid url", Some(e.to_string())),
        };

        if let Some(host) = parsed.host_str() {
            self.limiter.acquire(host).await;
        }

        let result = self
            .client
            .get(parsed)
            .timeout(Duration::from_millis(monitor.timeout_ms))
            .send()
            .await;

        match result {
            Ok(response) => self.judge(monitor, response, started).await,
            Err(e) if e.is_timeout() => CheckOutcome::timeout(elapsed_ms(started)),
            Err(e) if e.is_connect() => CheckOutcome::down(
                elapsed_ms(started),
                "connection refused",
                Some(e.to_string()),
            ),
            Err(e) => CheckOutcome::down(
                elapsed_ms(started),
                "request failed",
                Some(e.to_string()),
            ),
        }
    }

    async fn judge(
        &self,
        monitor: &Monitor,
        response: reqwest::Response,
        started: Instant,
    ) -> CheckOutcome {
        let code = response.status().as_u16();
        let details = code.to_string();

        match self.mode {
            HttpMode::Basic => {
                let elapsed = elapsed_ms(started);
                if SUCCESS_RANGE.contains(&code) {
                    CheckOutcome::up(elapsed, details)
                } else {
                    CheckOutcome::down(elapsed, details, None)
                }
            }
            HttpMode::StatusList => {
                let elapsed = elapsed_ms(started);
                let ranges = parse_status_codes(monitor.status_codes.as_deref().unwrap_or(""));
                let accepted = if ranges.is_empty() {
                    SUCCESS_RANGE.contains(&code)
                } else {
                    ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&code))
                };
                if accepted {
                    CheckOutcome::up(elapsed, details)
                } else {
                    CheckOutcome::down(
                        elapsed,
                        details,
                        Some("status not in accepted list".into()),
                    )
                }
            }
            HttpMode::Keyword => {
                if !SUCCESS_RANGE.contains(&code) {
                    return CheckOutcome::down(elapsed_ms(started), details, None);
                }
                let Some(keyword) = monitor.keyword.clone() else {
                    return CheckOutcome::down(
                        elapsed_ms(started),
                        details,
                        Some("monitor has no keyword".into()),
                    );
                };
                match read_capped_body(response, self.keyword_scan_cap).await {
                    Ok(body) => {
                        let elapsed = elapsed_ms(started);
                        if String::from_utf8_lossy(&body).contains(&keyword) {
                            CheckOutcome::up(elapsed, details)
                        } else {
                            CheckOutcome::down(
                                elapsed,
                                details,
                                Some("keyword not found".into()),
                            )
                        }
                    }
                    Err(e) => CheckOutcome::down(
                        elapsed_ms(started),
                        details,
                        Some(format!("body read error: {e}")),
                    ),
                }
            }
            HttpMode::Header => {
                let elapsed = elapsed_ms(started);
                let Some(name) = monitor.header_name.as_deref() else {
                    return CheckOutcome::down(
                        elapsed,
                        details,
                        Some("monitor has no header name".into()),
                    );
                };
                let expected = monitor.expected_value.as_deref().unwrap_or("");
                let actual = response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok());
                match actual {
                    Some(value) if header_matches(value, expected) => {
                        CheckOutcome::up(elapsed, details)
                    }
                    Some(_) => CheckOutcome::down(
                        elapsed,
                        details,
                        Some(format!("header '{name}' mismatch")),
                    ),
                    None => CheckOutcome::down(
                        elapsed,
                        details,
                        Some(format!("header '{name}' absent")),
                    ),
                }
            }
            HttpMode::Json => {
                if !SUCCESS_RANGE.contains(&code) {
                    return CheckOutcome::down(elapsed_ms(started), details, None);
                }
                let (path, expected) = match (
                    monitor.json_path.as_deref(),
                    monitor.expected_value.as_deref(),
                ) {
                    (Some(path), Some(expected)) => (path, expected),
                    _ => {
                        return CheckOutcome::down(
                            elapsed_ms(started),
                            details,
                            Some("monitor has no json path/expected value".into()),
                        );
                    }
                };
                let body = match read_capped_body(response, self.keyword_scan_cap).await {
                    Ok(body) => body,
                    Err(e) => {
                        return CheckOutcome::down(
                            elapsed_ms(started),
                            details,
                            Some(format!("body read error: {e}")),
                        );
                    }
                };
                let elapsed = elapsed_ms(started);
                match serde_json::from_slice::<serde_json::Value>(&body) {
                    Ok(value) => match resolve_json_path(&value, path) {
                        Some(found) if json_value_equals(found, expected) => {
                            CheckOutcome::up(elapsed, details)
                        }
                        Some(found) => CheckOutcome::down(
                            elapsed,
                            details,
                            Some(format!("'{path}' resolved to {found}")),
                        ),
                        None => CheckOutcome::down(
                            elapsed,
                            details,
                            Some(format!("'{path}' not present")),
                        ),
                    },
                    Err(e) => CheckOutcome::down(
                        elapsed,
                        details,
                        Some(format!("invalid json: {e}")),
                    ),
                }
            }
            HttpMode::Latency => {
                let elapsed = elapsed_ms(started);
                if !SUCCESS_RANGE.contains(&code) {
                    return CheckOutcome::down(elapsed, details, None);
                }
                let threshold = monitor.latency_threshold_ms.unwrap_or(u64::MAX);
                if elapsed <= threshold {
                    CheckOutcome::up(elapsed, details)
                } else {
                    CheckOutcome::down(
                        elapsed,
                        details,
                        Some(format!("response time {elapsed}ms exceeds {threshold}ms")),
                    )
                }
            }
        }
    }
}

impl Checker for HttpChecker {
    fn check<'a>(&'a self, monitor: &'a Monitor, cancel: &'a CancellationToken) -> CheckFuture<'a> {
        Box::pin(run_cancellable(cancel, self.run(monitor)))
    }
}

/// Read at most `cap` bytes of the response body
async fn read_capped_body(
    mut response: reqwest::Response,
    cap: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let remaining = cap.saturating_sub(body.len());
        if remaining == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }
    Ok(body)
}

/// Parse "200,204,301-399" into inclusive ranges; malformed segments are
/// skipped with a warning
fn parse_status_codes(spec: &str) -> Vec<(u16, u16)> {
    let mut ranges = Vec::new();
    for segment in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = match segment.split_once('-') {
            Some((lo, hi)) => lo
                .trim()
                .parse::<u16>()
                .ok()
                .zip(hi.trim().parse::<u16>().ok()),
            None => segment.parse::<u16>().ok().map(|code| (code, code)),
        };
        match parsed {
            Some((lo, hi)) if lo <= hi => ranges.push((lo, hi)),
            _ => tracing::warn!("Ignoring malformed status segment '{segment}'"),
        }
    }
    ranges
}

/// Exact match, or a regex when the expectation is wrapped in slashes
fn header_matches(actual: &str, expected: &str) -> bool {
    if expected.len() >= 2 && expected.starts_with('/') && expected.ends_with('/') {
        match regex::Regex::new(&expected[1..expected.len() - 1]) {
            Ok(re) => re.is_match(actual),
            Err(e) => {
                tracing::warn!("Invalid header regex '{expected}': {e}");
                false
            }
        }
    } else {
        actual == expected
    }
}

/// Resolve a dotted path ("data.items.0.name") through objects and arrays
fn resolve_json_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn json_value_equals(value: &serde_json::Value, expected: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_status_codes_singles_and_ranges() {
        assert_eq!(
            parse_status_codes("200, 204,301-399"),
            vec![(200, 200), (204, 204), (301, 399)]
        );
    }

    #[test]
    fn test_parse_status_codes_skips_garbage() {
        assert_eq!(parse_status_codes("abc,500-200,,418"), vec![(418, 418)]);
        assert!(parse_status_codes("").is_empty());
    }

    #[test]
    fn test_header_exact_match() {
        assert!(header_matches("nginx", "nginx"));
        assert!(!header_matches("nginx/1.25", "nginx"));
    }

    #[test]
    fn test_header_regex_match() {
        assert!(header_matches("nginx/1.25.3", "/^nginx\\//"));
        assert!(!header_matches("apache", "/^nginx\\//"));
        // Invalid regex never matches
        assert!(!header_matches("anything", "/([/"));
    }

    #[test]
    fn test_resolve_json_path_objects_and_arrays() {
        let value = json!({"data": {"items": [{"name": "first"}, {"name": "second"}]}});
        let found = resolve_json_path(&value, "data.items.1.name").unwrap();
        assert_eq!(found, "second");
        assert!(resolve_json_path(&value, "data.items.9.name").is_none());
        assert!(resolve_json_path(&value, "data.missing").is_none());
    }

    #[test]
    fn test_json_value_comparison() {
        assert!(json_value_equals(&json!("ok"), "ok"));
        assert!(json_value_equals(&json!(42), "42"));
        assert!(json_value_equals(&json!(true), "true"));
        assert!(!json_value_equals(&json!("42"), "ok"));
    }
}
