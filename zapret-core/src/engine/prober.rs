//! Connectivity prober
//!
//! Judges whether the active strategy actually works by fetching a fixed
//! battery of endpoints concurrently. A healthy status code is not enough:
//! a DPI middlebox can let the TLS handshake through and then starve the
//! payload, so each target must also deliver a real body before it counts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::events::EventBus;

/// Hard per-target timeout; generous enough for a slow TLS handshake
const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// A response smaller than this is treated as a starved connection, even
/// with a 2xx status
const MIN_BODY_BYTES: u64 = 100;

/// How many critical targets must succeed for a pass verdict. An absolute
/// bar, not a ratio: one working channel could be coincidence, two are not.
const CRITICAL_SUCCESS_BAR: usize = 2;

/// One endpoint in the probe battery
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub id: String,
    pub address: String,
    pub critical: bool,
}

impl ProbeTarget {
    pub fn new(id: &str, address: &str, critical: bool) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            critical,
        }
    }
}

/// The stock battery: the services users actually care about unblocking,
/// plus one neutral reference endpoint
pub fn default_targets() -> Vec<ProbeTarget> {
    vec![
        ProbeTarget::new("discord", "https://discord.com", true),
        ProbeTarget::new("youtube", "https://www.youtube.com", true),
        ProbeTarget::new("google", "https://www.google.com", false),
        ProbeTarget::new("github", "https://github.com", true),
    ]
}

/// Result of checking a single target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// Status in range and enough payload arrived
    Ok { bytes: u64 },
    /// No completion within the probe timeout
    Timeout,
    /// Response status outside [200, 400)
    HttpStatus(u16),
    /// Healthy status but a starved body (the UNSUP case)
    InsufficientData(u64),
    /// Transport-level failure; `tls` tags handshake/certificate errors
    /// for diagnostics, it does not change pass/fail
    Transport { message: String, tls: bool },
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Ok { .. })
    }

    /// Log-friendly description, mirroring what the UI log pane shows
    pub fn describe(&self) -> String {
        match self {
            TargetOutcome::Ok { bytes } => format!("OK ({} bytes received)", bytes),
            TargetOutcome::Timeout => "TIMEOUT".to_string(),
            TargetOutcome::HttpStatus(code) => format!("HTTP {}", code),
            TargetOutcome::InsufficientData(bytes) => {
                format!("UNSUP (only {} bytes - TLS/DPI block?)", bytes)
            }
            TargetOutcome::Transport { message, tls } => {
                if *tls {
                    format!("TLS_ERROR: {}", message)
                } else {
                    format!("ERROR: {}", message)
                }
            }
        }
    }
}

/// Outcome for one target, with its battery metadata
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub id: String,
    pub critical: bool,
    pub outcome: TargetOutcome,
}

/// Full battery result
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub targets: Vec<TargetReport>,
    pub overall: bool,
    pub finished_at: DateTime<Utc>,
}

impl ProbeReport {
    /// Compute the verdict from per-target outcomes
    pub fn new(targets: Vec<TargetReport>, critical_bar: usize) -> Self {
        let critical_successes = targets
            .iter()
            .filter(|t| t.critical && t.outcome.is_success())
            .count();
        Self {
            targets,
            overall: critical_successes >= critical_bar,
            finished_at: Utc::now(),
        }
    }

    pub fn critical_successes(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.critical && t.outcome.is_success())
            .count()
    }

    pub fn critical_total(&self) -> usize {
        self.targets.iter().filter(|t| t.critical).count()
    }

    /// Per-target success map, always available for diagnostic display
    pub fn details(&self) -> BTreeMap<String, bool> {
        self.targets
            .iter()
            .map(|t| (t.id.clone(), t.outcome.is_success()))
            .collect()
    }

    /// One-line "id: OK, id: FAIL, ..." summary for the log pane
    pub fn summary(&self) -> String {
        self.targets
            .iter()
            .map(|t| {
                format!(
                    "{}: {}",
                    t.id,
                    if t.outcome.is_success() { "OK" } else { "FAIL" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Tunables for the battery; defaults match the shipped configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub min_body_bytes: u64,
    pub critical_bar: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
            min_body_bytes: MIN_BODY_BYTES,
            critical_bar: CRITICAL_SUCCESS_BAR,
        }
    }
}

/// Seam between the engine and the network, so the orchestrator and health
/// monitor can be driven by scripted verdicts in tests
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn probe(&self) -> ProbeReport;
}

/// Live prober hitting the configured targets over HTTPS
pub struct ConnectivityProber {
    client: Client,
    targets: Vec<ProbeTarget>,
    config: ProbeConfig,
    events: EventBus,
}

impl ConnectivityProber {
    pub fn new(targets: Vec<ProbeTarget>, config: ProbeConfig, events: EventBus) -> Self {
        // Per-request deadlines are enforced with tokio timeouts so a late
        // response can never be recorded after its target already timed out
        let client = Client::builder()
            .build()
            .expect("HTTP client construction only fails on TLS backend misconfiguration");
        Self {
            client,
            targets,
            config,
            events,
        }
    }

    pub fn with_defaults(events: EventBus) -> Self {
        Self::new(default_targets(), ProbeConfig::default(), events)
    }

    pub fn targets(&self) -> &[ProbeTarget] {
        &self.targets
    }
}

#[async_trait]
impl ConnectivityCheck for ConnectivityProber {
    async fn probe(&self) -> ProbeReport {
        self.events.log(format!(
            "DEBUG: Starting Connectivity Check ({} targets)...",
            self.targets.len()
        ));

        // All targets at once; each task settles exactly once
        let mut tasks = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let client = self.client.clone();
            let target = target.clone();
            let config = self.config.clone();
            let events = self.events.clone();
            tasks.push(tokio::spawn(check_target(client, target, config, events)));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (task, target) in tasks.into_iter().zip(&self.targets) {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    // A panicked check counts as a failed target, not a
                    // failed battery
                    debug!("Probe task for {} panicked: {}", target.id, e);
                    reports.push(TargetReport {
                        id: target.id.clone(),
                        critical: target.critical,
                        outcome: TargetOutcome::Transport {
                            message: format!("probe task failed: {}", e),
                            tls: false,
                        },
                    });
                }
            }
        }

        let report = ProbeReport::new(reports, self.config.critical_bar);
        if report.overall {
            self.events.log(format!(
                "Connectivity Decision: PASS (Critical: {}/{})",
                report.critical_successes(),
                report.critical_total()
            ));
        } else {
            self.events.log(format!(
                "Connectivity Decision: FAIL (Critical: {}/{} - need at least {})",
                report.critical_successes(),
                report.critical_total(),
                self.config.critical_bar
            ));
        }
        info!(
            "Connectivity check finished: overall={} ({})",
            report.overall,
            report.summary()
        );
        report
    }
}

async fn check_target(
    client: Client,
    target: ProbeTarget,
    config: ProbeConfig,
    events: EventBus,
) -> TargetReport {
    // The timeout drops the in-flight request, so only the first completion
    // for a target is ever recorded
    let outcome = match tokio::time::timeout(
        config.timeout,
        fetch_target(&client, &target, &config, &events),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => TargetOutcome::Timeout,
    };

    events.log(format!("Check {}: {}", target.id, outcome.describe()));
    TargetReport {
        id: target.id,
        critical: target.critical,
        outcome,
    }
}

async fn fetch_target(
    client: &Client,
    target: &ProbeTarget,
    config: &ProbeConfig,
    events: &EventBus,
) -> TargetOutcome {
    let response = match client.get(&target.address).send().await {
        Ok(response) => response,
        Err(e) => {
            let message = error_chain(&e);
            let tls = is_tls_error(&message);
            return TargetOutcome::Transport { message, tls };
        }
    };

    let status = response.status().as_u16();
    events.log(format!(
        "  -> {}: HTTP {} ({})",
        target.id,
        status,
        if target.critical { "CRITICAL" } else { "optional" }
    ));

    if !(200..400).contains(&status) {
        // No point reading a body we already know is a failure
        return TargetOutcome::HttpStatus(status);
    }

    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => received += chunk.len() as u64,
            Err(e) => {
                let message = format!("stream error: {}", error_chain(&e));
                let tls = is_tls_error(&message);
                return TargetOutcome::Transport { message, tls };
            }
        }
    }

    if received > config.min_body_bytes {
        TargetOutcome::Ok { bytes: received }
    } else {
        TargetOutcome::InsufficientData(received)
    }
}

/// Flatten an error and its sources into one line; reqwest hides the
/// interesting part (connect refused, certificate failure) in the chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

fn is_tls_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["ssl", "tls", "certificate", "handshake"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn report(outcomes: &[(bool, bool)]) -> ProbeReport {
        // (critical, success) pairs
        let targets = outcomes
            .iter()
            .enumerate()
            .map(|(i, (critical, success))| TargetReport {
                id: format!("t{}", i),
                critical: *critical,
                outcome: if *success {
                    TargetOutcome::Ok { bytes: 5000 }
                } else {
                    TargetOutcome::Timeout
                },
            })
            .collect();
        ProbeReport::new(targets, CRITICAL_SUCCESS_BAR)
    }

    #[test]
    fn test_verdict_fails_below_two_critical_successes() {
        assert!(!report(&[(true, false), (true, false), (true, false)]).overall);
        assert!(!report(&[(true, true), (true, false), (true, false)]).overall);
        // Optional successes never compensate for missing critical ones
        assert!(!report(&[(true, true), (false, true), (false, true)]).overall);
    }

    #[test]
    fn test_verdict_passes_at_two_critical_successes() {
        assert!(report(&[(true, true), (true, true), (true, false)]).overall);
        assert!(report(&[(true, true), (true, true), (true, true)]).overall);
        // The bar stays absolute no matter how many critical targets exist
        assert!(
            report(&[
                (true, true),
                (true, true),
                (true, false),
                (true, false),
                (true, false)
            ])
            .overall
        );
    }

    #[test]
    fn test_optional_failures_do_not_affect_verdict() {
        assert!(report(&[(true, true), (true, true), (false, false)]).overall);
    }

    #[test]
    fn test_details_map_is_always_complete() {
        let r = report(&[(true, true), (true, false), (false, false)]);
        let details = r.details();
        assert_eq!(details.len(), 3);
        assert_eq!(details["t0"], true);
        assert_eq!(details["t1"], false);
        assert_eq!(details["t2"], false);
    }

    #[test]
    fn test_tls_error_detection() {
        assert!(is_tls_error("SSL routines: wrong version number"));
        assert!(is_tls_error("invalid peer certificate contents"));
        assert!(is_tls_error("TLS handshake failed"));
        assert!(!is_tls_error("connection refused"));
        assert!(!is_tls_error("dns error"));
    }

    #[test]
    fn test_outcome_descriptions() {
        assert_eq!(
            TargetOutcome::Ok { bytes: 12034 }.describe(),
            "OK (12034 bytes received)"
        );
        assert_eq!(TargetOutcome::Timeout.describe(), "TIMEOUT");
        assert_eq!(TargetOutcome::HttpStatus(403).describe(), "HTTP 403");
        assert_eq!(
            TargetOutcome::InsufficientData(50).describe(),
            "UNSUP (only 50 bytes - TLS/DPI block?)"
        );
    }

    #[test]
    fn test_default_targets_have_three_critical() {
        let targets = default_targets();
        assert_eq!(targets.len(), 4);
        assert_eq!(targets.iter().filter(|t| t.critical).count(), 3);
    }

    /// Serve one canned HTTP response on a fresh local port
    async fn serve_once(response: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    fn http_response(status_line: &str, body_len: usize) -> Vec<u8> {
        let body = vec![b'x'; body_len];
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status_line, body_len
        )
        .into_bytes();
        response.extend_from_slice(&body);
        response
    }

    fn single_target_prober(addr: SocketAddr, timeout: Duration) -> ConnectivityProber {
        ConnectivityProber::new(
            vec![ProbeTarget::new(
                "local",
                &format!("http://{}/", addr),
                true,
            )],
            ProbeConfig {
                timeout,
                ..ProbeConfig::default()
            },
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn test_small_body_with_healthy_status_is_unsup() {
        let addr = serve_once(http_response("200 OK", 50)).await;
        let prober = single_target_prober(addr, Duration::from_secs(5));

        let report = prober.probe().await;
        assert_eq!(
            report.targets[0].outcome,
            TargetOutcome::InsufficientData(50)
        );
        assert!(!report.overall);
    }

    #[tokio::test]
    async fn test_large_body_counts_as_target_success() {
        let addr = serve_once(http_response("200 OK", 300)).await;
        let prober = single_target_prober(addr, Duration::from_secs(5));

        let report = prober.probe().await;
        assert_eq!(report.targets[0].outcome, TargetOutcome::Ok { bytes: 300 });
        // One critical success is still below the overall bar
        assert!(!report.overall);
    }

    #[tokio::test]
    async fn test_error_status_fails_without_reading_body() {
        let addr = serve_once(http_response("500 Internal Server Error", 4096)).await;
        let prober = single_target_prober(addr, Duration::from_secs(5));

        let report = prober.probe().await;
        assert_eq!(report.targets[0].outcome, TargetOutcome::HttpStatus(500));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accept the connection and never answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((_socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let prober = single_target_prober(addr, Duration::from_millis(300));
        let report = prober.probe().await;
        assert_eq!(report.targets[0].outcome, TargetOutcome::Timeout);
        assert!(!report.overall);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_transport_error() {
        // Bind then drop, so the port is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = single_target_prober(addr, Duration::from_secs(5));
        let report = prober.probe().await;
        match &report.targets[0].outcome {
            TargetOutcome::Transport { tls, .. } => assert!(!tls),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_two_local_successes_pass_overall() {
        let a = serve_once(http_response("200 OK", 500)).await;
        let b = serve_once(http_response("200 OK", 500)).await;
        let prober = ConnectivityProber::new(
            vec![
                ProbeTarget::new("a", &format!("http://{}/", a), true),
                ProbeTarget::new("b", &format!("http://{}/", b), true),
            ],
            ProbeConfig {
                timeout: Duration::from_secs(5),
                ..ProbeConfig::default()
            },
            EventBus::new(),
        );

        let report = prober.probe().await;
        assert!(report.overall);
        assert_eq!(report.critical_successes(), 2);
    }
}
