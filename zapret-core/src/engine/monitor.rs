//! Health monitor
//!
//! While a strategy is running, probes connectivity on a fixed interval and
//! triggers an auto-scan after two consecutive failures. This is the only
//! automatic path into scanning; the other is the user's scan button.
//!
//! The monitor never drives the process supervisor itself. It reads the
//! orchestrator's flags, probes, and hands control back through `run_scan`.

use super::orchestrator::Orchestrator;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Monitor tunables; defaults match the shipped configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between connectivity checks
    pub interval: Duration,
    /// Consecutive failures before auto-recovery kicks in
    pub failure_threshold: u32,
    /// How quickly the monitor notices it should wind down
    pub stop_poll: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_threshold: 2,
            stop_poll: Duration::from_millis(100),
        }
    }
}

/// Handle to a spawned monitor task
pub struct HealthMonitor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the monitor loop for the current running session. The task
    /// exits on its own once the orchestrator stops running.
    pub fn spawn(orchestrator: Arc<Orchestrator>, config: MonitorConfig) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            run_monitor(orchestrator, config, stop_flag).await;
        });
        Self { stop, handle }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Request the task to wind down at its next stop check
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

async fn run_monitor(orchestrator: Arc<Orchestrator>, config: MonitorConfig, stop: Arc<AtomicBool>) {
    let mut failures: u32 = 0;

    // First check lands a full interval after the session starts. Missed
    // ticks are skipped, not queued, so a long scan never causes a burst of
    // back-to-back probes afterwards.
    let first_tick = tokio::time::Instant::now() + config.interval;
    let mut check_tick = tokio::time::interval_at(first_tick, config.interval);
    check_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stop_tick = tokio::time::interval(config.stop_poll);

    info!("Health monitor started ({:?} interval)", config.interval);

    loop {
        tokio::select! {
            _ = check_tick.tick() => {
                if stop.load(Ordering::SeqCst) || !orchestrator.is_running() {
                    break;
                }
                if orchestrator.is_scanning() {
                    // A scan owns the supervisor right now; skip this tick
                    // entirely and leave the counter alone
                    debug!("Health check skipped: scan in progress");
                    continue;
                }

                let report = orchestrator.probe_once().await;
                if report.overall {
                    failures = 0;
                    orchestrator
                        .events()
                        .log(format!("[Auto-Check] {}", report.summary()));
                } else {
                    failures += 1;
                    orchestrator.events().log(format!(
                        "[Auto-Check] WARNING: {} (Strike {}/{})",
                        report.summary(),
                        failures,
                        config.failure_threshold
                    ));

                    if failures >= config.failure_threshold {
                        failures = 0;
                        orchestrator
                            .events()
                            .log("[Auto-Recovery] Connectivity lost! Starting auto-scan...");
                        orchestrator.run_scan().await;
                        // A successful scan replaced this monitor with a
                        // fresh one; either way this task is done
                        break;
                    }
                }
            }
            _ = stop_tick.tick() => {
                if stop.load(Ordering::SeqCst) || !orchestrator.is_running() {
                    break;
                }
            }
        }
    }

    info!("Health monitor stopped");
}
