//! Strategy orchestrator
//!
//! The state machine that decides which strategy runs. Three states:
//! Idle (nothing running), Running (a strategy is active), Scanning
//! (walking the catalogue until a strategy passes the probe).
//!
//! The scanning flag doubles as the cooperative cancellation token: a
//! second scan request flips it off, and the in-flight loop notices at the
//! next check point (before each candidate, or inside the settle wait). A
//! cancellation never preempts an in-flight probe.

use super::monitor::{HealthMonitor, MonitorConfig};
use super::prober::ConnectivityCheck;
use super::supervisor::ProcessSupervisor;
use super::{EngineResult, ProbeReport};
use crate::events::EventBus;
use crate::notification;
use crate::presets::Preset;
use log::{info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scan loop tunables; defaults match the shipped configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long a candidate gets to take effect before it is probed
    pub settle_wait: Duration,
    /// Cancellation check granularity inside the settle wait
    pub settle_poll: Duration,
    /// Teardown pause after a failed candidate before starting the next
    pub retry_pause: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_wait: Duration::from_secs(2),
            settle_poll: Duration::from_millis(100),
            retry_pause: Duration::from_secs(1),
        }
    }
}

/// How a scan ended
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// This strategy passed the probe and its process is still running
    Selected(Preset),
    /// Every candidate was tried and none passed
    Exhausted,
    /// Cancelled cooperatively before a candidate passed
    Cancelled,
}

/// Owner of the engine's decision state
///
/// The orchestrator and the health monitor are the only callers into the
/// supervisor and prober; the monitor never drives the supervisor while a
/// scan holds the scanning flag.
pub struct Orchestrator {
    supervisor: Arc<ProcessSupervisor>,
    prober: Arc<dyn ConnectivityCheck>,
    events: EventBus,
    scan_config: ScanConfig,
    monitor_config: MonitorConfig,
    catalogue: Mutex<Vec<Preset>>,
    selected: Mutex<Option<Preset>>,
    running: AtomicBool,
    scanning: AtomicBool,
    monitor: Mutex<Option<HealthMonitor>>,
}

impl Orchestrator {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        prober: Arc<dyn ConnectivityCheck>,
        events: EventBus,
    ) -> Arc<Self> {
        Self::with_configs(
            supervisor,
            prober,
            events,
            ScanConfig::default(),
            MonitorConfig::default(),
        )
    }

    pub fn with_configs(
        supervisor: Arc<ProcessSupervisor>,
        prober: Arc<dyn ConnectivityCheck>,
        events: EventBus,
        scan_config: ScanConfig,
        monitor_config: MonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            prober,
            events,
            scan_config,
            monitor_config,
            catalogue: Mutex::new(Vec::new()),
            selected: Mutex::new(None),
            running: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            monitor: Mutex::new(None),
        })
    }

    /// Replace the strategy catalogue (order matters for scan sequencing).
    /// The current selection survives a reload when its id still exists.
    pub fn set_catalogue(&self, presets: Vec<Preset>) {
        let mut selected = self.selected.lock().unwrap();
        if let Some(current) = selected.as_ref() {
            match presets.iter().find(|p| p.id == current.id) {
                Some(same) => *selected = Some(same.clone()),
                None => *selected = None,
            }
        }
        *self.catalogue.lock().unwrap() = presets;
    }

    pub fn catalogue(&self) -> Vec<Preset> {
        self.catalogue.lock().unwrap().clone()
    }

    pub fn selected(&self) -> Option<Preset> {
        self.selected.lock().unwrap().clone()
    }

    pub fn select(&self, preset: Preset) {
        *self.selected.lock().unwrap() = Some(preset);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) async fn probe_once(&self) -> ProbeReport {
        self.prober.probe().await
    }

    /// Manually start the given strategy. On failure the state stays Idle
    /// and the reason is surfaced on the event bus.
    pub async fn start(self: &Arc<Self>, preset: &Preset) -> EngineResult<()> {
        match self.supervisor.start(&preset.args).await {
            Ok(()) => {
                info!("Strategy started: {}", preset.name);
                *self.selected.lock().unwrap() = Some(preset.clone());
                self.running.store(true, Ordering::SeqCst);
                self.restart_monitor();
                Ok(())
            }
            Err(e) => {
                self.events.log(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    /// Manually stop. The running flag is cleared optimistically; the
    /// supervisor's exit path emits the definitive `stopped` status. Also
    /// cancels an in-flight scan.
    pub async fn stop(&self) -> EngineResult<()> {
        if let Some(monitor) = self.monitor.lock().unwrap().take() {
            monitor.stop();
        }
        self.scanning.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.supervisor.stop().await
    }

    /// Walk the catalogue until a strategy passes the probe
    ///
    /// Toggle semantics: calling this while a scan is in flight requests
    /// cancellation instead of starting a second scan. The first candidate
    /// that passes wins and its process keeps running; an exhausted
    /// catalogue emits a single terminal not-found event.
    pub async fn run_scan(self: &Arc<Self>) -> ScanOutcome {
        if self.scanning.swap(true, Ordering::SeqCst) {
            // Second call while scanning: request cancellation
            self.scanning.store(false, Ordering::SeqCst);
            return ScanOutcome::Cancelled;
        }

        if self.running.load(Ordering::SeqCst) {
            let _ = self.supervisor.stop().await;
            self.running.store(false, Ordering::SeqCst);
        }

        let catalogue = self.catalogue();
        info!("Auto-scan started over {} candidates", catalogue.len());

        for preset in catalogue {
            if !self.scanning.load(Ordering::SeqCst) {
                return self.finish_cancelled().await;
            }

            self.events.log(format!("--- Testing: {} ---", preset.name));
            *self.selected.lock().unwrap() = Some(preset.clone());

            if let Err(e) = self.supervisor.start(&preset.args).await {
                self.events
                    .log(format!("Failed to start {}: {}. Skipping...", preset.name, e));
                continue;
            }
            self.running.store(true, Ordering::SeqCst);

            // Give the strategy a moment to take effect, staying responsive
            // to cancellation
            let mut waited = Duration::ZERO;
            while waited < self.scan_config.settle_wait {
                if !self.scanning.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(self.scan_config.settle_poll).await;
                waited += self.scan_config.settle_poll;
            }
            if !self.scanning.load(Ordering::SeqCst) {
                return self.finish_cancelled().await;
            }

            let report = self.prober.probe().await;
            if report.overall {
                self.events.log(format!("Response: {}", report.summary()));
                self.events
                    .log(format!("SUCCESS! Working strategy: {}", preset.name));
                let body = format!("Strategy: {}", preset.name);
                self.events.notify("Zapret", &body);
                notification::show_notification("Zapret", &body);

                self.scanning.store(false, Ordering::SeqCst);
                self.restart_monitor();
                info!("Auto-scan selected strategy {}", preset.id);
                return ScanOutcome::Selected(preset);
            }

            self.events.log(format!("FAILED: {}", report.summary()));
            let _ = self.supervisor.stop().await;
            self.running.store(false, Ordering::SeqCst);
            tokio::time::sleep(self.scan_config.retry_pause).await;
        }

        self.scanning.store(false, Ordering::SeqCst);
        warn!("Auto-scan exhausted the catalogue without a working strategy");
        self.events.log_keyed(
            "scanNoStrategyFound",
            json!({ "tried": self.catalogue().len() }),
        );
        ScanOutcome::Exhausted
    }

    /// Cancellation lands in Idle: the candidate that was being tested is
    /// stopped rather than left running
    async fn finish_cancelled(&self) -> ScanOutcome {
        let _ = self.supervisor.stop().await;
        self.running.store(false, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
        info!("Auto-scan cancelled");
        ScanOutcome::Cancelled
    }

    /// Replace the health monitor with a fresh one. Called on every
    /// transition into Running so the failure counter starts clean.
    fn restart_monitor(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().unwrap();
        if let Some(old) = guard.take() {
            old.stop();
        }
        *guard = Some(HealthMonitor::spawn(
            Arc::clone(self),
            self.monitor_config.clone(),
        ));
    }
}
