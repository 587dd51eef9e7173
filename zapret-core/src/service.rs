//! Windows service registration for the filtering process
//!
//! Runs the filter as a `zapret` system service so it survives logouts and
//! starts at boot, independent of the panel. Everything here shells out to
//! `sc`/`reg`/`netsh` and sniffs their string output, which is the only
//! stable interface those tools offer.

use crate::engine::supervisor::DRIVER_SERVICES;
use crate::events::EventBus;
use crate::presets::FILTER_EXECUTABLE;
use crate::utils::hidden_command;
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

const SERVICE_NAME: &str = "zapret";
const SERVICE_DISPLAY_NAME: &str = "Zapret DPI Bypass";
const SERVICE_DESCRIPTION: &str = "Zapret DPI bypass software";

/// Registry value the installer records the active strategy under
const STRATEGY_REGISTRY_KEY: &str = r"HKLM\System\CurrentControlSet\Services\zapret";
const STRATEGY_REGISTRY_VALUE: &str = "zapret-discord-youtube";

/// Settle pause after tearing down a previous registration
const REREGISTER_SETTLE: Duration = Duration::from_millis(500);

/// Installed-service state as reported by `sc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
    pub strategy: Option<String>,
}

impl ServiceStatus {
    fn absent() -> Self {
        Self {
            installed: false,
            running: false,
            strategy: None,
        }
    }
}

/// Service registration operations for one project root
pub struct ServiceManager {
    root: PathBuf,
    events: EventBus,
}

impl ServiceManager {
    pub fn new(root: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            root: root.into(),
            events,
        }
    }

    /// Query the service and the strategy it was registered with
    pub async fn status(&self) -> ServiceStatus {
        let query = match run_command("sc", &["query", SERVICE_NAME]).await {
            Some(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            None => return ServiceStatus::absent(),
        };
        let running = match parse_service_query(&query) {
            Some(running) => running,
            None => return ServiceStatus::absent(),
        };

        let strategy = run_command(
            "reg",
            &[
                "query",
                STRATEGY_REGISTRY_KEY,
                "/v",
                STRATEGY_REGISTRY_VALUE,
            ],
        )
        .await
        .and_then(|output| parse_strategy_value(&String::from_utf8_lossy(&output.stdout)));

        ServiceStatus {
            installed: true,
            running,
            strategy,
        }
    }

    /// Register the service with the given strategy arguments and start it
    pub async fn install(&self, args: &[String]) -> Result<(), String> {
        self.events.log_keyed("serviceInstallStarted", json!({}));

        // Tear down any previous registration first
        let _ = run_command("net", &["stop", SERVICE_NAME]).await;
        let _ = run_command("sc", &["delete", SERVICE_NAME]).await;
        tokio::time::sleep(REREGISTER_SETTLE).await;

        let bin_path = self.root.join("bin").join(FILTER_EXECUTABLE);
        let bin_value = format!("\"{}\" {}", bin_path.display(), quote_args(args));
        info!("Registering service {} with binPath {}", SERVICE_NAME, bin_value);

        let created = run_command(
            "sc",
            &[
                "create",
                SERVICE_NAME,
                "binPath=",
                &bin_value,
                "DisplayName=",
                SERVICE_DISPLAY_NAME,
                "start=",
                "auto",
            ],
        )
        .await;
        if !output_indicates(&created, "SUCCESS") {
            let detail = output_detail(&created);
            self.events
                .log_keyed("serviceInstallFailed", json!({ "error": detail }));
            return Err(format!("Failed to create service: {}", detail));
        }

        let _ = run_command(
            "sc",
            &["description", SERVICE_NAME, SERVICE_DESCRIPTION],
        )
        .await;

        let started = run_command("sc", &["start", SERVICE_NAME]).await;
        if output_indicates(&started, "RUNNING") {
            self.events.log_keyed("serviceStarted", json!({}));
        } else {
            // Installed but not running; leave the registration in place
            self.events.log_keyed(
                "serviceInstallFailed",
                json!({ "error": output_detail(&started) }),
            );
        }

        // The filter behaves better with TCP timestamps on
        let _ = run_command(
            "netsh",
            &["interface", "tcp", "set", "global", "timestamps=enabled"],
        )
        .await;

        self.events.log_keyed("serviceInstalled", json!({}));
        Ok(())
    }

    /// Unregister the service and clean up the packet filter drivers
    pub async fn remove(&self) -> Result<(), String> {
        self.events.log_keyed("serviceRemoveStarted", json!({}));

        let _ = run_command("net", &["stop", SERVICE_NAME]).await;
        let _ = run_command("taskkill", &["/F", "/IM", FILTER_EXECUTABLE]).await;

        let deleted = run_command("sc", &["delete", SERVICE_NAME]).await;
        if !output_indicates(&deleted, "SUCCESS") {
            // Usually means the service was never installed
            self.events.log_keyed("serviceRemoveFailed", json!({}));
        }

        for driver in DRIVER_SERVICES {
            let _ = run_command("net", &["stop", driver]).await;
            let _ = run_command("sc", &["delete", driver]).await;
        }

        self.events.log_keyed("serviceRemoved", json!({}));
        Ok(())
    }
}

/// Quote tokens that would otherwise be split or reinterpreted inside the
/// service's single binPath string
fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') || arg.contains('=') {
                format!("\"{}\"", arg)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Some(running) when the query names our service, None when it is absent
fn parse_service_query(stdout: &str) -> Option<bool> {
    if !stdout.contains(SERVICE_NAME) {
        return None;
    }
    Some(stdout.contains("RUNNING"))
}

/// Extract the strategy name from `reg query` output:
/// `    zapret-discord-youtube    REG_SZ    general.bat`
fn parse_strategy_value(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if !line.contains(STRATEGY_REGISTRY_VALUE) {
            continue;
        }
        if let Some(pos) = line.find("REG_SZ") {
            let value = line[pos + "REG_SZ".len()..].trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

async fn run_command(program: &str, args: &[&str]) -> Option<Output> {
    let program = program.to_string();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let result =
        tokio::task::spawn_blocking(move || hidden_command(&program).args(&args).output()).await;

    match result {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            warn!("Service command failed to run (may be expected): {}", e);
            None
        }
        Err(e) => {
            warn!("Service command task panicked: {}", e);
            None
        }
    }
}

fn output_indicates(output: &Option<Output>, marker: &str) -> bool {
    match output {
        Some(out) => {
            out.status.success() || String::from_utf8_lossy(&out.stdout).contains(marker)
        }
        None => false,
    }
}

fn output_detail(output: &Option<Output>) -> String {
    match output {
        Some(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.trim().is_empty() {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            }
        }
        None => "command did not run".to_string(),
    }
}
