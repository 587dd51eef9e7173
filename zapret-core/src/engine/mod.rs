//! Strategy orchestration engine
//!
//! Everything that decides which strategy runs, when it runs, and how we
//! know it is working.
//!
//! ## Architecture
//!
//! - supervisor.rs: lifecycle of the external filtering process (single slot)
//! - prober.rs: concurrent connectivity battery and pass/fail verdict
//! - orchestrator.rs: Idle/Running/Scanning state machine and the auto-scan
//!   loop that walks the preset catalogue until one strategy passes
//! - monitor.rs: periodic health checks that trigger auto-recovery

pub mod monitor;
pub mod orchestrator;
pub mod prober;
pub mod supervisor;

pub use monitor::{HealthMonitor, MonitorConfig};
pub use orchestrator::{Orchestrator, ScanConfig, ScanOutcome};
pub use prober::{
    default_targets, ConnectivityCheck, ConnectivityProber, ProbeConfig, ProbeReport, ProbeTarget,
    TargetOutcome, TargetReport,
};
pub use supervisor::ProcessSupervisor;

/// Engine-level errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("executable not found at {}", .0.display())]
    ExecutableNotFound(std::path::PathBuf),

    #[error("process already running")]
    ProcessAlreadyRunning,

    #[error("failed to launch process: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_engine_error_display_executable_not_found() {
        let err = EngineError::ExecutableNotFound(PathBuf::from("bin/winws.exe"));
        assert_eq!(err.to_string(), "executable not found at bin/winws.exe");
    }

    #[test]
    fn test_engine_error_display_already_running() {
        let err = EngineError::ProcessAlreadyRunning;
        assert_eq!(err.to_string(), "process already running");
    }

    #[test]
    fn test_engine_error_display_launch() {
        let err = EngineError::Launch("permission denied".to_string());
        assert_eq!(
            err.to_string(),
            "failed to launch process: permission denied"
        );
    }

    #[test]
    fn test_engine_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EngineError = io_err.into();
        match err {
            EngineError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("Expected EngineError::Io, got {:?}", other),
        }
    }
}
