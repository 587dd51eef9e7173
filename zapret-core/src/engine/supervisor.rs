//! Process supervisor for the external filtering executable
//!
//! Owns at most one running `winws.exe` instance. Output streams are
//! forwarded line by line to the event bus as they arrive, and process exit
//! is observed by a background wait task so the `stopped` status fires
//! exactly once per process, whether the operator killed it or it died on
//! its own.

use super::{EngineError, EngineResult};
use crate::events::{EventBus, ProcessStatus};
use crate::utils::hidden_command;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};

/// Driver services the filtering process may load; different releases
/// register under different names, so both are cleaned up
pub(crate) const DRIVER_SERVICES: [&str; 2] = ["WinDivert", "WinDivert14"];

/// Pause after requesting our own process to die, before the system-wide kill
const KILL_SETTLE: Duration = Duration::from_millis(500);

/// Pause after each teardown stage to let the OS finish it
const TEARDOWN_SETTLE: Duration = Duration::from_secs(1);

struct RunningProcess {
    generation: u64,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Supervisor for the single external process slot
///
/// The slot is the sole source of truth for "is the filter running". It is
/// only written by `start`, `stop`, and the wait task observing exit, so
/// concurrent callers can never end up with two live processes.
pub struct ProcessSupervisor {
    executable: PathBuf,
    slot: Arc<Mutex<Option<RunningProcess>>>,
    generation: AtomicU64,
    events: EventBus,
}

impl ProcessSupervisor {
    pub fn new(executable: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            executable: executable.into(),
            slot: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.slot.lock().await.as_ref().and_then(|p| p.pid)
    }

    /// Launch the filtering process with the given argument vector
    ///
    /// Arguments are passed verbatim, never joined into a shell string. The
    /// working directory is set two levels above the executable (project
    /// root) so the relative `bin/` and `lists/` paths in presets resolve.
    ///
    /// Fails without side effects when a process is already owned or the
    /// executable is missing on disk.
    pub async fn start(&self, args: &[String]) -> EngineResult<()> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(EngineError::ProcessAlreadyRunning);
        }
        if !self.executable.is_file() {
            return Err(EngineError::ExecutableNotFound(self.executable.clone()));
        }

        let workdir = project_root(&self.executable);
        info!(
            "Launching {} with {} args (cwd {})",
            self.executable.display(),
            args.len(),
            workdir.display()
        );

        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(crate::utils::CREATE_NO_WINDOW);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.executable.display(), e)))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, self.events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, self.events.clone()));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();

        *slot = Some(RunningProcess {
            generation,
            pid,
            kill_tx: Some(kill_tx),
        });
        drop(slot);

        self.events.status(ProcessStatus::Running);

        let slot_handle = Arc::clone(&self.slot);
        let events = self.events.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    // Kill requested by stop(); reap the process ourselves
                    if let Err(e) = child.start_kill() {
                        debug!("Kill request for exited process: {}", e);
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(exit) => info!("Filter process exited with code {:?}", exit.code()),
                Err(e) => warn!("Failed to reap filter process: {}", e),
            }

            // A stop() may already have released the slot, or a newer start()
            // may own it by now. Only clear our own generation.
            let mut slot = slot_handle.lock().await;
            if slot.as_ref().map(|p| p.generation) == Some(generation) {
                *slot = None;
            }
            drop(slot);

            events.status(ProcessStatus::Stopped);
        });

        Ok(())
    }

    /// Request termination and release the slot immediately
    ///
    /// Does not wait for the OS to confirm death. The wait task emits the
    /// final `stopped` status once the process is actually gone. A stop with
    /// nothing running is a successful no-op.
    pub async fn stop(&self) -> EngineResult<()> {
        let mut slot = self.slot.lock().await;
        if let Some(mut owned) = slot.take() {
            info!("Stopping filter process (pid {:?})", owned.pid);
            if let Some(kill_tx) = owned.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        Ok(())
    }

    /// Stop the owned process, then tear down anything that escaped
    /// supervision: same-named processes system-wide and the packet filter
    /// driver services. Used before updates so binaries are not locked.
    ///
    /// Every external command here is best effort; failures are logged and
    /// ignored.
    pub async fn force_stop_all(&self) -> EngineResult<()> {
        self.stop().await?;
        tokio::time::sleep(KILL_SETTLE).await;

        let image = self
            .executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| crate::presets::FILTER_EXECUTABLE.to_string());
        run_cleanup_command("taskkill", &["/F", "/IM", &image]).await;
        tokio::time::sleep(TEARDOWN_SETTLE).await;

        for service in DRIVER_SERVICES {
            run_cleanup_command("sc", &["stop", service]).await;
            tokio::time::sleep(KILL_SETTLE).await;
            run_cleanup_command("sc", &["delete", service]).await;
        }
        tokio::time::sleep(TEARDOWN_SETTLE).await;

        Ok(())
    }
}

/// Project root is the parent of the executable's containing directory
/// (the layout ships `bin/winws.exe` next to `lists/` and the presets)
fn project_root(executable: &Path) -> PathBuf {
    executable
        .parent()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn forward_lines<R>(reader: R, events: EventBus)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        events.log(line);
    }
}

async fn run_cleanup_command(program: &str, args: &[&str]) {
    let program = program.to_string();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let result = tokio::task::spawn_blocking(move || {
        hidden_command(&program)
            .args(&args)
            .output()
            .map(|out| (out.status.success(), program, args))
    })
    .await;

    match result {
        Ok(Ok((true, program, args))) => debug!("Cleanup command {} {:?} succeeded", program, args),
        Ok(Ok((false, program, args))) => {
            debug!(
                "Cleanup command {} {:?} finished with error (may be expected)",
                program, args
            );
        }
        Ok(Err(e)) => debug!("Cleanup command failed to run (may be expected): {}", e),
        Err(e) => warn!("Cleanup command task panicked: {}", e),
    }
}
