//! UI event channel
//!
//! The core never talks to a window directly. Every component pushes
//! `UiEvent`s into a broadcast bus and the embedding shell decides how to
//! render them: plain log pane, localized strings, tray icon, toasts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events before the slowest subscriber starts losing lines
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coarse state of the supervised process, for tray/status display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopped,
}

/// Event emitted by the core for the shell to render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UiEvent {
    /// Unstructured log line (process output, progress chatter)
    Log(String),
    /// Structured event meant for localized rendering by the shell
    LogKeyed { key: String, params: Value },
    /// Supervised process transitioned to running/stopped
    ProcessStatus(ProcessStatus),
    /// Request for a user-facing notification
    Notification { title: String, body: String },
}

/// Cloneable sender handle for core components
///
/// Sends are lossy: with no subscribers the event is dropped, and a slow
/// subscriber that falls more than the channel capacity behind skips ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: UiEvent) {
        // SendError only means nobody is listening right now
        let _ = self.tx.send(event);
    }

    pub fn log(&self, line: impl Into<String>) {
        self.send(UiEvent::Log(line.into()));
    }

    pub fn log_keyed(&self, key: &str, params: Value) {
        self.send(UiEvent::LogKeyed {
            key: key.to_string(),
            params,
        });
    }

    pub fn status(&self, status: ProcessStatus) {
        self.send(UiEvent::ProcessStatus(status));
    }

    pub fn notify(&self, title: &str, body: &str) {
        self.send(UiEvent::Notification {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
