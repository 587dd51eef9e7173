//! Self-update subsystem
//!
//! Checks GitHub releases of the upstream bypass bundle and replaces the
//! local `bin/`, `lists/`, and preset files with a downloaded release.
//! Callers must force-stop the filter (and its driver) before installing,
//! or the binaries will be locked.

mod checker;
mod installer;

pub use checker::{check_for_updates, installed_version, UpdateInfo};
pub use installer::download_and_install;

use crate::engine::ProcessSupervisor;
use crate::events::EventBus;
use std::path::Path;

/// Full install flow: force-stop the filter and its driver, then download
/// and unpack the release
pub async fn install_update(
    supervisor: &ProcessSupervisor,
    root: &Path,
    url: &str,
    version: &str,
    events: &EventBus,
) -> Result<(), String> {
    supervisor
        .force_stop_all()
        .await
        .map_err(|e| format!("Failed to stop the filter: {}", e))?;
    download_and_install(root, url, version, events).await
}

/// Marker file recording which release is currently unpacked
pub(crate) const VERSION_FILE: &str = "bin/zapret_version.txt";

/// User agent for GitHub API and download requests
pub(crate) const UPDATE_USER_AGENT: &str = "Zapret-GUI-Updater";
