//! Update installer - downloads a release archive and unpacks it over the
//! project root

use super::checker::save_installed_version;
use super::UPDATE_USER_AGENT;
use crate::events::EventBus;
use futures_util::StreamExt;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use zip::ZipArchive;

/// Ten minutes: release bundles are tens of megabytes on slow links
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Files that must be replaced for the update to count; a locked one aborts
/// the install instead of being skipped
const CRITICAL_FILES: [&str; 3] = ["winws.exe", "WinDivert.dll", "WinDivert64.sys"];

/// Download the release archive and install it into the project root
///
/// The caller must have force-stopped the filter first, or the critical
/// binaries will be locked. Progress is reported as `[Updater]` log lines.
pub async fn download_and_install(
    root: &Path,
    url: &str,
    version: &str,
    events: &EventBus,
) -> Result<(), String> {
    let log = |msg: String| events.log(format!("[Updater] {}", msg));
    log(format!("Starting update to version {}", version));

    let temp_dir = std::env::temp_dir().join("zapret-update");
    if temp_dir.exists() {
        fs::remove_dir_all(&temp_dir).map_err(|e| format!("Failed to clear temp dir: {}", e))?;
    }
    fs::create_dir_all(&temp_dir).map_err(|e| format!("Failed to create temp dir: {}", e))?;

    let zip_path = temp_dir.join("update.zip");
    log(format!("Downloading from: {}", url));
    download_file(url, &zip_path).await?;
    log(format!("Downloaded to: {}", zip_path.display()));

    log("Extracting ZIP...".to_string());
    apply_payload(&zip_path, &temp_dir, root, version, events)?;

    fs::remove_dir_all(&temp_dir).ok();
    log("Update completed successfully!".to_string());
    Ok(())
}

/// Stream the archive to disk; redirects are followed by the client
async fn download_file(url: &str, dest: &Path) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .user_agent(UPDATE_USER_AGENT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Download request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(format!("Download failed: {}", response.status()));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("Failed to create file: {}", e))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Error reading chunk: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Error writing to file: {}", e))?;
        downloaded += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| format!("Error flushing file: {}", e))?;

    info!("Downloaded {} bytes to {}", downloaded, dest.display());
    Ok(())
}

/// Unpack the archive and copy `bin/`, `lists/`, and root presets into the
/// project root, then persist the version marker
pub(crate) fn apply_payload(
    zip_path: &Path,
    scratch_dir: &Path,
    root: &Path,
    version: &str,
    events: &EventBus,
) -> Result<(), String> {
    let log = |msg: String| events.log(format!("[Updater] {}", msg));

    let file = fs::File::open(zip_path).map_err(|e| format!("Failed to open archive: {}", e))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| format!("Failed to read archive: {}", e))?;
    archive
        .extract(scratch_dir)
        .map_err(|e| format!("Failed to extract archive: {}", e))?;

    let source_root = find_payload_root(scratch_dir)?;
    log(format!("Payload root: {}", source_root.display()));

    let source_bin = source_root.join("bin");
    if !source_bin.is_dir() {
        return Err(format!(
            "Could not find bin folder in update. Path checked: {}",
            source_bin.display()
        ));
    }

    log("Copying bin files...".to_string());
    copy_folder_recursive(&source_bin, &root.join("bin"), events)?;

    let source_lists = source_root.join("lists");
    if source_lists.is_dir() {
        log("Copying lists files...".to_string());
        copy_folder_recursive(&source_lists, &root.join("lists"), events)?;
    }

    // Presets ship at the payload root
    let entries =
        fs::read_dir(&source_root).map_err(|e| format!("Failed to list payload: {}", e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_bat = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("bat"))
            .unwrap_or(false);
        if path.is_file() && is_bat {
            let name = entry.file_name();
            if let Err(e) = fs::copy(&path, root.join(&name)) {
                warn!("Failed to copy {}: {}", name.to_string_lossy(), e);
            } else {
                log(format!("Copied: {}", name.to_string_lossy()));
            }
        }
    }

    save_installed_version(root, version)
        .map_err(|e| format!("Failed to save version info: {}", e))?;
    log(format!("Version {} saved", version));
    Ok(())
}

/// Release archives nest everything in a single top-level folder; fall back
/// to the scratch dir for flat archives
fn find_payload_root(scratch_dir: &Path) -> Result<PathBuf, String> {
    let entries =
        fs::read_dir(scratch_dir).map_err(|e| format!("Failed to list extraction: {}", e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            return Ok(path);
        }
    }
    Ok(scratch_dir.to_path_buf())
}

fn copy_folder_recursive(src: &Path, dest: &Path, events: &EventBus) -> Result<(), String> {
    fs::create_dir_all(dest).map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;

    let entries = fs::read_dir(src).map_err(|e| format!("Failed to list {}: {}", src.display(), e))?;
    for entry in entries.flatten() {
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        let name = entry.file_name().to_string_lossy().into_owned();

        if src_path.is_dir() {
            copy_folder_recursive(&src_path, &dest_path, events)?;
            continue;
        }

        if dest_path.exists() {
            // Replace in two steps so a locked file surfaces as an error
            // here rather than a silent partial copy
            if let Err(e) = fs::remove_file(&dest_path) {
                if CRITICAL_FILES.contains(&name.as_str()) {
                    return Err(format!(
                        "Cannot update {}: file is locked. Please stop zapret first! ({})",
                        name, e
                    ));
                }
                warn!("Failed to replace {} (skipped): {}", name, e);
                continue;
            }
        }
        match fs::copy(&src_path, &dest_path) {
            Ok(_) => events.log(format!("[Updater]   Copied: {}", name)),
            Err(e) => {
                if CRITICAL_FILES.contains(&name.as_str()) {
                    return Err(format!("Cannot update {}: {}", name, e));
                }
                warn!("Failed to copy {} (skipped): {}", name, e);
            }
        }
    }
    Ok(())
}
