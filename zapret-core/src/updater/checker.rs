//! Update checker - fetches the latest GitHub release and compares versions

use super::{UPDATE_USER_AGENT, VERSION_FILE};
use crate::with_retry;
use log::{debug, info};
use semver::Version;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upstream repository shipping the filter binaries and presets
const GITHUB_API_URL: &str =
    "https://api.github.com/repos/Flowseal/zapret-discord-youtube/releases/latest";

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// What the latest release looks like relative to the local install
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub available: bool,
    pub version: String,
    pub download_url: String,
    pub changelog: String,
    pub current_version: Option<String>,
}

/// Version of the currently unpacked bundle, if the marker exists
pub fn installed_version(root: &Path) -> Option<String> {
    fs::read_to_string(root.join(VERSION_FILE))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn save_installed_version(root: &Path, version: &str) -> std::io::Result<()> {
    let path = root.join(VERSION_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, version)
}

/// Query the latest release and decide whether it is newer than the local
/// bundle. The release must carry a ZIP asset; that archive is the payload
/// the installer unpacks.
pub async fn check_for_updates(root: &Path) -> Result<UpdateInfo, String> {
    let client = reqwest::Client::builder()
        .user_agent(UPDATE_USER_AGENT)
        .timeout(CHECK_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

    info!("Checking for updates at {}", GITHUB_API_URL);
    let release = with_retry(3, || async {
        let response = client
            .get(GITHUB_API_URL)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| format!("Network error: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Failed to check for updates: {}", response.status()));
        }

        response
            .json::<GithubRelease>()
            .await
            .map_err(|e| format!("Failed to parse release info: {}", e))
    })
    .await?;

    let zip_asset = release
        .assets
        .iter()
        .find(|a| a.name.ends_with(".zip"))
        .ok_or_else(|| "No ZIP file found in release assets".to_string())?;

    let current = installed_version(root);
    let available = is_newer(current.as_deref(), &release.tag_name);
    debug!(
        "Installed version {:?}, latest release {} (update available: {})",
        current, release.tag_name, available
    );

    Ok(UpdateInfo {
        available,
        version: release.tag_name.clone(),
        download_url: zip_asset.browser_download_url.clone(),
        changelog: release
            .body
            .clone()
            .unwrap_or_else(|| "No changelog provided".to_string()),
        current_version: current,
    })
}

/// A missing marker always means an update. Well-formed tags are compared
/// as semver; anything else falls back to plain inequality.
fn is_newer(current: Option<&str>, latest_tag: &str) -> bool {
    let current = match current {
        Some(current) => current,
        None => return true,
    };
    match (parse_tag(current), parse_tag(latest_tag)) {
        (Some(cur), Some(latest)) => latest > cur,
        _ => current != latest_tag,
    }
}

fn parse_tag(tag: &str) -> Option<Version> {
    Version::parse(tag.trim().trim_start_matches('v')).ok()
}
