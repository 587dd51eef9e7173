//! Runtime toggles over the shipped list files
//!
//! Two switches live next to the presets: the game-filter flag file that
//! presets read through `%GameFilter%`, and the ipset list that can be
//! rotated between its real contents, match-nothing, and match-everything.
//! Both require a filter restart to take effect.

use crate::events::EventBus;
use log::warn;
use serde_json::json;
use std::fs;
use std::io;
use std::path::PathBuf;

const GAME_FILTER_FLAG: &str = "utils/game_filter.enabled";
const IPSET_FILE: &str = "lists/ipset-all.txt";
const IPSET_BACKUP: &str = "lists/ipset-all.txt.backup";

/// TEST-NET-3 sentinel: a syntactically valid entry that matches no real
/// traffic, standing in for "ipset disabled"
const IPSET_DISABLED_SENTINEL: &str = "203.0.113.113/32";

/// State of the ipset list file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpsetStatus {
    /// Sentinel entry (or no file): the set matches nothing
    Disabled,
    /// Empty file: the filter applies to all addresses
    Any,
    /// Real address list present
    Loaded,
}

impl IpsetStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IpsetStatus::Disabled => "none",
            IpsetStatus::Any => "any",
            IpsetStatus::Loaded => "loaded",
        }
    }
}

/// Toggles for the list files under one project root
pub struct ListManager {
    root: PathBuf,
    events: EventBus,
}

impl ListManager {
    pub fn new(root: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            root: root.into(),
            events,
        }
    }

    pub fn game_filter_enabled(&self) -> bool {
        self.root.join(GAME_FILTER_FLAG).exists()
    }

    /// Flip the game-filter flag file; returns the new state
    pub fn toggle_game_filter(&self) -> io::Result<bool> {
        let flag = self.root.join(GAME_FILTER_FLAG);
        if flag.exists() {
            fs::remove_file(&flag)?;
            self.events.log("Game Filter disabled");
            self.events.log("Restart Zapret to apply");
            Ok(false)
        } else {
            if let Some(parent) = flag.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&flag, "ENABLED")?;
            self.events.log("Game Filter enabled");
            self.events.log("Port range: 1024-65535");
            self.events.log("Restart Zapret to apply");
            Ok(true)
        }
    }

    pub fn ipset_status(&self) -> IpsetStatus {
        let list = self.root.join(IPSET_FILE);
        let content = match fs::read_to_string(&list) {
            Ok(content) => content,
            Err(_) => return IpsetStatus::Disabled,
        };
        if content.lines().all(|line| line.trim().is_empty()) {
            return IpsetStatus::Any;
        }
        if content.contains(IPSET_DISABLED_SENTINEL) {
            return IpsetStatus::Disabled;
        }
        IpsetStatus::Loaded
    }

    /// Rotate the ipset list: Loaded -> Disabled -> Any -> Loaded
    ///
    /// Moving away from Loaded backs the real list up; coming back restores
    /// it. With no backup to restore, the rotation lands on Any instead.
    pub fn toggle_ipset(&self) -> io::Result<IpsetStatus> {
        let list = self.root.join(IPSET_FILE);
        let backup = self.root.join(IPSET_BACKUP);
        if let Some(parent) = list.parent() {
            fs::create_dir_all(parent)?;
        }

        let next = match self.ipset_status() {
            IpsetStatus::Loaded => {
                self.events.log_keyed("ipsetLoaded", json!({}));
                if backup.exists() {
                    fs::remove_file(&backup)?;
                }
                if list.exists() {
                    fs::rename(&list, &backup)?;
                }
                fs::write(&list, format!("{}\n", IPSET_DISABLED_SENTINEL))?;
                self.events.log_keyed("ipsetDisabled", json!({}));
                IpsetStatus::Disabled
            }
            IpsetStatus::Disabled => {
                self.events.log_keyed("ipsetNone", json!({}));
                fs::write(&list, "")?;
                self.events.log_keyed("ipsetAll", json!({}));
                IpsetStatus::Any
            }
            IpsetStatus::Any => {
                self.events.log_keyed("ipsetAny", json!({}));
                if backup.exists() {
                    if list.exists() {
                        fs::remove_file(&list)?;
                    }
                    fs::rename(&backup, &list)?;
                    self.events.log_keyed("ipsetRestored", json!({}));
                    IpsetStatus::Loaded
                } else {
                    warn!("No ipset backup to restore, staying on match-all");
                    self.events.log_keyed("ipsetNoBackup", json!({}));
                    IpsetStatus::Any
                }
            }
        };
        Ok(next)
    }
}
