//! Strategy preset catalogue
//!
//! Presets are the stock `.bat` launchers shipped in the project root, one
//! per bypass strategy. Each is parsed down to the argument vector it would
//! hand to `winws.exe`, so the supervisor can launch the same configuration
//! directly without a shell in between.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the filtering executable the presets drive
pub const FILTER_EXECUTABLE: &str = "winws.exe";

/// Launcher scripts that are not strategies and must never enter the
/// catalogue
const EXCLUDED_NAME_PARTS: [&str; 2] = ["service", "blockcheck"];

/// One strategy: a named, ordered argument list for the filtering process
///
/// Immutable once loaded. The id is the source filename, which keeps the
/// current selection stable across catalogue reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub args: Vec<String>,
}

/// Loads the ordered strategy catalogue from a project directory
pub struct PresetStore {
    root: PathBuf,
}

impl PresetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the catalogue from disk
    ///
    /// Files are sorted by name so scan sequencing is stable across
    /// platforms. Launchers that do not invoke the filter, or that yield an
    /// empty argument list, are excluded.
    pub fn scan(&self) -> Vec<Preset> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to scan presets in {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_preset_file(path))
            .collect();
        files.sort();

        let mut presets = Vec::new();
        for path in files {
            let filename = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read preset {}: {}", path.display(), e);
                    continue;
                }
            };
            match parse_bat(&filename, &content) {
                Some(preset) => presets.push(preset),
                None => debug!("Skipping {}: no usable launch line", filename),
            }
        }
        presets
    }
}

fn is_preset_file(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().to_lowercase(),
        None => return false,
    };
    name.ends_with(".bat") && !EXCLUDED_NAME_PARTS.iter().any(|part| name.contains(part))
}

/// Parse one launcher script into a preset
///
/// Returns None when the script never invokes the filter or the invocation
/// carries no arguments.
fn parse_bat(filename: &str, content: &str) -> Option<Preset> {
    let joined = splice_continuations(content);

    // Locate the filter invocation, case-insensitively
    let lower = joined.to_lowercase();
    let index = lower.find(FILTER_EXECUTABLE)?;
    let rest = &joined[index + FILTER_EXECUTABLE.len()..];
    // The launcher quotes the executable path; step over the closing quote
    let rest = rest.strip_prefix('"').unwrap_or(rest);

    let args: Vec<String> = tokenize(rest.trim_start())
        .into_iter()
        .map(clean_arg)
        .filter(|arg| !arg.is_empty())
        .collect();
    if args.is_empty() {
        return None;
    }

    Some(Preset {
        id: filename.to_string(),
        name: display_name(filename),
        description: format!("Imported from {}", filename),
        args,
    })
}

/// Strip CR and splice `^` line continuations into one logical line
fn splice_continuations(content: &str) -> String {
    let normalized = content.replace('\r', "");
    let mut lines: Vec<String> = Vec::new();
    for raw in normalized.lines() {
        let trimmed = raw.trim();
        if let Some(last) = lines.last_mut() {
            if last.ends_with('^') {
                last.pop();
                last.push_str(trimmed);
                continue;
            }
        }
        lines.push(trimmed.to_string());
    }
    lines.join(" ")
}

/// Split on spaces, keeping double-quoted stretches together
fn tokenize(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quote = !in_quote;
                // Kept here, stripped by clean_arg, so quoted paths survive
                // tokenization as a single argument
                current.push(ch);
            }
            ' ' if !in_quote => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Resolve launcher variables to the paths the process will see at runtime
/// (its working directory is the project root) and drop quoting, which the
/// argv-based spawn does not need
fn clean_arg(arg: String) -> String {
    arg.replace("%BIN%", "bin/")
        .replace("%LISTS%", "lists/")
        .replace("%GameFilter%", "12")
        .replace('"', "")
}

/// "general-alt (v2).bat" -> "General Alt (v2)"
fn display_name(filename: &str) -> String {
    let stem = filename.strip_suffix(".bat").unwrap_or(filename);
    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_BAT: &str = concat!(
        "@echo off\r\n",
        "chcp 65001 > nul\r\n",
        "start \"zapret: general\" /min \"%BIN%winws.exe\" --wf-tcp=80,443 --wf-udp=443 ^\r\n",
        "--hostlist=\"%LISTS%list-general.txt\" --dpi-desync=fake ^\r\n",
        "--dpi-desync-ttl=12\r\n",
    );

    #[test]
    fn test_parse_splices_continuations_and_resolves_vars() {
        let preset = parse_bat("general.bat", SIMPLE_BAT).unwrap();
        assert_eq!(
            preset.args,
            vec![
                "--wf-tcp=80,443",
                "--wf-udp=443",
                "--hostlist=lists/list-general.txt",
                "--dpi-desync=fake",
                "--dpi-desync-ttl=12",
            ]
        );
        assert_eq!(preset.id, "general.bat");
        assert_eq!(preset.name, "General");
        assert_eq!(preset.description, "Imported from general.bat");
    }

    #[test]
    fn test_parse_keeps_quoted_path_with_spaces_as_one_arg() {
        let bat = "\"%BIN%winws.exe\" --hostlist=\"%LISTS%my list.txt\" --x\n";
        let preset = parse_bat("alt.bat", bat).unwrap();
        assert_eq!(
            preset.args,
            vec!["--hostlist=lists/my list.txt", "--x"]
        );
    }

    #[test]
    fn test_parse_substitutes_game_filter_placeholder() {
        let bat = "\"%BIN%winws.exe\" --filter-udp=%GameFilter%\n";
        let preset = parse_bat("game.bat", bat).unwrap();
        assert_eq!(preset.args, vec!["--filter-udp=12"]);
    }

    #[test]
    fn test_parse_is_case_insensitive_on_executable_name() {
        let bat = "\"%BIN%WinWS.exe\" --a\n";
        let preset = parse_bat("caps.bat", bat).unwrap();
        assert_eq!(preset.args, vec!["--a"]);
    }

    #[test]
    fn test_parse_rejects_scripts_without_launch_line() {
        assert!(parse_bat("readme.bat", "echo nothing to see here\n").is_none());
    }

    #[test]
    fn test_parse_rejects_empty_argument_list() {
        assert!(parse_bat("bare.bat", "\"%BIN%winws.exe\"\n").is_none());
    }

    #[test]
    fn test_display_name_title_cases_separators() {
        assert_eq!(display_name("general.bat"), "General");
        assert_eq!(display_name("general-alt.bat"), "General Alt");
        assert_eq!(
            display_name("discord_youtube_fix.bat"),
            "Discord Youtube Fix"
        );
    }

    #[test]
    fn test_scan_orders_and_filters_directory() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, content: &str| {
            fs::write(dir.path().join(name), content).unwrap();
        };

        write("general-alt.bat", SIMPLE_BAT);
        write("general.bat", SIMPLE_BAT);
        // Excluded by name
        write("service_install.bat", SIMPLE_BAT);
        write("blockcheck.bat", SIMPLE_BAT);
        // Not a launcher
        write("notes.txt", "not a preset");
        // No launch line: parsed out
        write("broken.bat", "echo hello\n");

        let store = PresetStore::new(dir.path());
        let presets = store.scan();
        let ids: Vec<&str> = presets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["general-alt.bat", "general.bat"]);
    }

    #[test]
    fn test_scan_ids_are_stable_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("general.bat"), SIMPLE_BAT).unwrap();

        let store = PresetStore::new(dir.path());
        let first = store.scan();
        let second = store.scan();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scan_of_missing_directory_is_empty() {
        let store = PresetStore::new("/nonexistent/preset/dir");
        assert!(store.scan().is_empty());
    }
}
