//! The git checkout, the cargo builds and the config files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use presto_common::config::{DEFAULTS_FILE, DEFAULTS_TOML, LOCAL_FILE};
use presto_common::{cmd, style};
use tracing::{info, warn};

/// Every binary crate under `sysScripts/`.
pub const TOOL_CRATES: &[&str] = &[
    "presto-welcome",
    "presto-docker-monitor",
    "presto-drive-status",
    "presto-usb-install",
    "presto-tools-install",
    "presto-docker-update",
    "presto-compose-refresh",
    "presto-ups-monitor",
];

const LOCAL_TEMPLATE: &str = r#"# presto-tools local overrides.
# Anything set here wins over presto_config.defaults.toml.
# Uncomment and edit the keys you want to change.

# [welcome]
# weather_location = "London"
# show_public_ip = false

# [docker]
# compose_file = "~/presto/docker-compose.yml"

# [drives]
# usage_warn_percent = 80.0

# [ups]
# ntfy_topic = "pizero_UPSc"
"#;

#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate(String),
    Updated { from: String, to: String },
}

pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let dir = dir.to_string_lossy();
    let mut full = vec!["-C", dir.as_ref()];
    full.extend_from_slice(args);
    Ok(cmd::capture("git", &full)?.trim().to_string())
}

fn short(hash: &str) -> String {
    hash.chars().take(7).collect()
}

pub fn clone(url: &str, dir: &Path) -> Result<()> {
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    cmd::run_inherit("git", &["clone", url, &dir.to_string_lossy()])
        .with_context(|| format!("Failed to clone {url}"))?;
    info!(url, dir = %dir.display(), "repository cloned");
    Ok(())
}

/// HEAD before and after the pull. A checkout ahead of upstream pulls
/// nothing and stays where it was.
pub fn outcome(before: &str, after: &str) -> UpdateOutcome {
    if before == after {
        UpdateOutcome::UpToDate(short(before))
    } else {
        UpdateOutcome::Updated {
            from: short(before),
            to: short(after),
        }
    }
}

/// Fetches, then fast-forwards only when upstream moved.
pub fn update(dir: &Path) -> Result<UpdateOutcome> {
    git(dir, &["fetch", "--quiet"]).context("git fetch failed")?;
    let head = git(dir, &["rev-parse", "HEAD"])?;
    let upstream = git(dir, &["rev-parse", "@{u}"])
        .context("The checkout has no upstream branch")?;

    if head == upstream {
        return Ok(outcome(&head, &head));
    }
    git(dir, &["pull", "--ff-only", "--quiet"])
        .context("git pull --ff-only failed (local changes in the checkout?)")?;
    let after = git(dir, &["rev-parse", "HEAD"])?;
    let result = outcome(&head, &after);
    info!(?result, "repository checked");
    Ok(result)
}

/// `cargo install` per tool. Returns (crate, built) pairs; an empty list
/// when cargo is missing.
pub fn build_tools(repo: &Path) -> Vec<(String, bool)> {
    if !cmd::command_exists("cargo") {
        println!(
            "{} cargo not found, skipping build (install it from https://rustup.rs)",
            style::warn_mark()
        );
        warn!("cargo not found, tools not built");
        return Vec::new();
    }

    let mut results = Vec::new();
    for tool in TOOL_CRATES {
        let path = crate_path(repo, tool);
        if !path.exists() {
            println!("   {} missing directory for {}", style::warn_mark(), tool);
            results.push((tool.to_string(), false));
            continue;
        }
        println!("   🔨 Building {tool}...");
        let status = Command::new("cargo")
            .args(["install", "--path", "."])
            .current_dir(&path)
            .stdout(Stdio::null())
            .status();
        let ok = matches!(status, Ok(s) if s.success());
        if ok {
            println!("     {} {}", style::tick(), tool);
        } else {
            println!("     {} failed to build {}", style::cross(), tool);
            warn!(tool, "cargo install failed");
        }
        results.push((tool.to_string(), ok));
    }
    results
}

pub fn crate_path(repo: &Path, tool: &str) -> PathBuf {
    repo.join("sysScripts").join(tool)
}

/// Refreshes the defaults file and seeds the local one.
/// Returns whether the local file was created.
pub fn write_config(dir: &Path) -> Result<bool> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let defaults = dir.join(DEFAULTS_FILE);
    fs::write(&defaults, DEFAULTS_TOML)
        .with_context(|| format!("Failed to write {}", defaults.display()))?;

    let local = dir.join(LOCAL_FILE);
    if local.exists() {
        return Ok(false);
    }
    fs::write(&local, LOCAL_TEMPLATE)
        .with_context(|| format!("Failed to write {}", local.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use presto_common::PrestoConfig;

    #[test]
    fn config_files_are_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_config(dir.path()).unwrap());

        fs::write(dir.path().join(LOCAL_FILE), "[welcome]\nweather_location = \"Leeds\"\n").unwrap();
        assert!(!write_config(dir.path()).unwrap());

        let config = PrestoConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.welcome.weather_location, "Leeds");
    }

    #[test]
    fn template_is_all_comments() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path()).unwrap();
        let config = PrestoConfig::load_from(dir.path()).unwrap();
        assert_eq!(config, PrestoConfig::default());
    }

    #[test]
    fn crate_paths_live_under_sys_scripts() {
        assert_eq!(
            crate_path(Path::new("/home/pi/presto-tools"), "presto-welcome"),
            Path::new("/home/pi/presto-tools/sysScripts/presto-welcome")
        );
        assert!(TOOL_CRATES.contains(&"presto-tools-install"));
    }

    #[test]
    fn short_hash() {
        assert_eq!(short("0123456789abcdef"), "0123456");
    }

    #[test]
    fn outcome_follows_head_not_upstream() {
        let a = "4f2a9c1d0e5b7a8f9c0d1e2f3a4b5c6d7e8f9a0b";
        let b = "9b1e77c0aa12d3e4f5a6b7c8d9e0f1a2b3c4d5e6";
        // local commits ahead of upstream: the pull is a no-op
        assert_eq!(outcome(a, a), UpdateOutcome::UpToDate("4f2a9c1".into()));
        assert_eq!(
            outcome(a, b),
            UpdateOutcome::Updated {
                from: "4f2a9c1".into(),
                to: "9b1e77c".into()
            }
        );
    }
}
