//! presto-tools-install
//!
//! Installs and maintains presto-tools for the current user:
//! 1. Clone the repository, or fast-forward an existing checkout.
//! 2. `cargo install` every tool crate.
//! 3. Refresh the defaults config and seed the local overrides file.
//! 4. Hook `presto-welcome` and the aliases into the shell profile.
//!
//! `--uninstall` only removes the profile hook; config and binaries stay.

mod profile;
mod repo;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser};
use colored::Colorize;
use presto_common::config::{self, expand_path};
use presto_common::{PrestoConfig, cmd, journal, style};
use tracing::{error, info};

use repo::UpdateOutcome;

const TAG: &str = "presto-tools-install";

#[derive(Debug, Parser)]
#[command(author, version, about = "Install or update presto-tools")]
#[command(group(ArgGroup::new("action").args(["update", "uninstall"])))]
struct Args {
    /// Update an existing installation
    #[arg(long)]
    update: bool,
    /// Remove the shell profile hook
    #[arg(long)]
    uninstall: bool,
    /// Skip `cargo install`
    #[arg(long, conflicts_with = "uninstall")]
    no_build: bool,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, args.debug || config.general.debug);

    if let Err(e) = run(&args, &config) {
        eprintln!("{} {:#}", style::cross(), e);
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &PrestoConfig) -> Result<()> {
    let profile_path = expand_path(&config.install.profile_file);
    if args.uninstall {
        return uninstall(&profile_path);
    }

    cmd::require(&["git"])?;
    let install_dir = expand_path(&config.install.install_dir);

    // --- Source ---
    println!("\n {}", style::heading("Source"));
    if repo::is_git_repo(&install_dir) {
        match repo::update(&install_dir)? {
            UpdateOutcome::UpToDate(rev) => {
                println!("  {} already up to date ({})", style::tick(), rev.dimmed())
            }
            UpdateOutcome::Updated { from, to } => {
                println!("  {} updated {} → {}", style::tick(), from.dimmed(), to.green())
            }
        }
    } else if args.update {
        bail!(
            "No presto-tools checkout at {}; run presto-tools-install without --update first",
            install_dir.display()
        );
    } else {
        ensure_clone_target(&install_dir)?;
        repo::clone(&config.install.repo_url, &install_dir)?;
        println!("  {} cloned into {}", style::tick(), install_dir.display());
    }

    // --- Build ---
    if !args.no_build {
        println!("\n {}", style::heading("Build"));
        let results = repo::build_tools(&install_dir);
        let failed: Vec<_> = results
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(t, _)| t.as_str())
            .collect();
        if !failed.is_empty() {
            println!("  {} not built: {}", style::warn_mark(), failed.join(", "));
        }
    }

    // --- Config ---
    println!("\n {}", style::heading("Config"));
    let config_dir = config::config_dir().context("Could not determine config directory")?;
    let created = repo::write_config(&config_dir)?;
    println!("  {} defaults written to {}", style::tick(), config_dir.display());
    if created {
        println!(
            "  {} edit {} to override them",
            style::info(),
            config_dir.join(config::LOCAL_FILE).display()
        );
    }

    // --- Profile ---
    println!("\n {}", style::heading("Shell profile"));
    install_profile(&profile_path)?;
    println!(
        "  {} hook installed in {} (open a new shell to see it)",
        style::tick(),
        profile_path.display()
    );

    info!(dir = %install_dir.display(), "presto-tools installed");
    Ok(())
}

/// Cloning needs a missing or empty directory.
fn ensure_clone_target(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let empty = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .next()
        .is_none();
    if !empty {
        bail!(
            "{} exists but is not a git checkout; move it away or set [install] install_dir",
            dir.display()
        );
    }
    Ok(())
}

fn read_profile(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn install_profile(path: &Path) -> Result<()> {
    let content = read_profile(path)?;
    let updated = profile::upsert_block(&content, &profile::render_block());
    if updated != content {
        fs::write(path, updated).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(profile = %path.display(), "profile hook written");
    }
    Ok(())
}

fn uninstall(path: &Path) -> Result<()> {
    let content = read_profile(path)?;
    if !profile::has_block(&content) {
        println!("{} no presto-tools hook in {}", style::info(), path.display());
        return Ok(());
    }
    fs::write(path, profile::remove_block(&content))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} removed the presto-tools hook from {}", style::tick(), path.display());
    println!(
        "{} binaries stay installed; remove them with `cargo uninstall <tool>`",
        style::info()
    );
    info!(profile = %path.display(), "profile hook removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_uninstall_conflict() {
        assert!(Args::try_parse_from([TAG, "--update", "--uninstall"]).is_err());
        assert!(Args::try_parse_from([TAG, "--uninstall", "--no-build"]).is_err());
        assert!(Args::try_parse_from([TAG, "--update", "--no-build"]).is_ok());
    }

    #[test]
    fn profile_install_and_uninstall_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".bashrc");
        fs::write(&path, "export EDITOR=vim\n").unwrap();

        install_profile(&path).unwrap();
        install_profile(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(profile::BEGIN_MARKER).count(), 1);

        uninstall(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "export EDITOR=vim\n");
    }

    #[test]
    fn profile_is_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".bashrc");
        install_profile(&path).unwrap();
        assert!(profile::has_block(&fs::read_to_string(&path).unwrap()));
    }

    #[test]
    fn clone_target_must_be_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_clone_target(&dir.path().join("new")).is_ok());
        assert!(ensure_clone_target(dir.path()).is_ok());
        fs::write(dir.path().join("stray"), "").unwrap();
        assert!(ensure_clone_target(dir.path()).is_err());
    }
}
