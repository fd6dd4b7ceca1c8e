//! The refresh sequence and the helpers around it.

use std::collections::BTreeSet;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use presto_common::{cmd, style};
use regex::Regex;
use tracing::{debug, info};

const SPINNER_FRAMES: [char; 4] = ['-', '/', '|', '\\'];
const SPINNER_TICK: Duration = Duration::from_millis(100);

static RECLAIMED_RE: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Output captured behind a spinner.
    Quiet,
    /// Progress goes straight to the terminal.
    Native,
    /// Native output, also scanned for the reclaimed space.
    Prune,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub message: &'static str,
    pub args: Vec<String>,
    pub kind: TaskKind,
}

fn compose(file: &str, rest: &[&str]) -> Vec<String> {
    ["compose", "-f", file]
        .iter()
        .chain(rest)
        .map(|s| s.to_string())
        .collect()
}

/// down, pull, build, up, prune. Order matters.
pub fn tasks(compose_file: &str) -> Vec<Task> {
    vec![
        Task {
            message: "Stopping containers... ⏹️",
            args: compose(compose_file, &["down"]),
            kind: TaskKind::Quiet,
        },
        Task {
            message: "Pulling Docker images... ⬇️",
            args: compose(compose_file, &["pull"]),
            kind: TaskKind::Native,
        },
        Task {
            message: "Building Docker images... 🛠️",
            args: compose(compose_file, &["build"]),
            kind: TaskKind::Quiet,
        },
        Task {
            message: "Starting containers... 🟢",
            args: compose(compose_file, &["up", "-d", "--remove-orphans"]),
            kind: TaskKind::Quiet,
        },
        Task {
            message: "Pruning unused images... 🗑️",
            args: ["image", "prune", "-a", "-f"].map(String::from).to_vec(),
            kind: TaskKind::Prune,
        },
    ]
}

impl Task {
    fn command_line(&self) -> String {
        format!("docker {}", self.args.join(" "))
    }

    pub fn run(&self, timeout: Duration) -> Result<()> {
        info!(command = %self.command_line(), "running task");
        let mut command = Command::new("docker");
        command.args(&self.args);

        match self.kind {
            TaskKind::Quiet => {
                let spinner = Spinner::start(self.message);
                let result = cmd::capture_with_timeout(&mut command, timeout)
                    .and_then(|out| cmd::check_output("docker", out));
                spinner.stop(result.is_ok());
                let stdout = result.with_context(|| format!("'{}' failed", self.command_line()))?;
                debug!(output = %stdout.trim(), "task output");
            }
            TaskKind::Native => {
                println!("{}", self.message.yellow());
                let status = cmd::run_with_timeout(command.stdin(Stdio::null()), timeout)
                    .with_context(|| format!("'{}' did not finish", self.command_line()))?;
                if !status.success() {
                    bail!("'{}' failed ({status})", self.command_line());
                }
            }
            TaskKind::Prune => {
                println!("{}", self.message.yellow());
                let (status, out) = cmd::tee_with_timeout(&mut command, timeout)
                    .with_context(|| format!("'{}' did not finish", self.command_line()))?;
                if !status.success() {
                    bail!("'{}' failed ({status})", self.command_line());
                }
                match reclaimed_space(&out) {
                    Some(space) => {
                        println!("{} Pruning completed! Reclaimed {space}.", style::tick())
                    }
                    None => println!("{} Pruning completed, no space reclaimed.", style::tick()),
                }
            }
        }
        info!(task = self.message, "task completed");
        Ok(())
    }
}

/// `Total reclaimed space: 1.2GB` -> `1.2GB`. `None` for `0B` or no summary.
pub fn reclaimed_space(prune_output: &str) -> Option<String> {
    let re = RECLAIMED_RE.get_or_init(|| Regex::new(r"Total reclaimed space:\s+(.*)").unwrap());
    let space = re.captures(prune_output)?.get(1)?.as_str().trim();
    (!space.is_empty() && space != "0B").then(|| space.to_string())
}

/// Non-empty trimmed lines of `docker compose config --images`.
pub fn parse_images(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

pub fn compose_images(compose_file: &str) -> Result<Vec<String>> {
    let out = cmd::capture("docker", &["compose", "-f", compose_file, "config", "--images"])
        .context("Could not read the image list from the compose file")?;
    Ok(parse_images(&out))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImageChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ImageChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.added
            .iter()
            .map(|i| format!("Image {i} added or updated"))
            .chain(self.removed.iter().map(|i| format!("Image {i} removed")))
            .collect()
    }
}

pub fn compare_images(before: &[String], after: &[String]) -> ImageChanges {
    let before: BTreeSet<&String> = before.iter().collect();
    let after: BTreeSet<&String> = after.iter().collect();
    ImageChanges {
        added: after.difference(&before).map(|s| s.to_string()).collect(),
        removed: before.difference(&after).map(|s| s.to_string()).collect(),
    }
}

// --- Spinner ---

/// A `\r`-redrawn spinner on its own thread, stopped through a shared flag.
pub struct Spinner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    message: String,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let text = message.to_string();
        let handle = thread::spawn(move || {
            let mut frame = 0;
            let mut stdout = std::io::stdout();
            while flag.load(Ordering::Relaxed) {
                let _ = write!(
                    stdout,
                    "\r{} {}",
                    text.yellow(),
                    SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
                );
                let _ = stdout.flush();
                frame += 1;
                thread::sleep(SPINNER_TICK);
            }
        });
        Self {
            running,
            handle: Some(handle),
            message: message.to_string(),
        }
    }

    pub fn stop(mut self, ok: bool) {
        self.halt();
        let mark = if ok { style::tick() } else { style::cross() };
        println!("\r{} {}", self.message.yellow(), mark);
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.halt();
    }
}
