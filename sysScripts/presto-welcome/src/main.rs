//! presto-welcome
//!
//! The login banner, hooked into `~/.bashrc` by `presto-tools-install`.
//! 1. Host header: hostname, date, kernel, uptime and load.
//! 2. CPU/GPU temperatures, IP addresses, memory and root disk bars.
//! 3. Weather (wttr.in), a Docker container summary and the attached drives.
//! 4. Pending apt upgrades.
//!
//! Each section is gated by `[welcome]` in the config and fails soft:
//! a missing tool prints "N/A", never an error, so a login is never blocked.

mod net;

use std::io::IsTerminal;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use presto_common::{PrestoConfig, PrestoResult, block, cmd, journal, style, sys};
use sysinfo::{Disks, System};
use tracing::{debug, info};

const TAG: &str = "presto-welcome";
const TEMP_WARN: f64 = 60.0;
const BAR_WIDTH: usize = 20;
/// A hung docker daemon or apt lock must not hold up the login.
const SECTION_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Parser)]
#[command(author, version, about = "Colorful system status banner for interactive logins")]
struct Args {
    /// Print even when stdout is not a terminal
    #[arg(long)]
    force: bool,
    /// Skip the weather lookup
    #[arg(long)]
    no_weather: bool,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // scp/rsync sessions source .bashrc too; keep their stdout clean
    if !args.force && !std::io::stdout().is_terminal() {
        return Ok(());
    }

    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, args.debug || config.general.debug);
    let welcome = &config.welcome;

    print_header();

    if welcome.show_temps {
        print_temps();
    }
    if welcome.show_ip {
        print_ips(welcome.show_public_ip);
    }
    if welcome.show_memory {
        print_memory();
    }
    if welcome.show_disk {
        print_root_disk(&config);
    }
    if welcome.show_weather && !args.no_weather {
        print_weather(&welcome.weather_location);
    }
    if welcome.show_docker {
        print_docker();
    }
    if welcome.show_drives {
        print_drives();
    }
    if welcome.check_updates {
        print_updates();
    }
    println!();

    info!("welcome banner shown");
    Ok(())
}

// --- Layout helpers ---

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<12} {}", label.magenta(), value);
}

fn na() -> colored::ColoredString {
    "N/A".dimmed()
}

/// stdout of a command killed after `timeout`.
fn capture_bounded(program: &str, args: &[&str], timeout: Duration) -> PrestoResult<String> {
    let output = cmd::capture_with_timeout(Command::new(program).args(args), timeout)?;
    cmd::check_output(program, output)
}

// --- Sections ---

fn print_header() {
    let host = sys::hostname();
    let rule = "━".repeat(host.len() + 8);
    println!();
    println!("  {}", rule.cyan());
    println!("  {}  {}  {}", "━━━".cyan(), host.bold().white(), "━━━".cyan());
    println!("  {}", rule.cyan());

    row("Date", Local::now().format("%A, %d %B %Y  %H:%M"));
    row(
        "Kernel",
        System::kernel_version().unwrap_or_else(|| "N/A".to_string()),
    );
    row("Uptime", format_uptime(System::uptime()));
    let load = System::load_average();
    row(
        "Load",
        format!("{:.2}, {:.2}, {:.2}", load.one, load.five, load.fifteen),
    );
}

fn print_temps() {
    let show = |t: Option<f64>| match t {
        Some(c) => style::temp_colored(c, TEMP_WARN).to_string(),
        None => na().to_string(),
    };
    row("CPU temp", show(sys::cpu_temp()));
    row("GPU temp", show(sys::gpu_temp()));
}

fn print_ips(show_public: bool) {
    match sys::primary_ip() {
        Some(ip) => row("IP", ip.to_string().green()),
        None => row("IP", na()),
    }
    let all = sys::all_ips();
    if all.len() > 1 {
        row("All IPs", all.join(", ").dimmed());
    }
    if show_public {
        match net::fetch_public_ip() {
            Ok(ip) => row("Public IP", ip),
            Err(e) => {
                debug!("public ip lookup failed: {e:#}");
                row("Public IP", na());
            }
        }
    }
}

fn print_memory() {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    let used = system.used_memory();
    if total == 0 {
        row("Memory", na());
        return;
    }
    let pct = used as f64 * 100.0 / total as f64;
    row(
        "Memory",
        format!(
            "{} {} / {}",
            style::usage_bar(pct, BAR_WIDTH, 70.0, 90.0),
            style::human_bytes(used),
            style::human_bytes(total)
        ),
    );
}

fn print_root_disk(config: &PrestoConfig) {
    let disks = Disks::new_with_refreshed_list();
    let root = disks.list().iter().find(|d| d.mount_point() == Path::new("/"));
    match root {
        Some(disk) if disk.total_space() > 0 => {
            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            let pct = used as f64 * 100.0 / total as f64;
            row(
                "Disk /",
                format!(
                    "{} {} / {}",
                    style::usage_bar(
                        pct,
                        BAR_WIDTH,
                        config.drives.usage_warn_percent,
                        config.drives.usage_crit_percent
                    ),
                    style::human_bytes(used),
                    style::human_bytes(total)
                ),
            );
        }
        _ => row("Disk /", na()),
    }
}

fn print_weather(location: &str) {
    match net::fetch_weather(location) {
        Ok(report) => row("Weather", report),
        Err(e) => {
            debug!("weather lookup failed: {e:#}");
            row("Weather", na());
        }
    }
}

fn print_docker() {
    if !cmd::command_exists("docker") {
        return;
    }
    let output = capture_bounded(
        "docker",
        &["ps", "-a", "--format", "{{.State}}\t{{.Status}}"],
        SECTION_TIMEOUT,
    );
    match output {
        Ok(text) => {
            let summary = DockerSummary::parse(&text);
            let mut line = format!(
                "{} running / {} total",
                summary.running.to_string().green(),
                summary.total
            );
            if summary.unhealthy > 0 {
                line.push_str(&format!(
                    "  {} {} unhealthy",
                    style::warn_mark(),
                    summary.unhealthy
                ));
            }
            row("Docker", line);
        }
        Err(e) => {
            debug!("docker ps failed: {e}");
            row("Docker", "daemon unavailable".yellow());
        }
    }
}

fn print_drives() {
    let devices = match block::lsblk() {
        Ok(d) => d,
        Err(e) => {
            debug!("lsblk failed: {e}");
            row("Drives", na());
            return;
        }
    };
    let disks = block::physical_disks(&devices);
    if disks.is_empty() {
        row("Drives", na());
        return;
    }
    for (i, disk) in disks.iter().enumerate() {
        let label = if i == 0 { "Drives" } else { "" };
        row(
            label,
            format!(
                "{:<8} {:>8}  {} ({})",
                disk.name,
                style::human_bytes(disk.size),
                disk.model_or_unknown(),
                disk.transport()
            ),
        );
    }
}

fn print_updates() {
    if !cmd::command_exists("apt") {
        return;
    }
    match capture_bounded("apt", &["list", "--upgradable"], SECTION_TIMEOUT) {
        Ok(text) => {
            let count = count_upgradable(&text);
            if count == 0 {
                row("Updates", format!("{} system is up to date", style::tick()));
            } else {
                row(
                    "Updates",
                    format!("{} packages can be upgraded", count.to_string().yellow().bold()),
                );
            }
        }
        Err(e) => debug!("apt list failed: {e}"),
    }
}

// --- Parsing ---

#[derive(Debug, Default, PartialEq)]
struct DockerSummary {
    running: usize,
    total: usize,
    unhealthy: usize,
}

impl DockerSummary {
    /// Lines of `{{.State}}\t{{.Status}}`.
    fn parse(text: &str) -> Self {
        let mut summary = DockerSummary::default();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let (state, status) = line.split_once('\t').unwrap_or((line, ""));
            summary.total += 1;
            if state.trim() == "running" {
                summary.running += 1;
            }
            if status.contains("(unhealthy)") {
                summary.unhealthy += 1;
            }
        }
        summary
    }
}

fn count_upgradable(apt_list: &str) -> usize {
    apt_list
        .lines()
        .filter(|l| l.contains("upgradable from"))
        .count()
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day"));
    }
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(plural(minutes, "minute"));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_summary_counts_states() {
        let text = "running\tUp 3 hours (healthy)\n\
                    running\tUp 2 minutes (unhealthy)\n\
                    exited\tExited (0) 2 days ago\n\n";
        assert_eq!(
            DockerSummary::parse(text),
            DockerSummary {
                running: 2,
                total: 3,
                unhealthy: 1
            }
        );
    }

    #[test]
    fn upgradable_ignores_listing_header() {
        let text = "Listing...\n\
                    curl/stable 8.5.0-2 arm64 [upgradable from: 8.4.0-1]\n\
                    git/stable 1:2.43 arm64 [upgradable from: 1:2.42]\n";
        assert_eq!(count_upgradable(text), 2);
        assert_eq!(count_upgradable("Listing...\n"), 0);
    }

    #[test]
    fn uptime_is_humanized() {
        assert_eq!(format_uptime(30), "0 minutes");
        assert_eq!(format_uptime(60), "1 minute");
        assert_eq!(format_uptime(3 * 86_400 + 3_600 + 120), "3 days, 1 hour, 2 minutes");
        assert_eq!(format_uptime(7_200), "2 hours");
    }

    #[test]
    fn slow_section_command_is_cut_off() {
        let err = capture_bounded("sleep", &["5"], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, presto_common::PrestoError::Timeout { .. }));
        let out = capture_bounded("sh", &["-c", "echo 3 running"], SECTION_TIMEOUT).unwrap();
        assert_eq!(out, "3 running\n");
    }

    #[test]
    fn cli_parses_flags() {
        let args = Args::try_parse_from(["presto-welcome", "--force", "--no-weather", "-d"]).unwrap();
        assert!(args.force && args.no_weather && args.debug);
    }
}
