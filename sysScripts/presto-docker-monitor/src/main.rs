//! presto-docker-monitor
//!
//! Renders the state of the Docker host as terminal tables:
//! 1. Default: every container (state, health, ports, status) plus `docker system df`.
//! 2. `--running-apps`: running containers and where to reach them.
//! 3. `--simple`: one glyph + name per container.
//! 4. `--warnings`: only containers that need attention (also logged to the journal).

mod docker;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use colored::{ColoredString, Colorize};
use presto_common::{PrestoConfig, cmd, journal, style, sys};
use tracing::{error, info, warn};

use docker::{Container, Health};

const TAG: &str = "presto-docker-monitor";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Docker container health, port and status monitor",
    after_help = "To see info or warning logs type:\n     journalctl -t presto-docker-monitor -n 10"
)]
#[command(group(ArgGroup::new("mode").args(["running_apps", "simple", "warnings"])))]
struct Args {
    /// List running containers and their published ports
    #[arg(long)]
    running_apps: bool,
    /// One line per container
    #[arg(long)]
    simple: bool,
    /// Only show containers that are unhealthy, restarting or crashed
    #[arg(long)]
    warnings: bool,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, args.debug || config.general.debug);

    if let Err(e) = run(&args) {
        eprintln!("{} {:#}", style::cross(), e);
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    cmd::require(&["docker"])?;
    let containers = docker::list_containers()?;

    if args.running_apps {
        print_running_apps(&containers);
    } else if args.simple {
        print_simple(&containers);
    } else if args.warnings {
        print_warnings(&containers);
    } else {
        print_table(&containers);
        print_disk_usage();
    }
    Ok(())
}

// --- Styling ---

fn state_colored(c: &Container) -> ColoredString {
    match c.state.as_str() {
        "running" => c.state.green(),
        "restarting" | "dead" => c.state.red().bold(),
        "exited" if c.exit_code() != Some(0) => c.state.red(),
        "paused" | "created" => c.state.yellow(),
        _ => c.state.dimmed(),
    }
}

fn health_colored(h: Health) -> ColoredString {
    match h {
        Health::Healthy => h.label().green(),
        Health::Unhealthy => h.label().red().bold(),
        Health::Starting => h.label().yellow(),
        Health::None => h.label().dimmed(),
    }
}

fn glyph(c: &Container) -> ColoredString {
    if c.needs_attention() {
        style::cross()
    } else if c.is_running() {
        style::tick()
    } else {
        "•".dimmed()
    }
}

// --- Views ---

fn print_table(containers: &[Container]) {
    println!("\n {}", style::heading("Docker Containers"));
    if containers.is_empty() {
        println!("  {} no containers on this host", style::info());
        return;
    }

    let name_w = containers
        .iter()
        .map(|c| c.names.len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(
        "  {:<name_w$}  {:<10}  {:<9}  {:<22}  {}",
        "NAME".bold(),
        "STATE".bold(),
        "HEALTH".bold(),
        "PORTS".bold(),
        "STATUS".bold(),
    );
    for c in containers {
        let ports = c.published_ports();
        let ports = if ports.is_empty() {
            "-".to_string()
        } else {
            ports.join(", ")
        };
        println!(
            "  {:<name_w$}  {:<10}  {:<9}  {:<22}  {}",
            c.names,
            state_colored(c),
            health_colored(c.health()),
            ports,
            c.status.dimmed(),
        );
    }

    let running = containers.iter().filter(|c| c.is_running()).count();
    let attention = containers.iter().filter(|c| c.needs_attention()).count();
    println!(
        "\n  {} running / {} total{}",
        running.to_string().green(),
        containers.len(),
        if attention > 0 {
            format!(", {} need attention", attention.to_string().red().bold())
        } else {
            String::new()
        }
    );
}

fn print_disk_usage() {
    let usage = match docker::disk_usage() {
        Ok(u) => u,
        Err(e) => {
            warn!("{e:#}");
            return;
        }
    };
    println!("\n {}", style::heading("Docker Disk Usage"));
    println!(
        "  {:<14} {:>6} {:>7} {:>10}  {}",
        "TYPE".bold(),
        "TOTAL".bold(),
        "ACTIVE".bold(),
        "SIZE".bold(),
        "RECLAIMABLE".bold()
    );
    for u in usage {
        println!(
            "  {:<14} {:>6} {:>7} {:>10}  {}",
            u.kind,
            u.total_count,
            u.active,
            u.size,
            u.reclaimable.yellow()
        );
    }
}

fn print_running_apps(containers: &[Container]) {
    let host = sys::primary_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());

    println!("\n {}", style::heading("Running Apps"));
    let running: Vec<_> = containers.iter().filter(|c| c.is_running()).collect();
    if running.is_empty() {
        println!("  {} nothing is running", style::info());
        return;
    }
    for c in running {
        let ports = c.published_ports();
        if ports.is_empty() {
            println!("  {} {:<20} {}", style::tick(), c.names, "(no published ports)".dimmed());
            continue;
        }
        let urls: Vec<String> = ports
            .iter()
            .filter_map(|p| p.split("->").next())
            .map(|host_port| format!("{host}:{host_port}"))
            .collect();
        println!("  {} {:<20} {}", style::tick(), c.names, urls.join("  ").cyan());
    }
}

fn print_simple(containers: &[Container]) {
    for c in containers {
        println!("{} {:<24} {}", glyph(c), c.names, state_colored(c));
    }
}

fn print_warnings(containers: &[Container]) {
    let flagged: Vec<_> = containers.iter().filter(|c| c.needs_attention()).collect();
    if flagged.is_empty() {
        println!("{} all {} containers healthy", style::tick(), containers.len());
        info!(containers = containers.len(), "all containers healthy");
        return;
    }
    println!("\n {}", style::heading("Containers needing attention"));
    for c in flagged {
        println!(
            "  {} {:<24} {:<10} {}",
            style::warn_mark(),
            c.names,
            state_colored(c),
            c.status
        );
        warn!(
            container = %c.names,
            state = %c.state,
            status = %c.status,
            "container needs attention"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_are_mutually_exclusive() {
        assert!(Args::try_parse_from([TAG, "--simple", "--warnings"]).is_err());
        let args = Args::try_parse_from([TAG, "--running-apps"]).unwrap();
        assert!(args.running_apps && !args.simple);
    }
}
