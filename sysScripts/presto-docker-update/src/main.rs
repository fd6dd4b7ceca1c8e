//! presto-docker-update
//!
//! Compares the installed Docker Engine and Compose plugin with the latest
//! GitHub releases, then upgrades them through apt on request.

mod release;
mod version;

use anyhow::{Result, bail};
use clap::Parser;
use colored::{ColoredString, Colorize};
use inquire::Confirm;
use presto_common::{PrestoConfig, cmd, journal, style};
use tracing::{error, info, warn};

use release::Component;
use version::Version;

const TAG: &str = "presto-docker-update";
const APT_PACKAGES: &[&str] = &[
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-compose-plugin",
];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Check for and install Docker Engine / Compose updates",
    after_help = "To see info or warning logs type:\n     journalctl -t presto-docker-update -n 10"
)]
struct Args {
    /// Only report, never upgrade
    #[arg(long)]
    check: bool,
    /// Upgrade without asking
    #[arg(short, long, conflicts_with = "check")]
    yes: bool,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    UpToDate,
    UpdateAvailable,
    Unknown,
}

impl Status {
    fn of(installed: Option<&Version>, latest: Option<&Version>) -> Self {
        match (installed, latest) {
            (Some(i), Some(l)) if i >= l => Status::UpToDate,
            (Some(_), Some(_)) => Status::UpdateAvailable,
            _ => Status::Unknown,
        }
    }

    fn colored(self) -> ColoredString {
        match self {
            Status::UpToDate => "up to date".green(),
            Status::UpdateAvailable => "update available".yellow().bold(),
            Status::Unknown => "unknown".dimmed(),
        }
    }
}

struct Row {
    component: Component,
    installed: Option<Version>,
    latest: Option<Version>,
    status: Status,
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
    let rows = collect()?;
    print_table(&rows);

    let pending: Vec<&str> = rows
        .iter()
        .filter(|r| r.status == Status::UpdateAvailable)
        .map(|r| r.component.label())
        .collect();
    if pending.is_empty() {
        info!("docker is up to date");
        return Ok(());
    }
    info!(components = %pending.join(", "), "docker updates available");
    if args.check {
        return Ok(());
    }

    if !cmd::command_exists("apt-get") {
        bail!("apt-get not found; only apt-installed Docker can be upgraded here");
    }
    cmd::require_root("upgrade Docker packages")?;

    let go = args.yes
        || Confirm::new(&format!("Upgrade {} now?", pending.join(" and ")))
            .with_default(false)
            .prompt()?;
    if !go {
        println!("{} upgrade skipped", style::info());
        return Ok(());
    }

    upgrade()?;
    println!("\n{} Docker upgraded", style::tick());
    print_table(&collect()?);
    Ok(())
}

fn collect() -> Result<Vec<Row>> {
    let client = release::client()?;
    Ok(Component::ALL
        .into_iter()
        .map(|component| {
            let installed = release::installed(component)
                .inspect_err(|e| warn!("{e:#}"))
                .ok();
            let latest = release::latest(&client, component)
                .inspect_err(|e| warn!("{e:#}"))
                .ok();
            let status = Status::of(installed.as_ref(), latest.as_ref());
            Row {
                component,
                installed,
                latest,
                status,
            }
        })
        .collect())
}

fn print_table(rows: &[Row]) {
    let show = |v: &Option<Version>| v.as_ref().map_or_else(|| "-".to_string(), Version::to_string);
    println!("\n {}", style::heading("Docker versions"));
    println!(
        "  {:<16} {:<14} {:<14} {}",
        "COMPONENT".bold(),
        "INSTALLED".bold(),
        "LATEST".bold(),
        "STATUS".bold()
    );
    for r in rows {
        println!(
            "  {:<16} {:<14} {:<14} {}",
            r.component.label(),
            show(&r.installed),
            show(&r.latest),
            r.status.colored()
        );
    }
}

fn upgrade() -> Result<()> {
    println!("\n{} apt-get update", style::info());
    cmd::run_inherit("apt-get", &["update"])?;

    let mut args = vec!["install", "-y", "--only-upgrade"];
    args.extend_from_slice(APT_PACKAGES);
    println!("\n{} apt-get {}", style::info(), args.join(" "));
    cmd::run_inherit("apt-get", &args)?;
    info!(packages = %APT_PACKAGES.join(" "), "docker packages upgraded");
    Ok(())
}
