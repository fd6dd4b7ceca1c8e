//! presto-compose-refresh
//!
//! Brings a docker compose stack up to date:
//! 1. Record the stack's images.
//! 2. down, pull, build, up, prune (prune is optional with `--interactive`).
//! 3. Record the images again and report what changed.

mod tasks;

use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use colored::Colorize;
use inquire::Confirm;
use presto_common::{PrestoConfig, cmd, journal, style};
use tracing::{error, info};

use tasks::TaskKind;

const TAG: &str = "presto-compose-refresh";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Update Docker containers and prune images",
    after_help = "To see info or warning logs type:\n     \
                  journalctl -t presto-compose-refresh -n 10"
)]
struct Args {
    /// Ask before updating and before pruning
    #[arg(short, long)]
    interactive: bool,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, args.debug || config.general.debug);

    if let Err(e) = run(&args, &config) {
        eprintln!("\n{} {:#}", style::cross(), e);
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &PrestoConfig) -> Result<()> {
    cmd::require(&["docker"])?;
    let compose_path = config.compose_file();
    if !compose_path.is_file() {
        bail!("Docker Compose file '{}' not found", compose_path.display());
    }
    let compose_file = compose_path.to_string_lossy().into_owned();
    let timeout = Duration::from_secs(config.docker.command_timeout_secs);

    println!("{} Checking for Docker Compose changes...", style::info());
    let before = tasks::compose_images(&compose_file)?;

    if args.interactive
        && !Confirm::new("Do you want to update Docker containers?")
            .with_default(true)
            .prompt()?
    {
        println!("{} Skipping Docker container update.", style::info());
        info!("user skipped the container update");
        return Ok(());
    }

    println!("{} Updating Docker containers...", style::info());
    for task in tasks::tasks(&compose_file) {
        if task.kind == TaskKind::Prune
            && args.interactive
            && !Confirm::new("Do you want to prune unused Docker images?")
                .with_default(false)
                .prompt()?
        {
            println!("{} Skipping Docker image pruning.", style::info());
            info!("user skipped image pruning");
            continue;
        }
        task.run(timeout)?;
    }

    let after = tasks::compose_images(&compose_file)?;
    let changes = tasks::compare_images(&before, &after);
    if changes.is_empty() {
        println!(
            "{} No changes in Docker Compose configuration after update.",
            style::info()
        );
        info!("no image changes after update");
    } else {
        let lines = changes.lines();
        println!(
            "{}\n  {}",
            "Docker Compose configuration changed after update:".yellow(),
            lines.join("\n  ")
        );
        info!(changes = %lines.join("; "), "image changes after update");
    }

    println!("{} Update process completed!", style::tick());
    info!("compose refresh completed");
    Ok(())
}
