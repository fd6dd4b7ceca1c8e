//! presto-usb-install
//!
//! Adds a USB drive to `/etc/fstab` so it mounts at boot:
//! 1. Detect USB partitions and pick one.
//! 2. Unmount it, optionally `fsck` it, choose `/mnt/<name>`.
//! 3. Back up fstab, append the entry, create the mountpoint.
//! 4. Test-mount it. A failed mount rolls the fstab entry back.

mod fstab;
mod wizard;

use std::io::IsTerminal;

use clap::Parser;
use colored::Colorize;
use presto_common::{PrestoConfig, journal, style};
use tracing::{error, info};

const TAG: &str = "presto-usb-install";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Interactive wizard to mount a USB drive at boot via /etc/fstab",
    after_help = "Run with sudo. Logs: journalctl -t presto-usb-install"
)]
struct Args {
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, args.debug || config.general.debug);

    match wizard::run() {
        Ok(Some(summary)) => {
            println!("\n {}", style::heading("USB drive configured"));
            println!("  {:<12} {}", "Device".magenta(), summary.device);
            println!("  {:<12} {}", "Identifier".magenta(), summary.spec);
            println!("  {:<12} {}", "Mountpoint".magenta(), summary.mountpoint);
            println!("  {:<12} {}", "Filesystem".magenta(), summary.fstype);
            println!("  {:<12} {}", "Options".magenta(), summary.options);
            println!("  {:<12} {}", "Backup".magenta(), summary.backup);
            println!(
                "\n{} it will be mounted automatically at boot",
                style::tick()
            );
            info!(
                device = %summary.device,
                spec = %summary.spec,
                mountpoint = %summary.mountpoint,
                fstype = %summary.fstype,
                "usb drive configured"
            );
        }
        Ok(None) => {
            println!("{} no changes made", style::info());
            info!("cancelled by user, no changes made");
        }
        Err(e) => fail(&e),
    }
}

/// Red line, journal entry, a prompt the user has to acknowledge, exit 1.
fn fail(e: &anyhow::Error) -> ! {
    eprintln!("{} {:#}", style::cross(), e);
    error!("{e:#}");
    if std::io::stdin().is_terminal() {
        let _ = inquire::Confirm::new(&format!("{e:#}. Press Enter to exit."))
            .with_default(true)
            .prompt();
    }
    std::process::exit(1);
}
