//! presto-drive-status
//!
//! Health and usage for every physical disk:
//! 1. Disks come from `lsblk`, usage from `df`.
//! 2. SMART health from `smartctl` (root only), downgraded to WARNING on
//!    bad sectors or heat.
//! 3. Each mounted partition gets a usage bar colored by `[drives]` thresholds.

mod smart;

use anyhow::{Result, bail};
use clap::{ArgGroup, Parser};
use colored::{ColoredString, Colorize};
use presto_common::block::{self, BlockDevice, FsUsage};
use presto_common::{PrestoConfig, cmd, journal, style};
use tracing::{error, info, warn};

use smart::{SmartReport, Verdict};

const TAG: &str = "presto-drive-status";
const BAR_WIDTH: usize = 20;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "SMART health and usage of attached drives",
    after_help = "SMART data needs root: sudo presto-drive-status"
)]
#[command(group(ArgGroup::new("view").args(["moreinfo", "simple"])))]
struct Args {
    /// Show SMART identity and attributes
    #[arg(long)]
    moreinfo: bool,
    /// One line per disk
    #[arg(long)]
    simple: bool,
    /// Only report this disk (e.g. /dev/sda)
    #[arg(long, value_name = "PATH")]
    device: Option<String>,
    /// Also list partitions that are not mounted
    #[arg(long)]
    all_partitions: bool,
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

/// One disk with everything the views need.
struct DiskStatus<'a> {
    disk: &'a BlockDevice,
    smart: Option<SmartReport>,
    verdict: Verdict,
}

fn run(args: &Args, config: &PrestoConfig) -> Result<()> {
    cmd::require(&["lsblk", "df"])?;
    let devices = block::lsblk()?;
    let mut disks = block::physical_disks(&devices);

    if let Some(wanted) = &args.device {
        disks.retain(|d| matches_device(d, wanted));
        if disks.is_empty() {
            bail!("Device {wanted} not found");
        }
    }
    if disks.is_empty() {
        println!("{} no physical disks found", style::info());
        return Ok(());
    }

    let usages = block::df_usage()?;
    let smart_enabled = smart_available();

    let statuses: Vec<DiskStatus> = disks
        .into_iter()
        .map(|disk| {
            let smart = smart_enabled.then(|| read_smart(disk)).flatten();
            let verdict = smart
                .as_ref()
                .map_or(Verdict::Unknown, |r| r.verdict(config.drives.temp_warn_celsius));
            match verdict {
                Verdict::Failed => error!(disk = %disk.dev_path(), "SMART health FAILED"),
                Verdict::Warning => warn!(disk = %disk.dev_path(), "SMART health warning"),
                _ => {}
            }
            DiskStatus { disk, smart, verdict }
        })
        .collect();

    if args.simple {
        for s in &statuses {
            print_simple(s, config);
        }
    } else {
        for s in &statuses {
            print_disk(s, &usages, args, config);
        }
    }

    info!(disks = statuses.len(), "drive status reported");
    Ok(())
}

/// `/dev/sda`, `sda` and `/dev/mmcblk0` style names all match.
fn matches_device(disk: &BlockDevice, wanted: &str) -> bool {
    let wanted = wanted.trim();
    disk.dev_path() == wanted || disk.name == wanted.trim_start_matches("/dev/")
}

/// Prints the single "needs root" hint when SMART can't be read.
fn smart_available() -> bool {
    if !cmd::command_exists("smartctl") {
        println!(
            "{} smartctl not installed, health unknown (sudo apt install smartmontools)",
            style::info()
        );
        return false;
    }
    if !cmd::is_root() {
        println!(
            "{} SMART data needs root, health unknown (run with sudo)",
            style::info()
        );
        return false;
    }
    true
}

fn read_smart(disk: &BlockDevice) -> Option<SmartReport> {
    match smart::read_smart(&disk.dev_path()) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(disk = %disk.dev_path(), "{e:#}");
            None
        }
    }
}

fn verdict_colored(v: Verdict) -> ColoredString {
    match v {
        Verdict::Passed => v.label().green().bold(),
        Verdict::Warning => v.label().yellow().bold(),
        Verdict::Failed => v.label().red().bold(),
        Verdict::Unknown => v.label().dimmed(),
    }
}

fn bar(usage: &FsUsage, config: &PrestoConfig) -> String {
    format!(
        "{} {} / {}",
        style::usage_bar(
            usage.percent(),
            BAR_WIDTH,
            config.drives.usage_warn_percent,
            config.drives.usage_crit_percent
        ),
        style::human_bytes(usage.used),
        style::human_bytes(usage.used + usage.avail)
    )
}

// --- Views ---

fn print_simple(s: &DiskStatus, config: &PrestoConfig) {
    let temp = s
        .smart
        .as_ref()
        .and_then(|r| r.temperature)
        .map(|t| style::temp_colored(t as f64, config.drives.temp_warn_celsius).to_string())
        .unwrap_or_default();
    println!(
        "{:<14} {:>8}  {:<8} {} {}",
        s.disk.dev_path(),
        style::human_bytes(s.disk.size),
        s.disk.transport(),
        verdict_colored(s.verdict),
        temp
    );
}

fn print_disk(s: &DiskStatus, usages: &[FsUsage], args: &Args, config: &PrestoConfig) {
    let disk = s.disk;
    println!(
        "\n {} {}  {}  {}",
        style::heading(&disk.dev_path()),
        style::human_bytes(disk.size),
        disk.model_or_unknown().dimmed(),
        format!("[{}]", disk.transport()).dimmed()
    );
    println!("   {:<12} {}", "Health".magenta(), verdict_colored(s.verdict));

    if let Some(report) = &s.smart {
        if let Some(t) = report.temperature {
            println!(
                "   {:<12} {}",
                "Temp".magenta(),
                style::temp_colored(t as f64, config.drives.temp_warn_celsius)
            );
        }
        if args.moreinfo {
            print_smart_details(report);
        }
    }

    let partitions = disk.filesystems();
    if partitions.is_empty() {
        println!("   {}", "no filesystems".dimmed());
    }
    for part in partitions {
        let mount = part.mountpoint.as_deref().filter(|m| !m.is_empty());
        match mount {
            Some(m) => {
                let line = match block::usage_for(usages, m) {
                    Some(u) => bar(u, config),
                    None => "-".to_string(),
                };
                println!(
                    "   {:<12} {:<18} {}",
                    part.name,
                    m.cyan(),
                    line
                );
            }
            None if args.all_partitions => println!(
                "   {:<12} {:<18} {}",
                part.name,
                "not mounted".dimmed(),
                part.fstype.as_deref().unwrap_or("?").dimmed()
            ),
            None => {}
        }
    }
}

fn print_smart_details(r: &SmartReport) {
    let field = |label: &str, value: Option<String>| {
        if let Some(v) = value {
            println!("   {:<12} {}", label.magenta(), v);
        }
    };
    field("Model", r.model.clone());
    field("Serial", r.serial.clone());
    field("Power-on", r.power_on_hours.map(|h| format!("{h} h ({} days)", h / 24)));
    field("Reallocated", r.reallocated.map(|n| n.to_string()));
    field("Pending", r.pending.map(|n| n.to_string()));
    field("Media errors", r.media_errors.map(|n| n.to_string()));
    field("Wear", r.percentage_used.map(|p| format!("{p}% used")));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(name: &str, path: Option<&str>) -> BlockDevice {
        BlockDevice {
            name: name.into(),
            path: path.map(Into::into),
            kind: "disk".into(),
            ..Default::default()
        }
    }

    #[test]
    fn device_matching_accepts_name_or_path() {
        let sda = disk("sda", Some("/dev/sda"));
        assert!(matches_device(&sda, "/dev/sda"));
        assert!(matches_device(&sda, "sda"));
        assert!(!matches_device(&sda, "/dev/sdb"));
        assert!(matches_device(&disk("mmcblk0", None), "/dev/mmcblk0"));
    }

    #[test]
    fn views_are_exclusive_but_device_combines() {
        assert!(Args::try_parse_from([TAG, "--moreinfo", "--simple"]).is_err());
        let args =
            Args::try_parse_from([TAG, "--moreinfo", "--device", "/dev/sda", "--all-partitions"])
                .unwrap();
        assert_eq!(args.device.as_deref(), Some("/dev/sda"));
        assert!(args.all_partitions);
    }
}
