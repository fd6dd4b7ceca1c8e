//! presto-ups-monitor
//!
//! Watches a UPS HAT's INA219 and pushes ntfy alerts when the charger is
//! unplugged or reconnected, or the battery runs low.
//! 1. A sampling thread reads the sensor every 2 s and sends readings over a channel.
//! 2. The main loop runs each reading through the alert policy.
//! 3. Every 10 s a summary goes to the journal.
//!
//! `--install-as-service` sets it up as the `presto_ups` systemd unit instead.

mod alert;
mod ina219;
mod ntfy;
mod service;
mod settings;

use std::io::IsTerminal;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use presto_common::{PrestoConfig, journal, style, sys};
use tracing::{error, info, warn};

use alert::AlertPolicy;
use ina219::{I2cDev, Ina219, Reading};
use settings::{Overrides, Settings};

const TAG: &str = "presto-ups-monitor";
const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "UPS HAT monitor with ntfy alerts and systemd service installation",
    after_help = "Service logs: journalctl -u presto_ups.service -n 20"
)]
struct Cli {
    /// Install as the presto_ups systemd service
    #[arg(long)]
    install_as_service: bool,
    /// Reinstall without prompting when the service is already running
    #[arg(long, requires = "install_as_service")]
    force_reinstall: bool,
    #[command(flatten)]
    overrides: Overrides,
    /// Also log to stderr at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();
    let config = PrestoConfig::load_or_default();
    journal::init_logging(TAG, cli.debug || config.general.debug);

    let result = Settings::resolve(&config.ups, &cli.overrides).and_then(|settings| {
        if cli.install_as_service {
            service::install(&settings, cli.force_reinstall)
        } else {
            monitor(&settings)
        }
    });
    if let Err(e) = result {
        eprintln!("{} {:#}", style::cross(), e);
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn monitor(settings: &Settings) -> Result<()> {
    let bus = I2cDev::open(settings.i2c_bus, settings.addr_value()?)?;
    let mut sensor = Ina219::new(bus);
    sensor.calibrate().context("Failed to calibrate the INA219")?;
    let notifier = ntfy::Ntfy::new(&settings.ntfy_server, &settings.ntfy_topic)?;
    let mut policy = AlertPolicy::new(settings.thresholds());
    let host = sys::hostname();
    let echo = std::io::stdout().is_terminal();

    info!(
        addr = %settings.addr,
        topic = %notifier.url(),
        "monitoring UPS on i2c-{}",
        settings.i2c_bus
    );

    let (tx, rx) = mpsc::channel::<Reading>();
    thread::spawn(move || loop {
        match sensor.read() {
            Ok(reading) => {
                if tx.send(reading).is_err() {
                    break;
                }
            }
            Err(e) => error!("Sampling error: {e}"),
        }
        thread::sleep(SAMPLE_INTERVAL);
    });

    let mut last_summary: Option<Instant> = None;
    for reading in rx {
        let now = Instant::now();
        if let Some(alert) = policy.evaluate(&reading, now) {
            let message = policy.message(&alert, &host);
            match notifier.send(ntfy::ALERT_TITLE, &message) {
                Ok(()) => {
                    info!("Notification sent: {message}");
                    policy.mark_sent(now);
                }
                Err(e) => warn!("Failed to send notification: {e:#}"),
            }
        }

        if last_summary.is_none_or(|t| now.duration_since(t) >= SUMMARY_INTERVAL) {
            log_summary(&reading, &host, echo);
            last_summary = Some(now);
        }
    }
    anyhow::bail!("The sampling thread stopped")
}

fn fmt_temp(t: Option<f64>) -> String {
    t.map_or_else(|| "Unknown".to_string(), |c| format!("{c:.1} °C"))
}

fn log_summary(r: &Reading, host: &str, echo: bool) {
    let ip = sys::primary_ip().map_or_else(|| "Unknown".to_string(), |ip| ip.to_string());
    let cpu = fmt_temp(sys::cpu_temp());
    let gpu = fmt_temp(sys::gpu_temp());
    let power_line = format!(
        "Load {:.3} V | Current {:.3} A | Power {:.3} W | Battery {:.1}%",
        r.bus_voltage,
        r.current_ma / 1000.0,
        r.power_w,
        r.percent
    );
    let system_line = format!("Host {host} | IP {ip} | CPU {cpu} | GPU {gpu}");
    info!(
        bus_voltage = r.bus_voltage,
        current_ma = r.current_ma,
        power_w = r.power_w,
        percent = r.percent,
        "{power_line}"
    );
    info!("{system_line}");
    if echo {
        println!("{} {power_line}\n  {system_line}", style::info());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_flattened() {
        let cli = Cli::try_parse_from([
            TAG,
            "--addr",
            "0x40",
            "--ntfy-topic",
            "ups",
            "--battery-capacity",
            "2500",
        ])
        .unwrap();
        assert_eq!(cli.overrides.addr.as_deref(), Some("0x40"));
        assert_eq!(cli.overrides.battery_capacity, Some(2500));
        assert_eq!(cli.overrides.power_threshold, None);
    }

    #[test]
    fn force_reinstall_needs_install() {
        assert!(Cli::try_parse_from([TAG, "--force-reinstall"]).is_err());
        assert!(Cli::try_parse_from([TAG, "--install-as-service", "--force-reinstall"]).is_ok());
    }

    #[test]
    fn temperature_formatting() {
        assert_eq!(fmt_temp(Some(48.25)), "48.2 °C");
        assert_eq!(fmt_temp(None), "Unknown");
    }
}
