//! `--install-as-service`: checks the I2C setup, installs the binary and
//! a systemd unit, starts it and sends a test notification.

use std::env;
use std::fs;
use std::io::IsTerminal;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use inquire::Confirm;
use presto_common::{cmd, style};
use tracing::{info, warn};

use crate::ntfy::Ntfy;
use crate::settings::Settings;

pub const SERVICE_NAME: &str = "presto_ups";
pub const UNIT_PATH: &str = "/etc/systemd/system/presto_ups.service";
pub const INSTALL_PATH: &str = "/usr/local/bin/presto-ups-monitor";
const BOOT_CONFIGS: &[&str] = &["/boot/firmware/config.txt", "/boot/config.txt"];
const I2C_DTPARAM: &str = "dtparam=i2c_arm=on";

fn step(msg: &str) {
    println!("{} {}", style::info(), msg);
    info!("{msg}");
}

fn caution(msg: &str) {
    println!("{} {}", style::warn_mark(), msg);
    warn!("{msg}");
}

/// systemd quotes: wrap in double quotes when the value has spaces or quotes.
/// `%` starts a unit specifier, so it is doubled either way.
fn quote(arg: &str) -> String {
    let arg = arg.replace('%', "%%");
    if arg.is_empty() || arg.contains([' ', '"', '\'', '\\']) {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg
    }
}

pub fn render_unit(binary: &str, settings: &Settings, user: &str) -> String {
    let args: Vec<String> = settings.to_args().iter().map(|a| quote(a)).collect();
    format!(
        "[Unit]
Description=Raspberry Pi Presto UPS Monitor Service
After=network-online.target
Wants=network-online.target

[Service]
ExecStart={binary} {args}
Restart=always
RestartSec=5
User={user}

[Install]
WantedBy=multi-user.target
",
        args = args.join(" ")
    )
}

/// An uncommented `dtparam=i2c_arm=on` line.
pub fn i2c_enabled(boot_config: &str) -> bool {
    boot_config.lines().any(|l| l.trim() == I2C_DTPARAM)
}

/// Looks for `addr` in the `i2cdetect -y` grid. `UU` (claimed by a driver)
/// does not count.
pub fn address_detected(grid: &str, addr: u16) -> bool {
    let row = addr & 0xF0;
    let col = usize::from(addr & 0x0F);
    let want = format!("{addr:02x}");
    grid.lines().any(|line| {
        let Some((prefix, cells)) = line.split_once(':') else {
            return false;
        };
        if u16::from_str_radix(prefix.trim(), 16).ok() != Some(row) {
            return false;
        }
        // each cell is 3 chars wide: " xx"
        let cell = cells.get(col * 3..col * 3 + 3).map(str::trim);
        cell.is_some_and(|c| c.eq_ignore_ascii_case(&want))
    })
}

fn service_active() -> bool {
    Command::new("systemctl")
        .args(["is-active", "--quiet", SERVICE_NAME])
        .status()
        .is_ok_and(|s| s.success())
}

fn show_status() {
    let _ = Command::new("systemctl")
        .args(["status", SERVICE_NAME, "--no-pager"])
        .status();
}

pub fn install(settings: &Settings, force: bool) -> Result<()> {
    cmd::require_root("install the UPS monitor service")?;
    cmd::require(&["systemctl"])?;
    let user = cmd::invoking_user().unwrap_or_else(|| "root".to_string());

    step(&format!("Installing the presto UPS monitor service for user {user}"));
    step(&format!(
        "I2C bus {} address {}, ntfy {}/{}, power < {} W, percent < {}%, battery {} mAh @ {} V",
        settings.i2c_bus,
        settings.addr,
        settings.ntfy_server,
        settings.ntfy_topic,
        settings.power_threshold,
        settings.percent_threshold,
        settings.battery_capacity,
        settings.battery_voltage
    ));

    // --- Existing service ---
    if service_active() && !force {
        caution("The presto_ups service is already running");
        show_status();
        if std::io::stdin().is_terminal()
            && !Confirm::new("Reinstall with the new settings?")
                .with_default(false)
                .prompt()?
        {
            step("Installation aborted, the service keeps running");
            return Ok(());
        }
    }
    if service_active() {
        step("Stopping the existing service");
        cmd::capture("systemctl", &["stop", SERVICE_NAME])?;
    }

    // --- Prerequisites ---
    check_tools();
    enable_i2c()?;
    probe_device(settings)?;

    // --- Binary and unit ---
    install_binary()?;
    fs::write(UNIT_PATH, render_unit(INSTALL_PATH, settings, &user))
        .with_context(|| format!("Failed to write {UNIT_PATH}"))?;
    fs::set_permissions(UNIT_PATH, fs::Permissions::from_mode(0o644))?;
    step(&format!("Service file written to {UNIT_PATH}"));

    cmd::capture("systemctl", &["daemon-reload"])?;
    cmd::capture("systemctl", &["enable", "presto_ups.service"])?;
    cmd::capture("systemctl", &["start", "presto_ups.service"])?;
    if !service_active() {
        show_status();
        let _ = Command::new("journalctl")
            .args(["-u", SERVICE_NAME, "-n", "10", "--no-pager"])
            .status();
        bail!("Service presto_ups failed to start");
    }
    println!("{} service presto_ups is running", style::tick());
    info!("service presto_ups is running");

    test_ntfy(settings);

    println!("\n  Logs:     sudo journalctl -u presto_ups.service -f");
    println!("  Stop:     sudo systemctl stop presto_ups.service");
    println!("  Disable:  sudo systemctl disable presto_ups.service");
    println!("  Reinstall with new settings: sudo presto-ups-monitor --install-as-service [flags]");
    Ok(())
}

fn check_tools() {
    if cmd::command_exists("i2cdetect") {
        step("i2c-tools is installed");
    } else {
        caution("i2c-tools not installed. Install with 'sudo apt-get install i2c-tools'");
    }
    if cmd::command_exists("vcgencmd") {
        step("vcgencmd found (GPU temperature available)");
    } else {
        caution("vcgencmd not found. Install with 'sudo apt-get install libraspberrypi-bin'");
    }
}

fn enable_i2c() -> Result<()> {
    let Some(path) = BOOT_CONFIGS.iter().find(|p| Path::new(p).exists()) else {
        caution("No /boot config.txt found, skipping the I2C check");
        return Ok(());
    };
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    if i2c_enabled(&content) {
        step(&format!("I2C is already enabled in {path}"));
        return Ok(());
    }
    if !cmd::command_exists("raspi-config") {
        bail!("I2C is disabled and raspi-config is missing; add '{I2C_DTPARAM}' to {path}");
    }
    step("Enabling I2C via raspi-config");
    cmd::capture("raspi-config", &["nonint", "do_i2c", "0"])
        .context("Failed to enable I2C. Enable it manually with 'sudo raspi-config'")?;
    step("I2C enabled (a reboot may be needed before the sensor appears)");
    Ok(())
}

fn probe_device(settings: &Settings) -> Result<()> {
    if !cmd::command_exists("i2cdetect") {
        caution(&format!("i2cdetect not found, cannot verify the INA219 at {}", settings.addr));
        return Ok(());
    }
    let grid = cmd::capture("i2cdetect", &["-y", &settings.i2c_bus.to_string()])
        .unwrap_or_default();
    if address_detected(&grid, settings.addr_value()?) {
        step(&format!("INA219 detected at {}", settings.addr));
    } else {
        caution(&format!(
            "INA219 not detected at {}. Check the wiring and address",
            settings.addr
        ));
    }
    Ok(())
}

/// Copies the running binary into place, keeping a `.bak` of the old one.
fn install_binary() -> Result<()> {
    let current = env::current_exe().context("Cannot locate the running binary")?;
    let target = Path::new(INSTALL_PATH);
    if fs::canonicalize(&current).ok() == fs::canonicalize(target).ok() {
        step(&format!("Already running from {INSTALL_PATH}"));
        return Ok(());
    }
    if target.exists() {
        let backup = format!("{INSTALL_PATH}.bak");
        fs::copy(target, &backup).with_context(|| format!("Failed to back up {INSTALL_PATH}"))?;
        step(&format!("Backed up the existing binary to {backup}"));
    }
    fs::copy(&current, target)
        .with_context(|| format!("Failed to copy {} to {INSTALL_PATH}", current.display()))?;
    fs::set_permissions(target, fs::Permissions::from_mode(0o755))?;
    step(&format!("Binary installed to {INSTALL_PATH}"));
    Ok(())
}

fn test_ntfy(settings: &Settings) {
    let result = Ntfy::new(&settings.ntfy_server, &settings.ntfy_topic)
        .and_then(|n| n.send("Test Alert", "Test message from presto-ups-monitor").map(|_| n));
    match result {
        Ok(n) => step(&format!("ntfy test notification sent. Check your topic ({})", n.url())),
        Err(e) => caution(&format!(
            "Failed to send the test notification ({e:#}). Check network or ntfy server/topic"
        )),
    }
}
