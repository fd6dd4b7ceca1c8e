//! Effective monitor settings: `[ups]` from the config, overridden by flags.

use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use clap::Args;
use presto_common::config::UpsConfig;
use regex::Regex;

use crate::alert::Thresholds;

static ADDR_RE: OnceLock<Regex> = OnceLock::new();

/// Flags that override `[ups]`.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// I2C address of the INA219, e.g. 0x43
    #[arg(long)]
    pub addr: Option<String>,
    /// ntfy server URL
    #[arg(long)]
    pub ntfy_server: Option<String>,
    /// ntfy topic for notifications
    #[arg(long)]
    pub ntfy_topic: Option<String>,
    /// Alert below this many watts while charging
    #[arg(long)]
    pub power_threshold: Option<f64>,
    /// Alert below this battery percentage while charging
    #[arg(long)]
    pub percent_threshold: Option<f64>,
    /// Battery capacity in mAh
    #[arg(long)]
    pub battery_capacity: Option<u32>,
    /// Battery nominal voltage in volts
    #[arg(long)]
    pub battery_voltage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub i2c_bus: u8,
    pub addr: String,
    pub ntfy_server: String,
    pub ntfy_topic: String,
    pub power_threshold: f64,
    pub percent_threshold: f64,
    pub battery_capacity: u32,
    pub battery_voltage: f64,
}

impl Settings {
    pub fn resolve(config: &UpsConfig, o: &Overrides) -> Result<Self> {
        let s = Self {
            i2c_bus: config.i2c_bus,
            addr: o.addr.clone().unwrap_or_else(|| config.addr.clone()),
            ntfy_server: o.ntfy_server.clone().unwrap_or_else(|| config.ntfy_server.clone()),
            ntfy_topic: o.ntfy_topic.clone().unwrap_or_else(|| config.ntfy_topic.clone()),
            power_threshold: o.power_threshold.unwrap_or(config.power_threshold),
            percent_threshold: o.percent_threshold.unwrap_or(config.percent_threshold),
            battery_capacity: o.battery_capacity.unwrap_or(config.battery_capacity_mah),
            battery_voltage: o.battery_voltage.unwrap_or(config.battery_voltage),
        };
        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        let re = ADDR_RE.get_or_init(|| Regex::new(r"^0x[0-9A-Fa-f]{2}$").unwrap());
        if !re.is_match(&self.addr) {
            bail!("Invalid I2C address '{}'. Use hex (e.g., 0x43)", self.addr);
        }
        if !(self.power_threshold > 0.0) {
            bail!("Power threshold must be positive");
        }
        if !(self.percent_threshold > 0.0 && self.percent_threshold <= 100.0) {
            bail!("Percent threshold must be between 0 and 100");
        }
        if self.battery_capacity == 0 {
            bail!("Battery capacity must be positive");
        }
        if !(self.battery_voltage > 0.0) {
            bail!("Battery voltage must be positive");
        }
        if self.ntfy_topic.trim().is_empty() {
            bail!("ntfy topic cannot be empty");
        }
        Ok(())
    }

    pub fn addr_value(&self) -> Result<u16> {
        u16::from_str_radix(self.addr.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid I2C address '{}'", self.addr))
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            power_w: self.power_threshold,
            percent: self.percent_threshold,
            capacity_mah: self.battery_capacity,
            voltage: self.battery_voltage,
        }
    }

    /// The flags that reproduce these settings, for the service's ExecStart.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--addr".into(),
            self.addr.clone(),
            "--ntfy-server".into(),
            self.ntfy_server.clone(),
            "--ntfy-topic".into(),
            self.ntfy_topic.clone(),
            "--power-threshold".into(),
            self.power_threshold.to_string(),
            "--percent-threshold".into(),
            self.percent_threshold.to_string(),
            "--battery-capacity".into(),
            self.battery_capacity.to_string(),
            "--battery-voltage".into(),
            self.battery_voltage.to_string(),
        ]
    }
}
