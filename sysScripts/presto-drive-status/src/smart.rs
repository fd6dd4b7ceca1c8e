//! SMART data via `smartctl -j`.
//!
//! smartctl's exit status is a bitmask (bit 2 = some SMART command failed,
//! bit 3 = disk failing, ...), so it is not treated as success/failure.
//! The JSON is parsed whenever there is any.

use anyhow::{Context, Result};
use presto_common::cmd;
use serde::Deserialize;

const ATTR_REALLOCATED: u32 = 5;
const ATTR_PENDING: u32 = 197;

// --- smartctl JSON (subset) ---

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SmartctlJson {
    smartctl: SmartctlMeta,
    model_name: Option<String>,
    serial_number: Option<String>,
    smart_status: Option<SmartStatus>,
    temperature: Option<Temperature>,
    power_on_time: Option<PowerOnTime>,
    ata_smart_attributes: Option<AtaAttributes>,
    nvme_smart_health_information_log: Option<NvmeHealth>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SmartctlMeta {
    messages: Vec<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    string: String,
}

#[derive(Deserialize, Debug)]
struct SmartStatus {
    passed: bool,
}

#[derive(Deserialize, Debug)]
struct Temperature {
    current: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct PowerOnTime {
    hours: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct AtaAttributes {
    table: Vec<AtaAttribute>,
}

#[derive(Deserialize, Debug)]
struct AtaAttribute {
    id: u32,
    raw: RawValue,
}

#[derive(Deserialize, Debug)]
struct RawValue {
    value: u64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct NvmeHealth {
    media_errors: Option<u64>,
    percentage_used: Option<u64>,
}

// --- Report ---

/// What the status page shows for one disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartReport {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub passed: Option<bool>,
    pub temperature: Option<i64>,
    pub power_on_hours: Option<u64>,
    pub reallocated: Option<u64>,
    pub pending: Option<u64>,
    pub media_errors: Option<u64>,
    pub percentage_used: Option<u64>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Warning,
    Failed,
    Unknown,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Passed => "PASSED",
            Verdict::Warning => "WARNING",
            Verdict::Failed => "FAILED",
            Verdict::Unknown => "UNKNOWN",
        }
    }
}

impl SmartReport {
    /// USB enclosures often hide the disk behind a bridge smartctl can't
    /// identify; `-d sat` usually gets through.
    pub fn needs_sat_retry(&self) -> bool {
        self.passed.is_none()
            && self
                .messages
                .iter()
                .any(|m| m.contains("Unknown USB bridge") || m.contains("-d sat"))
    }

    pub fn verdict(&self, temp_warn: f64) -> Verdict {
        match self.passed {
            None => Verdict::Unknown,
            Some(false) => Verdict::Failed,
            Some(true) => {
                let bad_sectors = self.reallocated.unwrap_or(0) > 0
                    || self.pending.unwrap_or(0) > 0
                    || self.media_errors.unwrap_or(0) > 0;
                let hot = self.temperature.is_some_and(|t| t as f64 >= temp_warn);
                if bad_sectors || hot {
                    Verdict::Warning
                } else {
                    Verdict::Passed
                }
            }
        }
    }
}

pub fn parse_smartctl(json: &str) -> Result<SmartReport> {
    let raw: SmartctlJson = serde_json::from_str(json).context("Failed to parse smartctl JSON")?;
    let attr = |id: u32| {
        raw.ata_smart_attributes
            .as_ref()
            .and_then(|a| a.table.iter().find(|row| row.id == id))
            .map(|row| row.raw.value)
    };
    let nvme = raw.nvme_smart_health_information_log.as_ref();

    Ok(SmartReport {
        model: raw.model_name.clone(),
        serial: raw.serial_number.clone(),
        passed: raw.smart_status.as_ref().map(|s| s.passed),
        temperature: raw.temperature.as_ref().and_then(|t| t.current),
        power_on_hours: raw.power_on_time.as_ref().and_then(|p| p.hours),
        reallocated: attr(ATTR_REALLOCATED),
        pending: attr(ATTR_PENDING),
        media_errors: nvme.and_then(|n| n.media_errors),
        percentage_used: nvme.and_then(|n| n.percentage_used),
        messages: raw.smartctl.messages.iter().map(|m| m.string.clone()).collect(),
    })
}

fn query(device: &str, extra: &[&str]) -> Result<SmartReport> {
    let mut args = vec!["-j", "-H", "-i", "-A"];
    args.extend_from_slice(extra);
    args.push(device);
    let json = cmd::capture_lenient("smartctl", &args)
        .with_context(|| format!("Failed to run smartctl on {device}"))?;
    parse_smartctl(&json)
}

/// Reads SMART for `device`, retrying once through the SAT passthrough.
pub fn read_smart(device: &str) -> Result<SmartReport> {
    let report = query(device, &[])?;
    if report.needs_sat_retry() {
        tracing::debug!(device, "retrying smartctl with -d sat");
        return query(device, &["-d", "sat"]);
    }
    Ok(report)
}
