//! Small host probes used by the welcome banner and the UPS monitor.

use std::fs;
use std::net::{IpAddr, UdpSocket};

use crate::cmd;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// `/sys` reports millidegrees: `48312` -> 48.312 °C.
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|m| m / 1000.0)
}

/// `vcgencmd measure_temp` prints `temp=48.3'C`.
pub fn parse_vcgencmd_temp(raw: &str) -> Option<f64> {
    raw.trim()
        .strip_prefix("temp=")?
        .split('\'')
        .next()?
        .parse()
        .ok()
}

pub fn cpu_temp() -> Option<f64> {
    fs::read_to_string(THERMAL_ZONE)
        .ok()
        .and_then(|raw| parse_millidegrees(&raw))
}

/// Only available on Raspberry Pi OS (`libraspberrypi-bin`).
pub fn gpu_temp() -> Option<f64> {
    cmd::capture("vcgencmd", &["measure_temp"])
        .ok()
        .and_then(|raw| parse_vcgencmd_temp(&raw))
}

pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "Unknown".to_string())
}

/// The address of the interface holding the default route.
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn primary_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

/// Every address from `hostname -I` (docker bridges included).
pub fn all_ips() -> Vec<String> {
    cmd::capture_lenient("hostname", &["-I"])
        .map(|out| out.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
