//! `docker ps` / `docker system df` queries and parsing.
//! Both commands are asked for `{{json .}}`, one object per line.

use anyhow::{Context, Result};
use presto_common::cmd;
use serde::Deserialize;

// --- Data Models ---

/// One line of `docker ps -a --format '{{json .}}'`. Only the fields we show.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    #[serde(rename = "ID")]
    pub id: String,
    pub names: String,
    pub image: String,
    pub state: String,
    pub status: String,
    #[serde(default)]
    pub ports: String,
    #[serde(default)]
    pub running_for: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

impl Health {
    pub fn label(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Unhealthy => "unhealthy",
            Health::Starting => "starting",
            Health::None => "-",
        }
    }
}

/// One line of `docker system df --format '{{json .}}'`. Docker renders every value as text.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DiskUsage {
    #[serde(rename = "Type")]
    pub kind: String,
    pub total_count: String,
    pub active: String,
    pub size: String,
    pub reclaimable: String,
}

impl Container {
    /// Health is only exposed through the human status string.
    pub fn health(&self) -> Health {
        if self.status.contains("(unhealthy)") {
            Health::Unhealthy
        } else if self.status.contains("(health: starting)") {
            Health::Starting
        } else if self.status.contains("(healthy)") {
            Health::Healthy
        } else {
            Health::None
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// `Exited (137) 2 hours ago` -> 137.
    pub fn exit_code(&self) -> Option<i32> {
        let rest = self.status.strip_prefix("Exited (")?;
        rest.split(')').next()?.trim().parse().ok()
    }

    /// Unhealthy, crash-looping, dead, or exited with a non-zero code.
    pub fn needs_attention(&self) -> bool {
        match self.state.as_str() {
            "restarting" | "dead" => true,
            "exited" => self.exit_code() != Some(0),
            _ => self.health() == Health::Unhealthy,
        }
    }

    pub fn published_ports(&self) -> Vec<String> {
        condense_ports(&self.ports)
    }
}

/// Host-published mappings without the bind address, IPv4/IPv6 duplicates merged.
/// `0.0.0.0:8080->80/tcp, [::]:8080->80/tcp, 443/tcp` -> `["8080->80/tcp"]`.
pub fn condense_ports(ports: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for mapping in ports.split(',').map(str::trim) {
        let Some((host, container)) = mapping.split_once("->") else {
            continue;
        };
        let host_port = host.rsplit(':').next().unwrap_or(host);
        let condensed = format!("{host_port}->{container}");
        if !out.contains(&condensed) {
            out.push(condensed);
        }
    }
    out
}

pub fn parse_ps(text: &str) -> Result<Vec<Container>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).with_context(|| format!("Bad docker ps line: {l}")))
        .collect()
}

pub fn parse_system_df(text: &str) -> Result<Vec<DiskUsage>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).with_context(|| format!("Bad docker system df line: {l}")))
        .collect()
}

// --- Queries ---

pub fn list_containers() -> Result<Vec<Container>> {
    let text = cmd::capture("docker", &["ps", "-a", "--format", "{{json .}}"])
        .context("Could not list containers (is the Docker daemon running?)")?;
    let mut containers = parse_ps(&text)?;
    containers.sort_by(|a, b| a.names.cmp(&b.names));
    Ok(containers)
}

pub fn disk_usage() -> Result<Vec<DiskUsage>> {
    let text = cmd::capture("docker", &["system", "df", "--format", "{{json .}}"])
        .context("Could not read docker disk usage")?;
    parse_system_df(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(state: &str, status: &str) -> Container {
        Container {
            id: "abc".into(),
            names: "app".into(),
            image: "img".into(),
            state: state.into(),
            status: status.into(),
            ports: String::new(),
            running_for: String::new(),
        }
    }

    #[test]
    fn parses_ps_json_lines() {
        let text = r#"{"Command":"\"/init\"","CreatedAt":"2025-01-01","ID":"4f2a","Image":"lscr.io/linuxserver/plex","Labels":"","LocalVolumes":"0","Mounts":"/config","Names":"plex","Networks":"host","Ports":"","RunningFor":"3 days ago","Size":"0B","State":"running","Status":"Up 3 days (healthy)"}
{"ID":"9c1d","Image":"pihole/pihole","Names":"pihole","Ports":"0.0.0.0:53->53/udp, [::]:53->53/udp, 0.0.0.0:8089->80/tcp","RunningFor":"2 hours ago","State":"running","Status":"Up 2 hours (unhealthy)"}
"#;
        let list = parse_ps(text).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].names, "plex");
        assert_eq!(list[0].health(), Health::Healthy);
        assert_eq!(list[1].health(), Health::Unhealthy);
        assert_eq!(list[1].published_ports(), ["53->53/udp", "8089->80/tcp"]);
    }

    #[test]
    fn health_from_status() {
        assert_eq!(container("running", "Up 5 seconds (health: starting)").health(), Health::Starting);
        assert_eq!(container("running", "Up 2 days").health(), Health::None);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(container("exited", "Exited (137) 2 hours ago").exit_code(), Some(137));
        assert_eq!(container("running", "Up 2 days").exit_code(), None);
    }

    #[test]
    fn attention_filter() {
        assert!(!container("running", "Up 1 hour (healthy)").needs_attention());
        assert!(!container("exited", "Exited (0) 3 days ago").needs_attention());
        assert!(!container("created", "Created").needs_attention());
        assert!(container("exited", "Exited (1) 3 days ago").needs_attention());
        assert!(container("restarting", "Restarting (1) 4 seconds ago").needs_attention());
        assert!(container("running", "Up 1 hour (unhealthy)").needs_attention());
        assert!(container("dead", "Dead").needs_attention());
    }

    #[test]
    fn ports_drop_unpublished_and_ranges_survive() {
        assert!(condense_ports("80/tcp, 443/tcp").is_empty());
        assert_eq!(
            condense_ports("0.0.0.0:8000-8010->8000-8010/tcp, :::8000-8010->8000-8010/tcp"),
            ["8000-8010->8000-8010/tcp"]
        );
        assert_eq!(condense_ports("127.0.0.1:9000->9000/tcp"), ["9000->9000/tcp"]);
    }

    #[test]
    fn parses_system_df() {
        let text = r#"{"Active":"5","Reclaimable":"1.2GB (30%)","Size":"4.1GB","TotalCount":"12","Type":"Images"}
{"Active":"5","Reclaimable":"0B (0%)","Size":"12MB","TotalCount":"7","Type":"Containers"}"#;
        let usage = parse_system_df(text).unwrap();
        assert_eq!(usage[0].kind, "Images");
        assert_eq!(usage[0].reclaimable, "1.2GB (30%)");
        assert_eq!(usage[1].total_count, "7");
    }
}
