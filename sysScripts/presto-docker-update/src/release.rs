//! Installed versions from the docker CLI, latest ones from GitHub.

use std::time::Duration;

use anyhow::{Context, Result};
use presto_common::cmd;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::version::Version;

const GITHUB_API: &str = "https://api.github.com/repos";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Engine,
    Compose,
}

impl Component {
    pub const ALL: [Component; 2] = [Component::Engine, Component::Compose];

    pub fn label(self) -> &'static str {
        match self {
            Component::Engine => "Docker Engine",
            Component::Compose => "Docker Compose",
        }
    }

    fn github_repo(self) -> &'static str {
        match self {
            Component::Engine => "moby/moby",
            Component::Compose => "docker/compose",
        }
    }

    fn version_args(self) -> &'static [&'static str] {
        match self {
            Component::Engine => &["version", "--format", "{{.Server.Version}}"],
            Component::Compose => &["compose", "version", "--short"],
        }
    }
}

#[derive(Deserialize, Debug)]
struct LatestRelease {
    tag_name: String,
}

pub fn client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("presto-docker-update/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

pub fn release_url(component: Component) -> String {
    format!("{GITHUB_API}/{}/releases/latest", component.github_repo())
}

pub fn installed(component: Component) -> Result<Version> {
    let out = cmd::capture("docker", component.version_args())
        .with_context(|| format!("Could not read the installed {} version", component.label()))?;
    out.trim().parse()
}

pub fn latest(client: &Client, component: Component) -> Result<Version> {
    let release: LatestRelease = client
        .get(release_url(component))
        .header("Accept", "application/vnd.github+json")
        .send()
        .with_context(|| format!("GitHub request for {} failed", component.label()))?
        .error_for_status()?
        .json()
        .context("Unexpected GitHub release payload")?;
    release.tag_name.parse()
}
