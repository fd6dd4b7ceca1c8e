use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

pub const ALERT_TITLE: &str = "Raspberry Pi Power Alert";
const TIMEOUT: Duration = Duration::from_secs(10);

pub struct Ntfy {
    client: Client,
    url: String,
}

pub fn topic_url(server: &str, topic: &str) -> String {
    format!("{}/{}", server.trim_end_matches('/'), topic.trim_matches('/'))
}

impl Ntfy {
    pub fn new(server: &str, topic: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: topic_url(server, topic),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send(&self, title: &str, message: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .header("Title", title)
            .body(message.to_string())
            .send()
            .with_context(|| format!("ntfy request to {} failed", self.url))?
            .error_for_status()
            .context("ntfy rejected the notification")?;
        Ok(())
    }
}
