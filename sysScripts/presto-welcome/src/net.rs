//! The two network lookups of the banner: wttr.in weather and the public IP.
//! Both use a short timeout so a dead uplink never delays the login prompt.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

pub const NET_TIMEOUT: Duration = Duration::from_secs(3);
const PUBLIC_IP_URL: &str = "https://api.ipify.org";

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent("curl/8.5.0")
        .build()
        .context("Failed to build HTTP client")
}

/// wttr.in one-line format. Spaces in the location become `+`.
pub fn weather_url(location: &str) -> String {
    format!(
        "https://wttr.in/{}?format=3",
        location.trim().replace(' ', "+")
    )
}

/// Keeps the first line of a wttr.in reply, rejecting error pages.
pub fn clean_report(body: &str) -> Option<String> {
    let line = body.lines().next()?.trim();
    let rejected = line.is_empty()
        || line.starts_with('<')
        || line.contains("Unknown location")
        || line.starts_with("Sorry");
    (!rejected).then(|| line.to_string())
}

pub fn fetch_weather(location: &str) -> Result<String> {
    let body = client(NET_TIMEOUT)?
        .get(weather_url(location))
        .send()
        .context("Weather request failed")?
        .error_for_status()?
        .text()?;
    clean_report(&body).context("Weather service returned no usable report")
}

pub fn fetch_public_ip() -> Result<String> {
    let body = client(NET_TIMEOUT)?
        .get(PUBLIC_IP_URL)
        .send()
        .context("Public IP request failed")?
        .error_for_status()?
        .text()?;
    let ip = body.trim();
    ip.parse::<std::net::IpAddr>()
        .with_context(|| format!("Unexpected public IP reply: {ip}"))?;
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encodes_spaces() {
        assert_eq!(
            weather_url(" New York "),
            "https://wttr.in/New+York?format=3"
        );
    }

    #[test]
    fn report_keeps_first_line() {
        assert_eq!(
            clean_report("London: ⛅️  +12°C\n").as_deref(),
            Some("London: ⛅️  +12°C")
        );
    }

    #[test]
    fn report_rejects_error_pages() {
        assert_eq!(clean_report(""), None);
        assert_eq!(clean_report("<html><body>502</body></html>"), None);
        assert_eq!(clean_report("Unknown location; please try ~51.5,-0.1"), None);
        assert_eq!(clean_report("Sorry, we are running out of queries"), None);
    }
}
