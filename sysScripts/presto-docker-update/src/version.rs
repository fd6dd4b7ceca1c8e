use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};

/// A dotted numeric version. Any pre-release or build suffix is kept for
/// display but ignored when ordering: `27.3.1-rc.1 == 27.3.1`.
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
    raw: String,
}

impl Version {
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// Components with trailing zeros dropped, so `27.3` and `27.3.0` compare equal.
    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|&p| p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..len]
    }
}

/// `docker-v27.3.1` / `v2.29.7` / `27.3.1` -> `27.3.1`.
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("docker-").unwrap_or(tag);
    tag.strip_prefix('v').unwrap_or(tag)
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = normalize_tag(s).to_string();
        let numeric = raw
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if numeric.is_empty() {
            bail!("Empty version string");
        }
        let parts = numeric
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| anyhow::anyhow!("Not a dotted numeric version: {s}"))?;
        Ok(Self { parts, raw })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn tags_are_normalized() {
        assert_eq!(normalize_tag("docker-v27.3.1"), "27.3.1");
        assert_eq!(normalize_tag("v2.29.7"), "2.29.7");
        assert_eq!(normalize_tag(" 27.0.3\n"), "27.0.3");
    }

    #[test]
    fn parses_and_displays() {
        let ver = v("v2.29.7-desktop.1");
        assert_eq!(ver.parts(), [2, 29, 7]);
        assert_eq!(ver.to_string(), "2.29.7-desktop.1");
    }

    #[test]
    fn orders_numerically() {
        assert!(v("27.10.0") > v("27.9.1"));
        assert!(v("28.0") > v("27.99.99"));
        assert!(v("2.29.7") < v("v2.30.0"));
    }

    #[test]
    fn suffix_and_trailing_zeros_ignored() {
        assert_eq!(v("27.3.1-rc.1"), v("27.3.1"));
        assert_eq!(v("27.3"), v("27.3.0"));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("latest".parse::<Version>().is_err());
        assert!("27.x".parse::<Version>().is_err());
    }
}
