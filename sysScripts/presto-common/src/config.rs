//! Layered configuration.
//!
//! `presto_config.defaults.toml` ships with the toolkit and is refreshed on
//! every update; `presto_config.local.toml` holds the user's overrides and is
//! never touched. Both live in the config dir and the local file wins key by key.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use crate::style;

pub const DEFAULTS_TOML: &str = include_str!("../presto_config.defaults.toml");
pub const DEFAULTS_FILE: &str = "presto_config.defaults.toml";
pub const LOCAL_FILE: &str = "presto_config.local.toml";
pub const CONFIG_DIR_ENV: &str = "PRESTO_CONFIG_DIR";

// --- Config Models ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PrestoConfig {
    pub general: GeneralConfig,
    pub welcome: WelcomeConfig,
    pub docker: DockerConfig,
    pub drives: DrivesConfig,
    pub install: InstallConfig,
    pub ups: UpsConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct GeneralConfig {
    pub debug: bool,
}

/// Which banner sections `presto-welcome` prints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WelcomeConfig {
    pub show_temps: bool,
    pub show_ip: bool,
    pub show_public_ip: bool,
    pub show_memory: bool,
    pub show_disk: bool,
    pub show_weather: bool,
    pub weather_location: String,
    pub show_docker: bool,
    pub show_drives: bool,
    pub check_updates: bool,
}

impl Default for WelcomeConfig {
    fn default() -> Self {
        Self {
            show_temps: true,
            show_ip: true,
            show_public_ip: false,
            show_memory: true,
            show_disk: true,
            show_weather: true,
            weather_location: "London".to_string(),
            show_docker: true,
            show_drives: true,
            check_updates: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DockerConfig {
    pub compose_file: String,
    pub command_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            compose_file: "~/presto/docker-compose.yml".to_string(),
            command_timeout_secs: 300,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DrivesConfig {
    pub usage_warn_percent: f64,
    pub usage_crit_percent: f64,
    pub temp_warn_celsius: f64,
}

impl Default for DrivesConfig {
    fn default() -> Self {
        Self {
            usage_warn_percent: 80.0,
            usage_crit_percent: 90.0,
            temp_warn_celsius: 50.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InstallConfig {
    pub repo_url: String,
    pub install_dir: String,
    pub profile_file: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/piklz/presto-tools.git".to_string(),
            install_dir: "~/presto-tools".to_string(),
            profile_file: "~/.bashrc".to_string(),
        }
    }
}

/// INA219 UPS HAT settings. CLI flags of `presto-ups-monitor` override these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UpsConfig {
    pub i2c_bus: u8,
    pub addr: String,
    pub ntfy_server: String,
    pub ntfy_topic: String,
    pub power_threshold: f64,
    pub percent_threshold: f64,
    pub battery_capacity_mah: u32,
    pub battery_voltage: f64,
}

impl Default for UpsConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            addr: "0x43".to_string(),
            ntfy_server: "https://ntfy.sh".to_string(),
            ntfy_topic: "pizero_UPSc".to_string(),
            power_threshold: 0.5,
            percent_threshold: 20.0,
            battery_capacity_mah: 1000,
            battery_voltage: 3.7,
        }
    }
}

// --- Config Loader ---

impl PrestoConfig {
    /// Loads from `$PRESTO_CONFIG_DIR` or `~/.config/presto-tools`.
    pub fn load() -> Result<Self> {
        let dir = config_dir().context("Could not determine config directory")?;
        Self::load_from(&dir)
    }

    /// [`load`](Self::load), falling back to the built-in defaults with a
    /// warning on stderr. Every binary starts with this.
    pub fn load_or_default() -> Self {
        Self::or_default(Self::load())
    }

    pub fn load_from_or_default(dir: &Path) -> Self {
        Self::or_default(Self::load_from(dir))
    }

    fn or_default(loaded: Result<Self>) -> Self {
        loaded.unwrap_or_else(|e| {
            eprintln!("{} {:#} (using defaults)", style::warn_mark(), e);
            Self::default()
        })
    }

    /// Merges `defaults` then `local` from `dir`. Absent files are skipped,
    /// so an empty directory yields the built-in defaults.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut merged = Table::new();
        for name in [DEFAULTS_FILE, LOCAL_FILE] {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let table: Table = toml::from_str(&text).with_context(|| {
                format!("Failed to parse {}. Check for syntax errors.", path.display())
            })?;
            merge_tables(&mut merged, table);
        }

        let text = toml::to_string(&merged).context("Failed to re-serialize merged config")?;
        toml::from_str(&text).context("Merged config has invalid values")
    }

    /// The compose file with `~` expanded.
    pub fn compose_file(&self) -> PathBuf {
        expand_path(&self.docker.compose_file)
    }
}

/// Recursive merge: nested tables merge, anything else in `overlay` replaces.
pub fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join("presto-tools"))
}

/// Expands shell-style paths like `~/` to absolute system paths.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn shipped_defaults_match_builtin_defaults() {
        let parsed: PrestoConfig = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(parsed, PrestoConfig::default());
    }

    #[test]
    fn empty_dir_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = PrestoConfig::load_from(dir.path()).unwrap();
        assert_eq!(config, PrestoConfig::default());
    }

    #[test]
    fn local_overrides_single_keys() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DEFAULTS_FILE), DEFAULTS_TOML).unwrap();
        fs::write(
            dir.path().join(LOCAL_FILE),
            "[welcome]\nweather_location = \"Glasgow\"\nshow_docker = false\n",
        )
        .unwrap();

        let config = PrestoConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.welcome.weather_location, "Glasgow");
        assert!(!config.welcome.show_docker);
        // untouched keys in the same table survive the merge
        assert!(config.welcome.show_weather);
        assert_eq!(config.ups, UpsConfig::default());
    }

    #[test]
    fn local_without_defaults_file_still_fills_gaps() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "[ups]\nntfy_topic = \"garage\"\n").unwrap();
        let config = PrestoConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.ups.ntfy_topic, "garage");
        assert_eq!(config.ups.addr, "0x43");
    }

    #[test]
    fn syntax_error_names_the_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "[welcome\nbroken").unwrap();
        let err = PrestoConfig::load_from(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains(LOCAL_FILE));
    }

    #[test]
    fn broken_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DEFAULTS_FILE), DEFAULTS_TOML).unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "[general]\ndebug = \"yes\"\n").unwrap();
        assert_eq!(PrestoConfig::load_from_or_default(dir.path()), PrestoConfig::default());

        fs::write(dir.path().join(LOCAL_FILE), "[general]\ndebug = true\n").unwrap();
        assert!(PrestoConfig::load_from_or_default(dir.path()).general.debug);
    }

    #[test]
    fn merge_replaces_scalars_and_recurses_tables() {
        let mut base: Table = toml::from_str("a = 1\n[t]\nx = 1\ny = 2\n").unwrap();
        let overlay: Table = toml::from_str("a = 5\n[t]\ny = 9\n").unwrap();
        merge_tables(&mut base, overlay);
        assert_eq!(base["a"].as_integer(), Some(5));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(9));
    }

    #[test]
    fn expand_path_leaves_absolute_paths_alone() {
        assert_eq!(expand_path("/etc/fstab"), PathBuf::from("/etc/fstab"));
        assert!(!expand_path("~/presto").to_string_lossy().starts_with('~'));
    }
}
