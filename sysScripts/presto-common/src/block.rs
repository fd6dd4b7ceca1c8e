//! Block device discovery (`lsblk`) and filesystem usage (`df`).
//!
//! lsblk's JSON changed over util-linux releases: older versions emit every
//! value as a string (`"size": "1000204886016"`, `"rm": "1"`), newer ones use
//! numbers and booleans, and absent values are `null`. The lenient
//! deserializers below accept all three.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cmd;
use crate::error::{PrestoError, PrestoResult};

pub const LSBLK_COLUMNS: &str =
    "NAME,PATH,SIZE,TYPE,TRAN,MODEL,SERIAL,FSTYPE,LABEL,UUID,MOUNTPOINT,RM,HOTPLUG";

/// Mountpoints that belong to the running system, never offered as USB targets.
const SYSTEM_MOUNTS: &[&str] = &["/", "/boot", "/boot/firmware", "[SWAP]"];

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BlockDevice {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub tran: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub rm: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub hotplug: bool,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

#[derive(Deserialize, Debug)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_u64() == Some(1),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

impl BlockDevice {
    /// `/dev/<name>` when lsblk predates the PATH column.
    pub fn dev_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", self.name))
    }

    pub fn is_disk(&self) -> bool {
        self.kind == "disk"
    }

    pub fn has_filesystem(&self) -> bool {
        self.fstype.as_deref().is_some_and(|f| !f.is_empty())
    }

    pub fn is_mounted(&self) -> bool {
        self.mountpoint.as_deref().is_some_and(|m| !m.is_empty())
    }

    pub fn is_system_mount(&self) -> bool {
        self.mountpoint
            .as_deref()
            .is_some_and(|m| SYSTEM_MOUNTS.contains(&m))
    }

    /// Any node of this tree mounted as part of the running system.
    pub fn hosts_system(&self) -> bool {
        self.is_system_mount() || self.children.iter().any(|c| c.hosts_system())
    }

    pub fn model_or_unknown(&self) -> &str {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty()).unwrap_or("Unknown")
    }

    pub fn transport(&self) -> &str {
        self.tran.as_deref().unwrap_or("-")
    }

    /// All leaves under this device that carry a filesystem, including itself.
    pub fn filesystems(&self) -> Vec<&BlockDevice> {
        let mut out = Vec::new();
        if self.has_filesystem() {
            out.push(self);
        }
        for child in &self.children {
            out.extend(child.filesystems());
        }
        out
    }
}

/// A partition that can be offered to the USB wizard, with its parent disk.
#[derive(Debug, Clone, Copy)]
pub struct UsbPartition<'a> {
    pub disk: &'a BlockDevice,
    pub part: &'a BlockDevice,
}

impl UsbPartition<'_> {
    /// One line for a selection menu.
    pub fn describe(&self) -> String {
        format!(
            "{} ({}, {}, {}) on {}",
            self.part.dev_path(),
            self.part.fstype.as_deref().unwrap_or("?"),
            crate::style::human_bytes(self.part.size),
            self.part.label.as_deref().unwrap_or("no label"),
            self.disk.model_or_unknown(),
        )
    }
}

pub fn parse_lsblk(json: &str) -> PrestoResult<Vec<BlockDevice>> {
    serde_json::from_str::<LsblkOutput>(json)
        .map(|o| o.blockdevices)
        .map_err(|e| PrestoError::parse("lsblk JSON", e))
}

/// Runs `lsblk -J -b` with the columns every tool needs.
pub fn lsblk() -> PrestoResult<Vec<BlockDevice>> {
    let json = cmd::capture("lsblk", &["-J", "-b", "-o", LSBLK_COLUMNS])?;
    parse_lsblk(&json)
}

/// Real disks only: no zram swap, loop images or ramdisks.
pub fn physical_disks(devices: &[BlockDevice]) -> Vec<&BlockDevice> {
    devices
        .iter()
        .filter(|d| d.is_disk())
        .filter(|d| !["zram", "loop", "ram"].iter().any(|p| d.name.starts_with(p)))
        .collect()
}

/// Filesystems on USB/removable disks that aren't part of the running system.
pub fn usb_partitions(devices: &[BlockDevice]) -> Vec<UsbPartition<'_>> {
    devices
        .iter()
        .filter(|d| d.is_disk())
        .filter(|d| d.tran.as_deref() == Some("usb") || d.rm || d.hotplug)
        .filter(|d| !d.hosts_system())
        .flat_map(|disk| {
            disk.filesystems()
                .into_iter()
                .map(move |part| UsbPartition { disk, part })
        })
        .collect()
}

// --- df ---

#[derive(Debug, Clone, PartialEq)]
pub struct FsUsage {
    pub source: String,
    pub size: u64,
    pub used: u64,
    pub avail: u64,
    pub target: String,
}

impl FsUsage {
    /// Same rounding as df's `Use%`: used / (used + avail), rounded up.
    pub fn percent(&self) -> f64 {
        let total = self.used + self.avail;
        if total == 0 {
            return 0.0;
        }
        (self.used as f64 * 100.0 / total as f64).ceil()
    }
}

/// Parses `df -B1 --output=source,size,used,avail,target`.
pub fn parse_df(text: &str) -> Vec<FsUsage> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let source = cols.next()?.to_string();
            let size = cols.next()?.parse().ok()?;
            let used = cols.next()?.parse().ok()?;
            let avail = cols.next()?.parse().ok()?;
            // mount targets may contain spaces
            let target = cols.collect::<Vec<_>>().join(" ");
            if target.is_empty() {
                return None;
            }
            Some(FsUsage {
                source,
                size,
                used,
                avail,
                target,
            })
        })
        .collect()
}

pub fn df_usage() -> PrestoResult<Vec<FsUsage>> {
    let text = cmd::capture("df", &["-B1", "--output=source,size,used,avail,target"])?;
    Ok(parse_df(&text))
}

pub fn usage_for<'a>(usages: &'a [FsUsage], mountpoint: &str) -> Option<&'a FsUsage> {
    usages.iter().find(|u| u.target == mountpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODERN: &str = r#"{
       "blockdevices": [
          {"name":"mmcblk0", "path":"/dev/mmcblk0", "size":31914983424, "type":"disk", "tran":null, "model":null, "serial":"0x1234", "fstype":null, "label":null, "uuid":null, "mountpoint":null, "rm":false, "hotplug":false,
             "children": [
                {"name":"mmcblk0p1", "path":"/dev/mmcblk0p1", "size":536870912, "type":"part", "tran":null, "model":null, "serial":null, "fstype":"vfat", "label":"bootfs", "uuid":"9E6B-1C4D", "mountpoint":"/boot/firmware", "rm":false, "hotplug":false},
                {"name":"mmcblk0p2", "path":"/dev/mmcblk0p2", "size":31373918208, "type":"part", "tran":null, "model":null, "serial":null, "fstype":"ext4", "label":"rootfs", "uuid":"a1b2", "mountpoint":"/", "rm":false, "hotplug":false}
             ]
          },
          {"name":"sda", "path":"/dev/sda", "size":1000204886016, "type":"disk", "tran":"usb", "model":"Samsung SSD 870  ", "serial":"S1", "fstype":null, "label":null, "uuid":null, "mountpoint":null, "rm":false, "hotplug":true,
             "children": [
                {"name":"sda1", "path":"/dev/sda1", "size":1000203837440, "type":"part", "tran":null, "model":null, "serial":null, "fstype":"ext4", "label":"media", "uuid":"1111-2222", "mountpoint":null, "rm":false, "hotplug":true}
             ]
          },
          {"name":"zram0", "path":"/dev/zram0", "size":536870912, "type":"disk", "tran":null, "model":null, "serial":null, "fstype":"swap", "label":null, "uuid":null, "mountpoint":"[SWAP]", "rm":false, "hotplug":false}
       ]
    }"#;

    const LEGACY: &str = r#"{
       "blockdevices": [
          {"name": "sdb", "size": "15728640000", "type": "disk", "tran": "usb", "model": "Cruzer", "fstype": "exfat", "label": "STICK", "uuid": "ABCD-1234", "mountpoint": null, "rm": "1", "hotplug": "1"}
       ]
    }"#;

    #[test]
    fn parses_modern_lsblk() {
        let devs = parse_lsblk(MODERN).unwrap();
        assert_eq!(devs.len(), 3);
        assert_eq!(devs[1].size, 1_000_204_886_016);
        assert!(devs[1].hotplug);
        assert_eq!(devs[1].model_or_unknown(), "Samsung SSD 870");
        assert_eq!(devs[0].children.len(), 2);
    }

    #[test]
    fn parses_legacy_string_values() {
        let devs = parse_lsblk(LEGACY).unwrap();
        assert_eq!(devs[0].size, 15_728_640_000);
        assert!(devs[0].rm);
        assert_eq!(devs[0].dev_path(), "/dev/sdb");
    }

    #[test]
    fn physical_disks_skip_zram() {
        let devs = parse_lsblk(MODERN).unwrap();
        let names: Vec<_> = physical_disks(&devs).iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["mmcblk0", "sda"]);
    }

    #[test]
    fn usb_partitions_exclude_system_disk() {
        let devs = parse_lsblk(MODERN).unwrap();
        let found = usb_partitions(&devs);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].part.dev_path(), "/dev/sda1");
        assert_eq!(found[0].disk.name, "sda");
    }

    #[test]
    fn usb_whole_disk_filesystem_counts() {
        let devs = parse_lsblk(LEGACY).unwrap();
        let found = usb_partitions(&devs);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].part.name, "sdb");
    }

    #[test]
    fn usb_boot_disk_is_never_offered() {
        let json = r#"{"blockdevices":[{"name":"sda","type":"disk","tran":"usb","rm":false,"hotplug":false,
            "children":[{"name":"sda2","type":"part","fstype":"ext4","mountpoint":"/"}]}]}"#;
        let devs = parse_lsblk(json).unwrap();
        assert!(usb_partitions(&devs).is_empty());
    }

    #[test]
    fn bad_json_is_parse_error() {
        assert!(matches!(parse_lsblk("not json"), Err(PrestoError::Parse { .. })));
    }

    #[test]
    fn parses_df_and_percent() {
        let text = "\
Filesystem          1B-blocks        Used       Avail Mounted on
/dev/root         31000000000 15500000000 14000000000 /
/dev/sda1       1000000000000 10          999999999990 /mnt/my drive
";
        let usage = parse_df(text);
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].target, "/");
        // 15.5 / 29.5 = 52.54 -> rounded up like df
        assert_eq!(usage[0].percent(), 53.0);
        assert_eq!(usage[1].target, "/mnt/my drive");
        assert_eq!(usage_for(&usage, "/mnt/my drive").unwrap().source, "/dev/sda1");
    }

    #[test]
    fn empty_filesystem_is_zero_percent() {
        let fs = FsUsage {
            source: "tmpfs".into(),
            size: 0,
            used: 0,
            avail: 0,
            target: "/run".into(),
        };
        assert_eq!(fs.percent(), 0.0);
    }
}
