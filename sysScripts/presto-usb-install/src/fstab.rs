//! `/etc/fstab` text handling. Everything here is pure string in, string out;
//! the wizard does the file I/O.

use std::sync::OnceLock;

use anyhow::{Result, bail};
use regex::Regex;

pub const COMMENT_PREFIX: &str = "# Added by presto-usb-install on";
pub const MOUNT_ROOT: &str = "/mnt";
const DEFAULT_NAME: &str = "usbdrive";

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap())
}

// --- Filesystems ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Vfat,
    Exfat,
    Ntfs,
}

impl FsKind {
    /// From blkid's `TYPE=`. `None` for anything we don't mount.
    pub fn from_blkid(kind: &str) -> Option<Self> {
        Some(match kind.trim().to_ascii_lowercase().as_str() {
            "ext2" => FsKind::Ext2,
            "ext3" => FsKind::Ext3,
            "ext4" => FsKind::Ext4,
            "btrfs" => FsKind::Btrfs,
            "xfs" => FsKind::Xfs,
            "vfat" | "fat32" | "fat16" => FsKind::Vfat,
            "exfat" => FsKind::Exfat,
            "ntfs" | "ntfs3" => FsKind::Ntfs,
            _ => return None,
        })
    }

    /// The type column written to fstab.
    pub fn fstab_type(self) -> &'static str {
        match self {
            FsKind::Ext2 => "ext2",
            FsKind::Ext3 => "ext3",
            FsKind::Ext4 => "ext4",
            FsKind::Btrfs => "btrfs",
            FsKind::Xfs => "xfs",
            FsKind::Vfat => "vfat",
            FsKind::Exfat => "exfat",
            FsKind::Ntfs => "ntfs-3g",
        }
    }

    pub fn is_ext(self) -> bool {
        matches!(self, FsKind::Ext2 | FsKind::Ext3 | FsKind::Ext4)
    }

    /// Filesystems that store unix ownership. The others get it from mount options.
    pub fn has_unix_permissions(self) -> bool {
        self.is_ext() || matches!(self, FsKind::Btrfs | FsKind::Xfs)
    }

    pub fn fsck_pass(self) -> u8 {
        if self.is_ext() { 2 } else { 0 }
    }
}

pub fn mount_options(fs: FsKind, uid: u32, gid: u32) -> String {
    let base = "defaults,nofail,x-systemd.device-timeout=10";
    if fs.has_unix_permissions() {
        base.to_string()
    } else {
        format!("{base},uid={uid},gid={gid},umask=002")
    }
}

// --- Mountpoint names ---

pub fn validate_mountpoint_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Mountpoint name cannot be empty");
    }
    if !name_re().is_match(name) {
        bail!("Invalid mountpoint name '{name}': use only letters, digits, '_' and '-'");
    }
    Ok(())
}

/// A valid default name from the filesystem label.
pub fn default_mount_name(label: Option<&str>) -> String {
    let sanitized: String = label
        .unwrap_or("")
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('_');
    if sanitized.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        sanitized.to_string()
    }
}

pub fn mountpoint_for(name: &str) -> String {
    format!("{MOUNT_ROOT}/{name}")
}

// --- Entries ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// `UUID=...` or `PARTUUID=...`
    pub spec: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.spec, self.mountpoint, self.fstype, self.options, self.dump, self.pass
        )
    }

    /// `None` for blanks, comments and malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut cols = line.split_whitespace();
        let spec = cols.next()?.to_string();
        let mountpoint = cols.next()?.to_string();
        let fstype = cols.next()?.to_string();
        let options = cols.next().unwrap_or("defaults").to_string();
        let dump = cols.next().and_then(|c| c.parse().ok()).unwrap_or(0);
        let pass = cols.next().and_then(|c| c.parse().ok()).unwrap_or(0);
        Some(Self {
            spec,
            mountpoint,
            fstype,
            options,
            dump,
            pass,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duplicate {
    /// The device is already listed (the line is attached).
    Spec(String),
    /// Something else already mounts there.
    Mountpoint(String),
}

fn unquote(s: &str) -> &str {
    s.trim_matches('"')
}

fn same_spec(a: &str, b: &str) -> bool {
    match (a.split_once('='), b.split_once('=')) {
        (Some((ka, va)), Some((kb, vb))) => {
            ka.eq_ignore_ascii_case(kb) && unquote(va).eq_ignore_ascii_case(unquote(vb))
        }
        _ => a == b,
    }
}

pub fn find_duplicate(content: &str, spec: &str, mountpoint: &str) -> Option<Duplicate> {
    let mountpoint = mountpoint.trim_end_matches('/');
    content.lines().find_map(|line| {
        let entry = FstabEntry::parse(line)?;
        if same_spec(&entry.spec, spec) {
            Some(Duplicate::Spec(line.trim().to_string()))
        } else if entry.mountpoint.trim_end_matches('/') == mountpoint {
            Some(Duplicate::Mountpoint(line.trim().to_string()))
        } else {
            None
        }
    })
}

/// `content` plus our comment and the entry, newline-terminated.
pub fn append_entry(content: &str, entry: &FstabEntry, timestamp: &str) -> String {
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("{COMMENT_PREFIX} {timestamp}\n"));
    out.push_str(&entry.to_line());
    out.push('\n');
    out
}

/// Drops every entry mounting at `mountpoint` and the presto comment right
/// above each. Other lines, comments included, are kept verbatim.
pub fn remove_entry(content: &str, mountpoint: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut keep = vec![true; lines.len()];
    for (i, line) in lines.iter().enumerate() {
        let Some(entry) = FstabEntry::parse(line) else {
            continue;
        };
        if entry.mountpoint != mountpoint {
            continue;
        }
        keep[i] = false;
        if i > 0 && lines[i - 1].trim_start().starts_with(COMMENT_PREFIX) {
            keep[i - 1] = false;
        }
    }

    let mut out = lines
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(l, _)| *l)
        .collect::<Vec<_>>()
        .join("\n");
    if !out.is_empty() && content.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSTAB: &str = "\
proc            /proc           proc    defaults          0       0
PARTUUID=6c586e13-01  /boot/firmware  vfat    defaults          0       2
PARTUUID=6c586e13-02  /               ext4    defaults,noatime  0       1
# a swapfile is not a swap partition
";

    fn entry() -> FstabEntry {
        FstabEntry {
            spec: "UUID=3f2a-11aa".into(),
            mountpoint: "/mnt/media".into(),
            fstype: "ext4".into(),
            options: mount_options(FsKind::Ext4, 1000, 1000),
            dump: 0,
            pass: FsKind::Ext4.fsck_pass(),
        }
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_mountpoint_name("media_2-backup").is_ok());
        for bad in ["", "/", "my drive", "a.b", "..", "dätä", "x/y"] {
            assert!(validate_mountpoint_name(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn default_name_from_label() {
        assert_eq!(default_mount_name(Some("My Passport")), "My_Passport");
        assert_eq!(default_mount_name(Some("  ")), "usbdrive");
        assert_eq!(default_mount_name(None), "usbdrive");
        assert!(validate_mountpoint_name(&default_mount_name(Some("Ü.ber"))).is_ok());
    }

    #[test]
    fn blkid_types() {
        assert_eq!(FsKind::from_blkid("ext4"), Some(FsKind::Ext4));
        assert_eq!(FsKind::from_blkid("ntfs").map(FsKind::fstab_type), Some("ntfs-3g"));
        assert_eq!(FsKind::from_blkid("squashfs"), None);
        assert_eq!(FsKind::from_blkid("swap"), None);
    }

    #[test]
    fn options_per_filesystem() {
        assert_eq!(
            mount_options(FsKind::Xfs, 1000, 1000),
            "defaults,nofail,x-systemd.device-timeout=10"
        );
        assert_eq!(
            mount_options(FsKind::Exfat, 1000, 1001),
            "defaults,nofail,x-systemd.device-timeout=10,uid=1000,gid=1001,umask=002"
        );
        assert_eq!(FsKind::Ext3.fsck_pass(), 2);
        assert_eq!(FsKind::Btrfs.fsck_pass(), 0);
        assert_eq!(FsKind::Ntfs.fsck_pass(), 0);
    }

    #[test]
    fn entry_line_parses_back() {
        let e = entry();
        assert_eq!(FstabEntry::parse(&e.to_line()), Some(e));
        assert_eq!(FstabEntry::parse("   # UUID=x /mnt/x ext4"), None);
        assert_eq!(FstabEntry::parse("lonely"), None);
    }

    #[test]
    fn duplicates_by_spec_and_mountpoint() {
        let dup = find_duplicate(FSTAB, "PARTUUID=6C586E13-02", "/mnt/new");
        assert!(matches!(dup, Some(Duplicate::Spec(_))));
        let dup = find_duplicate(FSTAB, "UUID=none", "/boot/firmware/");
        assert!(matches!(dup, Some(Duplicate::Mountpoint(_))));
        assert_eq!(find_duplicate(FSTAB, "UUID=none", "/mnt/new"), None);
    }

    #[test]
    fn duplicates_ignore_comments() {
        let content = "# UUID=3f2a-11aa /mnt/media ext4 defaults 0 2\n";
        assert_eq!(find_duplicate(content, "UUID=3f2a-11aa", "/mnt/media"), None);
    }

    #[test]
    fn append_then_remove_restores() {
        let added = append_entry(FSTAB, &entry(), "20250101-120000");
        assert!(added.contains(
            "# Added by presto-usb-install on 20250101-120000\nUUID=3f2a-11aa /mnt/media ext4"
        ));
        assert!(find_duplicate(&added, "UUID=3f2a-11aa", "/mnt/other").is_some());
        assert_eq!(remove_entry(&added, "/mnt/media"), FSTAB);
    }

    #[test]
    fn append_fixes_missing_newline() {
        let added = append_entry("proc /proc proc defaults 0 0", &entry(), "ts");
        assert!(added.starts_with("proc /proc proc defaults 0 0\n# Added by"));
        assert!(added.ends_with("0 2\n"));
    }

    #[test]
    fn remove_after_unterminated_original_ends_with_newline() {
        let added = append_entry("proc /proc proc defaults 0 0", &entry(), "ts");
        assert_eq!(remove_entry(&added, "/mnt/media"), "proc /proc proc defaults 0 0\n");
    }

    #[test]
    fn remove_keeps_foreign_comments() {
        let content =
            "# my notes\nUUID=a /mnt/media ext4 defaults 0 2\nproc /proc proc defaults 0 0\n";
        assert_eq!(
            remove_entry(content, "/mnt/media"),
            "# my notes\nproc /proc proc defaults 0 0\n"
        );
    }
}
