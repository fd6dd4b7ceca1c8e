//! The wizard steps, in order. Each step either hands its result to the
//! next or fails the whole run. Once fstab is written, any later failure
//! puts it back.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use colored::Colorize;
use inquire::validator::Validation;
use inquire::{Confirm, Select, Text};
use presto_common::block::{self, BlockDevice};
use presto_common::{cmd, style};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::fstab::{self, Duplicate, FsKind, FstabEntry};

pub const FSTAB_PATH: &str = "/etc/fstab";
const DETECT_ATTEMPTS: u32 = 5;
const UMOUNT_ATTEMPTS: u32 = 3;
const FSCK_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// What ended up in fstab, for the final report.
#[derive(Debug)]
pub struct Summary {
    pub device: String,
    pub spec: String,
    pub mountpoint: String,
    pub fstype: String,
    pub options: String,
    pub backup: String,
}

/// The selected partition, detached from the lsblk tree.
struct Target {
    device: String,
    label: Option<String>,
    mounted_at: Option<String>,
}

/// `blkid -o export` keys we care about.
#[derive(Debug, Default, PartialEq)]
pub struct BlkidInfo {
    pub uuid: Option<String>,
    pub partuuid: Option<String>,
    pub kind: Option<String>,
    pub label: Option<String>,
}

impl BlkidInfo {
    pub fn parse(text: &str) -> Self {
        let pairs: HashMap<&str, &str> = text
            .lines()
            .filter_map(|l| l.trim().split_once('='))
            .collect();
        let get = |k: &str| {
            pairs
                .get(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            uuid: get("UUID"),
            partuuid: get("PARTUUID"),
            kind: get("TYPE"),
            label: get("LABEL"),
        }
    }

    /// `UUID=` is stable across ports and hubs; `PARTUUID=` is the fallback.
    pub fn fstab_spec(&self) -> Option<String> {
        self.uuid
            .as_ref()
            .map(|u| format!("UUID={u}"))
            .or_else(|| self.partuuid.as_ref().map(|p| format!("PARTUUID={p}")))
    }
}

/// `Ok(None)` when the user backs out at the final confirmation.
pub fn run() -> Result<Option<Summary>> {
    cmd::require_root("edit /etc/fstab")?;
    cmd::require(&["lsblk", "blkid", "mount", "umount", "systemctl"])?;

    // --- 1. Find and pick the drive ---
    let devices = detect_usb()?;
    let target = select_partition(&devices)?;
    let device = target.device.as_str();

    let export = cmd::capture("blkid", &["-o", "export", device])
        .with_context(|| format!("blkid could not read {device}"))?;
    let blkid = BlkidInfo::parse(&export);
    let spec = blkid
        .fstab_spec()
        .with_context(|| format!("{device} has neither a UUID nor a PARTUUID"))?;
    let raw_kind = blkid.kind.as_deref().unwrap_or("unknown");
    let Some(fs_kind) = FsKind::from_blkid(raw_kind) else {
        bail!("Unsupported filesystem '{raw_kind}' on {device}");
    };
    info!(device, spec = %spec, fstype = fs_kind.fstab_type(), "partition selected");

    // --- 2. Prepare it ---
    if let Some(m) = &target.mounted_at {
        unmount(device, m)?;
    }
    if fs_kind.is_ext()
        && Confirm::new(&format!("Run a filesystem check (fsck -p) on {device}?"))
            .with_default(true)
            .prompt()?
    {
        fsck(device)?;
    }

    // --- 3. Where it goes ---
    let label = blkid.label.as_deref().or(target.label.as_deref());
    let name = Text::new("Mountpoint name (created under /mnt):")
        .with_default(&fstab::default_mount_name(label))
        .with_validator(|s: &str| {
            Ok(match fstab::validate_mountpoint_name(s) {
                Ok(()) => Validation::Valid,
                Err(e) => Validation::Invalid(e.to_string().into()),
            })
        })
        .prompt()?;
    fstab::validate_mountpoint_name(&name)?;
    let mountpoint = fstab::mountpoint_for(&name);
    let created_dir = check_mountpoint_dir(Path::new(&mountpoint))?;

    let current = fs::read_to_string(FSTAB_PATH)
        .with_context(|| format!("Failed to read {FSTAB_PATH}"))?;
    match fstab::find_duplicate(&current, &spec, &mountpoint) {
        Some(Duplicate::Spec(line)) => bail!("{device} is already in {FSTAB_PATH}: {line}"),
        Some(Duplicate::Mountpoint(line)) => {
            bail!("{mountpoint} is already used in {FSTAB_PATH}: {line}")
        }
        None => {}
    }

    let user = cmd::invoking_user().unwrap_or_else(|| "root".to_string());
    let (uid, gid) = cmd::user_ids(&user)?;
    let entry = FstabEntry {
        spec: spec.clone(),
        mountpoint: mountpoint.clone(),
        fstype: fs_kind.fstab_type().to_string(),
        options: fstab::mount_options(fs_kind, uid, gid),
        dump: 0,
        pass: fs_kind.fsck_pass(),
    };

    // --- 4. Confirm and write ---
    println!("\n {}", style::heading("New fstab entry"));
    println!("  {:<12} {}", "Device".magenta(), device);
    println!("  {:<12} {}", "Mountpoint".magenta(), mountpoint);
    println!("  {:<12} {}", "Owner".magenta(), user);
    println!("  {}", entry.to_line().cyan());
    if !Confirm::new("Write this entry to /etc/fstab?")
        .with_default(true)
        .prompt()?
    {
        return Ok(None);
    }

    let now = Local::now();
    let backup = format!("{FSTAB_PATH}.presto-bak-{}", now.format("%Y%m%d-%H%M%S"));
    fs::copy(FSTAB_PATH, &backup)
        .with_context(|| format!("Failed to back up fstab to {backup}"))?;
    info!(backup = %backup, "fstab backed up");

    let stamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let updated = fstab::append_entry(&current, &entry, &stamp);
    let change = FstabChange {
        path: Path::new(FSTAB_PATH),
        original: &current,
        updated: &updated,
        mountpoint: &mountpoint,
        created_dir,
        backup: &backup,
    };

    // --- 5. Prove it mounts ---
    let committed = change.commit(|| {
        cmd::capture("systemctl", &["daemon-reload"])?;
        test_mount(&mountpoint)?;
        println!("{} mounted {} at {}", style::tick(), device, mountpoint);
        if fs_kind.has_unix_permissions() {
            if let Err(e) = set_owner(Path::new(&mountpoint), uid, gid) {
                if let Err(u) = cmd::capture("umount", &[mountpoint.as_str()]) {
                    warn!(mountpoint = %mountpoint, "umount before rollback failed: {u}");
                }
                return Err(e);
            }
        }
        Ok(())
    });
    if committed.is_err() {
        if let Err(e) = cmd::capture("systemctl", &["daemon-reload"]) {
            warn!("systemctl daemon-reload after rollback failed: {e}");
        }
    }
    committed?;

    Ok(Some(Summary {
        device: device.to_string(),
        spec,
        mountpoint,
        fstype: entry.fstype,
        options: entry.options,
        backup,
    }))
}

// --- Steps ---

fn detect_usb() -> Result<Vec<BlockDevice>> {
    Confirm::new("Plug in the USB drive now. Ready?")
        .with_default(true)
        .prompt()?;

    for attempt in 1..=DETECT_ATTEMPTS {
        let devices = block::lsblk()?;
        if !block::usb_partitions(&devices).is_empty() {
            return Ok(devices);
        }
        println!(
            "{} no USB partitions yet (attempt {attempt}/{DETECT_ATTEMPTS})",
            style::info()
        );
        if attempt < DETECT_ATTEMPTS {
            thread::sleep(RETRY_DELAY);
        }
    }
    bail!("No USB partitions found after {DETECT_ATTEMPTS} attempts")
}

fn select_partition(devices: &[BlockDevice]) -> Result<Target> {
    let candidates = block::usb_partitions(devices);
    let labels: Vec<String> = candidates.iter().map(|c| c.describe()).collect();
    let choice = Select::new("Select the USB partition to mount:", labels).raw_prompt()?;
    let picked = candidates[choice.index];
    Ok(Target {
        device: picked.part.dev_path(),
        label: picked.part.label.clone(),
        mounted_at: picked.part.mountpoint.clone().filter(|m| !m.is_empty()),
    })
}

fn unmount(device: &str, mounted_at: &str) -> Result<()> {
    for attempt in 1..=UMOUNT_ATTEMPTS {
        match cmd::capture("umount", &[device]) {
            Ok(_) => {
                info!(device, mounted_at, "unmounted");
                return Ok(());
            }
            Err(e) => {
                warn!(device, attempt, "umount failed: {e}");
                if attempt < UMOUNT_ATTEMPTS {
                    thread::sleep(RETRY_DELAY);
                }
            }
        }
    }
    bail!("Could not unmount {device} from {mounted_at} (is something using it?)")
}

/// fsck exit 1 means "errors corrected", which is fine.
fn fsck(device: &str) -> Result<()> {
    for attempt in 1..=FSCK_ATTEMPTS {
        let status = Command::new("fsck")
            .args(["-p", device])
            .status()
            .context("Failed to run fsck")?;
        match status.code() {
            Some(0 | 1) => {
                println!("{} filesystem check passed", style::tick());
                return Ok(());
            }
            code => warn!(device, attempt, ?code, "fsck reported problems"),
        }
    }
    bail!("Filesystem check failed on {device}; repair it manually with fsck")
}

/// `Ok(true)` when the directory does not exist yet (we'll create it).
fn check_mountpoint_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if !path.is_dir() {
        bail!("{} exists and is not a directory", path.display());
    }
    let mut entries =
        fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if entries.next().is_some() {
        bail!("{} exists and is not empty", path.display());
    }
    Ok(false)
}

fn test_mount(mountpoint: &str) -> Result<()> {
    let status = cmd::run_with_timeout(Command::new("mount").arg(mountpoint), MOUNT_TIMEOUT)
        .with_context(|| format!("Test mount of {mountpoint} did not finish"))?;
    if !status.success() {
        bail!("Test mount of {mountpoint} failed ({status})");
    }
    Ok(())
}

/// One fstab edit and what it takes to undo it.
struct FstabChange<'a> {
    path: &'a Path,
    original: &'a str,
    updated: &'a str,
    mountpoint: &'a str,
    created_dir: bool,
    backup: &'a str,
}

impl FstabChange<'_> {
    /// Writes the new fstab, creates the mountpoint and runs `finish`. Any
    /// failure after the write is rolled back, and the error says whether
    /// that worked.
    fn commit(&self, finish: impl FnOnce() -> Result<()>) -> Result<()> {
        write_atomic(self.path, self.updated)?;
        info!(mountpoint = self.mountpoint, "fstab entry added");

        let Err(e) = fs::create_dir_all(self.mountpoint)
            .with_context(|| format!("Failed to create {}", self.mountpoint))
            .and_then(|()| finish())
        else {
            return Ok(());
        };
        match self.rollback() {
            Ok(()) => {
                info!(mountpoint = self.mountpoint, "fstab entry rolled back");
                Err(e.context("The fstab entry was rolled back"))
            }
            Err(undo) => {
                warn!(mountpoint = self.mountpoint, "could not roll back fstab: {undo:#}");
                Err(e.context(format!(
                    "Rolling back {} failed ({undo:#}); restore it from {}",
                    self.path.display(),
                    self.backup
                )))
            }
        }
    }

    /// Restores the exact original when fstab is still what we wrote;
    /// otherwise only our entry is taken out.
    fn rollback(&self) -> Result<()> {
        let content = fs::read_to_string(self.path)
            .with_context(|| format!("Failed to re-read {}", self.path.display()))?;
        let restored = if content == self.updated {
            self.original.to_string()
        } else {
            fstab::remove_entry(&content, self.mountpoint)
        };
        write_atomic(self.path, &restored)?;
        if self.created_dir {
            if let Err(e) = fs::remove_dir(self.mountpoint) {
                warn!(mountpoint = self.mountpoint, "could not remove mountpoint: {e}");
            }
        }
        Ok(())
    }
}

fn set_owner(path: &Path, uid: u32, gid: u32) -> Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
        .with_context(|| format!("Failed to chown {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o775))
        .with_context(|| format!("Failed to chmod {}", path.display()))?;
    Ok(())
}

/// Write next to `path`, fsync, then rename over it.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("/"));
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temp file in {}", dir.display()))?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(0o644))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blkid_export_prefers_uuid() {
        let info = BlkidInfo::parse(
            "DEVNAME=/dev/sda1\nUUID=3f2a-11aa\nBLOCK_SIZE=4096\nTYPE=ext4\nPARTUUID=0ab1-01\n",
        );
        assert_eq!(info.kind.as_deref(), Some("ext4"));
        assert_eq!(info.fstab_spec().as_deref(), Some("UUID=3f2a-11aa"));
    }

    #[test]
    fn blkid_export_falls_back_to_partuuid() {
        let info = BlkidInfo::parse("DEVNAME=/dev/sdb1\nTYPE=ntfs\nLABEL=Backup\nPARTUUID=77-02\n");
        assert_eq!(info.label.as_deref(), Some("Backup"));
        assert_eq!(info.fstab_spec().as_deref(), Some("PARTUUID=77-02"));
        assert_eq!(BlkidInfo::parse("TYPE=vfat\n").fstab_spec(), None);
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "old\n").unwrap();
        write_atomic(&path, "new\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    fn change<'a>(
        path: &'a Path,
        original: &'a str,
        updated: &'a str,
        mnt: &'a str,
    ) -> FstabChange<'a> {
        FstabChange {
            path,
            original,
            updated,
            mountpoint: mnt,
            created_dir: true,
            backup: "fstab.bak",
        }
    }

    #[test]
    fn failed_mount_restores_exact_fstab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let mnt = dir.path().join("media");
        let mnt = mnt.to_str().unwrap();
        let original = "proc /proc proc defaults 0 0";
        fs::write(&path, original).unwrap();
        let updated = format!("{original}\nUUID=a {mnt} ext4 defaults 0 2\n");

        let err = change(&path, original, &updated, mnt)
            .commit(|| bail!("Test mount of {mnt} failed"))
            .unwrap_err();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert!(!Path::new(mnt).exists());
        let msg = format!("{err:#}");
        assert!(msg.starts_with("The fstab entry was rolled back: Test mount of"), "{msg}");
    }

    #[test]
    fn rollback_keeps_foreign_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let mnt = dir.path().join("media");
        let mnt = mnt.to_str().unwrap();
        let original = "proc /proc proc defaults 0 0\n";
        let updated = format!("{original}UUID=a {mnt} ext4 defaults 0 2\n");
        fs::write(&path, original).unwrap();

        let result = change(&path, original, &updated, mnt).commit(|| {
            let mut f = fs::OpenOptions::new().append(true).open(&path)?;
            f.write_all(b"tmpfs /tmp tmpfs defaults 0 0\n")?;
            bail!("chown failed")
        });
        assert!(result.is_err());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "proc /proc proc defaults 0 0\ntmpfs /tmp tmpfs defaults 0 0\n"
        );
    }

    #[test]
    fn successful_commit_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let mnt = dir.path().join("media");
        let mnt = mnt.to_str().unwrap();
        let updated = format!("UUID=a {mnt} ext4 defaults 0 2\n");
        fs::write(&path, "").unwrap();

        change(&path, "", &updated, mnt).commit(|| Ok(())).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), updated);
        assert!(Path::new(mnt).is_dir());
    }

    #[test]
    fn failed_rollback_points_at_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        let mnt = dir.path().join("media");
        let mnt = mnt.to_str().unwrap();
        fs::write(&path, "").unwrap();

        let err = change(&path, "", "x\n", mnt)
            .commit(|| {
                fs::remove_file(&path)?;
                fs::create_dir(&path)?;
                bail!("mount failed")
            })
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("restore it from fstab.bak"), "{msg}");
        assert!(msg.ends_with("mount failed"), "{msg}");
    }

    #[test]
    fn mountpoint_dir_rules() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_mountpoint_dir(&dir.path().join("fresh")).unwrap());
        assert!(!check_mountpoint_dir(dir.path()).unwrap());
        fs::write(dir.path().join("file"), "x").unwrap();
        assert!(check_mountpoint_dir(dir.path()).is_err());
    }
}
