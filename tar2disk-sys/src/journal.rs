// SPDX-License-Identifier: GPL-3.0-only

//! Device journal
//!
//! Tracks every kernel resource opened during one provisioning run and closes
//! them again in stack order. Each resource kind has its own stack; unwinding
//! drains mounts, volume groups, encrypted volumes, arrays and loop devices,
//! in that order, newest first within a kind. Every close is attempted even
//! when an earlier one failed; failures are collected into [`UnwindError`].

use std::fmt;
use std::path::{Path, PathBuf};

use tar2disk_types::MountRecord;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cmd::CommandRunner;
use crate::error::{Result, SysError};
use crate::tools::{loopdev, luks, lvm, mdadm, mount};

/// Resource kinds, in unwind order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Mount,
    VolumeGroup,
    EncryptedVolume,
    Array,
    LoopDevice,
}

impl ResourceKind {
    pub const UNWIND_ORDER: [ResourceKind; 5] = [
        Self::Mount,
        Self::VolumeGroup,
        Self::EncryptedVolume,
        Self::Array,
        Self::LoopDevice,
    ];

    fn index(self) -> usize {
        match self {
            Self::Mount => 0,
            Self::VolumeGroup => 1,
            Self::EncryptedVolume => 2,
            Self::Array => 3,
            Self::LoopDevice => 4,
        }
    }
}

/// One opened resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Absolute mount path on the host
    Mount(PathBuf),
    VolumeGroup(String),
    /// Mapper name of an unlocked LUKS volume
    EncryptedVolume(String),
    /// Array device node
    Array(String),
    LoopDevice(String),
}

impl JournalEntry {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Mount(_) => ResourceKind::Mount,
            Self::VolumeGroup(_) => ResourceKind::VolumeGroup,
            Self::EncryptedVolume(_) => ResourceKind::EncryptedVolume,
            Self::Array(_) => ResourceKind::Array,
            Self::LoopDevice(_) => ResourceKind::LoopDevice,
        }
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount(path) => write!(f, "mount {}", path.display()),
            Self::VolumeGroup(name) => write!(f, "volume group {name}"),
            Self::EncryptedVolume(name) => write!(f, "encrypted volume {name}"),
            Self::Array(device) => write!(f, "RAID array {device}"),
            Self::LoopDevice(device) => write!(f, "loop device {device}"),
        }
    }
}

/// Ordered record of acquired resources, one stack per kind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JournalState {
    stacks: [Vec<JournalEntry>; 5],
}

impl JournalState {
    fn push(&mut self, entry: JournalEntry) {
        self.stacks[entry.kind().index()].push(entry);
    }

    /// Remove the most recent occurrence of `entry`
    fn forget(&mut self, entry: &JournalEntry) -> bool {
        let stack = &mut self.stacks[entry.kind().index()];
        match stack.iter().rposition(|candidate| candidate == entry) {
            Some(position) => {
                stack.remove(position);
                true
            }
            None => false,
        }
    }

    fn pop(&mut self, kind: ResourceKind) -> Option<JournalEntry> {
        self.stacks[kind.index()].pop()
    }

    /// Entries of `kind` in acquisition order
    pub fn entries(&self, kind: ResourceKind) -> &[JournalEntry] {
        &self.stacks[kind.index()]
    }

    pub fn len(&self) -> usize {
        self.stacks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.iter().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalPhase {
    Empty,
    Acquiring,
    Unwinding,
    Closed,
}

/// A close step that failed during unwind
#[derive(Debug)]
pub struct UnwindFailure {
    pub resource: JournalEntry,
    pub error: SysError,
}

/// Every close step that failed during one unwind
#[derive(Debug, Error)]
#[error("{} resource(s) failed to close: {}", .failures.len(), describe(.failures))]
pub struct UnwindError {
    pub failures: Vec<UnwindFailure>,
}

fn describe(failures: &[UnwindFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.resource, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct DeviceJournal<'r> {
    runner: &'r dyn CommandRunner,
    state: JournalState,
    phase: JournalPhase,
}

impl<'r> DeviceJournal<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            state: JournalState::default(),
            phase: JournalPhase::Empty,
        }
    }

    pub fn runner(&self) -> &'r dyn CommandRunner {
        self.runner
    }

    pub fn phase(&self) -> JournalPhase {
        self.phase
    }

    pub fn state(&self) -> &JournalState {
        &self.state
    }

    fn ensure_open(&mut self, what: &str) -> Result<()> {
        match self.phase {
            JournalPhase::Empty => {
                self.phase = JournalPhase::Acquiring;
                Ok(())
            }
            JournalPhase::Acquiring => Ok(()),
            JournalPhase::Unwinding | JournalPhase::Closed => {
                Err(SysError::JournalClosed(what.to_string()))
            }
        }
    }

    fn record(&mut self, entry: JournalEntry) {
        debug!(resource = %entry, "acquired");
        self.state.push(entry);
    }

    /// Bind `image` to a loop device and rescan its partitions
    pub fn open_loop_device(&mut self, image: &Path) -> Result<String> {
        self.ensure_open("loop device")?;
        let device = loopdev::attach(self.runner, image)?;
        self.record(JournalEntry::LoopDevice(device.clone()));
        loopdev::rescan_partitions(self.runner, &device);
        Ok(device)
    }

    /// Record an array that its creation command already started
    pub fn register_externally_started_array(&mut self, device: &str) -> Result<()> {
        self.ensure_open("RAID array")?;
        self.record(JournalEntry::Array(device.to_string()));
        Ok(())
    }

    /// Unlock `device` as `mapper_name`; the passphrase goes over stdin
    pub fn open_encrypted_volume(
        &mut self,
        device: &str,
        mapper_name: &str,
        passphrase: &str,
    ) -> Result<String> {
        self.ensure_open("encrypted volume")?;
        let mapped = luks::open(self.runner, device, mapper_name, passphrase)?;
        self.record(JournalEntry::EncryptedVolume(mapper_name.to_string()));
        Ok(mapped)
    }

    pub fn open_volume_group(&mut self, name: &str) -> Result<()> {
        self.ensure_open("volume group")?;
        lvm::set_active(self.runner, name, true)?;
        self.record(JournalEntry::VolumeGroup(name.to_string()));
        Ok(())
    }

    /// Mount `source` below `mount_root`
    ///
    /// A missing or empty `relative_path` mounts at `mount_root` itself. An
    /// empty `options` string means `defaults`, a missing `fs_type` `auto`.
    pub fn open_mount(
        &mut self,
        mount_root: &Path,
        source: &str,
        relative_path: Option<&str>,
        fs_type: Option<&str>,
        options: &str,
    ) -> Result<(PathBuf, MountRecord)> {
        self.ensure_open("mount")?;

        let relative = relative_path
            .map(|path| path.trim_start_matches('/'))
            .filter(|path| !path.is_empty());
        let (target, mount_path) = match relative {
            Some(path) => (mount_root.join(path), format!("/{path}")),
            None => (mount_root.to_path_buf(), "/".to_string()),
        };
        let fs_type = fs_type.filter(|value| !value.is_empty()).unwrap_or("auto");
        let options = if options.is_empty() { "defaults" } else { options };

        mount::make_dir_all(self.runner, &target)?;
        mount::mount(self.runner, source, &target, fs_type, options)?;
        self.record(JournalEntry::Mount(target.clone()));

        let record = MountRecord {
            source: source.to_string(),
            mount_path,
            fs_type: fs_type.to_string(),
            options: options.to_string(),
        };
        Ok((target, record))
    }

    /// Flush and unmount `target`
    ///
    /// When `umount` fails, `mountpoint -q` decides: still mounted is an
    /// error, not mounted counts as closed.
    pub fn close_mount(&mut self, target: &Path) -> Result<()> {
        self.close(&JournalEntry::Mount(target.to_path_buf()))
    }

    pub fn close_volume_group(&mut self, name: &str) -> Result<()> {
        self.close(&JournalEntry::VolumeGroup(name.to_string()))
    }

    pub fn close_encrypted_volume(&mut self, mapper_name: &str) -> Result<()> {
        self.close(&JournalEntry::EncryptedVolume(mapper_name.to_string()))
    }

    pub fn close_array(&mut self, device: &str) -> Result<()> {
        self.close(&JournalEntry::Array(device.to_string()))
    }

    pub fn close_loop_device(&mut self, device: &str) -> Result<()> {
        self.close(&JournalEntry::LoopDevice(device.to_string()))
    }

    fn close(&mut self, entry: &JournalEntry) -> Result<()> {
        close_entry(self.runner, entry)?;
        if !self.state.forget(entry) {
            debug!(resource = %entry, "closed resource was not journaled");
        }
        Ok(())
    }

    /// Close everything still open, exactly once
    ///
    /// Later calls are no-ops.
    pub fn unwind(&mut self) -> std::result::Result<(), UnwindError> {
        match self.phase {
            JournalPhase::Unwinding | JournalPhase::Closed => return Ok(()),
            JournalPhase::Empty | JournalPhase::Acquiring => {}
        }
        self.phase = JournalPhase::Unwinding;
        info!(resources = self.state.len(), "unwinding device journal");

        let mut failures = Vec::new();
        for kind in ResourceKind::UNWIND_ORDER {
            while let Some(entry) = self.state.pop(kind) {
                match close_entry(self.runner, &entry) {
                    Ok(()) => debug!(resource = %entry, "closed"),
                    Err(error) => {
                        error!(resource = %entry, %error, "failed to close");
                        failures.push(UnwindFailure {
                            resource: entry,
                            error,
                        });
                    }
                }
            }
        }

        self.phase = JournalPhase::Closed;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(UnwindError { failures })
        }
    }
}

impl Drop for DeviceJournal<'_> {
    fn drop(&mut self) {
        if matches!(self.phase, JournalPhase::Empty | JournalPhase::Acquiring)
            && !self.state.is_empty()
        {
            warn!("device journal dropped with open resources");
            if let Err(error) = self.unwind() {
                error!(%error, "unwind on drop failed");
            }
        }
    }
}

fn close_entry(runner: &dyn CommandRunner, entry: &JournalEntry) -> Result<()> {
    match entry {
        JournalEntry::Mount(target) => {
            mount::sync_filesystem(runner, target);
            if let Err(error) = mount::unmount(runner, target) {
                if mount::is_mountpoint(runner, target)? {
                    warn!(path = %target.display(), %error, "unmount failed");
                    return Err(SysError::StillMounted {
                        path: target.clone(),
                    });
                }
                debug!(path = %target.display(), "already unmounted");
            }
            Ok(())
        }
        JournalEntry::VolumeGroup(name) => lvm::set_active(runner, name, false),
        JournalEntry::EncryptedVolume(name) => luks::close(runner, name),
        JournalEntry::Array(device) => mdadm::stop(runner, device),
        JournalEntry::LoopDevice(device) => {
            loopdev::forget_partitions(runner, device);
            loopdev::detach(runner, device)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    const ROOT: &str = "/mnt/dbuild";

    fn open_stack(journal: &mut DeviceJournal<'_>) {
        let loop_device = journal.open_loop_device(Path::new("/out/root.img")).unwrap();
        journal
            .register_externally_started_array("/dev/md/dbuild_1")
            .unwrap();
        journal
            .open_encrypted_volume("/dev/md/dbuild_1", "root_pv_crypt", "install")
            .unwrap();
        journal.open_volume_group("vg0").unwrap();
        journal
            .open_mount(Path::new(ROOT), "/dev/mapper/vg0-root", None, Some("ext4"), "")
            .unwrap();
        journal
            .open_mount(
                Path::new(ROOT),
                &format!("{loop_device}p1"),
                Some("/boot"),
                Some("ext4"),
                "defaults,noatime",
            )
            .unwrap();
    }

    #[test]
    fn unwinds_in_fixed_kind_order_newest_first() {
        let runner = RecordingRunner::dry_run();
        let mut journal = DeviceJournal::new(&runner);
        open_stack(&mut journal);
        assert_eq!(journal.phase(), JournalPhase::Acquiring);
        assert_eq!(journal.state().len(), 6);

        let opened = runner.commands().len();
        journal.unwind().unwrap();
        assert_eq!(journal.phase(), JournalPhase::Closed);
        assert!(journal.state().is_empty());

        let closes = runner.commands().split_off(opened);
        assert_eq!(
            closes,
            [
                "sync -f /mnt/dbuild/boot/.",
                "umount /mnt/dbuild/boot",
                "sync -f /mnt/dbuild/.",
                "umount /mnt/dbuild",
                "vgchange -a n vg0",
                "cryptsetup luksClose root_pv_crypt",
                "mdadm --stop /dev/md/dbuild_1",
                "partx -d /dev/loop0",
                "losetup --detach /dev/loop0",
            ]
        );
    }

    #[test]
    fn open_mount_builds_record_from_root_view() {
        let runner = RecordingRunner::new();
        let mut journal = DeviceJournal::new(&runner);
        let (target, record) = journal
            .open_mount(Path::new(ROOT), "proc", Some("proc"), Some("proc"), "rw,nosuid")
            .unwrap();
        assert_eq!(target, Path::new("/mnt/dbuild/proc"));
        assert_eq!(record.mount_path, "/proc");
        assert_eq!(
            runner.commands(),
            [
                "mkdir -p /mnt/dbuild/proc",
                "mount -t proc -o rw,nosuid proc /mnt/dbuild/proc"
            ]
        );

        let (target, record) = journal
            .open_mount(Path::new(ROOT), "/dev/sdx", Some(""), None, "")
            .unwrap();
        assert_eq!(target, Path::new(ROOT));
        assert_eq!(record.mount_path, "/");
        assert_eq!(record.fs_type, "auto");
        assert_eq!(record.options, "defaults");
    }

    #[test]
    fn every_close_is_attempted_and_all_failures_reported() {
        let runner = RecordingRunner::dry_run()
            .fail("umount")
            .fail("cryptsetup luksClose")
            .respond("mountpoint -q", "");
        let mut journal = DeviceJournal::new(&runner);
        open_stack(&mut journal);

        let error = journal.unwind().unwrap_err();
        let failed: Vec<String> = error
            .failures
            .iter()
            .map(|failure| failure.resource.to_string())
            .collect();
        assert_eq!(
            failed,
            [
                "mount /mnt/dbuild/boot",
                "mount /mnt/dbuild",
                "encrypted volume root_pv_crypt",
            ]
        );
        assert!(runner.position("losetup --detach /dev/loop0").is_some());
        assert!(runner.position("mdadm --stop").is_some());

        let message = error.to_string();
        assert!(message.starts_with("3 resource(s) failed to close"));
        assert!(message.contains("encrypted volume root_pv_crypt"));
    }

    #[test]
    fn close_mount_is_idempotent_when_not_a_mountpoint() {
        let runner = RecordingRunner::new()
            .fail("umount")
            .fail("mountpoint -q");
        let mut journal = DeviceJournal::new(&runner);
        let (target, _) = journal
            .open_mount(Path::new(ROOT), "/dev/sdx", Some("/srv"), Some("ext4"), "")
            .unwrap();

        journal.close_mount(&target).unwrap();
        journal.close_mount(&target).unwrap();
        assert!(journal.state().entries(ResourceKind::Mount).is_empty());
    }

    #[test]
    fn close_mount_fails_when_still_mounted() {
        let runner = RecordingRunner::new().fail("umount");
        let mut journal = DeviceJournal::new(&runner);
        let (target, _) = journal
            .open_mount(Path::new(ROOT), "/dev/sdx", Some("/srv"), Some("ext4"), "")
            .unwrap();

        assert!(matches!(
            journal.close_mount(&target),
            Err(SysError::StillMounted { .. })
        ));
        assert_eq!(journal.state().entries(ResourceKind::Mount).len(), 1);
    }

    #[test]
    fn failed_acquisition_is_not_journaled() {
        let runner = RecordingRunner::dry_run().fail("vgchange -a y");
        let mut journal = DeviceJournal::new(&runner);
        journal.open_loop_device(Path::new("/out/root.img")).unwrap();
        journal
            .register_externally_started_array("/dev/md/dbuild_1")
            .unwrap();
        assert!(journal.open_volume_group("vg0").is_err());

        journal.unwind().unwrap();
        let commands = runner.commands();
        assert!(!commands.iter().any(|command| command.starts_with("vgchange -a n")));
        assert!(!commands.iter().any(|command| command.starts_with("umount")));
        let stop = runner.position("mdadm --stop /dev/md/dbuild_1").unwrap();
        let detach = runner.position("losetup --detach /dev/loop0").unwrap();
        assert!(stop < detach);
    }

    #[test]
    fn unwind_happens_once_and_closes_the_journal() {
        let runner = RecordingRunner::dry_run();
        let mut journal = DeviceJournal::new(&runner);
        journal.open_loop_device(Path::new("/out/root.img")).unwrap();
        journal.unwind().unwrap();
        let after_first = runner.commands().len();

        journal.unwind().unwrap();
        assert_eq!(runner.commands().len(), after_first);
        assert!(matches!(
            journal.open_volume_group("vg0"),
            Err(SysError::JournalClosed(_))
        ));
    }

    #[test]
    fn drop_unwinds_open_resources() {
        let runner = RecordingRunner::dry_run();
        {
            let mut journal = DeviceJournal::new(&runner);
            journal.open_loop_device(Path::new("/out/root.img")).unwrap();
        }
        assert!(runner.position("losetup --detach /dev/loop0").is_some());
    }

    #[test]
    fn failed_rescan_still_journals_loop_device() {
        let runner = RecordingRunner::dry_run().fail("partx -a");
        let mut journal = DeviceJournal::new(&runner);
        journal.open_loop_device(Path::new("/out/root.img")).unwrap();
        assert_eq!(journal.state().entries(ResourceKind::LoopDevice).len(), 1);
    }
}
