// SPDX-License-Identifier: GPL-3.0-only

//! Volume initializer
//!
//! Creates, formats and mounts every planned volume in a fixed order: the
//! root logical volume, the boot device, the ESP, swap, then the remaining
//! logical volumes in declaration order. Each mount goes through the
//! [`DeviceJournal`] and yields an [`FstabEntry`].

use std::path::{Path, PathBuf};

use tar2disk_sys::DeviceJournal;
use tar2disk_sys::tools::{btrfs, files, lvm, mkfs};
use tar2disk_types::{BootStyle, DiskPlan, FilesystemKind, MountRecord, VolumeSpec, join_mount_options};
use tracing::{debug, info};

use crate::error::Result;

pub const ROOT_SUBVOLUME: &str = "@rootfs";
pub const DEFAULT_SUBVOLUME: &str = "@";
pub const SNAPSHOTS_SUBVOLUME: &str = "@snapshots";
pub const SNAPSHOTS_DIR: &str = ".snapshots";

/// One future fstab line together with what decides its source and pass number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub record: MountRecord,
    pub volume: String,
    pub fs_uuid: String,
    pub is_logical_volume: bool,
    pub is_root: bool,
}

impl FstabEntry {
    fn new(volume: &VolumeSpec, record: MountRecord) -> Self {
        Self {
            record,
            volume: volume.name.clone(),
            fs_uuid: volume.fs_uuid.clone(),
            is_logical_volume: volume.is_logical_volume,
            is_root: volume.is_root,
        }
    }
}

/// Subvolume layout of one BTRFS volume
///
/// Phase one ([`prepare_subvolumes`]) mounts the bare filesystem with
/// [`BtrfsSubvolumes::base_options`] and creates the subvolumes. Phase two
/// ([`BtrfsSubvolumes::finalize_mount_options`]) yields the options of the
/// permanent mount and of the synthetic snapshots entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtrfsSubvolumes {
    pub primary: &'static str,
    pub snapshots: &'static str,
    base_options: Vec<String>,
}

impl BtrfsSubvolumes {
    pub fn for_volume(volume: &VolumeSpec) -> Self {
        let mut base_options = volume.mount_options.clone();
        if let Some(compression) = &volume.compression {
            base_options.push(format!("compress={compression}"));
        }
        Self {
            primary: if volume.is_root {
                ROOT_SUBVOLUME
            } else {
                DEFAULT_SUBVOLUME
            },
            snapshots: SNAPSHOTS_SUBVOLUME,
            base_options,
        }
    }

    pub fn base_options(&self) -> &[String] {
        &self.base_options
    }

    /// `(permanent mount options, snapshots entry options)`
    pub fn finalize_mount_options(&self) -> (Vec<String>, Vec<String>) {
        let with_subvolume = |subvolume: &str| {
            let mut options = self.base_options.clone();
            options.push(format!("subvol={subvolume}"));
            options
        };
        (with_subvolume(self.primary), with_subvolume(self.snapshots))
    }
}

/// Phase one of BTRFS setup: mount the top level at its final place, create
/// the primary and snapshots subvolumes plus the `.snapshots` mountpoint, and
/// unmount again
pub fn prepare_subvolumes(
    journal: &mut DeviceJournal<'_>,
    mount_root: &Path,
    volume: &VolumeSpec,
    device: &str,
    subvolumes: &BtrfsSubvolumes,
) -> Result<()> {
    let runner = journal.runner();
    let (mount_point, _) = journal.open_mount(
        mount_root,
        device,
        volume.relative_mount_path(),
        Some(FilesystemKind::Btrfs.as_str()),
        &join_mount_options(subvolumes.base_options()),
    )?;

    let snapshots = mount_point.join(subvolumes.snapshots);
    btrfs::create_subvolume(runner, &mount_point.join(subvolumes.primary))?;
    btrfs::create_subvolume(runner, &snapshots)?;
    files::make_private(runner, &snapshots)?;
    files::make_private_dir(
        runner,
        &mount_point.join(subvolumes.primary).join(SNAPSHOTS_DIR),
    )?;

    journal.close_mount(&mount_point)?;
    Ok(())
}

/// Block devices of the disk-resident volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDevices {
    pub boot: String,
    pub esp: Option<String>,
    pub swap: Option<String>,
}

pub struct VolumeInitializer<'j, 'r> {
    journal: &'j mut DeviceJournal<'r>,
    mount_root: PathBuf,
    entries: Vec<FstabEntry>,
}

impl<'j, 'r> VolumeInitializer<'j, 'r> {
    pub fn new(journal: &'j mut DeviceJournal<'r>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            journal,
            mount_root: mount_root.into(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[FstabEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<FstabEntry> {
        self.entries
    }

    /// Initialize every enabled volume of `plan` in the fixed order
    pub fn initialize_plan(&mut self, plan: &DiskPlan, disks: &DiskDevices) -> Result<()> {
        let vg_name = plan.volume_group_name.as_str();

        if let Some(root) = plan.root_volume() {
            self.initialize_logical(vg_name, root)?;
        }

        if let Some(boot) = plan.enabled_volume("boot") {
            self.initialize(boot, &disks.boot)?;
        }

        if plan.boot_style == BootStyle::Uefi
            && let (Some(esp), Some(device)) = (plan.enabled_volume("esp"), &disks.esp)
        {
            self.initialize(esp, device)?;
        }

        if let (Some(swap), Some(device)) = (plan.enabled_volume("swap"), &disks.swap) {
            self.initialize(swap, device)?;
        }

        for volume in plan
            .group_volumes()
            .filter(|volume| volume.enabled && !volume.is_root)
        {
            self.initialize_logical(vg_name, volume)?;
        }
        Ok(())
    }

    /// `lvcreate`, then [`VolumeInitializer::initialize`] on the new device
    pub fn initialize_logical(&mut self, vg_name: &str, volume: &VolumeSpec) -> Result<()> {
        let device =
            lvm::create_logical_volume(self.journal.runner(), vg_name, &volume.name, &volume.size)?;
        self.initialize(volume, &device)
    }

    /// Format `device` for `volume` and mount it unless it is swap or has no mount path
    pub fn initialize(&mut self, volume: &VolumeSpec, device: &str) -> Result<()> {
        info!(volume = %volume.name, device, filesystem = %volume.filesystem, "initializing volume");
        mkfs::format_volume(self.journal.runner(), volume, device)?;

        match volume.filesystem {
            FilesystemKind::Swap => {
                let record = MountRecord {
                    source: device.to_string(),
                    mount_path: "none".to_string(),
                    fs_type: "swap".to_string(),
                    options: join_mount_options(&volume.mount_options),
                };
                self.entries.push(FstabEntry::new(volume, record));
            }
            FilesystemKind::Btrfs => {
                let subvolumes = BtrfsSubvolumes::for_volume(volume);
                prepare_subvolumes(self.journal, &self.mount_root, volume, device, &subvolumes)?;

                let (options, snapshot_options) = subvolumes.finalize_mount_options();
                let record = self.mount(volume, device, &options)?;
                // Escaped like the primary entry, so both lines carry identical base options.
                let snapshots =
                    record.nested(SNAPSHOTS_DIR, join_mount_options(&snapshot_options));
                self.entries.push(FstabEntry::new(volume, record));
                self.entries.push(FstabEntry::new(volume, snapshots));
            }
            FilesystemKind::Ext4 | FilesystemKind::Vfat => {
                if volume.mount_path.is_some() {
                    let record = self.mount(volume, device, &volume.mount_options)?;
                    self.entries.push(FstabEntry::new(volume, record));
                } else {
                    debug!(volume = %volume.name, "no mount path, formatted only");
                }
            }
        }
        Ok(())
    }

    fn mount(&mut self, volume: &VolumeSpec, device: &str, options: &[String]) -> Result<MountRecord> {
        let (_, record) = self.journal.open_mount(
            &self.mount_root,
            device,
            volume.relative_mount_path(),
            Some(volume.filesystem.as_str()),
            &join_mount_options(options),
        )?;
        Ok(record)
    }
}
