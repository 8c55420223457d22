// SPDX-License-Identifier: GPL-3.0-only

//! The resolved, validated description of one disk image

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionSpec;
use crate::error::{ConfigError, Result};
use crate::raid::RaidSpec;
use crate::size::is_human_size;
use crate::volume::{DISK_RESIDENT_NAMES, VolumeSpec};

/// Firmware boot style, decides partition table flavour and bootloader step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootStyle {
    Bios,
    Uefi,
}

impl BootStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Uefi => "uefi",
        }
    }

    /// Disk-resident volumes that must be present and enabled
    pub fn mandatory_disk_volumes(&self) -> &'static [&'static str] {
        match self {
            Self::Bios => &["boot"],
            Self::Uefi => &["boot", "esp"],
        }
    }
}

impl fmt::Display for BootStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootStyle {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "bios" => Ok(Self::Bios),
            "uefi" => Ok(Self::Uefi),
            _ => Err(ConfigError::BootType(value.to_string())),
        }
    }
}

/// Everything needed to provision one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPlan {
    pub boot_style: BootStyle,

    pub volume_group_name: String,

    /// Size of the image file, e.g. "10G"
    pub root_disk_size: String,

    pub boot_raid: RaidSpec,

    /// RAID layer under the volume group's physical volume
    pub pv_raid: RaidSpec,

    pub encryption: EncryptionSpec,

    /// Initialize snapper for a btrfs root when the tree ships it
    pub snapper: bool,

    /// All volumes in declaration order
    pub volumes: Vec<VolumeSpec>,
}

impl DiskPlan {
    pub fn volume(&self, name: &str) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|volume| volume.name == name)
    }

    /// Volume by name, only if enabled
    pub fn enabled_volume(&self, name: &str) -> Option<&VolumeSpec> {
        self.volume(name).filter(|volume| volume.enabled)
    }

    /// Volumes living directly on the disk (boot, esp, swap)
    pub fn disk_volumes(&self) -> impl Iterator<Item = &VolumeSpec> {
        self.volumes
            .iter()
            .filter(|volume| !volume.is_logical_volume)
    }

    /// Volumes living inside the volume group, in declaration order
    pub fn group_volumes(&self) -> impl Iterator<Item = &VolumeSpec> {
        let mut volumes: Vec<&VolumeSpec> = self
            .volumes
            .iter()
            .filter(|volume| volume.is_logical_volume)
            .collect();
        volumes.sort_by_key(|volume| volume.order);
        volumes.into_iter()
    }

    pub fn root_volume(&self) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|volume| volume.is_root)
    }

    pub fn has_raid(&self) -> bool {
        self.boot_raid.enabled || self.pv_raid.enabled
    }

    /// Check every cross-volume invariant, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        for (index, volume) in self.volumes.iter().enumerate() {
            if self.volumes[..index]
                .iter()
                .any(|other| other.name == volume.name)
            {
                return Err(ConfigError::DuplicateVolume(volume.name.clone()));
            }
            if !volume.is_logical_volume && !DISK_RESIDENT_NAMES.contains(&volume.name.as_str())
            {
                return Err(ConfigError::volume(
                    &volume.name,
                    "only esp, boot and swap can live outside the volume group",
                ));
            }
            volume.validate()?;
        }

        let mut problems = Vec::new();
        if !is_human_size(&self.root_disk_size) {
            problems.push(format!("invalid disk size: {}", self.root_disk_size));
        }
        if self.volume_group_name.is_empty() {
            problems.push("volume group name must not be empty".to_string());
        }
        if self.volumes.iter().filter(|volume| volume.is_root).count() > 1 {
            problems.push("more than one root volume".to_string());
        }
        problems.extend(self.encryption.problems());

        let mut missing_volumes = Vec::new();
        for name in self.boot_style.mandatory_disk_volumes() {
            let present = self
                .enabled_volume(name)
                .is_some_and(|volume| !volume.is_logical_volume);
            if !present {
                missing_volumes.push(name.to_string());
            }
        }
        let root_present = self
            .enabled_volume("root")
            .is_some_and(|volume| volume.is_logical_volume && volume.is_root);
        if !root_present {
            missing_volumes.push("root".to_string());
        }

        if problems.is_empty() && missing_volumes.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                missing_volumes,
                problems,
            })
        }
    }
}
