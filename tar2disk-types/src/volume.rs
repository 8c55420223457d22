// SPDX-License-Identifier: GPL-3.0-only

//! Volume model
//!
//! One [`VolumeSpec`] per named role (`boot`, `root`, `esp`, `swap`, `log`, ...).
//! Disk-resident volumes live directly on a partition, everything else is a
//! logical volume inside the volume group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, Result};
use crate::size::is_human_size;

/// Volume names that always live on the raw disk
pub const DISK_RESIDENT_NAMES: &[&str] = &["esp", "boot", "swap"];

/// Mount path trees that are provided by the chroot system mounts
const FORBIDDEN_MOUNT_TREES: &[&str] = &["/proc", "/sys", "/dev", "/tmp", "/var/tmp"];

/// Filesystem formats the initializer knows how to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    Ext4,
    Btrfs,
    Vfat,
    Swap,
}

impl FilesystemKind {
    /// Type name as used by `mount -t` and fstab
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
            Self::Vfat => "vfat",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilesystemKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ext4" => Ok(Self::Ext4),
            "btrfs" => Ok(Self::Btrfs),
            "vfat" => Ok(Self::Vfat),
            "swap" => Ok(Self::Swap),
            _ => Err(value.to_string()),
        }
    }
}

/// A fully resolved volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Role name, unique within a plan
    pub name: String,

    /// Position in the configuration document
    pub order: usize,

    pub enabled: bool,

    /// Filesystem label (uppercase for VFAT)
    pub label: String,

    /// Human size, e.g. "4G"
    pub size: String,

    pub filesystem: FilesystemKind,

    /// Absolute mount path in the target system, `None` for swap or unmounted volumes
    pub mount_path: Option<String>,

    pub mount_options: Vec<String>,

    /// Filesystem UUID; `XXXX-XXXX` for VFAT
    pub fs_uuid: String,

    /// VFAT volume serial, derived from `fs_uuid`
    pub volume_id: Option<String>,

    /// BTRFS compression algorithm
    pub compression: Option<String>,

    /// Lives inside the volume group
    pub is_logical_volume: bool,

    pub is_root: bool,
}

impl VolumeSpec {
    /// Check the invariants that do not depend on the rest of the plan
    pub fn validate(&self) -> Result<()> {
        if self.is_root != (self.mount_path.as_deref() == Some("/")) {
            return Err(ConfigError::volume(
                &self.name,
                format!(
                    "root volume must be mounted at '/' and only the root volume may be (mount path: {})",
                    self.mount_path.as_deref().unwrap_or("none")
                ),
            ));
        }

        if let Some(path) = &self.mount_path
            && !path.starts_with('/')
        {
            return Err(ConfigError::volume(
                &self.name,
                format!("mount path must be absolute: {path}"),
            ));
        }

        if !is_human_size(&self.size) {
            return Err(ConfigError::volume(
                &self.name,
                format!("invalid size: {}", self.size),
            ));
        }

        match self.filesystem {
            FilesystemKind::Vfat => {
                let expected = volume_id_from_uuid(&self.fs_uuid).ok_or_else(|| {
                    ConfigError::volume(
                        &self.name,
                        format!("VFAT fs_uuid must be XXXX-XXXX: {}", self.fs_uuid),
                    )
                })?;
                if self.volume_id.as_deref() != Some(expected.as_str()) {
                    return Err(ConfigError::volume(
                        &self.name,
                        "volume id does not match fs_uuid",
                    ));
                }
            }
            FilesystemKind::Btrfs if self.mount_path.is_none() => {
                return Err(ConfigError::volume(
                    &self.name,
                    "cannot create subvolumes on a filesystem without mount path",
                ));
            }
            _ => {
                if self.volume_id.is_some() {
                    return Err(ConfigError::volume(
                        &self.name,
                        "volume id is only valid for VFAT",
                    ));
                }
            }
        }

        if self.compression.is_some() && self.filesystem != FilesystemKind::Btrfs {
            return Err(ConfigError::volume(
                &self.name,
                "compression is only supported on btrfs",
            ));
        }

        Ok(())
    }

    /// Device node path for a logical volume in `vg_name`
    pub fn logical_volume_device(&self, vg_name: &str) -> String {
        logical_volume_device(vg_name, &self.name)
    }

    /// Mount path relative to the mount root, empty for the root volume
    pub fn relative_mount_path(&self) -> Option<&str> {
        self.mount_path
            .as_deref()
            .map(|path| path.trim_start_matches('/'))
    }
}

/// Device-mapper node of logical volume `lv_name` in `vg_name`
///
/// Hyphens inside either name are doubled, as device-mapper does.
pub fn logical_volume_device(vg_name: &str, lv_name: &str) -> String {
    format!(
        "/dev/mapper/{}-{}",
        vg_name.replace('-', "--"),
        lv_name.replace('-', "--")
    )
}

/// Generate a fresh filesystem UUID suitable for `filesystem`
///
/// VFAT has a 32-bit serial only, so it gets the middle two groups of a v4
/// UUID, uppercased: `3aad3da3-3971-47a6-...` becomes `3971-47A6`.
pub fn generate_fs_uuid(filesystem: FilesystemKind) -> String {
    let uuid = Uuid::new_v4().to_string();
    match filesystem {
        FilesystemKind::Vfat => uuid
            .split('-')
            .skip(1)
            .take(2)
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join("-"),
        _ => uuid,
    }
}

/// Hex digits of a VFAT `XXXX-XXXX` UUID, uppercased
///
/// Returns `None` unless the result is exactly 8 hex digits.
pub fn volume_id_from_uuid(fs_uuid: &str) -> Option<String> {
    let id: String = fs_uuid
        .split('-')
        .map(str::to_ascii_uppercase)
        .collect();
    (id.len() == 8 && id.chars().all(|c| c.is_ascii_hexdigit())).then_some(id)
}

/// Whether a volume named `name` with `filesystem` lives inside the volume group
pub fn is_logical_volume(name: &str, filesystem: FilesystemKind) -> bool {
    !(DISK_RESIDENT_NAMES.contains(&name) || filesystem == FilesystemKind::Swap)
}

/// Mount path used when the document does not name one
///
/// The outer `None` means there is no default for this volume.
pub fn default_mount_path(name: &str, filesystem: FilesystemKind) -> Option<Option<String>> {
    let path = match name {
        "boot" => Some("/boot"),
        "esp" => Some("/boot/efi"),
        "root" => Some("/"),
        "swap" => None,
        "log" => Some("/var/log"),
        "apt" => Some("/var/cache/apt"),
        _ if filesystem == FilesystemKind::Swap => None,
        _ => return None,
    };
    Some(path.map(str::to_string))
}

fn in_mount_tree(tree: &str, path: &str) -> bool {
    path == tree
        || path
            .strip_prefix(tree)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Mount options used when the document does not specify any
pub fn default_mount_options(
    name: &str,
    filesystem: FilesystemKind,
    mount_path: Option<&str>,
) -> Result<Vec<String>> {
    let options: Vec<&str> = if filesystem == FilesystemKind::Swap {
        vec!["sw", "nofail"]
    } else if name == "root" {
        let mut options = vec!["defaults", "rw", "relatime"];
        if filesystem == FilesystemKind::Ext4 {
            options.extend(["user_xattr", "errors=remount-ro"]);
        }
        options
    } else if name == "esp" {
        vec!["defaults", "rw", "noatime", "umask=0077"]
    } else if name == "boot" {
        vec!["defaults", "rw", "noatime", "nodev", "nosuid"]
    } else {
        let Some(path) = mount_path else {
            return Ok(Vec::new());
        };

        if FORBIDDEN_MOUNT_TREES
            .iter()
            .any(|tree| in_mount_tree(tree, path))
        {
            return Err(ConfigError::volume(
                name,
                format!("{path} is provided by the system mounts and cannot be a volume"),
            ));
        }

        if in_mount_tree("/usr", path) {
            vec!["defaults", "rw", "relatime", "nodev", "nosuid"]
        } else {
            let atime = if in_mount_tree("/var/log", path) || in_mount_tree("/var/cache", path) {
                "noatime"
            } else {
                "relatime"
            };
            vec!["defaults", "rw", atime, "nodev", "nosuid", "noexec"]
        }
    };

    Ok(options.into_iter().map(str::to_string).collect())
}
