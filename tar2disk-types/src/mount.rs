// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// One performed (or synthesized) mount, enough to render an fstab line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Device path or pseudo filesystem name passed to `mount`
    pub source: String,

    /// Mount path as seen from the new root, e.g. "/" or "/boot"
    pub mount_path: String,

    /// Filesystem type passed to `mount -t`
    pub fs_type: String,

    /// Comma-joined mount options
    pub options: String,
}

impl MountRecord {
    /// Copy of this record for a sibling mount below `mount_path`
    pub fn nested(&self, child: &str, options: String) -> Self {
        let mount_path = if self.mount_path == "/" {
            format!("/{child}")
        } else {
            format!("{}/{child}", self.mount_path)
        };
        Self {
            source: self.source.clone(),
            mount_path,
            fs_type: self.fs_type.clone(),
            options,
        }
    }
}

/// Join mount options for `mount -o`, escaping commas inside single options
///
/// An empty list becomes `defaults`.
pub fn join_mount_options<S: AsRef<str>>(options: &[S]) -> String {
    if options.is_empty() {
        return "defaults".to_string();
    }
    options
        .iter()
        .map(|option| option.as_ref().replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_mean_defaults() {
        assert_eq!(join_mount_options::<&str>(&[]), "defaults");
    }

    #[test]
    fn commas_inside_options_are_escaped() {
        assert_eq!(
            join_mount_options(&["rw", "sw,nofail"]),
            "rw,sw\\,nofail"
        );
    }

    #[test]
    fn nested_record_under_root_and_subdir() {
        let root = MountRecord {
            source: "/dev/mapper/vg0-root".to_string(),
            mount_path: "/".to_string(),
            fs_type: "btrfs".to_string(),
            options: "defaults,subvol=@rootfs".to_string(),
        };
        let snapshots = root.nested(".snapshots", "defaults,subvol=@snapshots".to_string());
        assert_eq!(snapshots.mount_path, "/.snapshots");
        assert_eq!(snapshots.source, root.source);

        let data = MountRecord {
            mount_path: "/srv".to_string(),
            ..root
        };
        assert_eq!(data.nested(".snapshots", String::new()).mount_path, "/srv/.snapshots");
    }
}
