// SPDX-License-Identifier: GPL-3.0-only

//! Built-in disk configurations selected with `--bios` / `--uefi`

use crate::config::{DiskConfigDocument, LuksDocument, RaidDocument, VolumeDocument};
use crate::error::Result;
use crate::plan::{BootStyle, DiskPlan};

/// Passphrase of the (disabled) default encryption layer
pub const DEFAULT_PASSPHRASE: &str = "install";

fn volume(name: &str, size: &str, fstype: &str, enabled: bool) -> VolumeDocument {
    VolumeDocument {
        name: Some(name.to_string()),
        enabled: Some(enabled),
        size: Some(size.to_string()),
        fstype: Some(fstype.to_string()),
        ..VolumeDocument::default()
    }
}

fn disabled_raid() -> Option<RaidDocument> {
    Some(RaidDocument {
        enabled: Some(false),
        ..RaidDocument::default()
    })
}

pub fn default_document(boot_style: BootStyle) -> DiskConfigDocument {
    let mut volumes = vec![
        volume("boot", "1G", "ext4", true),
        volume("root", "4G", "btrfs", true),
        volume("swap", "1G", "swap", false),
        volume("log", "1G", "ext4", true),
        volume("apt", "4G", "ext4", false),
    ];
    if boot_style == BootStyle::Uefi {
        volumes.push(volume("esp", "100M", "vfat", true));
    }

    DiskConfigDocument {
        boot_type: Some(boot_style.as_str().to_string()),
        root_vg_name: Some("vg0".to_string()),
        disk_size_root: Some("10G".to_string()),
        snapper: Some(true),
        boot_raid: disabled_raid(),
        root_vg_raid: disabled_raid(),
        root_vg_luks: Some(LuksDocument {
            enabled: Some(false),
            passphrase: Some(DEFAULT_PASSPHRASE.to_string()),
            ..LuksDocument::default()
        }),
        volumes,
    }
}

/// Resolved default plan for `boot_style`
pub fn default_plan(boot_style: BootStyle) -> Result<DiskPlan> {
    default_document(boot_style).into_plan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::volume::FilesystemKind;

    #[test]
    fn bios_default_is_valid() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        assert!(plan.volume("esp").is_none());
        assert!(!plan.volume("swap").unwrap().enabled);

        let groups: Vec<&str> = plan
            .group_volumes()
            .map(|volume| volume.name.as_str())
            .collect();
        assert_eq!(groups, ["root", "log", "apt"]);

        let log = plan.volume("log").unwrap();
        assert_eq!(log.logical_volume_device("vg0"), "/dev/mapper/vg0-log");
        let apt = plan.volume("apt").unwrap();
        assert_eq!(apt.logical_volume_device("vg0"), "/dev/mapper/vg0-apt");
    }

    #[test]
    fn uefi_default_adds_esp() {
        let plan = default_plan(BootStyle::Uefi).unwrap();
        let esp = plan.enabled_volume("esp").unwrap();
        assert_eq!(esp.filesystem, FilesystemKind::Vfat);
        assert_eq!(esp.label, "ESP");
        assert_eq!(esp.mount_path.as_deref(), Some("/boot/efi"));
        assert_eq!(esp.mount_options, ["defaults", "rw", "noatime", "umask=0077"]);
    }

    #[test]
    fn disabling_esp_on_uefi_fails_naming_esp() {
        let mut plan = default_plan(BootStyle::Uefi).unwrap();
        for volume in &mut plan.volumes {
            if volume.name == "esp" {
                volume.enabled = false;
            }
        }
        let error = plan.validate().unwrap_err();
        assert_eq!(error.missing_volumes(), ["esp"]);
    }

    #[test]
    fn enabling_default_encryption_uses_install_passphrase() {
        let mut plan = default_plan(BootStyle::Bios).unwrap();
        plan.encryption.enabled = true;
        assert!(plan.validate().is_ok());
        assert_eq!(plan.encryption.passphrase, DEFAULT_PASSPHRASE);
        assert_eq!(plan.encryption.mapper_device(), "/dev/mapper/root_pv_crypt");

        plan.encryption.passphrase.clear();
        assert!(matches!(plan.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn raid_names_follow_declaration_sequence() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        assert_eq!(plan.boot_raid.build_time_device(), "/dev/md/dbuild_0");
        assert_eq!(plan.pv_raid.target_device(), "/dev/md/1");
    }
}
