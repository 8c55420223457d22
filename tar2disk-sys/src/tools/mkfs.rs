// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem creation, UUID and label are always passed through

use tar2disk_types::{FilesystemKind, VolumeSpec};

use crate::cmd::{CommandRunner, Invocation};
use crate::error::{Result, SysError};

const EXT4_EXTENDED_OPTIONS: &str = "lazy_itable_init=0,lazy_journal_init=0,discard";

/// Format `device` for `volume`
pub fn format_volume(runner: &dyn CommandRunner, volume: &VolumeSpec, device: &str) -> Result<()> {
    let label = volume.label.as_str();
    let uuid = volume.fs_uuid.as_str();

    let invocation = match volume.filesystem {
        FilesystemKind::Ext4 => {
            let on_error = if volume.is_root { "remount-ro" } else { "continue" };
            Invocation::admin("mkfs.ext4").args([
                "-e",
                on_error,
                "-E",
                EXT4_EXTENDED_OPTIONS,
                "-L",
                label,
                "-U",
                uuid,
                device,
            ])
        }
        FilesystemKind::Btrfs => {
            Invocation::admin("mkfs.btrfs").args(["-L", label, "-U", uuid, device])
        }
        FilesystemKind::Vfat => {
            let volume_id = volume.volume_id.as_deref().ok_or_else(|| {
                SysError::OperationFailed(format!("vfat volume {} has no volume id", volume.name))
            })?;
            Invocation::admin("mkfs.vfat").args(["-F", "32", "-n", label, "-i", volume_id, device])
        }
        FilesystemKind::Swap => Invocation::admin("mkswap").args(["-L", label, "-U", uuid, device]),
    };

    runner.run(&invocation)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    fn volume(name: &str, filesystem: FilesystemKind, fs_uuid: &str) -> VolumeSpec {
        VolumeSpec {
            name: name.to_string(),
            order: 0,
            enabled: true,
            label: name.to_uppercase(),
            size: "1G".to_string(),
            filesystem,
            mount_path: None,
            mount_options: Vec::new(),
            fs_uuid: fs_uuid.to_string(),
            volume_id: None,
            compression: None,
            is_logical_volume: false,
            is_root: name == "root",
        }
    }

    #[test]
    fn ext4_error_behavior_depends_on_root() {
        let runner = RecordingRunner::new();
        format_volume(&runner, &volume("root", FilesystemKind::Ext4, "u1"), "/dev/a").unwrap();
        format_volume(&runner, &volume("boot", FilesystemKind::Ext4, "u2"), "/dev/b").unwrap();
        let commands = runner.commands();
        assert!(commands[0].starts_with("mkfs.ext4 -e remount-ro -E lazy_itable_init=0"));
        assert!(commands[1].starts_with("mkfs.ext4 -e continue "));
        assert!(commands[1].ends_with("-L BOOT -U u2 /dev/b"));
    }

    #[test]
    fn vfat_uses_volume_id() {
        let runner = RecordingRunner::new();
        let mut esp = volume("esp", FilesystemKind::Vfat, "3971-47A6");
        assert!(format_volume(&runner, &esp, "/dev/loop0p1").is_err());

        esp.volume_id = Some("397147A6".to_string());
        format_volume(&runner, &esp, "/dev/loop0p1").unwrap();
        assert_eq!(
            runner.commands(),
            ["mkfs.vfat -F 32 -n ESP -i 397147A6 /dev/loop0p1"]
        );
    }

    #[test]
    fn swap_uses_mkswap() {
        let runner = RecordingRunner::new();
        format_volume(&runner, &volume("swap", FilesystemKind::Swap, "u3"), "/dev/loop0p2")
            .unwrap();
        assert_eq!(runner.commands(), ["mkswap -L SWAP -U u3 /dev/loop0p2"]);
    }
}
