// SPDX-License-Identifier: GPL-3.0-only

//! Steps run inside the unpacked tree

use std::path::Path;

use tar2disk_sys::tools::{btrfs, files};
use tar2disk_sys::{ChrootEnv, CommandRunner, DeviceJournal};
use tar2disk_types::{BootStyle, DiskPlan, FilesystemKind};
use tracing::{info, warn};

use crate::error::Result;
use crate::initializer::SNAPSHOTS_DIR;

/// A pseudo filesystem the chroot needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemMount {
    pub source: &'static str,
    pub path: &'static str,
    pub fs_type: &'static str,
    pub options: &'static str,
}

const fn system_mount(
    source: &'static str,
    path: &'static str,
    fs_type: &'static str,
    options: &'static str,
) -> SystemMount {
    SystemMount {
        source,
        path,
        fs_type,
        options,
    }
}

/// Mounted in this order; never recorded in fstab
pub const SYSTEM_MOUNTS: &[SystemMount] = &[
    system_mount("proc", "proc", "proc", "rw,nosuid,nodev,noexec,relatime"),
    system_mount("sys", "sys", "sysfs", "rw,nosuid,nodev,noexec,relatime"),
    system_mount("/dev", "dev", "none", "bind"),
    system_mount(
        "devpts",
        "dev/pts",
        "devpts",
        "rw,nosuid,noexec,relatime,gid=5,mode=620,ptmxmode=000,newinstance",
    ),
    system_mount("shm", "dev/shm", "tmpfs", "rw,mode=1777,nosuid,nodev"),
    system_mount("vtmp", "var/tmp", "tmpfs", "rw,mode=1777"),
    system_mount("tmp", "tmp", "tmpfs", "rw,mode=1777"),
    system_mount("tmpfs", "run", "tmpfs", "rw,mode=0755,nosuid,nodev,noexec"),
    system_mount("tmpfs", "run/lock", "tmpfs", "rw,mode=1777,nosuid,nodev,noexec"),
];

const SNAPPER_DIRS: &[&str] = &["usr/bin", "usr/sbin", "bin", "sbin"];

pub fn mount_system(journal: &mut DeviceJournal<'_>, mount_root: &Path) -> Result<()> {
    for mount in SYSTEM_MOUNTS {
        journal.open_mount(
            mount_root,
            mount.source,
            Some(mount.path),
            Some(mount.fs_type),
            mount.options,
        )?;
    }
    Ok(())
}

pub fn update_initramfs(runner: &dyn CommandRunner, env: &ChrootEnv, root: &Path) -> Result<()> {
    info!("updating initramfs");
    let env = env.clone().with("INITRAMFS_FIRSTBOOT", "y");
    runner.run(&env.invocation(root, "update-initramfs", ["-u", "-k", "all"]))?;
    Ok(())
}

/// BIOS images get GRUB in the MBR of `disk_device`; UEFI images ship their loader
pub fn install_bootloader(
    runner: &dyn CommandRunner,
    env: &ChrootEnv,
    root: &Path,
    boot_style: BootStyle,
    disk_device: &str,
) -> Result<()> {
    match boot_style {
        BootStyle::Bios => {
            info!(device = disk_device, "installing grub (BIOS)");
            runner.run(&env.invocation(
                root,
                "grub-install",
                [
                    "--no-nvram",
                    "--skip-fs-probe",
                    "--target=i386-pc",
                    "--boot-directory=/boot",
                    disk_device,
                ],
            ))?;
        }
        BootStyle::Uefi => {}
    }
    Ok(())
}

pub fn has_snapper(runner: &dyn CommandRunner, root: &Path) -> Result<bool> {
    for dir in SNAPPER_DIRS {
        if files::exists(runner, &root.join(dir).join("snapper"))? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Hand the root volume's `.snapshots` over to snapper
///
/// Returns whether snapper was configured. Skipped when disabled, when the
/// root volume is not BTRFS, or when the tree has no `snapper`.
pub fn setup_snapper(
    runner: &dyn CommandRunner,
    env: &ChrootEnv,
    root: &Path,
    plan: &DiskPlan,
) -> Result<bool> {
    if !plan.snapper {
        return Ok(false);
    }
    let Some(volume) = plan
        .root_volume()
        .filter(|volume| volume.filesystem == FilesystemKind::Btrfs)
    else {
        return Ok(false);
    };
    if !has_snapper(runner, root)? {
        warn!("snapper not found in the tree, skipping snapper setup");
        return Ok(false);
    }

    let mount_path = volume.mount_path.as_deref().unwrap_or("/");
    let snapshots = root
        .join(mount_path.trim_start_matches('/'))
        .join(SNAPSHOTS_DIR);

    info!(volume = %volume.name, "configuring snapper");
    files::remove_dir(runner, &snapshots)?;
    runner.run(&env.invocation(
        root,
        "snapper",
        [
            "--no-dbus",
            "-c",
            volume.name.as_str(),
            "create-config",
            "--fstype",
            "btrfs",
            mount_path,
        ],
    ))?;
    btrfs::delete_subvolume(runner, &snapshots)?;
    files::make_private_dir(runner, &snapshots)?;
    Ok(true)
}

/// Interactive shell inside the tree, attached to the terminal
pub fn spawn_shell(runner: &dyn CommandRunner, env: &ChrootEnv, root: &Path) -> Result<()> {
    info!("spawning chroot shell");
    runner.run(&env.invocation(root, "/bin/bash", ["-i"]).interactive())?;
    Ok(())
}
