// SPDX-License-Identifier: GPL-3.0-only

//! Orchestrator
//!
//! One [`Provisioner::run`] owns one [`DeviceJournal`]. Whatever happens
//! while the stack is built, the journal is unwound before `run` returns, and
//! only a clean unwind after a successful build packages the image.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use tar2disk_sys::tools::{archive, disk, luks, lvm, mdadm, mount};
use tar2disk_sys::{BASE_TOOLS, ChrootEnv, CommandRunner, DeviceJournal, ensure_tools};
use tar2disk_types::{
    BootStyle, DiskLayout, DiskPlan, FilesystemKind, PartitionRole, RaidSpec, plan_layout,
};
use tracing::{debug, info};

use crate::artifacts::{self, ArrayMapping};
use crate::chroot;
use crate::config::{IMAGE_FILE_NAME, ProvisionOptions};
use crate::error::{ProvisionError, Result};
use crate::initializer::{DiskDevices, FstabEntry, VolumeInitializer};
use crate::signals;

const BIOS_BOOT_FILES: &[&str] = &["/boot/grub/grub.cfg"];
const UEFI_BOOT_FILES: &[&str] = &[
    "/boot/grub/grub.cfg",
    "/boot/efi/EFI/boot/grub.cfg",
    "/boot/efi/EFI/debian/grub.cfg",
];

/// What a run built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub layout: DiskLayout,
    pub loop_device: String,
    pub arrays: Vec<ArrayMapping>,
    pub fstab: Vec<FstabEntry>,
    pub snapper: bool,
    /// Packaged image, set once the stack is unwound cleanly
    pub package: Option<PathBuf>,
}

/// Tools a run of `plan` calls on the host
pub fn required_tools(plan: &DiskPlan, needs_sudo: bool) -> Vec<&'static str> {
    let mut tools = BASE_TOOLS.to_vec();
    let enabled = || plan.volumes.iter().filter(|volume| volume.enabled);

    if enabled().any(|volume| volume.filesystem == FilesystemKind::Btrfs) {
        tools.extend(["mkfs.btrfs", "btrfs"]);
    }
    if enabled().any(|volume| volume.filesystem == FilesystemKind::Vfat) {
        tools.push("mkfs.vfat");
    }
    if enabled().any(|volume| volume.filesystem == FilesystemKind::Swap) {
        tools.push("mkswap");
    }
    if plan.has_raid() {
        tools.push("mdadm");
    }
    if plan.encryption.enabled {
        tools.push("cryptsetup");
    }
    if needs_sudo {
        tools.push("sudo");
    }
    tools
}

pub struct Provisioner<'a> {
    runner: &'a dyn CommandRunner,
    plan: &'a DiskPlan,
    options: &'a ProvisionOptions,
    interrupt: &'a AtomicBool,
    env: ChrootEnv,
    needs_sudo: bool,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        plan: &'a DiskPlan,
        options: &'a ProvisionOptions,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Self {
            runner,
            plan,
            options,
            interrupt,
            env: ChrootEnv::default(),
            needs_sudo: !tar2disk_sys::is_root(),
        }
    }

    /// Environment for commands run inside the tree
    pub fn with_env(mut self, env: ChrootEnv) -> Self {
        self.env = env;
        self
    }

    fn checkpoint(&self) -> Result<()> {
        signals::check(self.interrupt)
    }

    /// Plan, build, unwind and package
    pub fn run(&self) -> Result<ProvisionReport> {
        self.options.validate()?;
        self.plan.validate()?;
        let layout = plan_layout(self.plan)?;
        debug!(script = %layout.render_script(), "partition layout");

        if !self.options.dry_run {
            ensure_tools(&required_tools(self.plan, self.needs_sudo))?;
        }
        self.checkpoint()?;

        let mut journal = DeviceJournal::new(self.runner);
        let mut built = self.build(&mut journal, layout);
        let unwound = journal.unwind();

        // A signal also kills the running child, whose failure then surfaces first.
        if self.checkpoint().is_err() {
            if let Err(error) = &built {
                debug!(%error, "step failed after interrupt");
            }
            built = Err(ProvisionError::Interrupted);
        }

        let mut report = match (built, unwound) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(failures)) => {
                return Err(ProvisionError::Unwind {
                    cause: None,
                    failures,
                });
            }
            (Err(error), Ok(())) => return Err(error),
            (Err(error), Err(failures)) => {
                return Err(ProvisionError::Unwind {
                    cause: Some(Box::new(error)),
                    failures,
                });
            }
        };

        report.package = Some(self.package()?);
        Ok(report)
    }

    fn build(&self, journal: &mut DeviceJournal<'_>, layout: DiskLayout) -> Result<ProvisionReport> {
        let runner = self.runner;
        let plan = self.plan;
        let mount_root = self.options.mount_root.as_path();
        let image = self.options.image_path();

        info!(image = %image.display(), size = %plan.root_disk_size, "creating disk image");
        disk::create_output_dir(runner, &self.options.outdir)?;
        mount::make_dir_all(runner, mount_root)?;
        disk::create_sparse_image(runner, &image, &plan.root_disk_size)?;
        disk::write_partition_table(runner, &image, &layout.render_script())?;
        self.checkpoint()?;

        let loop_device = journal.open_loop_device(&image)?;
        let partition = |role| layout.partition_device(&loop_device, role);
        let mut boot_device = partition(PartitionRole::Boot).ok_or_else(|| missing_partition("boot"))?;
        let mut pv_device = partition(PartitionRole::PhysicalVolume)
            .ok_or_else(|| missing_partition("physical volume"))?;
        self.checkpoint()?;

        let mut arrays = Vec::new();
        if plan.boot_raid.enabled {
            boot_device = self.create_array(journal, &plan.boot_raid, &boot_device, &mut arrays)?;
            self.checkpoint()?;
        }
        if plan.pv_raid.enabled {
            pv_device = self.create_array(journal, &plan.pv_raid, &pv_device, &mut arrays)?;
            self.checkpoint()?;
        }

        if plan.encryption.enabled {
            let encryption = &plan.encryption;
            info!(device = %pv_device, name = %encryption.mapper_name, "encrypting physical volume");
            luks::format(runner, encryption, &pv_device)?;
            pv_device = journal.open_encrypted_volume(
                &pv_device,
                &encryption.mapper_name,
                &encryption.passphrase,
            )?;
            self.checkpoint()?;
        }

        info!(vg = %plan.volume_group_name, pv = %pv_device, "creating volume group");
        lvm::create_physical_volume(runner, &pv_device)?;
        lvm::create_volume_group(runner, &plan.volume_group_name, &pv_device)?;
        journal.open_volume_group(&plan.volume_group_name)?;
        self.checkpoint()?;

        let disks = DiskDevices {
            boot: boot_device,
            esp: partition(PartitionRole::Esp),
            swap: partition(PartitionRole::Swap),
        };
        let mut initializer = VolumeInitializer::new(journal, mount_root);
        initializer.initialize_plan(plan, &disks)?;
        let fstab = initializer.into_entries();
        self.checkpoint()?;

        info!(archive = %self.options.archive.display(), "unpacking root filesystem");
        archive::unpack(runner, &self.options.archive, mount_root)?;
        self.checkpoint()?;

        chroot::mount_system(journal, mount_root)?;
        self.checkpoint()?;

        artifacts::write_mdadm_conf(runner, mount_root, &arrays)?;
        artifacts::write_crypttab(runner, mount_root, &[&plan.encryption])?;
        artifacts::write_fstab(runner, mount_root, &fstab)?;
        self.rewrite_boot_files()?;
        self.checkpoint()?;

        chroot::update_initramfs(runner, &self.env, mount_root)?;
        self.checkpoint()?;
        chroot::install_bootloader(runner, &self.env, mount_root, plan.boot_style, &loop_device)?;
        self.checkpoint()?;
        let snapper = chroot::setup_snapper(runner, &self.env, mount_root, plan)?;
        self.checkpoint()?;

        if self.options.exec_chroot {
            chroot::spawn_shell(runner, &self.env, mount_root)?;
            self.checkpoint()?;
        }

        Ok(ProvisionReport {
            layout,
            loop_device,
            arrays,
            fstab,
            snapper,
            package: None,
        })
    }

    fn create_array(
        &self,
        journal: &mut DeviceJournal<'_>,
        raid: &RaidSpec,
        device: &str,
        arrays: &mut Vec<ArrayMapping>,
    ) -> Result<String> {
        info!(device, name = %raid.name, "creating RAID1 array");
        let array = mdadm::create_raid1(self.runner, raid, device)?;
        journal.register_externally_started_array(&array)?;
        arrays.push(ArrayMapping {
            build_time: array.clone(),
            target: raid.target_device(),
        });
        Ok(array)
    }

    fn rewrite_boot_files(&self) -> Result<()> {
        let uuid_of = |name: &str| {
            self.plan
                .volume(name)
                .map(|volume| volume.fs_uuid.as_str())
                .ok_or_else(|| ProvisionError::Artifact {
                    file: "boot files".to_string(),
                    reason: format!("no {name} volume"),
                })
        };
        let vars = [("BOOT_FS_UUID", uuid_of("boot")?), ("ROOT_FS_UUID", uuid_of("root")?)];
        let boot_files = match self.plan.boot_style {
            BootStyle::Bios => BIOS_BOOT_FILES,
            BootStyle::Uefi => UEFI_BOOT_FILES,
        };
        artifacts::rewrite_boot_files(self.runner, &self.options.mount_root, boot_files, &vars)
    }

    fn package(&self) -> Result<PathBuf> {
        let package = self.options.package_path();
        info!(package = %package.display(), "packaging disk image");
        archive::package(
            self.runner,
            &package,
            &self.options.outdir,
            &[IMAGE_FILE_NAME.to_string()],
        )?;
        disk::remove_image(self.runner, &self.options.image_path())?;
        Ok(package)
    }
}

fn missing_partition(what: &str) -> ProvisionError {
    ProvisionError::Artifact {
        file: "partition table".to_string(),
        reason: format!("layout has no {what} partition"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tar2disk_sys::{CommandOutcome, Invocation, RecordingRunner};
    use tar2disk_types::default_plan;

    fn options() -> ProvisionOptions {
        ProvisionOptions {
            outdir: PathBuf::from("/out"),
            dry_run: true,
            ..ProvisionOptions::new("/in/rootfs.tar.zst")
        }
    }

    #[test]
    fn required_tools_follow_the_plan() {
        let bios = default_plan(BootStyle::Bios).unwrap();
        let tools = required_tools(&bios, false);
        assert!(tools.contains(&"mkfs.btrfs"));
        assert!(!tools.contains(&"mkfs.vfat"));
        assert!(!tools.contains(&"mkswap"));
        assert!(!tools.contains(&"mdadm"));
        assert!(!tools.contains(&"sudo"));

        let uefi = default_plan(BootStyle::Uefi).unwrap();
        let tools = required_tools(&uefi, true);
        assert!(tools.contains(&"mkfs.vfat"));
        assert!(tools.contains(&"sudo"));
    }

    #[test]
    fn interrupt_before_build_touches_nothing() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        let options = options();
        let runner = RecordingRunner::dry_run();
        let interrupt = AtomicBool::new(true);

        let error = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap_err();
        assert!(error.is_interrupt());
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn failure_mid_build_unwinds_and_skips_packaging() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        let options = options();
        let runner = RecordingRunner::dry_run().fail("tar -xap");
        let interrupt = AtomicBool::new(false);

        let error = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap_err();
        assert!(matches!(error, ProvisionError::Sys(_)));
        assert!(!interrupt.load(Ordering::SeqCst));

        assert!(runner.position("losetup --detach /dev/loop0").is_some());
        assert!(runner.position("vgchange -a n vg0").is_some());
        assert!(runner.matching("tar -c").is_empty());
        assert!(runner.matching("rm -- ").is_empty());
    }

    /// Fails `tar` the way a child killed by SIGINT does, raising the flag first
    struct SignalledRunner<'a> {
        inner: RecordingRunner,
        interrupt: &'a AtomicBool,
    }

    impl CommandRunner for SignalledRunner<'_> {
        fn run(&self, invocation: &Invocation) -> tar2disk_sys::Result<CommandOutcome> {
            if invocation.program() == "tar" {
                self.interrupt.store(true, Ordering::SeqCst);
            }
            self.inner.run(invocation)
        }
    }

    #[test]
    fn signal_during_child_is_reported_as_interrupt() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        let options = options();
        let interrupt = AtomicBool::new(false);
        let runner = SignalledRunner {
            inner: RecordingRunner::dry_run().fail("tar -xap"),
            interrupt: &interrupt,
        };

        let error = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap_err();
        assert!(matches!(error, ProvisionError::Interrupted));
        assert!(runner.inner.position("losetup --detach /dev/loop0").is_some());
        assert!(runner.inner.matching("tar -c").is_empty());
    }

    #[test]
    fn signal_during_child_stays_the_cause_of_a_failed_unwind() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        let options = options();
        let interrupt = AtomicBool::new(false);
        let runner = SignalledRunner {
            inner: RecordingRunner::dry_run().fail("tar -xap").fail("vgchange -a n"),
            interrupt: &interrupt,
        };

        let error = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap_err();
        assert!(error.is_interrupt());
        match error {
            ProvisionError::Unwind {
                cause: Some(cause),
                failures,
            } => {
                assert!(matches!(*cause, ProvisionError::Interrupted));
                assert_eq!(failures.failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn raid_and_luks_stack_up_and_unwind_in_order() {
        let mut plan = default_plan(BootStyle::Bios).unwrap();
        plan.boot_raid.enabled = true;
        plan.pv_raid.enabled = true;
        plan.encryption.enabled = true;
        let options = options();
        let runner = RecordingRunner::dry_run()
            .respond(
                "mdadm --detail --scan",
                "ARRAY /dev/md/dbuild_0 metadata=1.2 UUID=a\nARRAY /dev/md/dbuild_1 metadata=1.2 UUID=b\n",
            );
        let interrupt = AtomicBool::new(false);

        let report = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap();
        assert_eq!(
            report.arrays,
            [
                ArrayMapping {
                    build_time: "/dev/md/dbuild_0".to_string(),
                    target: "/dev/md/0".to_string(),
                },
                ArrayMapping {
                    build_time: "/dev/md/dbuild_1".to_string(),
                    target: "/dev/md/1".to_string(),
                },
            ]
        );

        assert!(runner.position("mdadm --create /dev/md/dbuild_0").is_some());
        assert!(runner
            .matching("mdadm --create /dev/md/dbuild_0")[0]
            .ends_with(" /dev/loop0p1"));
        assert!(runner
            .matching("cryptsetup --type luks2")[0]
            .ends_with("luksFormat /dev/md/dbuild_1"));
        assert_eq!(runner.matching("pvcreate"), ["pvcreate /dev/mapper/root_pv_crypt"]);

        let vg_off = runner.position("vgchange -a n").unwrap();
        let luks_close = runner.position("cryptsetup luksClose").unwrap();
        let stop_pv = runner.position("mdadm --stop /dev/md/dbuild_1").unwrap();
        let stop_boot = runner.position("mdadm --stop /dev/md/dbuild_0").unwrap();
        let detach = runner.position("losetup --detach").unwrap();
        assert!(vg_off < luks_close && luks_close < stop_pv && stop_pv < stop_boot && stop_boot < detach);
        assert!(runner.position("mkdir -p /mnt/dbuild/etc/mdadm").is_some());
        assert_eq!(report.package, Some(PathBuf::from("/out/dbuild-image.tar.zst")));
    }

    #[test]
    fn unwind_failure_after_success_blocks_packaging() {
        let plan = default_plan(BootStyle::Bios).unwrap();
        let options = options();
        let runner = RecordingRunner::dry_run().fail("vgchange -a n");
        let interrupt = AtomicBool::new(false);

        let error = Provisioner::new(&runner, &plan, &options, &interrupt)
            .run()
            .unwrap_err();
        match error {
            ProvisionError::Unwind { cause, failures } => {
                assert!(cause.is_none());
                assert_eq!(failures.failures.len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(runner.matching("tar -c").is_empty());
        assert!(runner.position("losetup --detach /dev/loop0").is_some());
    }
}
