// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use tar2disk_sys::{DeviceJournal, JournalPhase, RecordingRunner, ResourceKind, SysError};

const MOUNT_ROOT: &str = "/mnt/dbuild";

type Step = fn(&mut DeviceJournal<'_>) -> Result<(), SysError>;

fn open_loop(journal: &mut DeviceJournal<'_>) -> Result<(), SysError> {
    journal.open_loop_device(Path::new("/out/root.img")).map(drop)
}

fn open_crypt(journal: &mut DeviceJournal<'_>) -> Result<(), SysError> {
    journal
        .open_encrypted_volume("/dev/loop0p2", "root_pv_crypt", "install")
        .map(drop)
}

fn open_vg(journal: &mut DeviceJournal<'_>) -> Result<(), SysError> {
    journal.open_volume_group("vg0")
}

fn mount_root(journal: &mut DeviceJournal<'_>) -> Result<(), SysError> {
    journal
        .open_mount(
            Path::new(MOUNT_ROOT),
            "/dev/mapper/vg0-root",
            None,
            Some("btrfs"),
            "subvol=@rootfs",
        )
        .map(drop)
}

fn mount_boot(journal: &mut DeviceJournal<'_>) -> Result<(), SysError> {
    journal
        .open_mount(
            Path::new(MOUNT_ROOT),
            "/dev/loop0p1",
            Some("/boot"),
            Some("ext4"),
            "defaults,rw,noatime,nodev,nosuid",
        )
        .map(drop)
}

/// Acquisition steps, the command prefix that makes each fail, and the
/// commands that close what the step opened
fn steps() -> Vec<(Step, &'static str, Vec<&'static str>)> {
    vec![
        (
            open_loop as Step,
            "losetup --show",
            vec!["partx -d /dev/loop0", "losetup --detach /dev/loop0"],
        ),
        (
            open_crypt as Step,
            "cryptsetup --key-file - luksOpen",
            vec!["cryptsetup luksClose root_pv_crypt"],
        ),
        (open_vg as Step, "vgchange -a y", vec!["vgchange -a n vg0"]),
        (
            mount_root as Step,
            "mount -t btrfs",
            vec!["sync -f /mnt/dbuild/.", "umount /mnt/dbuild"],
        ),
        (
            mount_boot as Step,
            "mount -t ext4",
            vec!["sync -f /mnt/dbuild/boot/.", "umount /mnt/dbuild/boot"],
        ),
    ]
}

#[test]
fn failure_at_any_step_closes_exactly_the_earlier_steps_in_reverse() {
    let all = steps();
    for failing in 0..all.len() {
        let runner = RecordingRunner::dry_run().fail(all[failing].1);
        let mut journal = DeviceJournal::new(&runner);

        let mut failed = false;
        for (index, (step, _, _)) in all.iter().enumerate() {
            match step(&mut journal) {
                Ok(()) => assert!(index < failing, "step {index} should have failed"),
                Err(error) => {
                    assert_eq!(index, failing);
                    assert!(error.is_command_failure());
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed);

        let before = runner.commands().len();
        journal.unwind().unwrap();
        let closes = runner.commands().split_off(before);

        let expected: Vec<&str> = all[..failing]
            .iter()
            .rev()
            .flat_map(|(_, _, closes)| closes.iter().copied())
            .collect();
        assert_eq!(closes, expected, "failure at step {failing}");
    }
}

#[test]
fn vg_activation_failure_stops_array_then_detaches_loop() {
    let runner = RecordingRunner::dry_run().fail("vgchange -a y");
    let mut journal = DeviceJournal::new(&runner);

    let loop_device = journal.open_loop_device(Path::new("/out/root.img")).unwrap();
    journal
        .register_externally_started_array("/dev/md/dbuild_1")
        .unwrap();
    assert!(journal.open_volume_group("vg0").is_err());

    let before = runner.commands().len();
    journal.unwind().unwrap();
    let closes = runner.commands().split_off(before);
    assert_eq!(
        closes,
        [
            "mdadm --stop /dev/md/dbuild_1".to_string(),
            format!("partx -d {loop_device}"),
            format!("losetup --detach {loop_device}"),
        ]
    );
    assert!(runner.matching("umount").is_empty());
    assert_eq!(journal.phase(), JournalPhase::Closed);
}

#[test]
fn unwind_reports_every_failed_close_and_keeps_going() {
    let runner = RecordingRunner::dry_run()
        .fail("vgchange -a n")
        .fail("losetup --detach");
    let mut journal = DeviceJournal::new(&runner);
    journal.open_loop_device(Path::new("/out/root.img")).unwrap();
    journal.open_volume_group("vg0").unwrap();
    journal
        .open_mount(Path::new(MOUNT_ROOT), "/dev/mapper/vg0-root", None, Some("ext4"), "")
        .unwrap();

    let error = journal.unwind().unwrap_err();
    let kinds: Vec<ResourceKind> = error
        .failures
        .iter()
        .map(|failure| failure.resource.kind())
        .collect();
    assert_eq!(kinds, [ResourceKind::VolumeGroup, ResourceKind::LoopDevice]);
    assert!(runner.position("umount /mnt/dbuild").is_some());
    assert!(journal.state().is_empty());
}

#[test]
fn explicit_close_removes_entry_from_unwind() {
    let runner = RecordingRunner::dry_run();
    let mut journal = DeviceJournal::new(&runner);
    let (target, _) = journal
        .open_mount(Path::new(MOUNT_ROOT), "/dev/mapper/vg0-root", None, Some("btrfs"), "")
        .unwrap();
    journal.close_mount(&target).unwrap();
    assert!(journal.state().is_empty());

    let before = runner.commands().len();
    journal.unwind().unwrap();
    assert_eq!(runner.commands().len(), before);
}
