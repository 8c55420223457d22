// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use tracing::warn;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::{Result, SysError};

/// Bind `image` to the next free loop device and return its path
pub fn attach(runner: &dyn CommandRunner, image: &Path) -> Result<String> {
    let invocation = Invocation::admin("losetup")
        .args(["--show", "--find"])
        .arg(image.to_string_lossy());
    let outcome = runner.run(&invocation)?;

    let device = outcome.stdout.trim();
    if !device.starts_with("/dev/") {
        return Err(SysError::UnexpectedOutput {
            command: invocation.render(),
            output: outcome.stdout,
        });
    }
    Ok(device.to_string())
}

/// Make the kernel pick up the partitions of `device`, non-fatal
pub fn rescan_partitions(runner: &dyn CommandRunner, device: &str) {
    if let Err(error) = runner.run(&Invocation::admin("partx").args(["-a", device])) {
        warn!(device, %error, "partition rescan failed, continuing");
    }
}

/// Drop the kernel's partitions of `device`, non-fatal
pub fn forget_partitions(runner: &dyn CommandRunner, device: &str) {
    if let Err(error) = runner.run(&Invocation::admin("partx").args(["-d", device])) {
        warn!(device, %error, "partition removal failed, continuing");
    }
}

pub fn detach(runner: &dyn CommandRunner, device: &str) -> Result<()> {
    runner.run(&Invocation::admin("losetup").args(["--detach", device]))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    #[test]
    fn attach_reads_device_from_stdout() {
        let runner = RecordingRunner::dry_run();
        let device = attach(&runner, Path::new("/out/root.img")).unwrap();
        assert_eq!(device, "/dev/loop0");
    }

    #[test]
    fn attach_rejects_empty_output() {
        let runner = RecordingRunner::new();
        assert!(matches!(
            attach(&runner, Path::new("/out/root.img")),
            Err(SysError::UnexpectedOutput { .. })
        ));
    }

    #[test]
    fn partition_table_steps_never_fail() {
        let runner = RecordingRunner::new().fail("partx");
        rescan_partitions(&runner, "/dev/loop0");
        forget_partitions(&runner, "/dev/loop0");
        assert_eq!(runner.commands(), ["partx -a /dev/loop0", "partx -d /dev/loop0"]);
    }
}
