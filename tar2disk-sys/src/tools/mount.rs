// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use tracing::warn;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

/// `mkdir -p` as root
pub fn make_dir_all(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(&Invocation::admin("mkdir").arg("-p").arg(path.to_string_lossy()))?;
    Ok(())
}

pub fn mount(
    runner: &dyn CommandRunner,
    source: &str,
    target: &Path,
    fs_type: &str,
    options: &str,
) -> Result<()> {
    runner.run(
        &Invocation::admin("mount")
            .args(["-t", fs_type, "-o", options, source])
            .arg(target.to_string_lossy()),
    )?;
    Ok(())
}

/// Flush the filesystem mounted at `target`, non-fatal
pub fn sync_filesystem(runner: &dyn CommandRunner, target: &Path) {
    let path = target.join(".");
    if let Err(error) = runner.run(&Invocation::admin("sync").arg("-f").arg(path.to_string_lossy()))
    {
        warn!(path = %target.display(), %error, "sync failed, continuing");
    }
}

pub fn unmount(runner: &dyn CommandRunner, target: &Path) -> Result<()> {
    runner.run(&Invocation::admin("umount").arg(target.to_string_lossy()))?;
    Ok(())
}

pub fn is_mountpoint(runner: &dyn CommandRunner, target: &Path) -> Result<bool> {
    runner.succeeds(&Invocation::admin("mountpoint").arg("-q").arg(target.to_string_lossy()))
}
