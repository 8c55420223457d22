// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

pub fn create_subvolume(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(
        &Invocation::admin("btrfs")
            .args(["subvolume", "create"])
            .arg(path.to_string_lossy()),
    )?;
    Ok(())
}

pub fn delete_subvolume(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(
        &Invocation::admin("btrfs")
            .args(["subvolume", "delete"])
            .arg(path.to_string_lossy()),
    )?;
    Ok(())
}
