// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

/// Unpack a root filesystem archive into `target`, keeping ownership and xattrs
pub fn unpack(runner: &dyn CommandRunner, archive: &Path, target: &Path) -> Result<()> {
    runner.run(
        &Invocation::admin("tar")
            .args(["-xap", "--xattrs-include=*.*", "--numeric-owner", "-f"])
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(target.to_string_lossy())
            .arg("./"),
    )?;
    Ok(())
}

/// Pack image files from `dir` into a zstd-compressed sparse tarball
pub fn package(
    runner: &dyn CommandRunner,
    tarball: &Path,
    dir: &Path,
    files: &[String],
) -> Result<()> {
    runner.run(
        &Invocation::new("tar")
            .args(["-c", "--zstd", "-f"])
            .arg(tarball.to_string_lossy())
            .arg("--sparse")
            .arg("-C")
            .arg(dir.to_string_lossy())
            .args(files.iter().cloned()),
    )?;
    Ok(())
}
