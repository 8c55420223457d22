// SPDX-License-Identifier: GPL-3.0-only

//! Image file and partition table

use std::path::Path;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

/// Unprivileged `mkdir -p` for the output directory
pub fn create_output_dir(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(&Invocation::new("mkdir").arg("-p").arg(path.to_string_lossy()))?;
    Ok(())
}

/// Replace `path` with a sparse file of `size`
pub fn create_sparse_image(runner: &dyn CommandRunner, path: &Path, size: &str) -> Result<()> {
    runner.run(&Invocation::new("rm").args(["-f", "--"]).arg(path.to_string_lossy()))?;
    runner.run(
        &Invocation::new("truncate")
            .args(["-s", size])
            .arg(path.to_string_lossy()),
    )?;
    Ok(())
}

/// Write the partition table described by an `sfdisk` script
pub fn write_partition_table(runner: &dyn CommandRunner, image: &Path, script: &str) -> Result<()> {
    runner.run(
        &Invocation::new("sfdisk")
            .arg(image.to_string_lossy())
            .stdin(script),
    )?;
    Ok(())
}

/// Drop the raw image once it has been packaged
pub fn remove_image(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(&Invocation::new("rm").arg("--").arg(path.to_string_lossy()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::RecordingRunner;

    #[test]
    fn image_is_recreated_then_partitioned() {
        let runner = RecordingRunner::new();
        create_sparse_image(&runner, Path::new("/out/root.img"), "10G").unwrap();
        write_partition_table(&runner, Path::new("/out/root.img"), "type=lvm\n").unwrap();
        assert_eq!(
            runner.commands(),
            ["rm -f -- /out/root.img", "truncate -s 10G /out/root.img", "sfdisk /out/root.img"]
        );
    }
}
