// SPDX-License-Identifier: GPL-3.0-only

//! Files inside the provisioned tree, which is owned by root

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

/// Install `content` at `destination` as a root-owned 0644 file
///
/// The content is staged in a temporary file first, so only `rm` and
/// `install` need privileges.
pub fn install_file(runner: &dyn CommandRunner, destination: &Path, content: &str) -> Result<()> {
    let mut staged = NamedTempFile::new()?;
    staged.write_all(content.as_bytes())?;
    staged.flush()?;

    let destination = destination.to_string_lossy();
    runner.run(&Invocation::admin("rm").args(["-f", "--"]).arg(destination.clone()))?;
    runner.run(
        &Invocation::admin("install")
            .args(["-m", "0644", "-o", "0", "-g", "0", "--"])
            .arg(staged.path().to_string_lossy())
            .arg(destination),
    )?;
    Ok(())
}

/// Read `path`, falling back to a privileged `cat` when not readable
pub fn read_file(runner: &dyn CommandRunner, path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(error) => {
            debug!(path = %path.display(), %error, "reading through cat");
            let outcome =
                runner.run(&Invocation::admin("cat").arg("--").arg(path.to_string_lossy()))?;
            Ok(outcome.stdout)
        }
    }
}

/// Whether `path` exists, asked through the runner as root
pub fn exists(runner: &dyn CommandRunner, path: &Path) -> Result<bool> {
    runner.succeeds(&Invocation::admin("test").arg("-e").arg(path.to_string_lossy()))
}

/// `mkdir -m 0700`
pub fn make_private_dir(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(
        &Invocation::admin("mkdir")
            .args(["-m", "0700", "--"])
            .arg(path.to_string_lossy()),
    )?;
    Ok(())
}

pub fn make_private(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(
        &Invocation::admin("chmod")
            .args(["--", "0700"])
            .arg(path.to_string_lossy()),
    )?;
    Ok(())
}

pub fn remove_dir(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    runner.run(&Invocation::admin("rmdir").arg("--").arg(path.to_string_lossy()))?;
    Ok(())
}
