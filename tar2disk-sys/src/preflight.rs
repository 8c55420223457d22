// SPDX-License-Identifier: GPL-3.0-only

//! Tool availability checks run before any disk is touched

use tracing::debug;
use which::which;

use crate::error::{Result, SysError};

/// Tools every provisioning run needs
pub const BASE_TOOLS: &[&str] = &[
    "truncate",
    "sfdisk",
    "losetup",
    "partx",
    "mount",
    "umount",
    "mountpoint",
    "sync",
    "pvcreate",
    "vgcreate",
    "vgchange",
    "lvcreate",
    "mkfs.ext4",
    "tar",
    "install",
    "test",
    "chroot",
    "env",
];

/// Tools from `tools` that are not on `PATH`, in the given order
pub fn missing_tools<S: AsRef<str>>(tools: &[S]) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for tool in tools {
        let tool = tool.as_ref();
        match which(tool) {
            Ok(path) => debug!(tool, path = %path.display(), "found tool"),
            Err(_) if !missing.iter().any(|known| known == tool) => missing.push(tool.to_string()),
            Err(_) => {}
        }
    }
    missing
}

/// Fail with every missing tool at once
pub fn ensure_tools<S: AsRef<str>>(tools: &[S]) -> Result<()> {
    let missing = missing_tools(tools);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SysError::ToolMissing { tools: missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_all_missing_tools_once() {
        let missing = missing_tools(&[
            "sh",
            "tar2disk-no-such-tool",
            "tar2disk-other-missing",
            "tar2disk-no-such-tool",
        ]);
        assert_eq!(missing, ["tar2disk-no-such-tool", "tar2disk-other-missing"]);
    }

    #[test]
    fn ensure_tools_names_missing_tools() {
        let error = ensure_tools(&["tar2disk-no-such-tool"]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "missing required tools: tar2disk-no-such-tool"
        );
        assert!(ensure_tools::<&str>(&[]).is_ok());
    }
}
