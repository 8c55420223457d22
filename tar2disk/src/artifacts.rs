// SPDX-License-Identifier: GPL-3.0-only

//! fstab, crypttab and mdadm.conf for the provisioned tree, plus the
//! `@@VAR@@` rewrite of boot files

use std::path::Path;

use tar2disk_sys::CommandRunner;
use tar2disk_sys::tools::files;
use tar2disk_sys::tools::mdadm::{self, ScanLine};
use tar2disk_types::EncryptionSpec;
use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::initializer::FstabEntry;

pub const FSTAB_PATH: &str = "etc/fstab";
pub const CRYPTTAB_PATH: &str = "etc/crypttab";
pub const MDADM_CONF_DIR: &str = "etc/mdadm";
pub const MDADM_CONF_PATH: &str = "etc/mdadm/mdadm.conf";

const MDADM_CONF_HEADER: &[&str] = &[
    "# mdadm.conf",
    "#",
    "# !NB! Run update-initramfs -u after updating this file.",
    "# !NB! This will ensure that initramfs has an uptodate copy.",
    "#",
    "# Please refer to mdadm.conf(5) for information about this file.",
    "#",
    "",
    "# by default (built-in), scan all partitions (/proc/partitions) and all",
    "# containers for MD superblocks. alternatively, specify devices to scan,",
    "# using wildcards if desired.",
    "#DEVICE partitions containers",
    "",
    "# automatically tag new arrays as belonging to the local system",
    "HOMEHOST <system>",
    "",
    "# instruct the monitoring daemon where to send mail alerts",
    "MAILADDR root",
    "",
    "# definitions of existing MD arrays",
    "",
];

/// A build-time array device and the name it gets in the deployed system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayMapping {
    pub build_time: String,
    pub target: String,
}

fn to_text(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// fsck pass: only ext4 is checked, root first
pub fn pass_number(entry: &FstabEntry) -> u8 {
    if entry.record.fs_type != "ext4" {
        0
    } else if entry.is_root {
        1
    } else {
        2
    }
}

pub fn fstab_line(entry: &FstabEntry) -> String {
    let source = if entry.is_logical_volume {
        entry.record.source.clone()
    } else {
        format!("UUID={}", entry.fs_uuid)
    };
    format!(
        "{} {} {} {} 0 {}",
        source,
        entry.record.mount_path,
        entry.record.fs_type,
        entry.record.options,
        pass_number(entry)
    )
}

/// Generated entries, then whatever `existing` had after its leading
/// comments and blank lines
pub fn render_fstab(entries: &[FstabEntry], existing: Option<&str>) -> String {
    let mut lines: Vec<String> = entries.iter().map(fstab_line).collect();

    if let Some(existing) = existing {
        let mut kept = existing
            .lines()
            .map(str::trim_end)
            .skip_while(|line| line.is_empty() || line.starts_with('#'))
            .peekable();
        if kept.peek().is_some() {
            lines.push(String::new());
            lines.extend(kept.map(str::to_string));
        }
    }
    to_text(&lines)
}

/// One line per enabled encryption layer; `None` when nothing is encrypted
pub fn render_crypttab(specs: &[&EncryptionSpec]) -> Option<String> {
    let lines: Vec<String> = specs
        .iter()
        .filter(|spec| spec.enabled)
        .map(|spec| {
            format!(
                "{} UUID={} none luks,discard",
                spec.mapper_name, spec.volume_uuid
            )
        })
        .collect();
    (!lines.is_empty()).then(|| to_text(&lines))
}

/// Header plus `mdadm --detail --scan` output with build-time devices renamed
pub fn render_mdadm_conf(scan_output: &str, arrays: &[ArrayMapping]) -> Result<String> {
    let mut lines: Vec<String> = MDADM_CONF_HEADER.iter().map(|line| line.to_string()).collect();

    for line in mdadm::parse_scan(scan_output) {
        match line {
            ScanLine::Array { device, fields } => {
                let mapping = arrays
                    .iter()
                    .find(|mapping| mapping.build_time == device)
                    .ok_or_else(|| ProvisionError::Artifact {
                        file: MDADM_CONF_PATH.to_string(),
                        reason: format!("unknown array in scan output: {device}"),
                    })?;
                let mut words = vec!["ARRAY".to_string(), mapping.target.clone()];
                words.extend(fields);
                lines.push(words.join(" "));
            }
            ScanLine::Other(line) if line.trim().is_empty() => {}
            ScanLine::Other(line) => lines.push(line),
        }
    }
    Ok(to_text(&lines))
}

/// Replace `@@NAME@@` for each `(NAME, value)`; the result ends with a newline
pub fn rewrite_vars(text: &str, vars: &[(&str, &str)]) -> String {
    let mut rewritten = text.to_string();
    for (name, value) in vars {
        rewritten = rewritten.replace(&format!("@@{name}@@"), value);
    }
    if !rewritten.ends_with('\n') {
        rewritten.push('\n');
    }
    rewritten
}

pub fn write_fstab(runner: &dyn CommandRunner, mount_root: &Path, entries: &[FstabEntry]) -> Result<()> {
    let path = mount_root.join(FSTAB_PATH);
    let existing = if files::exists(runner, &path)? {
        Some(files::read_file(runner, &path)?)
    } else {
        None
    };
    info!(entries = entries.len(), path = %path.display(), "writing fstab");
    files::install_file(runner, &path, &render_fstab(entries, existing.as_deref()))?;
    Ok(())
}

pub fn write_crypttab(runner: &dyn CommandRunner, mount_root: &Path, specs: &[&EncryptionSpec]) -> Result<()> {
    if let Some(text) = render_crypttab(specs) {
        let path = mount_root.join(CRYPTTAB_PATH);
        info!(path = %path.display(), "writing crypttab");
        files::install_file(runner, &path, &text)?;
    }
    Ok(())
}

pub fn write_mdadm_conf(runner: &dyn CommandRunner, mount_root: &Path, arrays: &[ArrayMapping]) -> Result<()> {
    if arrays.is_empty() {
        return Ok(());
    }
    let build_time: Vec<String> = arrays.iter().map(|mapping| mapping.build_time.clone()).collect();
    let scan = mdadm::detail_scan(runner, &build_time)?;
    let text = render_mdadm_conf(&scan, arrays)?;

    tar2disk_sys::tools::mount::make_dir_all(runner, &mount_root.join(MDADM_CONF_DIR))?;
    let path = mount_root.join(MDADM_CONF_PATH);
    info!(arrays = arrays.len(), path = %path.display(), "writing mdadm.conf");
    files::install_file(runner, &path, &text)?;
    Ok(())
}

/// Rewrite `vars` in each boot file below `mount_root`; files are always rewritten
pub fn rewrite_boot_files(
    runner: &dyn CommandRunner,
    mount_root: &Path,
    boot_files: &[&str],
    vars: &[(&str, &str)],
) -> Result<()> {
    for relative in boot_files {
        let path = mount_root.join(relative.trim_start_matches('/'));
        let text = files::read_file(runner, &path)?;
        info!(path = %path.display(), "rewriting boot file");
        files::install_file(runner, &path, &rewrite_vars(&text, vars))?;
    }
    Ok(())
}
