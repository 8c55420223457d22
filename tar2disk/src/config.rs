// SPDX-License-Identifier: GPL-3.0-only

//! Run configuration: where the disk plan comes from and where to work

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tar2disk_types::{BootStyle, DiskConfigDocument, DiskPlan, default_plan};
use tracing::debug;

use crate::error::{ProvisionError, Result};

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/dbuild";
pub const IMAGE_FILE_NAME: &str = "root.img";
pub const PACKAGE_FILE_NAME: &str = "dbuild-image.tar.zst";

/// Source of the disk plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskSource {
    /// A TOML or JSON document; `-` reads stdin
    File(PathBuf),
    Builtin(BootStyle),
}

impl DiskSource {
    /// Load, resolve and validate the plan; nothing is touched on disk
    pub fn load(&self) -> Result<DiskPlan> {
        match self {
            Self::Builtin(boot_style) => Ok(default_plan(*boot_style)?),
            Self::File(path) => load_plan_file(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Toml,
    Json,
}

fn detect_format(path: &Path, text: &str) -> DocumentFormat {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some(extension) if extension.eq_ignore_ascii_case("json") => DocumentFormat::Json,
        Some(extension) if extension.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
        _ if text.trim_start().starts_with('{') => DocumentFormat::Json,
        _ => DocumentFormat::Toml,
    }
}

fn read_source(path: &Path) -> Result<String> {
    let read = if path == Path::new("-") {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).map(|_| text)
    } else {
        fs::read_to_string(path)
    };
    read.map_err(|error| ProvisionError::ConfigFile {
        path: path.display().to_string(),
        reason: error.to_string(),
    })
}

pub fn load_plan_file(path: &Path) -> Result<DiskPlan> {
    let text = read_source(path)?;
    parse_plan(path, &text)
}

/// Parse `text` read from `path`, picking the format from the extension
pub fn parse_plan(path: &Path, text: &str) -> Result<DiskPlan> {
    let format = detect_format(path, text);
    debug!(path = %path.display(), ?format, "parsing disk config");
    let document = match format {
        DocumentFormat::Json => DiskConfigDocument::from_json_str(text)?,
        DocumentFormat::Toml => DiskConfigDocument::from_toml_str(text)?,
    };
    Ok(document.into_plan()?)
}

/// Runtime options of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Root filesystem tarball
    pub archive: PathBuf,
    pub outdir: PathBuf,
    /// Staging directory the new tree is mounted at
    pub mount_root: PathBuf,
    /// Drop into an interactive shell inside the tree before unwinding
    pub exec_chroot: bool,
    pub dry_run: bool,
}

impl ProvisionOptions {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            outdir: PathBuf::from("."),
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            exec_chroot: false,
            dry_run: false,
        }
    }

    pub fn image_path(&self) -> PathBuf {
        self.outdir.join(IMAGE_FILE_NAME)
    }

    pub fn package_path(&self) -> PathBuf {
        self.outdir.join(PACKAGE_FILE_NAME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mount_root.as_os_str().is_empty() {
            return Err(ProvisionError::Options(
                "mount root must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
