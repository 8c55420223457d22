// SPDX-License-Identifier: GPL-3.0-only

use tar2disk_types::RaidSpec;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

/// Create (and thereby start) a single-disk RAID1 array on `device`
///
/// Returns the build-time array device.
pub fn create_raid1(runner: &dyn CommandRunner, spec: &RaidSpec, device: &str) -> Result<String> {
    let array = spec.build_time_device();
    let invocation = Invocation::admin("mdadm").args([
        "--create".to_string(),
        array.clone(),
        "--config=none".to_string(),
        "--auto=yes".to_string(),
        format!("--metadata={}", spec.metadata.as_deref().unwrap_or("default")),
        format!("--homehost={}", spec.homehost.as_deref().unwrap_or("any")),
        format!("--name={}", spec.name),
        format!("--uuid={}", spec.array_uuid),
        "--level=raid1".to_string(),
        "--force".to_string(),
        "--raid-devices=1".to_string(),
        "--assume-clean".to_string(),
        device.to_string(),
    ]);
    runner.run(&invocation)?;
    Ok(array)
}

pub fn stop(runner: &dyn CommandRunner, array: &str) -> Result<()> {
    runner.run(&Invocation::admin("mdadm").args(["--stop", array]))?;
    Ok(())
}

/// `mdadm --detail --scan` output for `arrays`
pub fn detail_scan(runner: &dyn CommandRunner, arrays: &[String]) -> Result<String> {
    let invocation = Invocation::admin("mdadm")
        .args(["--detail", "--scan", "--config=none"])
        .args(arrays.iter().cloned());
    Ok(runner.run(&invocation)?.stdout)
}

/// One non-empty line of scan output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanLine {
    /// `ARRAY <device> <fields...>`
    Array { device: String, fields: Vec<String> },
    Other(String),
}

pub fn parse_scan(output: &str) -> Vec<ScanLine> {
    output
        .trim()
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let first = parts.next()?;
            if first != "ARRAY" {
                return Some(ScanLine::Other(line.to_string()));
            }
            let Some(device) = parts.next() else {
                return Some(ScanLine::Other(line.to_string()));
            };
            Some(ScanLine::Array {
                device: device.to_string(),
                fields: parts.map(str::to_string).collect(),
            })
        })
        .collect()
}
