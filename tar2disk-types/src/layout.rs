// SPDX-License-Identifier: GPL-3.0-only

//! Disk layout planning
//!
//! Turns a [`DiskPlan`] into an ordered partition table and renders it as an
//! `sfdisk` script. Partition numbers start at 1 in layout order; the LVM
//! physical volume is always last and takes the remaining space.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::plan::{BootStyle, DiskPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionRole {
    Esp,
    Boot,
    Swap,
    PhysicalVolume,
}

impl PartitionRole {
    /// `sfdisk` partition type alias
    fn type_alias(&self) -> &'static str {
        match self {
            Self::Esp => "uefi",
            Self::Boot => "linux",
            Self::Swap => "swap",
            Self::PhysicalVolume => "lvm",
        }
    }

    /// GPT partition name
    fn gpt_name(&self) -> &'static str {
        match self {
            Self::Esp => "ESP",
            Self::Boot => "BOOT",
            Self::Swap => "SWAP",
            Self::PhysicalVolume => "SYS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub number: u32,
    pub role: PartitionRole,
    /// `None` takes the remaining space
    pub size: Option<String>,
    /// GPT partition name
    pub name: Option<String>,
    /// MBR active flag
    pub bootable: bool,
}

impl PartitionSpec {
    fn script_line(&self) -> String {
        let mut fields = Vec::with_capacity(4);
        if let Some(size) = &self.size {
            fields.push(format!("size={size}"));
        }
        fields.push(format!("type={}", self.role.type_alias()));
        if let Some(name) = &self.name {
            fields.push(format!("name={name}"));
        }
        if self.bootable {
            fields.push("bootable".to_string());
        }
        fields.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    /// Partition table label line, e.g. "gpt"; `None` keeps the sfdisk default (dos)
    pub label: Option<String>,
    pub partitions: Vec<PartitionSpec>,
}

impl DiskLayout {
    pub fn partition(&self, role: PartitionRole) -> Option<&PartitionSpec> {
        self.partitions
            .iter()
            .find(|partition| partition.role == role)
    }

    /// Partition device node of `role` on `disk_device`
    pub fn partition_device(&self, disk_device: &str, role: PartitionRole) -> Option<String> {
        self.partition(role)
            .map(|partition| partition_device(disk_device, partition.number))
    }

    /// Script fed to `sfdisk` on stdin
    pub fn render_script(&self) -> String {
        let mut script = String::new();
        if let Some(label) = &self.label {
            script.push_str(&format!("label: {label}\n"));
        }
        for partition in &self.partitions {
            script.push_str(&partition.script_line());
            script.push('\n');
        }
        script
    }
}

/// Device node of partition `number` on a loop device, e.g. `/dev/loop0p2`
pub fn partition_device(disk_device: &str, number: u32) -> String {
    format!("{disk_device}p{number}")
}

/// Compute the partition table for `plan`
///
/// Fails before any disk I/O if a volume the boot style needs is missing.
pub fn plan_layout(plan: &DiskPlan) -> Result<DiskLayout> {
    let mut missing_volumes = Vec::new();
    for name in plan.boot_style.mandatory_disk_volumes() {
        if plan.enabled_volume(name).is_none() {
            missing_volumes.push(name.to_string());
        }
    }
    if plan.enabled_volume("root").is_none() {
        missing_volumes.push("root".to_string());
    }
    if !missing_volumes.is_empty() {
        return Err(ConfigError::Invalid {
            missing_volumes,
            problems: Vec::new(),
        });
    }

    let gpt = plan.boot_style == BootStyle::Uefi;
    let mut roles = Vec::with_capacity(4);
    if gpt {
        roles.push(PartitionRole::Esp);
    }
    roles.push(PartitionRole::Boot);
    if plan.enabled_volume("swap").is_some() {
        roles.push(PartitionRole::Swap);
    }
    roles.push(PartitionRole::PhysicalVolume);

    let partitions = roles
        .into_iter()
        .zip(1..)
        .map(|(role, number)| {
            let size = match role {
                PartitionRole::Esp => plan.volume("esp").map(|volume| volume.size.clone()),
                PartitionRole::Boot => plan.volume("boot").map(|volume| volume.size.clone()),
                PartitionRole::Swap => plan.volume("swap").map(|volume| volume.size.clone()),
                PartitionRole::PhysicalVolume => None,
            };
            PartitionSpec {
                number,
                role,
                size,
                name: gpt.then(|| role.gpt_name().to_string()),
                bootable: !gpt && role == PartitionRole::Boot,
            }
        })
        .collect();

    Ok(DiskLayout {
        label: gpt.then(|| "gpt".to_string()),
        partitions,
    })
}
