// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Single-disk RAID1 layer, meant to be extended after deployment
///
/// Applies independently to the boot device and to the volume group's
/// physical volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidSpec {
    pub enabled: bool,

    /// Array UUID passed to `mdadm --create --uuid`
    pub array_uuid: String,

    /// Array name in the deployed system (`/dev/md/<name>`)
    pub name: String,

    /// Array name while provisioning, chosen to not clash with host arrays
    pub build_time_name: String,

    pub homehost: Option<String>,

    /// Superblock metadata version
    pub metadata: Option<String>,
}

impl RaidSpec {
    /// Device path of the array while it is being provisioned
    pub fn build_time_device(&self) -> String {
        format!("/dev/md/{}", self.build_time_name)
    }

    /// Device path of the array in the deployed system
    pub fn target_device(&self) -> String {
        format!("/dev/md/{}", self.name)
    }
}
