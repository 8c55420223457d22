// SPDX-License-Identifier: GPL-3.0-only

//! Disk configuration documents
//!
//! A [`DiskConfigDocument`] is what users write (TOML, or JSON as fallback).
//! Every key is optional except the per-volume `name`, `size` and `fstype`;
//! [`DiskConfigDocument::into_plan`] fills in defaults, generates UUIDs and
//! validates the result.

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::encryption::EncryptionSpec;
use crate::error::{ConfigError, Result};
use crate::plan::{BootStyle, DiskPlan};
use crate::raid::RaidSpec;
use crate::volume::{
    FilesystemKind, VolumeSpec, default_mount_options, default_mount_path, generate_fs_uuid,
    is_logical_volume, volume_id_from_uuid,
};

pub const DEFAULT_VOLUME_GROUP: &str = "vg0";
pub const DEFAULT_DISK_SIZE: &str = "10G";
pub const DEFAULT_MAPPER_NAME: &str = "root_pv_crypt";
pub const DEFAULT_LUKS_TYPE: &str = "luks2";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfigDocument {
    pub boot_type: Option<String>,
    pub root_vg_name: Option<String>,
    pub disk_size_root: Option<String>,
    pub snapper: Option<bool>,
    pub boot_raid: Option<RaidDocument>,
    pub root_vg_raid: Option<RaidDocument>,
    pub root_vg_luks: Option<LuksDocument>,
    pub volumes: Vec<VolumeDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RaidDocument {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub name_dbuild: Option<String>,
    pub mdadm_uuid: Option<String>,
    pub homehost: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LuksDocument {
    pub enabled: Option<bool>,
    pub enc_name: Option<String>,
    pub luks_type: Option<String>,
    pub luks_uuid: Option<String>,
    pub passphrase: Option<String>,
    pub hash: Option<String>,
    pub cipher: Option<String>,
    pub key_size: Option<u32>,
    pub integrity: Option<String>,
    pub pbkdf: Option<String>,
}

impl std::fmt::Debug for LuksDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuksDocument")
            .field("enabled", &self.enabled)
            .field("enc_name", &self.enc_name)
            .field("luks_type", &self.luks_type)
            .field("luks_uuid", &self.luks_uuid)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeDocument {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub label: Option<String>,
    pub size: Option<String>,
    pub fstype: Option<String>,
    pub fs_uuid: Option<String>,
    /// Absent: role default. Present but null or empty: not mounted.
    #[serde(deserialize_with = "present")]
    pub mnt_dir: Option<Option<String>>,
    pub mnt_opts: Option<MountOptionsDocument>,
    pub compression: Option<String>,
}

/// `mnt_opts` may be a comma-separated string or a list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MountOptionsDocument {
    One(String),
    Many(Vec<String>),
}

impl MountOptionsDocument {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(options) => options
                .split(',')
                .map(str::trim)
                .filter(|option| !option.is_empty())
                .map(str::to_string)
                .collect(),
            Self::Many(options) => options,
        }
    }
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

impl DiskConfigDocument {
    /// Parse a TOML document; an empty input is an empty document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(text).map_err(|error| ConfigError::Format(error.to_string()))
    }

    /// Parse a JSON document; the top level must be an object
    pub fn from_json_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|error| ConfigError::Format(error.to_string()))?;
        if !value.is_object() {
            return Err(ConfigError::Format("must be an object".to_string()));
        }
        serde_json::from_value(value).map_err(|error| ConfigError::Format(error.to_string()))
    }

    /// Resolve defaults and validate
    pub fn into_plan(self) -> Result<DiskPlan> {
        let boot_style = match self.boot_type.as_deref() {
            Some(value) => value.parse()?,
            None => BootStyle::Bios,
        };

        let mut volumes = Vec::with_capacity(self.volumes.len());
        for (order, document) in self.volumes.into_iter().enumerate() {
            volumes.push(document.into_spec(order)?);
        }

        let plan = DiskPlan {
            boot_style,
            volume_group_name: non_empty(self.root_vg_name)
                .unwrap_or_else(|| DEFAULT_VOLUME_GROUP.to_string()),
            root_disk_size: non_empty(self.disk_size_root)
                .unwrap_or_else(|| DEFAULT_DISK_SIZE.to_string()),
            boot_raid: resolve_raid(self.boot_raid, 0),
            pv_raid: resolve_raid(self.root_vg_raid, 1),
            encryption: resolve_luks(self.root_vg_luks),
            snapper: self.snapper.unwrap_or(true),
            volumes,
        };

        plan.validate()?;
        Ok(plan)
    }
}

fn resolve_raid(document: Option<RaidDocument>, sequence: usize) -> RaidSpec {
    let enabled = document.is_some();
    let document = document.unwrap_or_default();
    let name = non_empty(document.name).unwrap_or_else(|| sequence.to_string());
    RaidSpec {
        enabled: document.enabled.unwrap_or(enabled),
        array_uuid: non_empty(document.mdadm_uuid).unwrap_or_else(|| Uuid::new_v4().to_string()),
        build_time_name: non_empty(document.name_dbuild)
            .unwrap_or_else(|| format!("dbuild_{name}")),
        name,
        homehost: non_empty(document.homehost),
        metadata: non_empty(document.metadata),
    }
}

fn resolve_luks(document: Option<LuksDocument>) -> EncryptionSpec {
    let enabled = document.is_some();
    let document = document.unwrap_or_default();
    EncryptionSpec {
        enabled: document.enabled.unwrap_or(enabled),
        mapper_name: non_empty(document.enc_name)
            .unwrap_or_else(|| DEFAULT_MAPPER_NAME.to_string()),
        volume_uuid: non_empty(document.luks_uuid).unwrap_or_else(|| Uuid::new_v4().to_string()),
        passphrase: document.passphrase.unwrap_or_default(),
        luks_type: non_empty(document.luks_type).unwrap_or_else(|| DEFAULT_LUKS_TYPE.to_string()),
        hash: non_empty(document.hash),
        cipher: non_empty(document.cipher),
        key_size: document.key_size,
        integrity_alg: non_empty(document.integrity),
        pbkdf: non_empty(document.pbkdf),
    }
}

impl VolumeDocument {
    fn into_spec(self, order: usize) -> Result<VolumeSpec> {
        let name = non_empty(self.name).ok_or_else(|| ConfigError::MissingField {
            volume: format!("#{order}"),
            field: "name",
        })?;
        let size = non_empty(self.size).ok_or_else(|| ConfigError::MissingField {
            volume: name.clone(),
            field: "size",
        })?;
        let fstype = non_empty(self.fstype).ok_or_else(|| ConfigError::MissingField {
            volume: name.clone(),
            field: "fstype",
        })?;
        let filesystem: FilesystemKind =
            fstype.parse().map_err(|fstype| ConfigError::Filesystem {
                volume: name.clone(),
                fstype,
            })?;

        let fs_uuid = non_empty(self.fs_uuid).unwrap_or_else(|| generate_fs_uuid(filesystem));
        let volume_id = match filesystem {
            FilesystemKind::Vfat => Some(volume_id_from_uuid(&fs_uuid).ok_or_else(|| {
                ConfigError::volume(&name, format!("VFAT fs_uuid must be XXXX-XXXX: {fs_uuid}"))
            })?),
            _ => None,
        };

        let mount_path = match self.mnt_dir {
            Some(path) => non_empty(path),
            None => default_mount_path(&name, filesystem)
                .ok_or_else(|| ConfigError::volume(&name, "no default mnt_dir for volume"))?,
        };

        let mut mount_options = self
            .mnt_opts
            .map(MountOptionsDocument::into_vec)
            .unwrap_or_default();
        if mount_options.is_empty() {
            mount_options = default_mount_options(&name, filesystem, mount_path.as_deref())?;
        }

        let mut label = non_empty(self.label).unwrap_or_else(|| name.clone());
        if filesystem == FilesystemKind::Vfat {
            label = label.to_uppercase();
        }

        let compression = non_empty(self.compression)
            .filter(|compression| !compression.eq_ignore_ascii_case("none"));

        Ok(VolumeSpec {
            order,
            enabled: self.enabled.unwrap_or(true),
            label,
            size,
            filesystem,
            mount_path,
            mount_options,
            fs_uuid,
            volume_id,
            compression,
            is_logical_volume: is_logical_volume(&name, filesystem),
            is_root: name == "root",
            name,
        })
    }
}
