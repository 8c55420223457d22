// SPDX-License-Identifier: GPL-3.0-only

//! Disk and volume model for tar2disk
//!
//! Everything here is pure data: no device is touched and no command is run.
//!
//! - **config**: user-authored documents and their resolution into a plan
//! - **plan** / **volume** / **raid** / **encryption**: the validated model
//! - **layout**: partition table planning
//! - **mount**: mount records that end up in fstab

pub mod config;
pub mod defaults;
pub mod encryption;
pub mod error;
pub mod layout;
pub mod mount;
pub mod plan;
pub mod raid;
pub mod size;
pub mod volume;

pub use config::{DiskConfigDocument, LuksDocument, MountOptionsDocument, RaidDocument, VolumeDocument};
pub use defaults::{default_document, default_plan};
pub use encryption::EncryptionSpec;
pub use error::{ConfigError, Result};
pub use layout::{DiskLayout, PartitionRole, PartitionSpec, partition_device, plan_layout};
pub use mount::{MountRecord, join_mount_options};
pub use plan::{BootStyle, DiskPlan};
pub use raid::RaidSpec;
pub use volume::{FilesystemKind, VolumeSpec};
