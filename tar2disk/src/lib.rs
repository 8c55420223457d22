// SPDX-License-Identifier: GPL-3.0-only

//! tar2disk turns a root filesystem tarball into a bootable disk image
//!
//! The run builds a stack of block devices on a loop-mounted image file
//! (optional RAID1, optional LUKS, an LVM volume group, one filesystem per
//! volume), unpacks the tarball into it, writes fstab/crypttab/mdadm.conf,
//! rebuilds the initramfs, installs the bootloader and tears the stack down
//! again through the device journal.

pub mod artifacts;
pub mod chroot;
pub mod config;
pub mod error;
pub mod initializer;
pub mod logging;
pub mod provision;
pub mod signals;

pub use config::{DiskSource, ProvisionOptions};
pub use error::{ProvisionError, Result};
pub use initializer::{FstabEntry, VolumeInitializer};
pub use provision::{ProvisionReport, Provisioner, required_tools};
