// SPDX-License-Identifier: GPL-3.0-only

//! Thin wrappers that decide the exact arguments for each delegated tool

pub mod archive;
pub mod btrfs;
pub mod chroot;
pub mod disk;
pub mod files;
pub mod loopdev;
pub mod luks;
pub mod lvm;
pub mod mdadm;
pub mod mkfs;
pub mod mount;
