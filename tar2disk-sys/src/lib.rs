// SPDX-License-Identifier: GPL-3.0-only

//! System layer for tar2disk
//!
//! Nothing in this crate decides *what* to provision. It runs the storage
//! tools the operating system ships:
//! - **cmd**: the [`CommandRunner`] seam with a real and a recording runner
//! - **journal**: the [`DeviceJournal`] that closes opened resources in order
//! - **tools**: argument builders for `losetup`, `mdadm`, `cryptsetup`, LVM,
//!   `mkfs.*`, `btrfs`, `tar`, `chroot` and friends
//! - **preflight**: `PATH` lookups before any disk is touched
//!
//! Privileged steps run through `sudo` when the process is not root.

pub mod cmd;
pub mod error;
pub mod journal;
pub mod preflight;
pub mod tools;

pub use cmd::{CommandOutcome, CommandRunner, Invocation, RecordingRunner, SystemRunner, is_root};
pub use error::{Result, SysError};
pub use journal::{
    DeviceJournal, JournalEntry, JournalPhase, JournalState, ResourceKind, UnwindError,
    UnwindFailure,
};
pub use preflight::{BASE_TOOLS, ensure_tools, missing_tools};
pub use tools::chroot::ChrootEnv;
