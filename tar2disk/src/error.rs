// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use tar2disk_sys::{SysError, UnwindError};
use tar2disk_types::ConfigError;
use thiserror::Error;

/// Everything that can end a provisioning run
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("interrupted")]
    Interrupted,

    #[error("invalid options: {0}")]
    Options(String),

    #[error("failed to read disk config {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("cannot generate {file}: {reason}")]
    Artifact { file: String, reason: String },

    /// Unwind failed, possibly after an earlier error had already ended the run
    #[error("{}{failures}", describe_cause(.cause))]
    Unwind {
        cause: Option<Box<ProvisionError>>,
        failures: UnwindError,
    },
}

fn describe_cause(cause: &Option<Box<ProvisionError>>) -> String {
    match cause {
        Some(cause) => format!("{cause}; additionally "),
        None => String::new(),
    }
}

impl ProvisionError {
    /// Whether a SIGINT/SIGTERM ended the run, directly or before a failed unwind
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::Unwind {
                cause: Some(cause), ..
            } => cause.is_interrupt(),
            _ => false,
        }
    }

    /// Whether an `EPIPE` caused the run to end
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::Io(error) => error.kind() == io::ErrorKind::BrokenPipe,
            Self::Sys(SysError::Io(error)) => error.kind() == io::ErrorKind::BrokenPipe,
            Self::Sys(SysError::Spawn { source, .. }) => {
                source.kind() == io::ErrorKind::BrokenPipe
            }
            Self::Unwind {
                cause: Some(cause), ..
            } => cause.is_broken_pipe(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tar2disk_sys::{JournalEntry, UnwindFailure};

    fn unwind_failures() -> UnwindError {
        UnwindError {
            failures: vec![UnwindFailure {
                resource: JournalEntry::Mount(PathBuf::from("/mnt/dbuild")),
                error: SysError::StillMounted {
                    path: PathBuf::from("/mnt/dbuild"),
                },
            }],
        }
    }

    #[test]
    fn unwind_report_names_cause_and_failures() {
        let error = ProvisionError::Unwind {
            cause: Some(Box::new(ProvisionError::Interrupted)),
            failures: unwind_failures(),
        };
        let message = error.to_string();
        assert!(message.starts_with("interrupted; additionally 1 resource(s) failed to close"));
        assert!(message.contains("mount /mnt/dbuild"));
        assert!(error.is_interrupt());
    }

    #[test]
    fn broken_pipe_is_found_behind_unwind() {
        let pipe = ProvisionError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(pipe.is_broken_pipe());

        let error = ProvisionError::Unwind {
            cause: Some(Box::new(pipe)),
            failures: unwind_failures(),
        };
        assert!(error.is_broken_pipe());
        assert!(!error.is_interrupt());
    }
}
