// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Configuration errors, raised before any device is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config data format error: {0}")]
    Format(String),

    #[error("unsupported/invalid boot type: {0}")]
    BootType(String),

    #[error("unsupported/invalid fstype '{fstype}' for volume '{volume}'")]
    Filesystem { volume: String, fstype: String },

    #[error("missing {field} for volume '{volume}'")]
    MissingField { volume: String, field: &'static str },

    #[error("duplicate volume in disk config: {0}")]
    DuplicateVolume(String),

    #[error("invalid volume '{volume}': {reason}")]
    Volume { volume: String, reason: String },

    #[error("invalid disk config: {}", describe(.missing_volumes, .problems))]
    Invalid {
        missing_volumes: Vec<String>,
        problems: Vec<String>,
    },
}

impl ConfigError {
    pub(crate) fn volume(volume: &str, reason: impl Into<String>) -> Self {
        Self::Volume {
            volume: volume.to_string(),
            reason: reason.into(),
        }
    }

    /// Names of mandatory volumes reported missing, if this is a validation error
    pub fn missing_volumes(&self) -> &[String] {
        match self {
            Self::Invalid {
                missing_volumes, ..
            } => missing_volumes,
            _ => &[],
        }
    }
}

fn describe(missing_volumes: &[String], problems: &[String]) -> String {
    let mut parts = problems.to_vec();
    if !missing_volumes.is_empty() {
        parts.push(format!(
            "missing volumes in disk config: {}",
            missing_volumes.join(", ")
        ));
    }
    parts.join("; ")
}

pub type Result<T> = std::result::Result<T, ConfigError>;
