// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed ({}): {command}; stderr: {stderr}", describe_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from {command}: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("failed to unmount {path:?}: still a mountpoint")]
    StillMounted { path: PathBuf },

    #[error("device journal is closed, cannot open {0}")]
    JournalClosed(String),

    #[error("missing required tools: {}", join(.tools))]
    ToolMissing { tools: Vec<String> },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "killed by signal".to_string(),
    }
}

fn join(tools: &[String]) -> String {
    tools.join(", ")
}

impl SysError {
    /// Whether the failure came from a process that ran and exited non-zero
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. })
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
