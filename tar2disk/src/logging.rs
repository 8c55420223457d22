// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "TAR2DISK_LOG_FILE";
const DEFAULT_LOG_PREFIX: &str = "tar2disk.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (_, true) => Self::Verbose,
            (true, false) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn fallback_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "tar2disk=info,tar2disk_sys=info,warn",
            Self::Verbose => "tar2disk=debug,tar2disk_sys=debug,warn",
        }
    }
}

/// Install the global subscriber: stderr always, plus a file when
/// `TAR2DISK_LOG_FILE` is set
pub fn init(verbosity: Verbosity) {
    let env_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.fallback_directive()))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    match std::env::var_os(LOG_FILE_ENV) {
        Some(file) => {
            let (dir, prefix) = split_log_path(Path::new(&file));
            let appender = tracing_appender::rolling::never(dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(env_filter());

            let initialized = tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if initialized.is_ok() {
                // Keep the background writer alive for the rest of the process.
                let _ = LOG_GUARD.set(guard);
            }
        }
        None => {
            let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        }
    }
}

fn split_log_path(path: &Path) -> (PathBuf, OsString) {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(DEFAULT_LOG_PREFIX));
    (dir, prefix)
}
