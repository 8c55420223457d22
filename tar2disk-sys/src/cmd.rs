// SPDX-License-Identifier: GPL-3.0-only

//! Delegated command execution
//!
//! Every external tool goes through a [`CommandRunner`]. [`SystemRunner`]
//! spawns real processes (through `sudo` for privileged steps when not root);
//! [`RecordingRunner`] only records what would have run, which backs both
//! `--dry-run` and the test suites.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::iter;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Result, SysError};

/// Captured output of a finished tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `false` when the call was only recorded
    pub spawned: bool,
}

/// One delegated tool call
///
/// Stdin payloads are secrets (passphrases, layout scripts): they are never
/// part of [`Invocation::render`] and are redacted from `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    privileged: bool,
    interactive: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            privileged: false,
            interactive: false,
        }
    }

    /// A call that needs root
    pub fn admin(program: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(program)
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the process on stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Attach the process to the controlling terminal
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn stdin_payload(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Program and arguments as logged and recorded; never the stdin payload
    pub fn render(&self) -> String {
        self.argv(false).join(" ")
    }

    /// Process argv, led by `sudo` for a privileged call when `use_sudo` is set
    pub fn argv(&self, use_sudo: bool) -> Vec<&str> {
        let sudo = (self.privileged && use_sudo).then_some("sudo");
        sudo.into_iter()
            .chain(iter::once(self.program.as_str()))
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("privileged", &self.privileged)
            .field("interactive", &self.interactive)
            .finish()
    }
}

/// Seam between provisioning logic and the operating system's tools
pub trait CommandRunner {
    /// Run `invocation` to completion; a non-zero exit is [`SysError::CommandFailed`]
    fn run(&self, invocation: &Invocation) -> Result<CommandOutcome>;

    /// Run a check-style command whose exit status is the answer
    fn succeeds(&self, invocation: &Invocation) -> Result<bool> {
        match self.run(invocation) {
            Ok(_) => Ok(true),
            Err(error) if error.is_command_failure() => Ok(false),
            Err(error) => Err(error),
        }
    }
}

/// Whether the process runs with an effective uid of 0
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Runs commands on the host
#[derive(Debug, Clone)]
pub struct SystemRunner {
    use_sudo: bool,
}

impl SystemRunner {
    /// Privileged calls go through `sudo` unless already root
    pub fn new() -> Self {
        Self {
            use_sudo: !is_root(),
        }
    }

    pub fn uses_sudo(&self) -> bool {
        self.use_sudo
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut argv = invocation.argv(self.use_sudo).into_iter();
        let mut command = Command::new(argv.next().unwrap_or(invocation.program()));
        command.args(argv);
        command
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutcome> {
        let rendered = invocation.render();
        debug!(command = %rendered, privileged = invocation.privileged, "running command");

        let spawn_error = |source: std::io::Error| SysError::Spawn {
            command: rendered.clone(),
            source,
        };
        let mut command = self.command(invocation);

        if invocation.interactive {
            let status = command.status().map_err(spawn_error)?;
            if !status.success() {
                return Err(SysError::CommandFailed {
                    command: rendered,
                    code: status.code(),
                    stderr: String::new(),
                });
            }
            return Ok(CommandOutcome {
                spawned: true,
                ..CommandOutcome::default()
            });
        }

        let output = match &invocation.stdin {
            Some(input) => {
                let mut child = command
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(spawn_error)?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(input.as_bytes())?;
                }
                child.wait_with_output()?
            }
            None => command.output().map_err(spawn_error)?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(SysError::CommandFailed {
                command: rendered,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !stdout.trim().is_empty() {
            debug!(command = %rendered, stdout = %stdout.trim_end(), "command output");
        }

        Ok(CommandOutcome {
            stdout,
            stderr,
            spawned: true,
        })
    }
}

/// Records commands instead of running them
///
/// Commands whose rendered form starts with a registered prefix get a canned
/// stdout ([`RecordingRunner::respond`]) or fail ([`RecordingRunner::fail`]).
/// Failed commands are still recorded as attempted.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: RefCell<Vec<String>>,
    responses: Vec<(String, String)>,
    failures: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner for `--dry-run`, answering the queries provisioning depends on
    ///
    /// Nothing is unpacked on a dry run, so every `test -e` on the tree fails.
    pub fn dry_run() -> Self {
        Self::new()
            .respond("losetup --show --find", "/dev/loop0\n")
            .fail("test -e")
    }

    pub fn respond(mut self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.responses.push((prefix.into(), stdout.into()));
        self
    }

    pub fn fail(mut self, prefix: impl Into<String>) -> Self {
        self.failures.push(prefix.into());
        self
    }

    /// Rendered commands in the order they were attempted
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    /// Attempted commands starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter(|command| command.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Index of the first attempted command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands
            .borrow()
            .iter()
            .position(|command| command.starts_with(prefix))
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutcome> {
        let rendered = invocation.render();
        debug!(command = %rendered, "recording command");
        self.commands.borrow_mut().push(rendered.clone());

        if self
            .failures
            .iter()
            .any(|prefix| rendered.starts_with(prefix.as_str()))
        {
            return Err(SysError::CommandFailed {
                command: rendered,
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }

        let stdout = self
            .responses
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(CommandOutcome {
            stdout,
            stderr: String::new(),
            spawned: false,
        })
    }
}
