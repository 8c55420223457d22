// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tar2disk::logging::{self, Verbosity};
use tar2disk::{DiskSource, ProvisionError, ProvisionOptions, Provisioner, signals};
use tar2disk_sys::{CommandRunner, RecordingRunner, SystemRunner};
use tar2disk_types::BootStyle;

const EX_OK: u8 = 0;

#[derive(Debug, Parser)]
#[command(name = "tar2disk", version)]
#[command(about = "Convert a root filesystem tarball into a bootable disk image")]
#[command(group(
    ArgGroup::new("disk")
        .required(true)
        .args(["disk_config", "bios", "uefi"])
))]
struct Cli {
    /// Root filesystem tarball
    infile: PathBuf,

    /// Output directory for the packaged image
    #[arg(short = 'O', long, default_value = ".")]
    outdir: PathBuf,

    /// Staging directory the new tree is mounted at
    #[arg(short = 'M', long, default_value = tar2disk::config::DEFAULT_MOUNT_ROOT)]
    mount_root: PathBuf,

    /// Disk configuration file (TOML or JSON, `-` for stdin)
    #[arg(short = 'C', long)]
    disk_config: Option<PathBuf>,

    /// Use the built-in BIOS disk configuration
    #[arg(long)]
    bios: bool,

    /// Use the built-in UEFI disk configuration
    #[arg(long)]
    uefi: bool,

    #[arg(short, long)]
    quiet: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Open a shell inside the tree before tearing it down
    #[arg(short = 'x', long)]
    exec_chroot: bool,

    /// Print the commands a run would execute without changing anything
    #[arg(short = 'n', long)]
    dry_run: bool,
}

impl Cli {
    fn disk_source(&self) -> DiskSource {
        match &self.disk_config {
            Some(path) => DiskSource::File(path.clone()),
            None if self.uefi => DiskSource::Builtin(BootStyle::Uefi),
            None => DiskSource::Builtin(BootStyle::Bios),
        }
    }

    fn options(&self) -> ProvisionOptions {
        ProvisionOptions {
            outdir: self.outdir.clone(),
            mount_root: self.mount_root.clone(),
            exec_chroot: self.exec_chroot,
            dry_run: self.dry_run,
            ..ProvisionOptions::new(&self.infile)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let plan = cli.disk_source().load().context("loading disk config")?;
    let options = cli.options();
    let interrupt = signals::install().context("installing signal handlers")?;

    if options.dry_run {
        let runner = RecordingRunner::dry_run();
        let result = Provisioner::new(&runner, &plan, &options, interrupt).run();
        for command in runner.commands() {
            println!("{command}");
        }
        result?;
    } else {
        let runner = SystemRunner::new();
        if runner.uses_sudo() {
            tracing::info!("not running as root, privileged steps go through sudo");
        }
        let runner: &dyn CommandRunner = &runner;
        let report = Provisioner::new(runner, &plan, &options, interrupt).run()?;
        if let Some(package) = report.package {
            tracing::info!(package = %package.display(), "disk image ready");
        }
    }
    Ok(())
}

fn exit_status(error: &anyhow::Error) -> u8 {
    let provision = error.downcast_ref::<ProvisionError>();
    if provision.is_some_and(ProvisionError::is_interrupt) {
        return EX_OK ^ 130;
    }
    let broken_pipe = provision.is_some_and(ProvisionError::is_broken_pipe)
        || error.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::BrokenPipe)
        });
    if broken_pipe {
        return EX_OK ^ 11;
    }
    EX_OK ^ 1
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.quiet, cli.verbose));

    match run(&cli) {
        Ok(()) => ExitCode::from(EX_OK),
        Err(error) => {
            tracing::error!("{error:#}");
            ExitCode::from(exit_status(&error))
        }
    }
}
