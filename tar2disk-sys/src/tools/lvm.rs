// SPDX-License-Identifier: GPL-3.0-only

use tar2disk_types::volume::logical_volume_device;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::Result;

pub fn create_physical_volume(runner: &dyn CommandRunner, device: &str) -> Result<()> {
    runner.run(&Invocation::admin("pvcreate").arg(device))?;
    Ok(())
}

pub fn create_volume_group(runner: &dyn CommandRunner, name: &str, pv: &str) -> Result<()> {
    runner.run(&Invocation::admin("vgcreate").args([name, pv]))?;
    Ok(())
}

/// `vgchange -a y|n`
pub fn set_active(runner: &dyn CommandRunner, name: &str, active: bool) -> Result<()> {
    let flag = if active { "y" } else { "n" };
    runner.run(&Invocation::admin("vgchange").args(["-a", flag, name]))?;
    Ok(())
}

/// Create logical volume `name` in `vg_name` and return its device node
pub fn create_logical_volume(
    runner: &dyn CommandRunner,
    vg_name: &str,
    name: &str,
    size: &str,
) -> Result<String> {
    runner.run(&Invocation::admin("lvcreate").args(["-L", size, "-n", name, vg_name]))?;
    Ok(logical_volume_device(vg_name, name))
}
