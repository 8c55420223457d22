// SPDX-License-Identifier: GPL-3.0-only

//! SIGINT/SIGTERM turn into a flag the orchestrator polls between steps

use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::error::{ProvisionError, Result};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the process-wide interrupt flag
pub fn install() -> Result<&'static AtomicBool> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }
            .map_err(|errno| ProvisionError::Io(std::io::Error::from(errno)))?;
    }
    Ok(&INTERRUPTED)
}

/// `Err(Interrupted)` once `flag` is raised
pub fn check(flag: &AtomicBool) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        Err(ProvisionError::Interrupted)
    } else {
        Ok(())
    }
}
