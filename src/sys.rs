//! Host checks

use crate::error::{Error, Result};
use nix::unistd::geteuid;

/// Mutating commands reconfigure the kernel network stack and need root
pub fn ensure_privileged() -> Result<()> {
    if geteuid().is_root() {
        Ok(())
    } else {
        Err(Error::NotPrivileged)
    }
}
