//! Advisory lock over the state directory
//!
//! `flock(2)` on `<state_dir>/.vpcctl.lock`. Acquisition never blocks: a
//! contended lock is retried with exponential backoff and finally reported
//! as `StateLocked`. The lock is released when the guard is dropped.

use crate::error::{Error, Result};
use crate::manifest::RetryConfig;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use rand::rng;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Lock file name inside the state directory
pub const LOCK_FILE: &str = ".vpcctl.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers (inspect, list)
    Shared,
    /// Writers (every mutating operation)
    Exclusive,
}

impl LockMode {
    fn arg(self) -> FlockArg {
        match self {
            LockMode::Shared => FlockArg::LockSharedNonblock,
            LockMode::Exclusive => FlockArg::LockExclusiveNonblock,
        }
    }
}

/// Held lock; dropping it unlocks
pub struct StateLock {
    _guard: Flock<File>,
    mode: LockMode,
}

impl StateLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

fn backoff_from_config(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff::new()
        .base_delay_ms(config.base_delay_ms)
        .max_delay_ms(config.max_delay_ms)
        .multiplier(config.multiplier)
        .max_attempts(config.max_attempts)
        .jitter_factor(config.jitter_factor)
}

/// Acquire the lock at `path`, retrying while another process holds it
pub fn acquire(path: &Path, mode: LockMode, retry: &RetryConfig) -> Result<StateLock> {
    let backoff = backoff_from_config(retry);
    let mut rng = rng();
    let mut attempt: u8 = 0;

    loop {
        attempt = attempt.saturating_add(1);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match Flock::lock(file, mode.arg()) {
            Ok(guard) => {
                tracing::debug!("Acquired {:?} state lock after {} attempt(s)", mode, attempt);
                return Ok(StateLock {
                    _guard: guard,
                    mode,
                });
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => match backoff.delay(attempt, &mut rng) {
                Some(delay_ms) => {
                    tracing::debug!(
                        "State lock busy (attempt {}), retrying in {}ms",
                        attempt,
                        delay_ms
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                None => return Err(Error::StateLocked(path.to_path_buf())),
            },
            Err((_, errno)) => return Err(Error::Io(io::Error::from(errno))),
        }
    }
}
