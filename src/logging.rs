//! Tracing setup: human-readable events on stderr plus a plain-text log file

use crate::error::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Filter used when `RUST_LOG` is unset or unparsable
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

/// Install the global subscriber
///
/// The log file is opened in append mode so successive runs accumulate.
pub fn init(log_file: &Path, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        );

    // A subscriber may already be installed (tests, embedding)
    registry.try_init().ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "info");
        assert_eq!(default_directive(true), "debug");
    }

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("vpcctl.log");
        init(&log, false).unwrap();
        assert!(log.exists());
        // Second install is tolerated
        init(&log, true).unwrap();
    }

    #[test]
    fn test_init_fails_on_missing_dir() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("missing").join("vpcctl.log");
        assert!(init(&log, false).is_err());
    }
}
