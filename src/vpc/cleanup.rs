//! Best-effort teardown bookkeeping

use crate::error::Result;

/// Collects failures of teardown steps that must not abort the teardown
#[derive(Debug, Default)]
pub struct Cleanup {
    warnings: Vec<String>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one step; failures become warnings
    pub fn attempt(&mut self, step: &str, result: Result<()>) {
        if let Err(e) = result {
            self.warn(format!("{}: {}", step, e));
        }
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Fold another collector's warnings into this one
    pub fn absorb(&mut self, other: Cleanup) {
        self.warnings.extend(other.warnings);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
