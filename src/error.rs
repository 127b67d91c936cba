//! Typed errors that callers match on; everything else flows as `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisageError {
    /// Two descriptors in the same batch have different dimensions.
    /// This is a precondition violation for the whole batch.
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DescriptorMismatch { expected: usize, actual: usize },

    /// Another pipeline instance holds the advisory lock. Not a failure:
    /// the caller should report "already running" and exit cleanly.
    #[error("another clustering pipeline is already running")]
    LockBusy,
}

impl VisageError {
    /// True when the error only means another instance got there first.
    pub fn is_lock_busy(&self) -> bool {
        matches!(self, VisageError::LockBusy)
    }
}
