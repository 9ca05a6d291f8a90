//! Per-operation cancellation and deadlines.
//!
//! Every gateway call takes an [`OpContext`]. The context is checked before
//! any work starts, between attempts to take the write lock, and by SQLite's
//! progress handler while a statement runs. An interrupted transaction is
//! rolled back and nothing is committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ArtifactError, Result};

/// Cancellation token plus optional deadline for one gateway operation.
///
/// Clones share the cancellation flag, so a caller can keep a clone and
/// cancel work running on another thread.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that never expires and is never cancelled unless asked.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::default(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the operation should not proceed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ArtifactError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ArtifactError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Polled from the SQLite progress handler.
    pub(crate) fn should_interrupt(&self) -> bool {
        self.check().is_err()
    }

    /// Error to report for an operation SQLite interrupted on our behalf.
    pub(crate) fn interruption(&self) -> ArtifactError {
        match self.check() {
            Err(err) => err,
            Ok(()) => ArtifactError::Cancelled,
        }
    }
}
