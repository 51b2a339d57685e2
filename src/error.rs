//! Error types.
//!
//! Losing a state transition race is *not* an error: every `set*` and
//! `cancel` call reports whether it won via a `bool`. The types here cover
//! the two failure classes that do reach a caller, an executor refusing
//! work and a waiter observing something other than a value.
use std::time::Duration;

use thiserror::Error;

/// An executor refused to accept a job.
///
/// Returned by [Executor::execute](crate::executor::Executor::execute) and
/// every submit path built on it. Nothing retries a rejected job.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("executor rejected job: {reason}")]
pub struct Rejected {
    reason: &'static str,
}

impl Rejected {
    pub const fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// Why the job was refused.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// The running task was asked to stop.
///
/// Returned by [task::sleep](crate::task::sleep) when the task it runs in
/// is interrupted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("task was interrupted")]
pub struct Interrupted;

/// The reason a blocking accessor on a
/// [ListenableFuture](crate::futures::listenable::ListenableFuture) did not
/// produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FutureError<E> {
    #[error("future was cancelled")]
    Cancelled,
    #[error("future failed: {0}")]
    Failed(E),
    #[error("timed out after {0:?} waiting for future")]
    Timeout(Duration),
}

impl<E> FutureError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The computation's error, if the future failed.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}
