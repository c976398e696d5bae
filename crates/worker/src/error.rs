//! Worker and job error types.

use courier_core::TransportError;
use thiserror::Error;

use crate::connection::Connection;
use crate::job::BoxedJob;

/// Failure reported by [`Job::execute`](crate::Job::execute).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Talking to the remote failed; listeners may vote to retry.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The job itself is broken (bad payload, invariant violation, ...).
    #[error("internal job failure: {0}")]
    Internal(String),

    /// `execute` panicked; the worker caught it and kept running.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Only transport failures are ever requeued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Lifecycle errors surfaced by [`RequestWorker`](crate::RequestWorker).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("request worker already started")]
    AlreadyStarted,

    /// The worker did not reach the running state within the ready timeout.
    #[error("request worker not ready")]
    NotReady,

    /// The worker is shutting down, has shut down, or failed to start.
    #[error("request worker stopped")]
    Stopped,

    /// The carry-over queue was already drained by a started worker.
    #[error("carry-over queue already drained")]
    CarryOverSealed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// A job that could not be enqueued, handed back to the caller.
pub struct PushError<C: Connection> {
    reason: WorkerError,
    job: BoxedJob<C>,
}

impl<C: Connection> PushError<C> {
    pub(crate) fn new(reason: WorkerError, job: BoxedJob<C>) -> Self {
        Self { reason, job }
    }

    pub fn reason(&self) -> &WorkerError {
        &self.reason
    }

    /// Take the rejected job back, e.g. to park it in a carry-over queue.
    pub fn into_job(self) -> BoxedJob<C> {
        self.job
    }
}

impl<C: Connection> std::fmt::Debug for PushError<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushError")
            .field("reason", &self.reason)
            .field("job", &self.job)
            .finish()
    }
}

impl<C: Connection> std::fmt::Display for PushError<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job {} rejected: {}", self.job.id(), self.reason)
    }
}

impl<C: Connection> std::error::Error for PushError<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(JobError::from(TransportError::Timeout).is_retryable());
        assert!(!JobError::internal("bad payload").is_retryable());
        assert!(!JobError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn transport_errors_display_transparently() {
        let err = JobError::from(TransportError::Aborted);
        assert_eq!(err.to_string(), "request aborted");
    }
}
