//! Connection contract.

use courier_core::TransportResult;

/// The single channel every job runs against.
///
/// The worker never uses a connection from two jobs at once, so
/// implementations need no request-level locking. [`abort`](Self::abort) is
/// the exception: it is called from whichever thread shuts the worker down,
/// while a job may be blocked inside a request on the worker thread.
pub trait Connection: Send + Sync + 'static {
    /// Structured response produced by a successful job.
    type Response: Send + 'static;

    /// Re-establish the underlying session. Called before retrying a job.
    fn reconnect(&self) -> TransportResult<()>;

    /// Forcibly terminate any in-flight operation.
    ///
    /// A blocked request must return [`TransportError::Aborted`](courier_core::TransportError::Aborted).
    fn abort(&self);

    /// Release the connection. Called once, when the worker stops.
    fn close(&self);
}
