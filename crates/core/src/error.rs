//! Transport error model.

use thiserror::Error;

/// Result type for operations against the remote service.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failure talking to the remote service.
///
/// Every variant is considered transient: the worker hands these to its
/// listeners, which decide whether the job is worth another attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The remote side did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// The in-flight operation was aborted locally (usually on shutdown).
    #[error("request aborted")]
    Aborted,

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Lower-level I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True when the failure was caused by a local abort rather than the remote.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotConnected => {
                Self::Unreachable(err.to_string())
            }
            _ => Self::Io(err.to_string()),
        }
    }
}
