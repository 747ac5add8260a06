//! Transfer error taxonomy shared by transports, workers, and coordinators.

use std::fmt;

/// Error produced while moving a task's bytes. Workers classify these to
/// decide retries; the coordinator records the final one as `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// URL was malformed or uses an unsupported scheme. Rejected at ingest.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport-level fault (DNS, connect, reset, timeout, TLS).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Origin answered with a 4xx/5xx not covered by a more specific kind.
    #[error("server returned HTTP {0}")]
    ServerError(u16),

    /// 503: origin asked us to back off. Retried inside the worker.
    #[error("service unavailable (HTTP 503)")]
    ServiceUnavailable,

    /// 416: the requested range no longer exists. Fatal for the segment.
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    /// Stored validators (ETag/Last-Modified) no longer match the origin.
    #[error("remote file changed since first probe")]
    FileModified,

    /// Disk full, permission denied, or an otherwise failed file operation.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Stable short name stored alongside `error_message` and logged.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::InvalidUrl(_) => "InvalidUrl",
            DownloadError::ConnectionFailed(_) => "ConnectionFailed",
            DownloadError::ServerError(_) => "ServerError",
            DownloadError::ServiceUnavailable => "ServiceUnavailable",
            DownloadError::RangeNotSatisfiable => "RangeNotSatisfiable",
            DownloadError::FileModified => "FileModified",
            DownloadError::Io(_) => "IoError",
        }
    }

    /// Map an HTTP status to the matching error kind. 2xx is not an error
    /// and must be handled before calling this.
    pub fn from_status(status: u16) -> Self {
        match status {
            503 => DownloadError::ServiceUnavailable,
            416 => DownloadError::RangeNotSatisfiable,
            code => DownloadError::ServerError(code),
        }
    }
}

/// Control-flow sentinel raised when a task is stopped by user pause/cancel.
/// Not an error: the coordinator downcasts it and transitions to `paused`.
#[derive(Debug)]
pub struct TaskPaused;

impl fmt::Display for TaskPaused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task paused by user")
    }
}

impl std::error::Error for TaskPaused {}
