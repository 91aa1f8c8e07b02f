//! Job queue error types.

/// Result type alias for job queue operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a job was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The queue has been shut down.
    #[error("job queue is closed")]
    Closed,

    /// The intake is at capacity.
    #[error("job queue is full")]
    Full,
}
