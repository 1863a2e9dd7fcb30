//! Shared error type for the library surface.

/// Errors that callers may need to tell apart.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed annotation, start/end expression, or alignment record.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Manifest or insertion file missing for a requested combination.
    #[error("missing resource: {0}")]
    MissingResource(String),
    /// Cache slab does not match the current transcript set; resolved by
    /// rebuilding, never surfaced to queries.
    #[error("stale cache: {0}")]
    StaleCache(String),
    /// The external aligner exited nonzero or was killed.
    #[error("child process failure: {0}")]
    ChildProcessFailure(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Violated precondition, e.g. a probability outside `[0, 1]`.
    #[error("logic error: {0}")]
    LogicError(String),
}
