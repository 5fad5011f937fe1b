//! Container driver error taxonomy.

use thiserror::Error;

/// Container driver errors. Runtime-specific detail stays in the message;
/// callers branch on the variant only.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("base image missing: {0}")]
    ImageMissing(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("execution exceeded {timeout_secs}s wall clock")]
    ExecTimeout { timeout_secs: u64 },

    #[error("not found in container: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;
