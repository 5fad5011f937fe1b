//! Publisher error types.

use thiserror::Error;

/// Publisher operation errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The relative path escapes the sandbox's subtree or contains unsafe
    /// components. Never silently ignored.
    #[error("bad path: {0}")]
    BadPath(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for publisher operations.
pub type PublishResult<T> = std::result::Result<T, PublishError>;
