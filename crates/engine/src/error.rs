//! Engine error taxonomy.
//!
//! These are the values the tool surface may return; driver and registry
//! errors are mapped here at the engine boundary so no runtime-specific
//! detail leaks outward.

use cinderbox_driver::DriverError;
use cinderbox_publisher::PublishError;
use cinderbox_registry::RegistryError;
use thiserror::Error;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("execution exceeded {timeout_secs}s wall clock")]
    ExecTimeout { timeout_secs: u64 },

    #[error("package installation failed: {0}")]
    InstallFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotAuthorized(_) => "not_authorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::ExecTimeout { .. } => "exec_timeout",
            Self::InstallFailed(_) => "install_failed",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DriverError> for EngineError {
    fn from(e: DriverError) -> Self {
        match e {
            // A registry row whose container the runtime has lost fails
            // explicitly; the reaper removes the row on its next pass.
            DriverError::NoSuchContainer(id) => {
                Self::RuntimeUnavailable(format!("container {id} is gone"))
            }
            DriverError::ImageMissing(msg) => {
                Self::RuntimeUnavailable(format!("base image missing: {msg}"))
            }
            DriverError::RuntimeUnavailable(msg) => Self::RuntimeUnavailable(msg),
            DriverError::ExecTimeout { timeout_secs } => Self::ExecTimeout { timeout_secs },
            DriverError::NotFound(what) => Self::NotFound(what),
            DriverError::Io(e) => Self::Io(e.to_string()),
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(what) => Self::NotFound(what),
            RegistryError::AlreadyExists(what) => Self::Conflict(what),
            RegistryError::Io(e) => Self::Io(e.to_string()),
            RegistryError::Database(e) => Self::Internal(e.to_string()),
            RegistryError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<PublishError> for EngineError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::BadPath(what) => Self::InvalidArgument(what),
            PublishError::NotFound(what) => Self::NotFound(what),
            PublishError::Io(e) => Self::Io(e.to_string()),
        }
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
