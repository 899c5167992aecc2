//! Error types for the master process supervisor

use std::path::PathBuf;

/// Main error type for supervisor operations
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no more than {capacity} processes can be spawned")]
    Exhausted { capacity: usize },

    #[error("{reason} while spawning \"{name}\": errno {errno}")]
    SpawnFailed {
        name: String,
        reason: String,
        errno: i32,
    },

    #[error("process slot {index} is not in use")]
    InvalidSlot { index: usize },

    #[error("master is already running with process id {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("no running master found via pid file {path:?}")]
    NotRunning { path: PathBuf },

    #[error("Invalid supervisor configuration: {details}")]
    InvalidConfig { details: String },

    #[error("pid file {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Platform operation failed: {error}")]
    PlatformError { error: PlatformError },
}

impl From<PlatformError> for SupervisorError {
    fn from(error: PlatformError) -> Self {
        SupervisorError::PlatformError { error }
    }
}

/// Platform-specific error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable { resource: String },
}

impl PlatformError {
    /// OS error number carried by this error, `EPERM`/`EAGAIN` for the
    /// variants that do not record one
    pub fn errno(&self) -> i32 {
        match self {
            PlatformError::SystemCallFailed { errno, .. } => *errno,
            PlatformError::PermissionDenied { .. } => libc::EPERM,
            PlatformError::ResourceUnavailable { .. } => libc::EAGAIN,
        }
    }
}
