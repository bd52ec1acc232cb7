//! Error types for sandboxed unpacking.

use std::path::PathBuf;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Fatal errors raised while operating on a sandboxed tree.
///
/// Problems with the archives themselves (corrupt containers, hostile members)
/// are not errors; they are reported as [`crate::Warning`]s by the unpacker.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path validation failed - potential security issue
    #[error("Path validation failed: {path:?} - {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// Directory creation failed
    #[error("Failed to create directory: {path:?} - {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Permissions error
    #[error("Permission denied: {operation} on {path:?}")]
    Permission { operation: String, path: PathBuf },


    /// Blocking worker panicked or was aborted
    #[error("Unpack task failed: {message}")]
    TaskFailed { message: String },
}

impl SandboxError {
    pub(crate) fn path_validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
