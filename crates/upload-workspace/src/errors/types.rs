//! Error type definitions for the upload workspace service
//!
//! Every public operation returns [`AppError`]. The variants map directly onto
//! the categories a request layer needs to distinguish: bad input, unknown
//! workspace or path, state conflicts, authorization and internal failures.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed input; nothing was changed
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Unknown workspace or path
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Workspace state does not allow the operation
    #[error("Conflict: cannot {action} upload {upload_id} while it is {state}")]
    Conflict {
        upload_id: u64,
        action: String,
        state: String,
    },

    /// Caller is not the workspace owner
    #[error("Permission denied: {action} on {resource}")]
    PermissionDenied { action: String, resource: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unpacking or sandbox failures
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] upload_sandbox::SandboxError),

    /// Metadata (de)serialization failures
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict<A: Into<String>, S: ToString>(upload_id: u64, action: A, state: S) -> Self {
        Self::Conflict {
            upload_id,
            action: action.into(),
            state: state.to_string(),
        }
    }

    pub fn permission_denied<A: Into<String>, R: Into<String>>(action: A, resource: R) -> Self {
        Self::PermissionDenied {
            action: action.into(),
            resource: resource.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Failures the caller cannot fix by changing the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Internal { .. } | Self::Io(_) | Self::Sandbox(_) | Self::Serialization(_)
        )
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Background task failed: {err}"))
    }
}
