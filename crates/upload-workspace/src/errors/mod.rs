//! Centralized error handling for the upload workspace service
//!
//! # Error Categories
//!
//! - **Validation Errors**: Missing payloads, bad file names, malformed paths
//! - **Not Found Errors**: Unknown or deleted workspaces, missing files
//! - **Conflict Errors**: Mutations attempted on a workspace that is not active
//! - **Permission Errors**: Owner mismatch reported to the authorization layer
//! - **Internal Errors**: Filesystem, sandbox and serialization failures
//!
//! Problems inside uploaded archives are not errors; they are recorded as
//! workspace warnings and the operation still succeeds.
//!
//! # Usage
//!
//! ```rust
//! use upload_workspace::errors::{AppError, AppResult};
//!
//! fn require_payload(bytes: &[u8]) -> AppResult<()> {
//!     if bytes.is_empty() {
//!         return Err(AppError::validation("upload contains no data"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
