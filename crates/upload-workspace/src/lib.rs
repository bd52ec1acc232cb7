//! Upload workspaces for manuscript submissions.
//!
//! A workspace holds an uploaded source tree. Every upload is unpacked to a
//! fixed point with [`upload_sandbox`], checked for unacceptable file names
//! and guarded by a small lifecycle state machine. See
//! [`services::WorkspaceManager`] for the operations.

pub mod audit;
pub mod config;
pub mod errors;
pub mod ingestor;
pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use config::Config;
pub use errors::{AppError, AppResult};
pub use models::{UploadedFile, WorkspaceState, WorkspaceSummary};
pub use services::{ContentHandle, WorkspaceManager};
