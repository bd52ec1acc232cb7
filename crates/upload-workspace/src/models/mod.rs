//! Persisted and client-facing data types.

pub mod upload;
pub mod workspace;

pub use upload::{UploadedFile, secure_filename};
pub use workspace::{
    IngestionSummary, LifecycleAction, ManagedFile, UploadStatus, Workspace, WorkspacePaths,
    WorkspaceState, WorkspaceSummary,
};
