//! Workspace record persistence

pub mod json;
pub mod traits;

pub use json::JsonWorkspaceRepository;
pub use traits::WorkspaceRepository;
