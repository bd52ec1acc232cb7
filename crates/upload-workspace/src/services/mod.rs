//! Workspace services

pub mod content;
pub mod locks;
pub mod workspace_manager;

pub use content::{ContentHandle, package_source};
pub use locks::WorkspaceLocks;
pub use workspace_manager::WorkspaceManager;
