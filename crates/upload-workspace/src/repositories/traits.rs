//! Repository trait definitions

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::Workspace;

/// Storage for workspace records.
///
/// Implementations own the mapping from `upload_id` to a persisted
/// [`Workspace`]. Tombstoned workspaces stay loadable so their ids are never
/// handed out again.
#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    /// Load a workspace record
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Workspace))` - Record found
    /// * `Ok(None)` - No record for this id
    async fn load(&self, upload_id: u64) -> AppResult<Option<Workspace>>;

    /// Persist a workspace record, replacing any previous version atomically
    async fn save(&self, workspace: &Workspace) -> AppResult<()>;

    /// All known ids in ascending order
    async fn list_ids(&self) -> AppResult<Vec<u64>>;

    /// Reserve the next unused id
    async fn next_id(&self) -> AppResult<u64>;
}
