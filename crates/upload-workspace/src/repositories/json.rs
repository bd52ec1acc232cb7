//! `workspace.json` backed repository

use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::WorkspaceRepository;
use crate::errors::{AppError, AppResult};
use crate::models::{Workspace, WorkspacePaths};

/// Stores each workspace record as JSON inside its own directory under the
/// base directory. Directory names are the decimal upload ids.
pub struct JsonWorkspaceRepository {
    base_directory: PathBuf,
    id_allocation: Mutex<()>,
}

impl JsonWorkspaceRepository {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            id_allocation: Mutex::new(()),
        }
    }

    fn paths(&self, upload_id: u64) -> WorkspacePaths {
        WorkspacePaths::new(&self.base_directory, upload_id)
    }
}

fn scan_ids(base_directory: &Path) -> std::io::Result<Vec<u64>> {
    let mut ids = Vec::new();
    let entries = match std::fs::read_dir(base_directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(id) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
            .filter(|id| *id > 0)
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn write_atomically(target: &Path, contents: &[u8]) -> AppResult<()> {
    let dir = target.parent().ok_or_else(|| {
        AppError::internal(format!("{} has no parent directory", target.display()))
    })?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl WorkspaceRepository for JsonWorkspaceRepository {
    async fn load(&self, upload_id: u64) -> AppResult<Option<Workspace>> {
        let path = self.paths(upload_id).metadata;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, workspace: &Workspace) -> AppResult<()> {
        let paths = self.paths(workspace.upload_id);
        let contents = serde_json::to_vec_pretty(workspace)?;
        tokio::fs::create_dir_all(&paths.root).await?;
        tokio::task::spawn_blocking(move || write_atomically(&paths.metadata, &contents)).await??;
        debug!(upload_id = %workspace.upload_id, "Saved workspace record");
        Ok(())
    }

    async fn list_ids(&self) -> AppResult<Vec<u64>> {
        let base = self.base_directory.clone();
        Ok(tokio::task::spawn_blocking(move || scan_ids(&base)).await??)
    }

    async fn next_id(&self) -> AppResult<u64> {
        let _guard = self.id_allocation.lock().await;
        tokio::fs::create_dir_all(&self.base_directory).await?;

        let mut candidate = self.list_ids().await?.last().copied().unwrap_or(0) + 1;
        loop {
            match tokio::fs::create_dir(self.paths(candidate).root).await {
                Ok(()) => {
                    debug!(upload_id = %candidate, "Reserved upload id");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => candidate += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_record_loads_as_none() {
        let temp = TempDir::new().unwrap();
        let repo = JsonWorkspaceRepository::new(temp.path());
        assert!(repo.load(7).await.unwrap().is_none());
        assert!(repo.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let repo = JsonWorkspaceRepository::new(temp.path());

        let id = repo.next_id().await.unwrap();
        let mut workspace = Workspace::new(id, "owner-1");
        workspace.archive_hint = Some("tex".to_string());
        repo.save(&workspace).await.unwrap();

        let loaded = repo.load(id).await.unwrap().unwrap();
        assert_eq!(loaded, workspace);
        assert!(temp.path().join("1/workspace.json").is_file());
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_skip_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("41")).unwrap();
        std::fs::create_dir(temp.path().join("not-an-id")).unwrap();
        std::fs::write(temp.path().join("99"), b"file, not a workspace").unwrap();

        let repo = JsonWorkspaceRepository::new(temp.path());
        assert_eq!(repo.next_id().await.unwrap(), 42);
        assert_eq!(repo.next_id().await.unwrap(), 43);
        assert_eq!(repo.list_ids().await.unwrap(), vec![41, 42, 43]);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let temp = TempDir::new().unwrap();
        let repo = std::sync::Arc::new(JsonWorkspaceRepository::new(temp.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.next_id().await.unwrap() }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
    }
}
