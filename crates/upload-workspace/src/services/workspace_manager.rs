//! Workspace lifecycle and content operations
//!
//! Every mutating operation holds the workspace's exclusive lock from the
//! first read of its record until the record is saved again. Reads take the
//! same lock so they never observe a half-unpacked tree.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use upload_sandbox::{ExtractionPolicy, SandboxedTree};

use super::content::{ContentHandle, package_source};
use super::locks::WorkspaceLocks;
use crate::audit::{AuditLevel, AuditLog};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::ingestor::{IngestorService, list_files};
use crate::models::{
    IngestionSummary, LifecycleAction, UploadedFile, Workspace, WorkspacePaths, WorkspaceState,
    WorkspaceSummary,
};
use crate::repositories::{JsonWorkspaceRepository, WorkspaceRepository};

/// A workspace record loaded under its lock.
struct Locked {
    workspace: Workspace,
    paths: WorkspacePaths,
    _guard: OwnedMutexGuard<()>,
}

pub struct WorkspaceManager {
    base_directory: PathBuf,
    repository: Arc<dyn WorkspaceRepository>,
    ingestor: IngestorService,
    audit: AuditLog,
    locks: WorkspaceLocks,
    shutdown: CancellationToken,
}

impl WorkspaceManager {
    pub fn new(base_directory: impl Into<PathBuf>, policy: ExtractionPolicy) -> Self {
        let base_directory = base_directory.into();
        let repository = Arc::new(JsonWorkspaceRepository::new(&base_directory));
        Self::with_repository(base_directory, policy, repository)
    }

    pub fn with_repository(
        base_directory: impl Into<PathBuf>,
        policy: ExtractionPolicy,
        repository: Arc<dyn WorkspaceRepository>,
    ) -> Self {
        let base_directory = base_directory.into();
        Self {
            audit: AuditLog::new(&base_directory),
            base_directory,
            repository,
            ingestor: IngestorService::new(policy),
            locks: WorkspaceLocks::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage.base_directory, config.ingestion.policy())
    }

    /// Number of ids with a live lock registry entry.
    pub async fn tracked_locks(&self) -> usize {
        self.locks.tracked().await
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    /// Cancelling this token stops running ingestions between archive members.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn paths(&self, upload_id: u64) -> WorkspacePaths {
        WorkspacePaths::new(&self.base_directory, upload_id)
    }

    /// Lock and load a workspace that has not been deleted.
    async fn lock_live(&self, upload_id: u64) -> AppResult<Locked> {
        let guard = self.locks.acquire(upload_id).await;
        let workspace = self
            .repository
            .load(upload_id)
            .await?
            .filter(|w| w.state != WorkspaceState::Deleted)
            .ok_or_else(|| AppError::not_found("upload", upload_id))?;
        Ok(Locked {
            workspace,
            paths: self.paths(upload_id),
            _guard: guard,
        })
    }

    /// Lock and load a workspace that accepts changes.
    async fn lock_active(&self, upload_id: u64, action: &str) -> AppResult<Locked> {
        let locked = self.lock_live(upload_id).await?;
        if !locked.workspace.state.is_mutable() {
            return Err(AppError::conflict(upload_id, action, locked.workspace.state));
        }
        Ok(locked)
    }

    async fn open_tree(paths: &WorkspacePaths) -> AppResult<SandboxedTree> {
        let (source, removed) = (paths.source.clone(), paths.removed.clone());
        Ok(tokio::task::spawn_blocking(move || SandboxedTree::open(source, removed)).await??)
    }

    async fn summarize(workspace: &Workspace, paths: &WorkspacePaths) -> AppResult<WorkspaceSummary> {
        let tree = Self::open_tree(paths).await?;
        let files = tokio::task::spawn_blocking(move || list_files(&tree)).await??;
        Ok(WorkspaceSummary::new(workspace, files))
    }

    async fn persist(&self, locked: &mut Locked) -> AppResult<()> {
        locked.workspace.touch();
        self.repository.save(&locked.workspace).await
    }

    async fn log(&self, locked: &Locked, level: AuditLevel, message: &str) -> AppResult<()> {
        self.audit
            .source(&locked.paths.source_log, locked.workspace.upload_id, level, message)
            .await
    }

    /// Create a new workspace from a first upload.
    pub async fn create_workspace(
        &self,
        file: UploadedFile,
        archive_hint: Option<String>,
        owner: &str,
    ) -> AppResult<WorkspaceSummary> {
        let upload_id = self.repository.next_id().await?;
        let guard = self.locks.acquire(upload_id).await;
        let workspace = Workspace::new(upload_id, owner);
        self.repository.save(&workspace).await?;

        let mut locked = Locked {
            workspace,
            paths: self.paths(upload_id),
            _guard: guard,
        };
        self.log(&locked, AuditLevel::Info, &format!("Created workspace for {owner}"))
            .await?;
        self.audit
            .service(Some(upload_id), AuditLevel::Info, &format!("Created workspace for {owner}"))
            .await?;
        info!(upload_id = %upload_id, owner = %owner, "Created workspace");

        self.upload(&mut locked, file, archive_hint, owner, false).await
    }

    /// Add a file to an existing workspace and re-run ingestion.
    pub async fn add_to_workspace(
        &self,
        upload_id: u64,
        file: UploadedFile,
        archive_hint: Option<String>,
        owner: &str,
        ancillary: bool,
    ) -> AppResult<WorkspaceSummary> {
        let mut locked = self.lock_active(upload_id, "upload to").await?;
        self.upload(&mut locked, file, archive_hint, owner, ancillary).await
    }

    async fn upload(
        &self,
        locked: &mut Locked,
        file: UploadedFile,
        archive_hint: Option<String>,
        owner: &str,
        ancillary: bool,
    ) -> AppResult<WorkspaceSummary> {
        let upload_id = locked.workspace.upload_id;
        {
            let workspace = &mut locked.workspace;
            workspace.last_upload_started_at = Some(Utc::now());
            workspace.archive_hint = archive_hint;
            workspace.last_upload_warnings_from = workspace.warnings.len();
        }
        self.persist(locked).await?;
        self.log(
            locked,
            AuditLevel::Info,
            &format!("Upload of {} ({} bytes) by {owner}", file.filename, file.size()),
        )
        .await?;

        let tree = Self::open_tree(&locked.paths).await?;
        let mut warnings = self.ingestor.deposit(&tree, &file, ancillary).await?;

        let known = locked.workspace.unextractable.clone();
        let outcome = self
            .ingestor
            .ingest(tree.clone(), known, self.shutdown.child_token())
            .await?;
        warnings.extend(outcome.warnings);

        self.audit
            .warnings(&locked.paths.source_log, upload_id, &warnings)
            .await?;

        let files = tokio::task::spawn_blocking(move || list_files(&tree)).await??;
        {
            let workspace = &mut locked.workspace;
            workspace.warnings.extend(warnings);
            workspace.unextractable = outcome.report.unextractable.clone();
            workspace.last_ingestion = Some(IngestionSummary::from(&outcome.report));
            workspace.last_upload_file_summary = files.clone();
            workspace.last_upload_completed_at = Some(Utc::now());
        }
        self.persist(locked).await?;

        let status = locked.workspace.upload_status();
        let message = format!("Upload complete: {} files, status {status}", files.len());
        self.log(locked, AuditLevel::Info, &message).await?;
        self.audit
            .service(Some(upload_id), AuditLevel::Info, &message)
            .await?;
        info!(
            upload_id = %upload_id,
            files = files.len(),
            permissions_fixed = outcome.permissions.files + outcome.permissions.directories,
            status = %status,
            "Upload ingested"
        );

        Ok(WorkspaceSummary::new(&locked.workspace, files))
    }

    pub async fn get_summary(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        let locked = self.lock_live(upload_id).await?;
        Self::summarize(&locked.workspace, &locked.paths).await
    }

    /// Delete one file from the source tree.
    pub async fn delete_file(&self, upload_id: u64, relative_path: &str) -> AppResult<WorkspaceSummary> {
        let mut locked = self.lock_active(upload_id, "delete files from").await?;
        let tree = Self::open_tree(&locked.paths).await?;
        let target = tree
            .resolve(relative_path)
            .map_err(|e| AppError::validation(e.to_string()))?;

        match tokio::fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => {
                return Err(AppError::validation(format!("'{relative_path}' is a directory")));
            }
            Ok(_) => tokio::fs::remove_file(&target).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found("file", relative_path));
            }
            Err(e) => return Err(e.into()),
        }

        self.persist(&mut locked).await?;
        self.log(&locked, AuditLevel::Info, &format!("Deleted file {relative_path}"))
            .await?;
        info!(upload_id = %upload_id, path = %relative_path, "Deleted file");
        Self::summarize(&locked.workspace, &locked.paths).await
    }

    /// Remove every file from the source tree, keeping the tree itself.
    pub async fn delete_all_files(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        let mut locked = self.lock_active(upload_id, "delete files from").await?;
        let tree = Self::open_tree(&locked.paths).await?;
        let removed = tokio::task::spawn_blocking(move || tree.clear()).await??;

        self.persist(&mut locked).await?;
        self.log(&locked, AuditLevel::Info, &format!("Deleted all files ({removed} entries)"))
            .await?;
        info!(upload_id = %upload_id, removed, "Deleted all files");
        Self::summarize(&locked.workspace, &locked.paths).await
    }

    /// Purge a workspace. Only a tombstone record remains, so the id is never
    /// reused and later operations report it as missing.
    pub async fn delete_workspace(&self, upload_id: u64) -> AppResult<()> {
        let mut locked = self.lock_live(upload_id).await?;
        let paths = locked.paths.clone();

        for dir in [&paths.source, &paths.removed] {
            match tokio::fs::remove_dir_all(dir).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        for file in [&paths.source_log, &paths.content_package] {
            match tokio::fs::remove_file(file).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        locked.workspace.state = WorkspaceState::Deleted;
        locked.workspace.last_upload_file_summary.clear();
        self.persist(&mut locked).await?;
        drop(locked);
        self.locks.forget_if_idle(upload_id).await;
        self.audit
            .service(Some(upload_id), AuditLevel::Info, "Deleted workspace")
            .await?;
        info!(upload_id = %upload_id, "Deleted workspace");
        Ok(())
    }

    async fn transition(&self, upload_id: u64, action: LifecycleAction) -> AppResult<WorkspaceSummary> {
        let mut locked = self.lock_live(upload_id).await?;
        let from = locked.workspace.state;
        let Some(to) = from.transition(action) else {
            warn!(upload_id = %upload_id, state = %from, action = %action, "Rejected lifecycle transition");
            return Err(AppError::conflict(upload_id, action.to_string(), from));
        };

        locked.workspace.state = to;
        self.persist(&mut locked).await?;

        let message = format!("State changed from {from} to {to}");
        self.log(&locked, AuditLevel::Info, &message).await?;
        self.audit
            .service(Some(upload_id), AuditLevel::Info, &message)
            .await?;
        info!(upload_id = %upload_id, from = %from, to = %to, "Lifecycle transition");
        Self::summarize(&locked.workspace, &locked.paths).await
    }

    pub async fn lock(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        self.transition(upload_id, LifecycleAction::Lock).await
    }

    pub async fn unlock(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        self.transition(upload_id, LifecycleAction::Unlock).await
    }

    pub async fn release(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        self.transition(upload_id, LifecycleAction::Release).await
    }

    pub async fn unrelease(&self, upload_id: u64) -> AppResult<WorkspaceSummary> {
        self.transition(upload_id, LifecycleAction::Unrelease).await
    }

    /// Package the source tree as a gzipped tar.
    pub async fn get_content(&self, upload_id: u64) -> AppResult<ContentHandle> {
        let locked = self.lock_live(upload_id).await?;
        let tree = Self::open_tree(&locked.paths).await?;
        let output = locked.paths.content_package.clone();
        tokio::task::spawn_blocking(move || package_source(&tree, &output)).await?
    }

    pub async fn get_file_content(&self, upload_id: u64, relative_path: &str) -> AppResult<ContentHandle> {
        let locked = self.lock_live(upload_id).await?;
        let tree = Self::open_tree(&locked.paths).await?;
        let target = tree
            .resolve(relative_path)
            .map_err(|e| AppError::validation(e.to_string()))?;

        let is_file = tokio::fs::symlink_metadata(&target)
            .await
            .is_ok_and(|m| m.is_file());
        if !is_file {
            return Err(AppError::not_found("file", relative_path));
        }
        ContentHandle::describe_async(target).await
    }

    pub async fn get_source_log(&self, upload_id: u64) -> AppResult<ContentHandle> {
        let locked = self.lock_live(upload_id).await?;
        if !tokio::fs::try_exists(&locked.paths.source_log).await? {
            return Err(AppError::not_found("source log", upload_id));
        }
        ContentHandle::describe_async(locked.paths.source_log.clone()).await
    }

    pub async fn get_service_log(&self) -> AppResult<ContentHandle> {
        let path = self.audit.service_log_path().to_path_buf();
        if !tokio::fs::try_exists(&path).await? {
            return Err(AppError::not_found("service log", "service"));
        }
        ContentHandle::describe_async(path).await
    }

    pub async fn check_content(&self, upload_id: u64) -> AppResult<String> {
        Ok(self.get_content(upload_id).await?.checksum)
    }

    pub async fn check_file_content(&self, upload_id: u64, relative_path: &str) -> AppResult<String> {
        Ok(self.get_file_content(upload_id, relative_path).await?.checksum)
    }

    pub async fn check_source_log(&self, upload_id: u64) -> AppResult<String> {
        Ok(self.get_source_log(upload_id).await?.checksum)
    }

    pub async fn check_service_log(&self) -> AppResult<String> {
        Ok(self.get_service_log().await?.checksum)
    }

    /// Fail unless `owner` owns the workspace.
    pub async fn authorize(&self, upload_id: u64, owner: &str) -> AppResult<()> {
        let workspace = self
            .repository
            .load(upload_id)
            .await?
            .filter(|w| w.state != WorkspaceState::Deleted)
            .ok_or_else(|| AppError::not_found("upload", upload_id))?;
        if workspace.owner_id != owner {
            warn!(upload_id = %upload_id, owner = %owner, "Ownership check failed");
            return Err(AppError::permission_denied("access", format!("upload {upload_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, WorkspaceManager) {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path(), ExtractionPolicy::default());
        (temp, manager)
    }

    fn tex(name: &str) -> UploadedFile {
        UploadedFile::new(name, b"\\documentclass{article}".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_summarize() {
        let (_temp, manager) = manager();
        let summary = manager
            .create_workspace(tex("main.tex"), Some("tex".into()), "alice")
            .await
            .unwrap();
        assert_eq!(summary.upload_id, 1);
        assert_eq!(summary.state, WorkspaceState::Active);
        assert_eq!(summary.owner_id, "alice");
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].public_filepath, "main.tex");
        assert!(summary.last_upload_completed_at.is_some());

        let again = manager.get_summary(1).await.unwrap();
        assert_eq!(again.files, summary.files);
    }

    #[tokio::test]
    async fn test_locked_workspace_rejects_mutation() {
        let (_temp, manager) = manager();
        manager.create_workspace(tex("main.tex"), None, "alice").await.unwrap();
        manager.lock(1).await.unwrap();

        let err = manager
            .add_to_workspace(1, tex("extra.tex"), None, "alice", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { upload_id: 1, .. }));
        assert!(matches!(
            manager.delete_file(1, "main.tex").await,
            Err(AppError::Conflict { .. })
        ));
        assert_eq!(manager.get_summary(1).await.unwrap().files.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_conflict() {
        let (_temp, manager) = manager();
        manager.create_workspace(tex("main.tex"), None, "alice").await.unwrap();
        assert!(matches!(manager.unlock(1).await, Err(AppError::Conflict { .. })));
        assert_eq!(manager.get_summary(1).await.unwrap().state, WorkspaceState::Active);
    }

    #[tokio::test]
    async fn test_authorize() {
        let (_temp, manager) = manager();
        manager.create_workspace(tex("main.tex"), None, "alice").await.unwrap();
        assert!(manager.authorize(1, "alice").await.is_ok());
        assert!(matches!(
            manager.authorize(1, "mallory").await,
            Err(AppError::PermissionDenied { .. })
        ));
        assert!(matches!(manager.authorize(9, "alice").await, Err(AppError::NotFound { .. })));
    }
}
