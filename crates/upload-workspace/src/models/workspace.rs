use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use upload_sandbox::{FileFingerprint, FileKind, Severity, UnpackReport, Warning};

/// Lifecycle state of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceState {
    Active,
    Locked,
    Released,
    Deleted,
}

/// Reversible lifecycle transitions. Deletion is handled separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleAction {
    Lock,
    Unlock,
    Release,
    Unrelease,
}

impl WorkspaceState {
    /// Target state for `action`, or `None` if the transition is not allowed.
    pub fn transition(self, action: LifecycleAction) -> Option<Self> {
        match (self, action) {
            (Self::Active | Self::Released, LifecycleAction::Lock) => Some(Self::Locked),
            (Self::Locked, LifecycleAction::Unlock) => Some(Self::Active),
            (Self::Active, LifecycleAction::Release) => Some(Self::Released),
            (Self::Released, LifecycleAction::Unrelease) => Some(Self::Active),
            _ => None,
        }
    }

    pub fn is_mutable(self) -> bool {
        self == Self::Active
    }
}

/// Outcome of the most recent upload, derived from its warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Ready,
    ReadyWithWarnings,
    Errors,
}

/// A file under the source root, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedFile {
    /// Relative to the workspace root, e.g. `source/figs/a.eps`
    pub relative_path: String,
    /// Relative to the source root, as shown to clients
    pub public_filepath: String,
    pub size: u64,
    pub detected_kind: FileKind,
    pub content_checksum: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub is_ancillary: bool,
}

/// Counters from the last unpack run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub rounds: u32,
    pub archives_processed: u64,
    pub members_extracted: u64,
    pub extracted_bytes: u64,
    pub aborted: bool,
    pub cancelled: bool,
}

impl From<&UnpackReport> for IngestionSummary {
    fn from(report: &UnpackReport) -> Self {
        Self {
            rounds: report.rounds,
            archives_processed: report.archives_processed,
            members_extracted: report.members_extracted,
            extracted_bytes: report.extracted_bytes,
            aborted: report.aborted,
            cancelled: report.cancelled,
        }
    }
}

/// Persisted workspace record (`workspace.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub upload_id: u64,
    pub owner_id: String,
    pub state: WorkspaceState,
    #[serde(default)]
    pub archive_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub last_upload_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_upload_completed_at: Option<DateTime<Utc>>,
    /// Every warning ever recorded, in recording order
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Index into `warnings` where the most recent upload began
    #[serde(default)]
    pub last_upload_warnings_from: usize,
    #[serde(default)]
    pub last_upload_file_summary: Vec<ManagedFile>,
    #[serde(default)]
    pub last_ingestion: Option<IngestionSummary>,
    /// Files a previous run could not unpack
    #[serde(default)]
    pub unextractable: Vec<FileFingerprint>,
}

impl Workspace {
    pub fn new(upload_id: u64, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            upload_id,
            owner_id: owner_id.into(),
            state: WorkspaceState::Active,
            archive_hint: None,
            created_at: now,
            modified_at: now,
            last_upload_started_at: None,
            last_upload_completed_at: None,
            warnings: Vec::new(),
            last_upload_warnings_from: 0,
            last_upload_file_summary: Vec::new(),
            last_ingestion: None,
            unextractable: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    pub fn last_upload_warnings(&self) -> &[Warning] {
        self.warnings
            .get(self.last_upload_warnings_from..)
            .unwrap_or_default()
    }

    pub fn upload_status(&self) -> UploadStatus {
        let recent = self.last_upload_warnings();
        if recent.iter().any(|w| w.severity == Severity::Error) {
            UploadStatus::Errors
        } else if recent.is_empty() {
            UploadStatus::Ready
        } else {
            UploadStatus::ReadyWithWarnings
        }
    }
}

/// On-disk layout of one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub source: PathBuf,
    pub removed: PathBuf,
    pub source_log: PathBuf,
    pub metadata: PathBuf,
    pub content_package: PathBuf,
}

impl WorkspacePaths {
    pub fn new(base_directory: &Path, upload_id: u64) -> Self {
        let root = base_directory.join(upload_id.to_string());
        Self {
            source: root.join("source"),
            removed: root.join("removed"),
            source_log: root.join("source.log"),
            metadata: root.join("workspace.json"),
            content_package: root.join("content.tar.gz"),
            root,
        }
    }
}

/// Client view of a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub upload_id: u64,
    pub owner_id: String,
    pub state: WorkspaceState,
    pub archive_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub last_upload_started_at: Option<DateTime<Utc>>,
    pub last_upload_completed_at: Option<DateTime<Utc>>,
    pub upload_status: UploadStatus,
    pub files: Vec<ManagedFile>,
    pub warnings: Vec<Warning>,
    pub ingestion: Option<IngestionSummary>,
}

impl WorkspaceSummary {
    pub fn new(workspace: &Workspace, files: Vec<ManagedFile>) -> Self {
        Self {
            upload_id: workspace.upload_id,
            owner_id: workspace.owner_id.clone(),
            state: workspace.state,
            archive_hint: workspace.archive_hint.clone(),
            created_at: workspace.created_at,
            modified_at: workspace.modified_at,
            last_upload_started_at: workspace.last_upload_started_at,
            last_upload_completed_at: workspace.last_upload_completed_at,
            upload_status: workspace.upload_status(),
            files,
            warnings: workspace.warnings.clone(),
            ingestion: workspace.last_ingestion.clone(),
        }
    }
}
