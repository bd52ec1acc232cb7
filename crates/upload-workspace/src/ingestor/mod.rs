//! Upload ingestion: deposit a payload, unpack it, tidy the result.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use upload_sandbox::{
    ExtractionPolicy, FileClassifier, FileFingerprint, PermissionSummary, SandboxedTree,
    UnpackReport, Unpacker, Warning, normalize_permissions,
};

use crate::errors::{AppError, AppResult};
use crate::models::{ManagedFile, UploadedFile};
use crate::utils::checksum_file;

pub mod checks;

pub use checks::{ANCILLARY_DIR, check_tree};

/// Everything one ingestion run produced.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub report: UnpackReport,
    /// Unpack warnings followed by post-unpack check warnings
    pub warnings: Vec<Warning>,
    pub permissions: PermissionSummary,
}

pub struct IngestorService {
    policy: ExtractionPolicy,
}

impl IngestorService {
    pub fn new(policy: ExtractionPolicy) -> Self {
        Self { policy }
    }

    /// Write an uploaded payload into the source tree, or its ancillary
    /// directory, replacing any file of the same name.
    pub async fn deposit(
        &self,
        tree: &SandboxedTree,
        file: &UploadedFile,
        ancillary: bool,
    ) -> AppResult<Vec<Warning>> {
        let mut warnings = Vec::new();
        if file.was_renamed() {
            let warning = Warning::warning(format!(
                "Cleaned filename: {} ({})",
                file.original_filename, file.filename
            ))
            .at(&file.filename);
            warning.trace();
            warnings.push(warning);
        }

        let relative = if ancillary {
            format!("{ANCILLARY_DIR}/{}", file.filename)
        } else {
            file.filename.clone()
        };
        let target = tree.resolve(&relative)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::symlink_metadata(&target)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(AppError::validation(format!(
                "Cannot replace directory '{relative}' with an uploaded file"
            )));
        }

        tokio::fs::write(&target, &file.content).await?;
        debug!(path = %relative, size = file.size(), "Deposited upload");
        Ok(warnings)
    }

    /// Unpack everything under the tree, run the file checks and normalize
    /// permissions. Runs on the blocking pool.
    pub async fn ingest(
        &self,
        tree: SandboxedTree,
        known_unextractable: Vec<FileFingerprint>,
        cancel: CancellationToken,
    ) -> AppResult<IngestionOutcome> {
        let policy = self.policy;
        tokio::task::spawn_blocking(move || -> AppResult<IngestionOutcome> {
            let report = Unpacker::new(tree.clone(), policy)
                .with_cancellation(cancel)
                .skip_known(known_unextractable)
                .unpack()?;

            let mut warnings = report.warnings.clone();
            let check_warnings = check_tree(&tree)?;
            for warning in &check_warnings {
                warning.trace();
            }
            warnings.extend(check_warnings);

            let permissions = normalize_permissions(tree.source_root())?;
            info!(
                rounds = report.rounds,
                archives = report.archives_processed,
                bytes = report.extracted_bytes,
                warnings = warnings.len(),
                "Ingestion finished"
            );
            Ok(IngestionOutcome {
                report,
                warnings,
                permissions,
            })
        })
        .await?
    }
}

/// Describe every regular file currently under the source root.
/// Blocking; reads each file to checksum it.
pub fn list_files(tree: &SandboxedTree) -> AppResult<Vec<ManagedFile>> {
    let classifier = FileClassifier::new();
    let ancillary_prefix = format!("{ANCILLARY_DIR}/");

    tree.snapshot_files()?
        .into_iter()
        .map(|entry| -> AppResult<ManagedFile> {
            let public_filepath = entry.public_path();
            Ok(ManagedFile {
                relative_path: format!("source/{public_filepath}"),
                is_ancillary: public_filepath.starts_with(&ancillary_prefix),
                size: entry.size,
                detected_kind: classifier.classify(&entry.path),
                content_checksum: checksum_file(&entry.path)?,
                modified_at: entry.modified.map(DateTime::<Utc>::from),
                public_filepath,
            })
        })
        .collect()
}
