//! Fixed-point unpacking of a source tree
//!
//! Each round snapshots the files under the source root, then classifies and
//! extracts from that snapshot. Extraction can surface further archives, so
//! rounds repeat until one processes nothing. Resource bounds from
//! [`ExtractionPolicy`] and an external [`CancellationToken`] can end the run
//! early; both are reported as warnings and the partially unpacked tree is
//! left consistent.

use crate::classify::{FileClassifier, FileKind};
use crate::error::{Result, SandboxError};
use crate::extract::{self, ArchiveOutcome, Limit, MemberWriter};
use crate::policy::ExtractionPolicy;
use crate::report::{FileFingerprint, UnpackReport, Warning};
use crate::tree::{QuarantineOutcome, SandboxedTree, TreeEntry};
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use tokio_util::sync::CancellationToken;

/// Drives a [`SandboxedTree`] to convergence.
pub struct Unpacker {
    tree: SandboxedTree,
    classifier: FileClassifier,
    policy: ExtractionPolicy,
    cancel: CancellationToken,
    known_unextractable: HashSet<FileFingerprint>,
}

/// What a single file contributed to the current round.
enum FileStep {
    Processed,
    Skipped,
    Stop,
}

impl Unpacker {
    #[must_use]
    pub fn new(tree: SandboxedTree, policy: ExtractionPolicy) -> Self {
        Self {
            tree,
            classifier: FileClassifier::new(),
            policy,
            cancel: CancellationToken::new(),
            known_unextractable: HashSet::new(),
        }
    }

    /// Stop between members once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Files reported as unextractable by an earlier run. They are skipped
    /// silently while unchanged.
    #[must_use]
    pub fn skip_known(mut self, fingerprints: impl IntoIterator<Item = FileFingerprint>) -> Self {
        self.known_unextractable.extend(fingerprints);
        self
    }

    #[must_use]
    pub fn tree(&self) -> &SandboxedTree {
        &self.tree
    }

    /// Unpack until a round processes no archive.
    ///
    /// Permissions are not touched; see [`crate::security::normalize_permissions`].
    ///
    /// # Errors
    /// Only fatal filesystem failures are returned. Corrupt archives, hostile
    /// members and exceeded bounds end up in [`UnpackReport::warnings`].
    pub fn unpack(&self) -> Result<UnpackReport> {
        let mut report = UnpackReport::default();
        // Files given up on during this run, so later rounds skip them
        let mut settled: HashSet<FileFingerprint> = HashSet::new();

        'rounds: loop {
            let snapshot = self.tree.snapshot_files()?;
            let mut processed = 0u32;

            for entry in &snapshot {
                if self.cancel.is_cancelled() {
                    self.cancelled(&mut report);
                    break 'rounds;
                }

                match self.process_file(entry, &mut report, &mut settled)? {
                    FileStep::Processed => processed += 1,
                    FileStep::Skipped => {}
                    FileStep::Stop => break 'rounds,
                }
            }

            if processed == 0 {
                break;
            }

            report.rounds += 1;
            tracing::debug!(
                "Unpack round {} processed {} archive(s) under {}",
                report.rounds,
                processed,
                self.tree.source_root().display()
            );
        }

        tracing::info!(
            rounds = report.rounds,
            archives = report.archives_processed,
            bytes = report.extracted_bytes,
            aborted = report.aborted,
            cancelled = report.cancelled,
            "Unpack finished for {}",
            self.tree.source_root().display()
        );

        Ok(report)
    }

    /// Run [`Unpacker::unpack`] on the blocking thread pool.
    ///
    /// # Errors
    /// As [`Unpacker::unpack`], plus [`SandboxError::TaskFailed`] if the
    /// worker panics.
    pub async fn unpack_blocking(self) -> Result<UnpackReport> {
        tokio::task::spawn_blocking(move || self.unpack())
            .await
            .map_err(|e| SandboxError::TaskFailed {
                message: e.to_string(),
            })?
    }

    fn process_file(
        &self,
        entry: &TreeEntry,
        report: &mut UnpackReport,
        settled: &mut HashSet<FileFingerprint>,
    ) -> Result<FileStep> {
        let fingerprint = entry.fingerprint();
        if settled.contains(&fingerprint) {
            return Ok(FileStep::Skipped);
        }
        if self.known_unextractable.contains(&fingerprint) {
            settled.insert(fingerprint.clone());
            report.unextractable.push(fingerprint);
            return Ok(FileStep::Skipped);
        }

        let public = entry.public_path();
        let kind = self.classifier.classify(&entry.path);

        if matches!(kind, FileKind::Regular | FileKind::Directory) {
            return Ok(FileStep::Skipped);
        }

        match kind {
            FileKind::Unreadable => {
                settled.insert(fingerprint.clone());
                report.unextractable.push(fingerprint);
                report.record(
                    Warning::warning(format!("Unable to read {public}; it was left unchanged."))
                        .at(public),
                );
                return Ok(FileStep::Skipped);
            }
            FileKind::LegacyCompress => {
                settled.insert(fingerprint.clone());
                report.unextractable.push(fingerprint);
                report.record(
                    Warning::warning(format!(
                        "{public} is compressed with the legacy 'compress' format, which we cannot unpack. Please decompress it and upload again."
                    ))
                    .at(public),
                );
                return Ok(FileStep::Skipped);
            }
            FileKind::Gzip | FileKind::Bzip2 => match self.classifier.wraps_tar(&entry.path, kind) {
                Ok(true) => {}
                // bzip2 uploads are only ever tarballs
                Ok(false) if kind == FileKind::Bzip2 => {
                    self.corrupt(entry, "bzip2 stream does not contain a tar archive", report, settled);
                    return Ok(FileStep::Skipped);
                }
                // a compressed single file, not a container
                Ok(false) => return Ok(FileStep::Skipped),
                Err(e) => {
                    self.corrupt(entry, &e.to_string(), report, settled);
                    return Ok(FileStep::Skipped);
                }
            },
            _ => {}
        }

        if report.rounds >= self.policy.max_rounds {
            self.limit_exceeded(Limit::Rounds, &public, report);
            return Ok(FileStep::Stop);
        }

        let file = match File::open(&entry.path) {
            Ok(file) => BufReader::new(file),
            Err(e) => {
                self.corrupt(entry, &e.to_string(), report, settled);
                return Ok(FileStep::Skipped);
            }
        };

        tracing::debug!(archive = %public, "Unpacking {} archive", kind);

        let mut warnings = Vec::new();
        let mut extracted_bytes = report.extracted_bytes;
        let (outcome, members) = {
            let mut writer = MemberWriter::new(
                &self.tree,
                &entry.path,
                &self.policy,
                &self.cancel,
                &mut extracted_bytes,
                &mut warnings,
            );
            let outcome = match kind {
                FileKind::Tar => extract::tar::unpack(file, &mut writer)?,
                FileKind::Gzip => extract::tar::unpack(MultiGzDecoder::new(file), &mut writer)?,
                FileKind::Bzip2 => extract::tar::unpack(BzDecoder::new(file), &mut writer)?,
                FileKind::Zip => extract::zip::unpack(file, &mut writer)?,
                _ => return Ok(FileStep::Skipped),
            };
            (outcome, writer.members_extracted)
        };

        report.extracted_bytes = extracted_bytes;
        report.members_extracted += members;
        report.warnings.extend(warnings);

        match outcome {
            ArchiveOutcome::Completed => {
                match self.tree.quarantine(&entry.path)? {
                    QuarantineOutcome::Moved => {
                        tracing::debug!(archive = %public, "Moved archive to removed directory");
                    }
                    QuarantineOutcome::Discarded => {
                        tracing::debug!(archive = %public, "Archive already in removed directory");
                    }
                }
                report.archives_processed += 1;
                Ok(FileStep::Processed)
            }
            ArchiveOutcome::Corrupt(detail) => {
                self.corrupt(entry, &detail, report, settled);
                Ok(FileStep::Skipped)
            }
            ArchiveOutcome::Cancelled => {
                self.cancelled(report);
                Ok(FileStep::Stop)
            }
            ArchiveOutcome::LimitExceeded(limit) => {
                self.limit_exceeded(limit, &public, report);
                Ok(FileStep::Stop)
            }
        }
    }

    fn limit_exceeded(&self, limit: Limit, public: &str, report: &mut UnpackReport) {
        report.aborted = true;
        let message = match limit {
            Limit::Rounds => format!(
                "Archives are nested more than {} levels deep; {} and any remaining archives were left unextracted.",
                self.policy.max_rounds, public
            ),
            Limit::Bytes => format!(
                "Unpacking {} would exceed the limit of {} extracted bytes; unpacking stopped.",
                public, self.policy.max_extracted_bytes
            ),
            Limit::Members => format!(
                "{} contains more than {} entries; unpacking stopped.",
                public, self.policy.max_members_per_archive
            ),
        };
        report.record(Warning::error(message).at(public));
    }

    fn corrupt(
        &self,
        entry: &TreeEntry,
        detail: &str,
        report: &mut UnpackReport,
        settled: &mut HashSet<FileFingerprint>,
    ) {
        let fingerprint = entry.fingerprint();
        settled.insert(fingerprint.clone());
        report.unextractable.push(fingerprint);
        let public = entry.public_path();
        report.record(
            Warning::warning(format!(
                "There were problems unpacking \"{public}\" -- continuing. Please try again and confirm your files."
            ))
            .at(public.clone()),
        );
        report.record(Warning::warning(format!("Archive error message: {detail}")).at(public));
    }

    fn cancelled(&self, report: &mut UnpackReport) {
        report.cancelled = true;
        report.record(Warning::error(
            "Unpacking was cancelled before completion; remaining archives were left in place.",
        ));
    }
}
