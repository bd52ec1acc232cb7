//! Member-by-member extraction into a sandboxed tree.
//!
//! Archive readers only enumerate members; all writing goes through
//! [`MemberWriter`], which applies the sanitizer, checks for conflicts with
//! what is already on disk and charges the byte budget.

pub(crate) mod tar;
pub(crate) mod zip;

use crate::error::Result;
use crate::policy::ExtractionPolicy;
use crate::report::Warning;
use crate::sanitize::{ArchiveMember, Decision, EntryKind, EntrySanitizer};
use crate::security::validate_path_within_sandbox;
use crate::tree::SandboxedTree;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Which resource bound stopped a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Limit {
    Rounds,
    Bytes,
    Members,
}

/// Result of processing one archive. Fatal I/O is returned as `Err` instead.
#[derive(Debug)]
pub(crate) enum ArchiveOutcome {
    /// Every member was either extracted or rejected with a warning
    Completed,
    /// The container could not be read; already-written members stay
    Corrupt(String),
    Cancelled,
    LimitExceeded(Limit),
}

/// Control flow after a single member.
pub(crate) enum MemberStep {
    Continue,
    Stop(ArchiveOutcome),
}

/// Writes sanitized members of one archive.
pub(crate) struct MemberWriter<'a> {
    tree: &'a SandboxedTree,
    sanitizer: EntrySanitizer,
    archive_path: &'a Path,
    archive_public: String,
    policy: &'a ExtractionPolicy,
    cancel: &'a CancellationToken,
    /// Bytes written in this run, across archives
    extracted_bytes: &'a mut u64,
    warnings: &'a mut Vec<Warning>,
    members_seen: u64,
    pub(crate) members_extracted: u64,
}

impl<'a> MemberWriter<'a> {
    pub(crate) fn new(
        tree: &'a SandboxedTree,
        archive_path: &'a Path,
        policy: &'a ExtractionPolicy,
        cancel: &'a CancellationToken,
        extracted_bytes: &'a mut u64,
        warnings: &'a mut Vec<Warning>,
    ) -> Self {
        let relative = archive_path
            .strip_prefix(tree.source_root())
            .unwrap_or(archive_path);
        let archive_dir = relative.parent().unwrap_or_else(|| Path::new(""));

        Self {
            tree,
            sanitizer: EntrySanitizer::new(archive_dir),
            archive_path,
            archive_public: tree.public_path_of(archive_path),
            policy,
            cancel,
            extracted_bytes,
            warnings,
            members_seen: 0,
            members_extracted: 0,
        }
    }

    /// Checks run before a member is even read.
    pub(crate) fn before_member(&mut self) -> Option<ArchiveOutcome> {
        if self.cancel.is_cancelled() {
            return Some(ArchiveOutcome::Cancelled);
        }
        self.members_seen += 1;
        if self.members_seen > self.policy.max_members_per_archive {
            return Some(ArchiveOutcome::LimitExceeded(Limit::Members));
        }
        None
    }

    /// Sanitize and write one member, reading its data from `data`.
    pub(crate) fn write_member(
        &mut self,
        member: &ArchiveMember,
        data: &mut dyn Read,
    ) -> Result<MemberStep> {
        let target = match self.sanitizer.decide(member) {
            Decision::Accept { target } => target,
            Decision::Reject(reason) => {
                tracing::debug!(
                    archive = %self.archive_public,
                    "Rejected member '{}': {}",
                    member.name,
                    reason
                );
                self.warn(reason.warning_for(&member.name));
                return Ok(MemberStep::Continue);
            }
        };

        let destination = self.tree.source_root().join(&target);
        if let Some(conflict) = self.conflict(&target, &destination, member.entry_kind) {
            self.warn(format!("Cannot extract '{}': {}.", member.name, conflict));
            return Ok(MemberStep::Continue);
        }

        if member.entry_kind == EntryKind::Directory {
            fs::create_dir_all(&destination)?;
            return Ok(MemberStep::Continue);
        }

        let parent = destination
            .parent()
            .unwrap_or_else(|| self.tree.source_root())
            .to_path_buf();
        fs::create_dir_all(&parent)?;

        // Lexical checks passed; confirm against the real filesystem as well
        if validate_path_within_sandbox(&destination, self.tree.source_root()).is_err() {
            self.warn(crate::sanitize::RejectReason::EscapesWorkspace.warning_for(&member.name));
            return Ok(MemberStep::Continue);
        }

        match self.copy_into(data, &parent, &destination)? {
            Copied::Done(bytes) => {
                tracing::debug!(
                    archive = %self.archive_public,
                    "Extracted '{}' ({} bytes)",
                    target.display(),
                    bytes
                );
                self.members_extracted += 1;
                Ok(MemberStep::Continue)
            }
            Copied::ReadFailed(e) => Ok(MemberStep::Stop(ArchiveOutcome::Corrupt(e.to_string()))),
            Copied::OverBudget => Ok(MemberStep::Stop(ArchiveOutcome::LimitExceeded(Limit::Bytes))),
        }
    }

    /// Existing filesystem state that prevents writing `target`.
    fn conflict(&self, target: &Path, destination: &Path, kind: EntryKind) -> Option<&'static str> {
        if destination == self.archive_path {
            return Some("it would overwrite the archive being unpacked");
        }

        let mut ancestor = self.tree.source_root().to_path_buf();
        let components: Vec<_> = target.components().collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            ancestor.push(component);
            if let Ok(metadata) = fs::symlink_metadata(&ancestor)
                && !metadata.is_dir()
            {
                return Some("a file with the name of one of its directories already exists");
            }
        }

        match fs::symlink_metadata(destination) {
            Ok(metadata) if kind == EntryKind::Directory && !metadata.is_dir() => {
                Some("a file with that name already exists")
            }
            Ok(metadata) if kind != EntryKind::Directory && metadata.is_dir() => {
                Some("a directory with that name already exists")
            }
            Ok(metadata) if metadata.file_type().is_symlink() => {
                Some("a link with that name already exists")
            }
            _ => None,
        }
    }

    /// Stream member data into a temporary file next to the destination,
    /// then move it into place.
    fn copy_into(&mut self, data: &mut dyn Read, parent: &Path, destination: &Path) -> Result<Copied> {
        let mut staging = tempfile::NamedTempFile::new_in(parent)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let read = match data.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Ok(Copied::ReadFailed(e)),
            };

            let chunk = read as u64;
            if *self.extracted_bytes + chunk > self.policy.max_extracted_bytes {
                return Ok(Copied::OverBudget);
            }
            *self.extracted_bytes += chunk;
            written += chunk;

            staging.write_all(&buffer[..read])?;
        }

        staging.persist(destination).map_err(|e| e.error)?;
        Ok(Copied::Done(written))
    }

    fn warn(&mut self, message: String) {
        let warning = Warning::warning(message).at(self.archive_public.clone());
        warning.trace();
        self.warnings.push(warning);
    }
}

enum Copied {
    Done(u64),
    ReadFailed(io::Error),
    OverBudget,
}
