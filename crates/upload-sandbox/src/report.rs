//! Warnings and run reports produced by the unpacker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A recoverable problem noticed while processing a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_path: Option<String>,
}

impl Warning {
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            associated_path: None,
        }
    }

    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.associated_path = Some(path.into());
        self
    }

    /// Emit through `tracing` at the matching level.
    pub fn trace(&self) {
        let path = self.associated_path.as_deref().unwrap_or("-");
        match self.severity {
            Severity::Warning => tracing::warn!(path = %path, "{}", self.message),
            Severity::Error => tracing::error!(path = %path, "{}", self.message),
        }
    }
}

/// Identity of a file that could not be unpacked, so later runs can skip it
/// without warning again. Any change to size or mtime invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub relative_path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Summary of one unpack run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackReport {
    /// Scans that processed at least one archive
    pub rounds: u32,
    pub archives_processed: u64,
    pub members_extracted: u64,
    pub extracted_bytes: u64,
    /// A resource bound was hit
    pub aborted: bool,
    pub cancelled: bool,
    #[serde(skip)]
    pub warnings: Vec<Warning>,
    /// Files left in place because they cannot be unpacked
    pub unextractable: Vec<FileFingerprint>,
}

impl UnpackReport {
    pub(crate) fn record(&mut self, warning: Warning) {
        warning.trace();
        self.warnings.push(warning);
    }
}
