//! Append-only audit logs
//!
//! Each workspace has a `source.log` next to its source tree. A single
//! `service.log` in the base directory records operation outcomes across all
//! workspaces. Lines look like:
//!
//! ```text
//! 16/Oct/2026:09:14:03 +0000 [12] WARNING: Removed hidden file .DS_Store.
//! ```

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use strum::Display;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use upload_sandbox::{Severity, Warning};

use crate::errors::AppResult;

const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

impl From<Severity> for AuditLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => Self::Warning,
            Severity::Error => Self::Error,
        }
    }
}

pub fn format_line(
    timestamp: DateTime<Utc>,
    upload_id: Option<u64>,
    level: AuditLevel,
    message: &str,
) -> String {
    let timestamp = timestamp.format(TIMESTAMP_FORMAT);
    match upload_id {
        Some(id) => format!("{timestamp} [{id}] {level}: {message}\n"),
        None => format!("{timestamp} {level}: {message}\n"),
    }
}

async fn append(path: &Path, text: &str) -> AppResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

pub struct AuditLog {
    service_log: PathBuf,
    service_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(base_directory: &Path) -> Self {
        Self {
            service_log: base_directory.join("service.log"),
            service_lock: Mutex::new(()),
        }
    }

    pub fn service_log_path(&self) -> &Path {
        &self.service_log
    }

    /// Append to the service log. Writers are serialized so lines never
    /// interleave.
    pub async fn service(&self, upload_id: Option<u64>, level: AuditLevel, message: &str) -> AppResult<()> {
        let line = format_line(Utc::now(), upload_id, level, message);
        let _guard = self.service_lock.lock().await;
        if let Some(parent) = self.service_log.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        append(&self.service_log, &line).await
    }

    /// Append to a workspace log. Callers hold the workspace lock.
    pub async fn source(
        &self,
        source_log: &Path,
        upload_id: u64,
        level: AuditLevel,
        message: &str,
    ) -> AppResult<()> {
        append(source_log, &format_line(Utc::now(), Some(upload_id), level, message)).await
    }

    /// Append recorded warnings to a workspace log using their own timestamps.
    pub async fn warnings(&self, source_log: &Path, upload_id: u64, warnings: &[Warning]) -> AppResult<()> {
        if warnings.is_empty() {
            return Ok(());
        }
        let text: String = warnings
            .iter()
            .map(|w| format_line(w.timestamp, Some(upload_id), w.severity.into(), &w.message))
            .collect();
        append(source_log, &text).await
    }
}
