//! Root-bounded view of a workspace's source and quarantine directories.

use crate::error::{Result, SandboxError};
use crate::report::FileFingerprint;
use crate::security::{validate_file_path_security, validate_path_within_sandbox};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// One entry captured by a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Absolute location on disk
    pub path: PathBuf,
    /// Location relative to the source root
    pub relative: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl TreeEntry {
    /// Client-facing path, always `/`-separated.
    #[must_use]
    pub fn public_path(&self) -> String {
        public_path(&self.relative)
    }

    #[must_use]
    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            relative_path: self.relative.clone(),
            size: self.size,
            modified: self.modified,
        }
    }
}

/// What happened to a file sent to the quarantine directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineOutcome {
    Moved,
    /// Same name and size already quarantined; the original was deleted
    Discarded,
}

/// A source tree plus its quarantine directory.
///
/// Every path handed out by this type has been checked to stay under one of
/// the two roots.
#[derive(Debug, Clone)]
pub struct SandboxedTree {
    source_root: PathBuf,
    removed_root: PathBuf,
}

impl SandboxedTree {
    /// Open (creating if needed) a tree rooted at `source_root`.
    ///
    /// # Errors
    /// Returns an error if either directory cannot be created.
    pub fn open(source_root: impl Into<PathBuf>, removed_root: impl Into<PathBuf>) -> Result<Self> {
        let source_root = source_root.into();
        let removed_root = removed_root.into();

        for dir in [&source_root, &removed_root] {
            fs::create_dir_all(dir).map_err(|e| SandboxError::DirectoryCreation {
                path: dir.clone(),
                source: e,
            })?;
        }

        Ok(Self {
            source_root,
            removed_root,
        })
    }

    #[must_use]
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    #[must_use]
    pub fn removed_root(&self) -> &Path {
        &self.removed_root
    }

    /// Resolve a client-supplied relative path inside the source root.
    ///
    /// # Errors
    /// Rejects empty, absolute or `..`-bearing paths, and anything that
    /// resolves outside the source root once symlinks are followed.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        validate_file_path_security(candidate)?;

        if candidate.is_absolute() {
            return Err(SandboxError::path_validation(
                candidate,
                "Absolute paths not allowed - use paths relative to the source directory",
            ));
        }

        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
        {
            return Err(SandboxError::path_validation(
                candidate,
                "Parent directory references are not allowed",
            ));
        }

        let full_path = self.source_root.join(candidate);
        if full_path.parent().is_some_and(Path::exists) {
            validate_path_within_sandbox(&full_path, &self.source_root)?;
        }

        tracing::trace!("Path validated: '{}' -> '{}'", relative, full_path.display());
        Ok(full_path)
    }

    /// Client-facing path of an absolute location under the source root.
    #[must_use]
    pub fn public_path_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_root)
            .map(public_path)
            .unwrap_or_else(|_| path.to_string_lossy().into_owned())
    }

    /// Every file and directory under the source root, sorted by path.
    ///
    /// The result is a detached list: the tree may be mutated freely while
    /// iterating it.
    ///
    /// # Errors
    /// Returns an error if the walk fails.
    pub fn snapshot(&self) -> Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.source_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(walk_error)?;
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }

            let metadata = entry.metadata().map_err(walk_error)?;
            let relative = entry
                .path()
                .strip_prefix(&self.source_root)
                .map_err(|_| SandboxError::path_validation(entry.path(), "Entry outside source root"))?
                .to_path_buf();

            entries.push(TreeEntry {
                path: entry.path().to_path_buf(),
                relative,
                size: metadata.len(),
                modified: metadata.modified().ok(),
                is_dir: file_type.is_dir(),
            });
        }

        Ok(entries)
    }

    /// Regular files only, see [`SandboxedTree::snapshot`].
    ///
    /// # Errors
    /// Returns an error if the walk fails.
    pub fn snapshot_files(&self) -> Result<Vec<TreeEntry>> {
        Ok(self.snapshot()?.into_iter().filter(|e| !e.is_dir).collect())
    }

    /// Move a file under the source root into the quarantine directory,
    /// keyed by basename.
    ///
    /// A same-named file of identical size already in quarantine is taken as
    /// a duplicate and the original is deleted instead. A same-named file of
    /// different size is replaced.
    ///
    /// # Errors
    /// Returns an error if the path is outside the source root or the move
    /// fails.
    pub fn quarantine(&self, path: &Path) -> Result<QuarantineOutcome> {
        validate_path_within_sandbox(path, &self.source_root)?;

        let name = path
            .file_name()
            .ok_or_else(|| SandboxError::path_validation(path, "Invalid filename"))?;
        let destination = self.removed_root.join(name);
        let size = fs::metadata(path)?.len();

        if let Ok(existing) = fs::symlink_metadata(&destination) {
            if existing.is_file() && existing.len() == size {
                fs::remove_file(path)?;
                tracing::debug!(
                    "Discarded {}: identical size copy already quarantined",
                    path.display()
                );
                return Ok(QuarantineOutcome::Discarded);
            }
            if existing.is_dir() {
                fs::remove_dir_all(&destination)?;
            }
        }

        fs::rename(path, &destination)?;
        tracing::debug!("Quarantined {} -> {}", path.display(), destination.display());
        Ok(QuarantineOutcome::Moved)
    }

    /// Remove everything beneath the source root, keeping the root itself.
    ///
    /// # Errors
    /// Returns an error if any entry cannot be removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.source_root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}

/// `/`-joined rendering of a relative path.
#[must_use]
pub fn public_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_error(e: walkdir::Error) -> SandboxError {
    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
    match e.into_io_error() {
        Some(source) => SandboxError::Io(source),
        None => SandboxError::path_validation(path, "Filesystem loop detected"),
    }
}
