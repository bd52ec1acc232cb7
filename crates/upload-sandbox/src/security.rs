//! Security utilities for path validation and permission normalization.

use crate::error::{Result, SandboxError};
use std::path::Path;
use walkdir::WalkDir;

/// Mode applied to every regular file once a tree has been unpacked.
pub const FILE_MODE: u32 = 0o664;
/// Mode applied to every directory once a tree has been unpacked.
pub const DIR_MODE: u32 = 0o775;

/// Counts of entries touched by [`normalize_permissions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSummary {
    pub files: usize,
    pub directories: usize,
}

/// Validates that a file path doesn't contain null bytes or other basic issues.
pub fn validate_file_path_security(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();

    if path_str.is_empty() {
        return Err(SandboxError::path_validation(path, "Path cannot be empty"));
    }

    if path_str.contains('\0') {
        return Err(SandboxError::path_validation(
            path,
            "Path contains null bytes",
        ));
    }

    Ok(())
}

/// Validates that a resolved path is within the specified sandbox directory.
/// Uses OS path resolution to handle symlinks, .., ., etc. properly.
pub fn validate_path_within_sandbox(resolved_path: &Path, sandbox_base: &Path) -> Result<()> {
    let canonical_base = sandbox_base.canonicalize().map_err(|e| {
        SandboxError::path_validation(sandbox_base, format!("Failed to resolve sandbox base: {e}"))
    })?;

    // Path may not exist yet - resolve parent and append filename
    let canonical_path = if resolved_path.exists() {
        resolved_path.canonicalize().map_err(|e| {
            SandboxError::path_validation(resolved_path, format!("Failed to resolve path: {e}"))
        })?
    } else {
        let parent = resolved_path
            .parent()
            .ok_or_else(|| SandboxError::path_validation(resolved_path, "Path has no parent directory"))?;

        let canonical_parent = parent.canonicalize().map_err(|e| {
            SandboxError::path_validation(parent, format!("Failed to resolve parent: {e}"))
        })?;

        let filename = resolved_path
            .file_name()
            .ok_or_else(|| SandboxError::path_validation(resolved_path, "Invalid filename"))?;

        canonical_parent.join(filename)
    };

    if !canonical_path.starts_with(&canonical_base) {
        return Err(SandboxError::path_validation(
            resolved_path,
            format!(
                "Path escapes sandbox: resolves to '{}' (outside '{}')",
                canonical_path.display(),
                canonical_base.display()
            ),
        ));
    }

    Ok(())
}

/// Sets `0664` on every file and `0775` on every directory below (and
/// including) `root`. Symbolic links are never followed.
pub fn normalize_permissions(root: &Path) -> Result<PermissionSummary> {
    let mut summary = PermissionSummary::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(source) => SandboxError::Io(source),
                None => SandboxError::path_validation(path, "Filesystem loop detected"),
            }
        })?;

        let file_type = entry.file_type();
        if file_type.is_dir() {
            set_mode(entry.path(), DIR_MODE)?;
            summary.directories += 1;
        } else if file_type.is_file() {
            set_mode(entry.path(), FILE_MODE)?;
            summary.files += 1;
        }
    }

    tracing::debug!(
        "Normalized permissions under {}: {} files, {} directories",
        root.display(),
        summary.files,
        summary.directories
    );

    Ok(summary)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|_e| {
        SandboxError::Permission {
            operation: format!("set mode {mode:o}"),
            path: path.to_path_buf(),
        }
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_path_security() {
        assert!(validate_file_path_security(Path::new("file.txt")).is_ok());
        assert!(validate_file_path_security(Path::new("subdir/file.txt")).is_ok());

        assert!(validate_file_path_security(Path::new("file\0.txt")).is_err());
        assert!(validate_file_path_security(Path::new("")).is_err());
    }

    #[test]
    fn test_validate_path_within_sandbox() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();

        let test_file = base.join("test.txt");
        std::fs::write(&test_file, "test content").unwrap();
        assert!(validate_path_within_sandbox(&test_file, base).is_ok());

        // Not yet created, parent inside
        assert!(validate_path_within_sandbox(&base.join("new.txt"), base).is_ok());

        let outside_temp = tempfile::tempdir().unwrap();
        let outside_file = outside_temp.path().join("outside.txt");
        std::fs::write(&outside_file, "outside content").unwrap();
        assert!(validate_path_within_sandbox(&outside_file, base).is_err());

        assert!(validate_path_within_sandbox(&base.join("../escape.txt"), base).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("source");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/c.txt"), "c").unwrap();
        std::fs::write(root.join("top.txt"), "t").unwrap();
        std::fs::set_permissions(root.join("top.txt"), std::fs::Permissions::from_mode(0o600))
            .unwrap();
        std::fs::set_permissions(root.join("a"), std::fs::Permissions::from_mode(0o700)).unwrap();

        let summary = normalize_permissions(&root).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 3);

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&root), DIR_MODE);
        assert_eq!(mode(&root.join("a")), DIR_MODE);
        assert_eq!(mode(&root.join("a/b")), DIR_MODE);
        assert_eq!(mode(&root.join("top.txt")), FILE_MODE);
        assert_eq!(mode(&root.join("a/b/c.txt")), FILE_MODE);
    }
}
