use bytes::Bytes;
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::{AppError, AppResult};

static NON_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("valid filename regex"));

/// Reduce a client-supplied filename to a safe single path component.
///
/// Non-ASCII characters are dropped, path separators and whitespace become
/// `_`, anything outside `[A-Za-z0-9_.-]` is removed and leading or trailing
/// `.`/`_` are stripped. The result may be empty.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename.chars().filter(char::is_ascii).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    NON_FILENAME_CHARS
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// A file payload handed to the service by the request layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Sanitized name used on disk
    pub filename: String,
    pub original_filename: String,
    pub content: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> AppResult<Self> {
        let original_filename = filename.into();
        let content = content.into();

        if original_filename.trim().is_empty() {
            return Err(AppError::validation("No file was uploaded"));
        }
        if content.is_empty() {
            return Err(AppError::validation(format!(
                "Uploaded file '{original_filename}' is empty"
            )));
        }

        let filename = secure_filename(&original_filename);
        if filename.is_empty() {
            return Err(AppError::validation(format!(
                "Filename '{original_filename}' contains no usable characters"
            )));
        }

        Ok(Self {
            filename,
            original_filename,
            content,
        })
    }

    pub fn was_renamed(&self) -> bool {
        self.filename != self.original_filename
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("paper.tar.gz"), "paper.tar.gz");
        assert_eq!(secure_filename("My Paper (final).zip"), "My_Paper_final.zip");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\main.tex"), "C_Users_me_main.tex");
        assert_eq!(secure_filename(".hidden"), "hidden");
        assert_eq!(secure_filename("résumé.tex"), "rsum.tex");
        assert_eq!(secure_filename("../.."), "");
    }

    #[test]
    fn test_uploaded_file_validation() {
        assert!(matches!(
            UploadedFile::new("", b"data".to_vec()),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            UploadedFile::new("main.tex", Vec::new()),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            UploadedFile::new("...", b"data".to_vec()),
            Err(AppError::Validation { .. })
        ));

        let file = UploadedFile::new("my paper.tex", b"data".to_vec()).unwrap();
        assert_eq!(file.filename, "my_paper.tex");
        assert!(file.was_renamed());
        assert_eq!(file.size(), 4);
    }
}
