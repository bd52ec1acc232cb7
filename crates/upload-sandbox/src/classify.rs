//! Content-based file classification
//!
//! Files are classified by their leading bytes only. The file name never
//! influences the result, so a renamed archive is still found and a text file
//! called `paper.tar` is still treated as a regular file.

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use infer::Infer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Size of a single tar header block.
const TAR_BLOCK_SIZE: usize = 512;

/// Closed set of kinds a workspace entry can be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Tar,
    Gzip,
    Bzip2,
    Zip,
    /// Unix `compress` (.Z) output; recognised but never extracted.
    LegacyCompress,
    Regular,
    Directory,
    Unreadable,
}

impl FileKind {
    /// Whether the unpacker knows how to open this kind.
    #[must_use]
    pub const fn is_extractable(self) -> bool {
        matches!(self, Self::Tar | Self::Gzip | Self::Bzip2 | Self::Zip)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Zip => "zip",
            Self::LegacyCompress => "legacy_compress",
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Magic-number classifier
pub struct FileClassifier {
    infer: Infer,
    max_detection_bytes: usize,
}

impl FileClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            infer: Infer::new(),
            // tar magic sits at offset 257, everything else is near the start
            max_detection_bytes: 8192,
        }
    }

    /// Classify a filesystem entry.
    ///
    /// Never fails: anything that cannot be inspected is reported as
    /// [`FileKind::Unreadable`] and left for the caller to warn about.
    #[must_use]
    pub fn classify(&self, path: &Path) -> FileKind {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Cannot stat {}: {}", path.display(), e);
                return FileKind::Unreadable;
            }
        };

        if metadata.is_dir() {
            return FileKind::Directory;
        }

        match read_prefix(path, self.max_detection_bytes) {
            Ok(buffer) => self.classify_bytes(&buffer),
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", path.display(), e);
                FileKind::Unreadable
            }
        }
    }

    /// Classify from the leading bytes of a file.
    #[must_use]
    pub fn classify_bytes(&self, content: &[u8]) -> FileKind {
        if is_legacy_compress(content) {
            return FileKind::LegacyCompress;
        }

        if let Some(detected) = self.infer.get(content) {
            match detected.mime_type() {
                "application/gzip" => return FileKind::Gzip,
                "application/x-bzip2" => return FileKind::Bzip2,
                "application/zip" => return FileKind::Zip,
                "application/x-tar" => return FileKind::Tar,
                _ => {}
            }
        }

        if is_tar_header(content) {
            return FileKind::Tar;
        }

        FileKind::Regular
    }

    /// Checks whether a gzip or bzip2 stream wraps a tar archive.
    ///
    /// `Ok(false)` means the stream decompresses but is not a tar. An `Err`
    /// means the compressed stream itself is damaged.
    pub fn wraps_tar(&self, path: &Path, kind: FileKind) -> io::Result<bool> {
        let file = File::open(path)?;
        let header = match kind {
            FileKind::Gzip => read_block(GzDecoder::new(file))?,
            FileKind::Bzip2 => read_block(BzDecoder::new(file))?,
            FileKind::Tar => return Ok(true),
            _ => return Ok(false),
        };
        Ok(is_tar_header(&header))
    }
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify with a default [`FileClassifier`].
#[must_use]
pub fn classify(path: &Path) -> FileKind {
    FileClassifier::new().classify(path)
}

fn read_prefix(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(limit.min(TAR_BLOCK_SIZE * 2));
    File::open(path)?
        .take(limit as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn read_block<R: Read>(reader: R) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(TAR_BLOCK_SIZE);
    reader
        .take(TAR_BLOCK_SIZE as u64)
        .read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn is_legacy_compress(content: &[u8]) -> bool {
    content.len() >= 2 && content[0] == 0x1F && (content[1] == 0x9D || content[1] == 0xA0)
}

/// True for a POSIX/GNU `ustar` header, or for a pre-POSIX header whose
/// checksum field is valid.
pub(crate) fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < TAR_BLOCK_SIZE {
        return false;
    }
    if &block[257..262] == b"ustar" {
        return true;
    }
    header_checksum_matches(&block[..TAR_BLOCK_SIZE])
}

fn header_checksum_matches(header: &[u8]) -> bool {
    if header.iter().all(|b| *b == 0) {
        return false;
    }

    let field = &header[148..156];
    let digits: String = field
        .iter()
        .map(|b| *b as char)
        .filter(|c| ('0'..='7').contains(c))
        .collect();
    let Ok(stored) = u32::from_str_radix(&digits, 8) else {
        return false;
    };

    // checksum field itself counts as eight spaces
    let computed: u32 = header
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum();

    stored == computed
}
