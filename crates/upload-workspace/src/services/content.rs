//! Content retrieval: packaged source trees and single files, each with a
//! checksum the caller can use as a validator.

use flate2::{Compression, GzBuilder};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use upload_sandbox::{DIR_MODE, FILE_MODE, SandboxedTree};

use crate::errors::{AppError, AppResult};
use crate::utils::checksum_file;

/// A file ready to be streamed, plus its checksum and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

impl ContentHandle {
    /// Describe an existing file. Blocking.
    pub fn describe(path: &Path) -> AppResult<Self> {
        let size = std::fs::metadata(path)?.len();
        Ok(Self {
            path: path.to_path_buf(),
            checksum: checksum_file(path)?,
            size,
        })
    }

    pub async fn describe_async(path: PathBuf) -> AppResult<Self> {
        tokio::task::spawn_blocking(move || Self::describe(&path)).await?
    }

    pub async fn open(&self) -> AppResult<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }

    pub async fn read_all(&self) -> AppResult<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// Write the source tree to `output` as a gzip-compressed tar.
///
/// Entries are sorted and carry fixed ownership, modes and timestamps, so
/// unchanged content always yields the same bytes. Blocking.
pub fn package_source(tree: &SandboxedTree, output: &Path) -> AppResult<ContentHandle> {
    let dir = output
        .parent()
        .ok_or_else(|| AppError::internal(format!("{} has no parent directory", output.display())))?;
    let temp = NamedTempFile::new_in(dir)?;

    let encoder = GzBuilder::new().mtime(0).write(temp, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut entries = 0usize;
    for entry in tree.snapshot()? {
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        let name = entry.public_path();

        if entry.is_dir {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(DIR_MODE);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(FILE_MODE);
            header.set_size(entry.size);
            let file = std::fs::File::open(&entry.path)?;
            builder.append_data(&mut header, &name, BufReader::new(file))?;
        }
        entries += 1;
    }

    let temp = builder.into_inner()?.finish()?;
    temp.persist(output).map_err(|e| AppError::Io(e.error))?;
    debug!(entries, path = %output.display(), "Packaged source tree");

    ContentHandle::describe(output)
}
