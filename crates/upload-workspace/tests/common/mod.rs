#![allow(dead_code)]

use std::io::{Cursor, Write};
use tempfile::TempDir;
use upload_sandbox::ExtractionPolicy;
use upload_workspace::{UploadedFile, WorkspaceManager};

pub fn manager() -> (TempDir, WorkspaceManager) {
    manager_with(ExtractionPolicy::default())
}

pub fn manager_with(policy: ExtractionPolicy) -> (TempDir, WorkspaceManager) {
    let temp = TempDir::new().unwrap();
    let manager = WorkspaceManager::new(temp.path(), policy);
    (temp, manager)
}

pub fn upload(name: &str, content: &[u8]) -> UploadedFile {
    UploadedFile::new(name, content.to_vec()).unwrap()
}

pub fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o600);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Tar with member names written verbatim, including ones `tar::Builder`
/// refuses to produce.
pub fn raw_tar_of(entries: &[(&str, tar::EntryType, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, kind, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_entry_type(*kind);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        if matches!(kind, tar::EntryType::Symlink | tar::EntryType::Link) {
            header.set_link_name("/etc/passwd").unwrap();
        }
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn public_paths(summary: &upload_workspace::WorkspaceSummary) -> Vec<&str> {
    summary
        .files
        .iter()
        .map(|f| f.public_filepath.as_str())
        .collect()
}

pub fn messages(summary: &upload_workspace::WorkspaceSummary) -> Vec<&str> {
    summary.warnings.iter().map(|w| w.message.as_str()).collect()
}
