//! Zip enumeration.

use super::{ArchiveOutcome, MemberStep, MemberWriter};
use crate::error::Result;
use crate::sanitize::{ArchiveMember, EntryKind};
use std::io::{Read, Seek};

const S_IFMT: u32 = 0o170_000;
const S_IFSOCK: u32 = 0o140_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFREG: u32 = 0o100_000;
const S_IFBLK: u32 = 0o060_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFCHR: u32 = 0o020_000;
const S_IFIFO: u32 = 0o010_000;

/// Walk every member of a zip archive through `writer`.
pub(crate) fn unpack<R: Read + Seek>(reader: R, writer: &mut MemberWriter<'_>) -> Result<ArchiveOutcome> {
    let mut archive = match zip::ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(e) => return Ok(ArchiveOutcome::Corrupt(e.to_string())),
    };

    for index in 0..archive.len() {
        if let Some(outcome) = writer.before_member() {
            return Ok(outcome);
        }

        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => return Ok(ArchiveOutcome::Corrupt(e.to_string())),
        };

        let member = ArchiveMember::new(
            entry.name().to_string(),
            entry_kind(entry.unix_mode(), entry.is_dir()),
            entry.size(),
        );

        if let MemberStep::Stop(outcome) = writer.write_member(&member, &mut entry)? {
            return Ok(outcome);
        }
    }

    Ok(ArchiveOutcome::Completed)
}

/// Unix file-type bits win when the archive recorded them.
fn entry_kind(unix_mode: Option<u32>, is_dir: bool) -> EntryKind {
    match unix_mode.map(|mode| mode & S_IFMT) {
        Some(S_IFLNK) => EntryKind::Symlink,
        Some(S_IFCHR) => EntryKind::CharDevice,
        Some(S_IFBLK) => EntryKind::BlockDevice,
        Some(S_IFIFO) => EntryKind::Fifo,
        Some(S_IFSOCK) => EntryKind::Other,
        Some(S_IFDIR) => EntryKind::Directory,
        Some(S_IFREG) => EntryKind::Regular,
        _ if is_dir => EntryKind::Directory,
        _ => EntryKind::Regular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_from_mode() {
        assert_eq!(entry_kind(Some(0o120_777), false), EntryKind::Symlink);
        assert_eq!(entry_kind(Some(0o100_644), false), EntryKind::Regular);
        assert_eq!(entry_kind(Some(0o040_755), true), EntryKind::Directory);
        assert_eq!(entry_kind(Some(0o010_644), false), EntryKind::Fifo);
        assert_eq!(entry_kind(Some(0o020_644), false), EntryKind::CharDevice);
        assert_eq!(entry_kind(Some(0o060_644), false), EntryKind::BlockDevice);
        assert_eq!(entry_kind(Some(0o140_644), false), EntryKind::Other);
        // DOS-made archives carry no type bits
        assert_eq!(entry_kind(Some(0o644), false), EntryKind::Regular);
        assert_eq!(entry_kind(None, true), EntryKind::Directory);
        assert_eq!(entry_kind(None, false), EntryKind::Regular);
    }
}
