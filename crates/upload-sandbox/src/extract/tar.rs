//! Tar enumeration, plain or wrapped in gzip/bzip2.

use super::{ArchiveOutcome, MemberStep, MemberWriter};
use crate::error::Result;
use crate::sanitize::{ArchiveMember, EntryKind};
use std::io::Read;

/// Walk every member of a tar stream through `writer`.
pub(crate) fn unpack<R: Read>(reader: R, writer: &mut MemberWriter<'_>) -> Result<ArchiveOutcome> {
    let mut archive = tar::Archive::new(reader);
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => return Ok(ArchiveOutcome::Corrupt(e.to_string())),
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Ok(ArchiveOutcome::Corrupt(e.to_string())),
        };

        let entry_type = entry.header().entry_type();
        if is_metadata(entry_type) {
            continue;
        }

        if let Some(outcome) = writer.before_member() {
            return Ok(outcome);
        }

        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let kind = match entry_kind(entry_type) {
            // pre-POSIX archives mark directories with a trailing slash only
            EntryKind::Regular if name.ends_with('/') => EntryKind::Directory,
            kind => kind,
        };
        let member = ArchiveMember::new(name, kind, entry.size());

        if let MemberStep::Stop(outcome) = writer.write_member(&member, &mut entry)? {
            return Ok(outcome);
        }
    }

    Ok(ArchiveOutcome::Completed)
}

fn entry_kind(entry_type: tar::EntryType) -> EntryKind {
    match entry_type {
        tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::Regular,
        tar::EntryType::Directory => EntryKind::Directory,
        tar::EntryType::Symlink => EntryKind::Symlink,
        tar::EntryType::Link => EntryKind::Hardlink,
        tar::EntryType::Char => EntryKind::CharDevice,
        tar::EntryType::Block => EntryKind::BlockDevice,
        tar::EntryType::Fifo => EntryKind::Fifo,
        _ => EntryKind::Other,
    }
}

/// Header-only records that describe other members.
fn is_metadata(entry_type: tar::EntryType) -> bool {
    matches!(
        entry_type,
        tar::EntryType::XGlobalHeader
            | tar::EntryType::XHeader
            | tar::EntryType::GNULongName
            | tar::EntryType::GNULongLink
    )
}
