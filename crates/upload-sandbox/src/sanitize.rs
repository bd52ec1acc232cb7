//! Archive member acceptance policy
//!
//! Every member of an opened archive passes through [`EntrySanitizer::decide`]
//! before anything is written. The sanitizer works purely on the member's
//! declared name and kind; it never touches the filesystem, so the same
//! decision is reached regardless of what already exists on disk.

use std::fmt;
use std::path::{Path, PathBuf};

/// Filesystem object kind declared by an archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Other,
}

/// One member of an opened archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub entry_kind: EntryKind,
    pub size: u64,
}

impl ArchiveMember {
    pub fn new(name: impl Into<String>, entry_kind: EntryKind, size: u64) -> Self {
        Self {
            name: name.into(),
            entry_kind,
            size,
        }
    }
}

/// Why a member was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SymbolicLink,
    HardLink,
    Device,
    Fifo,
    DisallowedType,
    EscapesWorkspace,
    InvalidName,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SymbolicLink => "symbolic links are not allowed",
            Self::HardLink => "hard links are not allowed",
            Self::Device => "device files are not allowed",
            Self::Fifo => "FIFOs are not allowed",
            Self::DisallowedType => "entry type not allowed",
            Self::EscapesWorkspace => "path escapes workspace",
            Self::InvalidName => "invalid member name",
        }
    }

    /// Warning text recorded for a rejected member.
    #[must_use]
    pub fn warning_for(self, member_name: &str) -> String {
        let reason = self.as_str();
        let mut chars = reason.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("{capitalized}. Removing '{member_name}'.")
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`EntrySanitizer::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Extract to `target`, relative to the source root.
    Accept { target: PathBuf },
    Reject(RejectReason),
}

/// Sanitizer bound to one archive's location inside the source root.
#[derive(Debug, Clone)]
pub struct EntrySanitizer {
    /// Components of the archive's directory, relative to the source root.
    prefix: Vec<String>,
}

impl EntrySanitizer {
    /// `archive_dir` is the directory holding the archive, relative to the
    /// source root. Use an empty path for archives at the top level.
    #[must_use]
    pub fn new(archive_dir: &Path) -> Self {
        let prefix = archive_dir
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Self { prefix }
    }

    /// Decide whether a member may be extracted, and where.
    #[must_use]
    pub fn decide(&self, member: &ArchiveMember) -> Decision {
        let target = match self.resolve(&member.name) {
            Ok(target) => target,
            Err(reason) => return Decision::Reject(reason),
        };

        let reason = match member.entry_kind {
            EntryKind::Regular | EntryKind::Directory => None,
            EntryKind::Symlink => Some(RejectReason::SymbolicLink),
            EntryKind::Hardlink => Some(RejectReason::HardLink),
            EntryKind::CharDevice | EntryKind::BlockDevice => Some(RejectReason::Device),
            EntryKind::Fifo => Some(RejectReason::Fifo),
            EntryKind::Other => Some(RejectReason::DisallowedType),
        };
        if let Some(reason) = reason {
            return Decision::Reject(reason);
        }

        // Only a directory entry may name the extraction directory itself ("./")
        if target.components().count() == self.prefix.len()
            && member.entry_kind != EntryKind::Directory
        {
            return Decision::Reject(RejectReason::InvalidName);
        }

        Decision::Accept { target }
    }

    /// Lexically normalize a member name against the archive's directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, RejectReason> {
        if name.is_empty() || name.contains('\0') {
            return Err(RejectReason::InvalidName);
        }

        if name.starts_with('/') || has_drive_prefix(name) {
            return Err(RejectReason::EscapesWorkspace);
        }

        let mut stack: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        for part in name.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        return Err(RejectReason::EscapesWorkspace);
                    }
                }
                part => stack.push(part),
            }
        }

        // Climbed out of the archive's own directory and back down elsewhere
        // is fine as long as the stack never underflowed.
        Ok(stack.iter().collect())
    }
}

/// Convenience wrapper for one-off decisions.
#[must_use]
pub fn decide(member: &ArchiveMember, archive_dir: &Path) -> Decision {
    EntrySanitizer::new(archive_dir).decide(member)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(target: &str) -> Decision {
        Decision::Accept {
            target: PathBuf::from(target),
        }
    }

    #[test]
    fn test_policy_table() {
        let sanitizer = EntrySanitizer::new(Path::new(""));
        let cases = [
            (EntryKind::Regular, accept("paper.tex")),
            (EntryKind::Directory, accept("paper.tex")),
            (EntryKind::Symlink, Decision::Reject(RejectReason::SymbolicLink)),
            (EntryKind::Hardlink, Decision::Reject(RejectReason::HardLink)),
            (EntryKind::CharDevice, Decision::Reject(RejectReason::Device)),
            (EntryKind::BlockDevice, Decision::Reject(RejectReason::Device)),
            (EntryKind::Fifo, Decision::Reject(RejectReason::Fifo)),
            (EntryKind::Other, Decision::Reject(RejectReason::DisallowedType)),
        ];

        for (kind, expected) in cases {
            let member = ArchiveMember::new("paper.tex", kind, 0);
            assert_eq!(sanitizer.decide(&member), expected, "kind {kind:?}");
        }
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(RejectReason::SymbolicLink.to_string(), "symbolic links are not allowed");
        assert_eq!(RejectReason::Fifo.to_string(), "FIFOs are not allowed");
        assert_eq!(RejectReason::EscapesWorkspace.to_string(), "path escapes workspace");
        assert_eq!(
            RejectReason::SymbolicLink.warning_for("link"),
            "Symbolic links are not allowed. Removing 'link'."
        );
    }

    #[test]
    fn test_containment_at_top_level() {
        let sanitizer = EntrySanitizer::new(Path::new(""));
        let regular = |name: &str| ArchiveMember::new(name, EntryKind::Regular, 1);

        assert_eq!(sanitizer.decide(&regular("a/./b/../c.txt")), accept("a/c.txt"));
        assert_eq!(sanitizer.decide(&regular("./figs//f.png")), accept("figs/f.png"));

        for hostile in ["../evil", "a/../../evil", "/etc/passwd", "C:/evil", "..", "a/../.."] {
            assert_eq!(
                sanitizer.decide(&regular(hostile)),
                Decision::Reject(RejectReason::EscapesWorkspace),
                "{hostile}"
            );
        }

        // Escape wins over the kind check
        let link = ArchiveMember::new("../link", EntryKind::Symlink, 0);
        assert_eq!(sanitizer.decide(&link), Decision::Reject(RejectReason::EscapesWorkspace));
    }

    #[test]
    fn test_containment_in_subdirectory() {
        let sanitizer = EntrySanitizer::new(Path::new("figs/raw"));
        let regular = |name: &str| ArchiveMember::new(name, EntryKind::Regular, 1);

        assert_eq!(sanitizer.decide(&regular("x.txt")), accept("figs/raw/x.txt"));
        // climbing within the source root is allowed
        assert_eq!(sanitizer.decide(&regular("../../top.txt")), accept("top.txt"));
        assert_eq!(
            sanitizer.decide(&regular("../../../out.txt")),
            Decision::Reject(RejectReason::EscapesWorkspace)
        );
    }

    #[test]
    fn test_invalid_names() {
        let sanitizer = EntrySanitizer::new(Path::new(""));

        assert_eq!(
            sanitizer.decide(&ArchiveMember::new("", EntryKind::Regular, 0)),
            Decision::Reject(RejectReason::InvalidName)
        );
        assert_eq!(
            sanitizer.decide(&ArchiveMember::new("a\0b", EntryKind::Regular, 0)),
            Decision::Reject(RejectReason::InvalidName)
        );
        assert_eq!(
            sanitizer.decide(&ArchiveMember::new("./", EntryKind::Regular, 0)),
            Decision::Reject(RejectReason::InvalidName)
        );
        assert_eq!(
            sanitizer.decide(&ArchiveMember::new("./", EntryKind::Directory, 0)),
            accept("")
        );
        // backslashes are literal on unix; renamed later, never split here
        assert_eq!(
            sanitizer.decide(&ArchiveMember::new("C:\\paper\\main.tex", EntryKind::Regular, 0)),
            accept("C:\\paper\\main.tex")
        );
    }
}
