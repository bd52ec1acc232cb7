//! # Upload Sandbox
//!
//! Safe, fixed-point unpacking of untrusted archives into a bounded directory
//! tree.
//!
//! A [`SandboxedTree`] pairs a source directory with a quarantine directory.
//! The [`Unpacker`] repeatedly scans the source directory, classifies every
//! file by content, extracts tar, gzip/bzip2-wrapped tar and zip archives in
//! place and moves each fully processed archive into quarantine. Extraction
//! of newly revealed archives continues until a scan finds nothing left to
//! unpack.
//!
//! ## Features
//!
//! - **Content Classification**: Magic-number detection via the `infer` crate, never file names
//! - **Entry Sanitization**: Symlinks, hard links, devices and FIFOs are refused
//! - **Containment**: Member names are normalized lexically and re-checked against the real filesystem
//! - **Resource Bounds**: Round, byte and member limits stop archive bombs with a warning
//! - **Cancellation**: A `CancellationToken` is honored between members
//! - **Recoverable Errors**: Corrupt archives become warnings; only local I/O failures are errors
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use upload_sandbox::{ExtractionPolicy, SandboxedTree, Unpacker, normalize_permissions};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = SandboxedTree::open("/srv/uploads/42/source", "/srv/uploads/42/removed")?;
//! let unpacker = Unpacker::new(tree, ExtractionPolicy::new().max_rounds(5));
//!
//! let report = unpacker.unpack()?;
//! for warning in &report.warnings {
//!     println!("{}", warning.message);
//! }
//!
//! normalize_permissions(unpacker.tree().source_root())?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod error;
mod extract;
pub mod policy;
pub mod report;
pub mod sanitize;
pub mod security;
pub mod tree;
pub mod unpack;

pub use classify::{FileClassifier, FileKind, classify};
pub use error::{Result, SandboxError};
pub use policy::ExtractionPolicy;
pub use report::{FileFingerprint, Severity, UnpackReport, Warning};
pub use sanitize::{ArchiveMember, Decision, EntryKind, EntrySanitizer, RejectReason, decide};
pub use security::{DIR_MODE, FILE_MODE, PermissionSummary, normalize_permissions};
pub use tree::{QuarantineOutcome, SandboxedTree, TreeEntry, public_path};
pub use tokio_util::sync::CancellationToken;
pub use unpack::Unpacker;
