//! Resource bounds for unpacking adversarial archives.

use serde::{Deserialize, Serialize};

/// Limits applied across one unpack run.
///
/// Exceeding any limit stops the run with an error-severity warning; it is
/// never a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionPolicy {
    /// Maximum number of extraction rounds (nesting depth)
    pub max_rounds: u32,
    /// Maximum bytes written across all archives in the run
    pub max_extracted_bytes: u64,
    /// Maximum members enumerated from a single archive
    pub max_members_per_archive: u64,
}

impl ExtractionPolicy {
    /// Create a policy with default bounds.
    ///
    /// Default: 10 rounds, 1 GiB extracted, 100 000 members per archive.
    pub fn new() -> Self {
        Self {
            max_rounds: 10,
            max_extracted_bytes: 1024 * 1024 * 1024,
            max_members_per_archive: 100_000,
        }
    }

    /// Set the maximum number of rounds.
    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Set the cumulative extracted byte budget.
    pub fn max_extracted_bytes(mut self, bytes: u64) -> Self {
        self.max_extracted_bytes = bytes;
        self
    }

    /// Set the per-archive member limit.
    pub fn max_members_per_archive(mut self, members: u64) -> Self {
        self.max_members_per_archive = members;
        self
    }
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let policy = ExtractionPolicy::new()
            .max_rounds(3)
            .max_extracted_bytes(4096)
            .max_members_per_archive(8);

        assert_eq!(policy.max_rounds, 3);
        assert_eq!(policy.max_extracted_bytes, 4096);
        assert_eq!(policy.max_members_per_archive, 8);
        assert_eq!(ExtractionPolicy::default().max_rounds, 10);
    }
}
