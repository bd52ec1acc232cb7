/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Storage defaults
pub const DEFAULT_BASE_DIRECTORY: &str = "./data/uploads";

// Ingestion defaults
pub const DEFAULT_MAX_ROUNDS: u32 = 10;
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024; // 1GiB
pub const DEFAULT_MAX_MEMBERS_PER_ARCHIVE: u64 = 100_000;

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";
