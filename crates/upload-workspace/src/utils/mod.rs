pub mod checksum;

pub use checksum::{checksum_bytes, checksum_file};
