//! Repository index formats for droidrepo.
//!
//! This crate knows how to read what an F-Droid style repository publishes:
//!
//! - **Signed archives** (`entry.jar`, `index-v1.jar`), verified by [`jar::JarVerifier`]
//! - **Entry documents** describing the full index and the available diffs
//! - **Index v2** documents and their diffs, applied with [`differ::apply_diff`]
//! - **Index v1** documents, converted to the v2 model
//!
//! # Example
//!
//! ```no_run
//! use droidrepo_index::{entry::EntryV2, jar::JarVerifier};
//!
//! fn read_entry(jar: &[u8], fingerprint: &str) -> droidrepo_index::Result<(String, EntryV2)> {
//!     let verified = JarVerifier::new(None, Some(fingerprint)).verify(jar, "entry.json")?;
//!     Ok((verified.certificate, EntryV2::from_slice(&verified.payload)?))
//! }
//! ```

pub mod differ;
pub mod entry;
pub mod error;
pub mod jar;
pub mod locale;
pub mod v1;
pub mod v2;

pub use error::{ErrorContext, IndexError, Result};

/// Version of the index format a repository was last synced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexFormatVersion {
    One,
    Two,
}

impl IndexFormatVersion {
    /// The newest format, the only one that supports diffs.
    pub const CURRENT: IndexFormatVersion = IndexFormatVersion::Two;

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexFormatVersion::One => "ONE",
            IndexFormatVersion::Two => "TWO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONE" => Some(IndexFormatVersion::One),
            "TWO" => Some(IndexFormatVersion::Two),
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexFormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_round_trip() {
        for version in [IndexFormatVersion::One, IndexFormatVersion::Two] {
            assert_eq!(IndexFormatVersion::parse(version.as_str()), Some(version));
        }
        assert_eq!(IndexFormatVersion::parse("THREE"), None);
        assert!(IndexFormatVersion::One < IndexFormatVersion::CURRENT);
    }
}
