//! Error types for the index crate.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while reading, verifying or patching repository indexes.
#[derive(Error, Diagnostic, Debug)]
pub enum IndexError {
    /// The signed archive failed verification. Never retried.
    #[error("{0}")]
    #[diagnostic(
        code(droidrepo_index::signing),
        help("The repository signature does not match the expected certificate or fingerprint")
    )]
    Signing(String),

    /// The document had a shape the model or a diff rule does not accept.
    #[error("{0}")]
    #[diagnostic(
        code(droidrepo_index::serialization),
        help("The index or diff may be corrupted or in an unsupported format")
    )]
    Serialization(String),

    #[error(transparent)]
    #[diagnostic(
        code(droidrepo_index::json),
        help("The index file may be corrupted or in an invalid format")
    )]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(droidrepo_index::zip))]
    Zip(#[from] zip::result::ZipError),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(droidrepo_index::io))]
    Io {
        action: String,
        source: std::io::Error,
    },
}

impl IndexError {
    pub fn signing(msg: impl Into<String>) -> Self {
        IndexError::Signing(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        IndexError::Serialization(msg.into())
    }

    /// Whether the error is about the content shape rather than trust or I/O.
    pub fn is_serialization(&self) -> bool {
        matches!(self, IndexError::Serialization(_) | IndexError::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Extension trait for adding context to I/O errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            IndexError::Io {
                action: context(),
                source: err,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::signing("Unsupported digest: SHA1-Digest");
        assert_eq!(err.to_string(), "Unsupported digest: SHA1-Digest");

        let err: Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
            .with_context(|| "reading entry.jar".to_string());
        assert_eq!(
            err.unwrap_err().to_string(),
            "Error while reading entry.jar: gone"
        );
    }

    #[test]
    fn test_is_serialization() {
        assert!(IndexError::serialization("x no int").is_serialization());
        let json_err = serde_json::from_str::<u8>("nope").unwrap_err();
        assert!(IndexError::from(json_err).is_serialization());
        assert!(!IndexError::signing("bad").is_serialization());
    }
}
