//! Error types for droidrepo-core.

use droidrepo_config::error::ConfigError;
use droidrepo_db::{DbError, DieselError};
use droidrepo_dl::error::DownloadError;
use droidrepo_events::AddRepoErrorKind;
use droidrepo_index::IndexError;
use droidrepo_utils::error::FileSystemError;
use miette::Diagnostic;
use thiserror::Error;

/// Why one fetch-verify-apply cycle failed.
#[derive(Error, Diagnostic, Debug)]
pub enum UpdateError {
    #[error("Signature verification failed: {0}")]
    #[diagnostic(
        code(droidrepo::signing),
        help("The repository is signed by a different key than expected. Do not trust it unless you know why.")
    )]
    Signing(String),

    #[error("Invalid index: {0}")]
    #[diagnostic(code(droidrepo::invalid_index))]
    Serialization(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Download(DownloadError),

    #[error("Not found: {0}")]
    #[diagnostic(code(droidrepo::not_found))]
    NotFound(String),

    #[error(
        "Repository {repo_id} was modified concurrently: expected timestamp {expected}, found {found}"
    )]
    #[diagnostic(
        code(droidrepo::concurrent_modification),
        help("Another update finished first. Run the update again.")
    )]
    ConcurrentModification {
        repo_id: i64,
        expected: i64,
        found: i64,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(DbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(IndexError),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(droidrepo::io), help("Check file permissions and disk space"))]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },
}

impl UpdateError {
    /// Sorts an index error into the signing or serialization class.
    pub fn from_index(err: IndexError) -> Self {
        match err {
            IndexError::Signing(msg) => UpdateError::Signing(msg),
            err if err.is_serialization() => UpdateError::Serialization(err.to_string()),
            err => UpdateError::Index(err),
        }
    }

    /// The display state a frontend should show for this failure.
    pub fn add_repo_error_kind(&self) -> AddRepoErrorKind {
        match self {
            UpdateError::Signing(_) => AddRepoErrorKind::InvalidFingerprint,
            UpdateError::Serialization(_) | UpdateError::Index(_) => AddRepoErrorKind::InvalidIndex,
            UpdateError::Download(_)
            | UpdateError::NotFound(_)
            | UpdateError::Io { .. }
            | UpdateError::ConcurrentModification { .. }
            | UpdateError::Database(_) => AddRepoErrorKind::IoError,
        }
    }
}

impl From<IndexError> for UpdateError {
    fn from(err: IndexError) -> Self {
        UpdateError::from_index(err)
    }
}

impl From<DownloadError> for UpdateError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound { url } => UpdateError::NotFound(url),
            err => UpdateError::Download(err),
        }
    }
}

impl From<DbError> for UpdateError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Index(err) => UpdateError::from_index(err),
            err => UpdateError::Database(err),
        }
    }
}

impl From<DieselError> for UpdateError {
    fn from(err: DieselError) -> Self {
        UpdateError::Database(DbError::from(err))
    }
}

impl From<FileSystemError> for UpdateError {
    fn from(err: FileSystemError) -> Self {
        UpdateError::Io {
            action: "preparing a download file".to_string(),
            source: std::io::Error::other(err.to_string()),
        }
    }
}

/// Errors of the repository management operations.
#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Update(#[from] UpdateError),

    #[error("Invalid repository address: {0}")]
    #[diagnostic(
        code(droidrepo::invalid_uri),
        help("Use an address like https://example.org/fdroid/repo")
    )]
    InvalidUri(String),

    #[error("{message}")]
    #[diagnostic(code(droidrepo::add_repo))]
    AddRepo {
        kind: AddRepoErrorKind,
        message: String,
    },

    #[error("Repository {0} not found")]
    #[diagnostic(
        code(droidrepo::repo_not_found),
        help("Run 'droidrepo list' to see the known repositories")
    )]
    RepositoryNotFound(i64),

    #[error("Error while {action}: {source}")]
    #[diagnostic(code(droidrepo::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    #[diagnostic(code(droidrepo::custom))]
    Custom(String),
}

impl From<FileSystemError> for CoreError {
    fn from(err: FileSystemError) -> Self {
        CoreError::Custom(err.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> CoreResult<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> CoreResult<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| CoreError::IoError {
            action: context(),
            source: err,
        })
    }
}
