//! Error types for droidrepo-db.

use droidrepo_index::IndexError;
use miette::Diagnostic;
use thiserror::Error;

/// Database error type for droidrepo-db operations.
#[derive(Error, Diagnostic, Debug)]
pub enum DbError {
    #[error("Database connection failed: {0}")]
    #[diagnostic(
        code(droidrepo_db::connection),
        help("Check if the database file exists and is accessible")
    )]
    ConnectionError(String),

    #[error("Database query failed: {0}")]
    #[diagnostic(code(droidrepo_db::query))]
    QueryError(String),

    #[error("Database migration failed: {0}")]
    #[diagnostic(
        code(droidrepo_db::migration),
        help("The database schema may be corrupted. Try removing the database and updating again.")
    )]
    MigrationError(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(droidrepo_db::not_found))]
    NotFound(String),

    /// A caller asked for something the stored data does not allow.
    #[error("Precondition failed: {0}")]
    #[diagnostic(code(droidrepo_db::precondition))]
    Precondition(String),

    #[error("Stored data is corrupted: {0}")]
    #[diagnostic(
        code(droidrepo_db::integrity),
        help("Run 'droidrepo clear' and update again")
    )]
    IntegrityError(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error("Database lock poisoned")]
    #[diagnostic(code(droidrepo_db::poison))]
    PoisonError,
}

impl From<diesel::result::Error> for DbError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => DbError::NotFound("Record not found".to_string()),
            diesel::result::Error::DatabaseError(_, info) => {
                DbError::QueryError(info.message().to_string())
            }
            other => DbError::QueryError(other.to_string()),
        }
    }
}

impl From<diesel::result::ConnectionError> for DbError {
    fn from(err: diesel::result::ConnectionError) -> Self {
        DbError::ConnectionError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::IntegrityError(err.to_string())
    }
}

/// Result type alias for droidrepo-db operations.
pub type Result<T> = std::result::Result<T, DbError>;
