use droidrepo_utils::error::{FileSystemError, PathError, UtilsError};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(droidrepo_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(droidrepo_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(droidrepo_config::already_exists),
        help("Remove the existing config file or use a different location")
    )]
    ConfigAlreadyExists,

    #[error("Duplicate repository address: {0}")]
    #[diagnostic(
        code(droidrepo_config::duplicate_repo),
        help("Each configured repository must have a unique address")
    )]
    DuplicateRepositoryAddress(String),

    #[error("Invalid repository address: {0}")]
    #[diagnostic(
        code(droidrepo_config::invalid_repository_address),
        help("Use an http(s) URL pointing at the repository, e.g. https://f-droid.org/repo")
    )]
    InvalidRepositoryAddress(String),

    #[error("Invalid mirror chooser: {0}")]
    #[diagnostic(
        code(droidrepo_config::invalid_mirror_chooser),
        help("Valid values are `random`, `weighted` and `location`")
    )]
    InvalidMirrorChooser(String),

    #[error("Conflicting mirror preferences")]
    #[diagnostic(
        code(droidrepo_config::conflicting_mirror_preferences),
        help("Only one of `prefer_regional_mirrors` and `prefer_worldwide_mirrors` can be true")
    )]
    ConflictingMirrorPreferences,

    #[error("IO error: {0}")]
    #[diagnostic(code(droidrepo_config::io))]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(droidrepo_config::utils))]
    Utils(#[from] UtilsError),

    #[error("Failed to parse TOML: {0}")]
    #[diagnostic(code(droidrepo_config::toml))]
    Toml(#[from] toml_edit::TomlError),

    #[error("Encountered unexpected TOML item: {0}")]
    #[diagnostic(code(droidrepo_config::unexpected_toml_item))]
    UnexpectedTomlItem(String),
}

impl From<PathError> for ConfigError {
    fn from(err: PathError) -> Self {
        Self::Utils(UtilsError::Path(err))
    }
}

impl From<FileSystemError> for ConfigError {
    fn from(err: FileSystemError) -> Self {
        Self::Utils(UtilsError::FileSystem(err))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
