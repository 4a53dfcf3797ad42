use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    #[diagnostic(
        code(droidrepo_dl::network),
        help("Check your internet connection or try again later")
    )]
    Network(Box<ureq::Error>),

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(droidrepo_dl::http_error))]
    HttpStatus { status: u16, url: String },

    #[error("Not found: {url}")]
    #[diagnostic(code(droidrepo_dl::not_found))]
    NotFound { url: String },

    #[error("Forbidden: {url}")]
    #[diagnostic(
        code(droidrepo_dl::forbidden),
        help("Check the username and password configured for this repository")
    )]
    Forbidden { url: String },

    #[error("Request timed out")]
    #[diagnostic(code(droidrepo_dl::timeout))]
    Timeout,

    #[error("Server does not support resuming: {url}")]
    #[diagnostic(code(droidrepo_dl::no_resume))]
    NoResume { url: String },

    #[error("Hash not matching: expected {expected}, got {actual}")]
    #[diagnostic(code(droidrepo_dl::hash_mismatch))]
    HashMismatch { expected: String, actual: String },

    #[error("Download was cancelled")]
    #[diagnostic(code(droidrepo_dl::interrupted))]
    Interrupted,

    #[error("No valid mirrors were found")]
    #[diagnostic(
        code(droidrepo_dl::no_mirrors),
        help("Check the mirror settings of the repository")
    )]
    NoMirrors,

    #[error("Got IPFS gateway without CID")]
    #[diagnostic(code(droidrepo_dl::ipfs_without_cid))]
    IpfsWithoutCid,

    #[error("Invalid URL: {url}")]
    #[diagnostic(code(droidrepo_dl::invalid_url))]
    InvalidUrl { url: String },

    #[error(transparent)]
    #[diagnostic(code(droidrepo_dl::io))]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether the next mirror should be tried after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DownloadError::Interrupted | DownloadError::NoMirrors | DownloadError::InvalidUrl { .. }
        )
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            DownloadError::NotFound { .. } => Some(404),
            DownloadError::Forbidden { .. } => Some(403),
            _ => None,
        }
    }

    /// Short description used in mirror fallback log lines.
    pub fn info(&self) -> String {
        if let Some(status) = self.status() {
            return status.to_string();
        }
        match self {
            DownloadError::Network(_) => "Network".into(),
            DownloadError::Timeout => "Timeout".into(),
            DownloadError::NoResume { .. } => "NoResume".into(),
            DownloadError::HashMismatch { .. } => "HashMismatch".into(),
            DownloadError::Interrupted => "Interrupted".into(),
            DownloadError::NoMirrors => "NoMirrors".into(),
            DownloadError::IpfsWithoutCid => "IpfsWithoutCid".into(),
            DownloadError::InvalidUrl { .. } => "InvalidUrl".into(),
            DownloadError::Io(err) => format!("Io: {}", err.kind()),
            DownloadError::HttpStatus { .. }
            | DownloadError::NotFound { .. }
            | DownloadError::Forbidden { .. } => String::new(),
        }
    }

    /// Maps a ureq error for `url` into the matching variant.
    pub fn from_ureq(err: ureq::Error, url: &str) -> Self {
        match err {
            ureq::Error::StatusCode(404) => {
                DownloadError::NotFound {
                    url: url.to_string(),
                }
            }
            ureq::Error::StatusCode(403) => {
                DownloadError::Forbidden {
                    url: url.to_string(),
                }
            }
            ureq::Error::StatusCode(status) => {
                DownloadError::HttpStatus {
                    status,
                    url: url.to_string(),
                }
            }
            ureq::Error::Timeout(_) => DownloadError::Timeout,
            ureq::Error::Io(err) => DownloadError::Io(err),
            other => DownloadError::Network(Box::new(other)),
        }
    }
}

impl From<ureq::Error> for DownloadError {
    fn from(err: ureq::Error) -> Self {
        Self::Network(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
