use crate::{OperationId, RepoId};

/// Everything the sync layer reports to a frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A file download is starting. `total` is -1 when the size is unknown.
    DownloadStarting {
        op_id: OperationId,
        url: String,
        total: i64,
    },
    /// Bytes received so far for a download.
    DownloadProgress {
        op_id: OperationId,
        url: String,
        current: u64,
        total: i64,
    },
    /// A download finished and passed its hash check.
    DownloadComplete {
        op_id: OperationId,
        url: String,
        total: u64,
    },
    /// A mirror failed and the next one is being tried.
    MirrorFailed {
        op_id: OperationId,
        url: String,
        error: String,
    },
    /// Progress of a repository update cycle.
    Update { repo_id: RepoId, stage: UpdateStage },
    /// State of an add-repository flow.
    AddRepo(AddRepoState),
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Steps of one fetch-verify-apply cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStage {
    FetchingEntry,
    /// The signed entry was verified; carries its timestamp.
    EntryVerified { timestamp: i64 },
    /// Downloading the diff against the stored timestamp.
    DownloadingDiff { name: String },
    DownloadingIndex { name: String },
    Applying,
    Committed { timestamp: i64 },
    Unchanged,
    Failed(String),
}

impl UpdateStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateStage::Committed { .. } | UpdateStage::Unchanged | UpdateStage::Failed(_)
        )
    }
}

/// How a fetched repository relates to what is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    IsNewRepository,
    IsNewRepoAndNewMirror,
    IsNewMirror { existing_repo_id: RepoId },
    IsExistingRepository { existing_repo_id: RepoId },
    IsExistingMirror { existing_repo_id: RepoId },
}

impl FetchResult {
    /// Whether confirming this result would change anything.
    pub fn can_add(&self) -> bool {
        matches!(
            self,
            FetchResult::IsNewRepository
                | FetchResult::IsNewRepoAndNewMirror
                | FetchResult::IsNewMirror { .. }
        )
    }
}

/// Summary of a fetched but not yet stored repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPreview {
    pub name: String,
    pub address: String,
    pub certificate: String,
    pub timestamp: i64,
    pub num_apps: usize,
    pub fetch_result: FetchResult,
}

/// States of the add-repository flow; `Added` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddRepoState {
    Fetching {
        url: String,
        preview: Option<RepoPreview>,
        done: bool,
    },
    Adding,
    Added { repo_id: RepoId },
    Error {
        kind: AddRepoErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddRepoErrorKind {
    UnknownSourcesDisallowed,
    InvalidFingerprint,
    IsArchiveRepo,
    InvalidIndex,
    IoError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
