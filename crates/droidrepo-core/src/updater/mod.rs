//! Fetch-verify-apply cycles for a single repository.
//!
//! An update downloads the signed entry point, verifies it against the pinned certificate (or
//! an expected fingerprint, or trusts it on first use), decides between a diff and the full
//! index, and writes the result in one transaction. The transaction first swaps the stored
//! timestamp from the value seen at the start of the cycle to the new one, so a concurrent
//! update that committed in between makes this one fail instead of applying stale data.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use droidrepo_db::{
    AppStore, CompatibilityChecker, Database, Repository, RepositoryStore, SqliteConnection,
};
use droidrepo_dl::{
    downloader::{CancelFlag, DownloaderFactory},
    mirror::{DownloadRequest, IndexFile, Mirror},
};
use droidrepo_events::{EventSinkHandle, OperationId, RepoId, SyncEvent, UpdateStage};
use droidrepo_index::{entry::EntryFileV2, v2::IndexV2, IndexFormatVersion};
use droidrepo_utils::{
    fs::{safe_remove, TempFileProvider},
    time::now_millis,
};
use tracing::{debug, warn};

use crate::error::UpdateError;

pub mod v1;
pub mod v2;


pub use v1::IndexV1Updater;
pub use v2::IndexV2Updater;

pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Outcome of one update cycle.
#[derive(Debug)]
pub enum IndexUpdateResult {
    /// The repository already had the published data.
    Unchanged,
    /// New data was committed.
    Processed,
    /// The index file does not exist on the server, usually because of an older format.
    NotFound,
    Error(UpdateError),
}

/// Updates a repository from one index format.
pub trait IndexUpdater {
    fn format_version(&self) -> IndexFormatVersion;

    fn context(&self) -> &UpdaterContext;

    /// Runs the cycle, returning errors instead of folding them into the result.
    ///
    /// `fingerprint` is checked against the signing certificate when the repository has no
    /// pinned certificate yet.
    fn update_repo(
        &self,
        repo: &Repository,
        fingerprint: Option<&str>,
    ) -> UpdateResult<IndexUpdateResult>;

    /// Runs the cycle. Failures never escape; they come back as [`IndexUpdateResult::Error`].
    fn update(&self, repo: &Repository, fingerprint: Option<&str>) -> IndexUpdateResult {
        match self.update_repo(repo, fingerprint) {
            Ok(result) => result,
            Err(UpdateError::NotFound(url)) => {
                debug!(
                    repo_id = repo.repo_id,
                    "{} index not found at {url}",
                    self.format_version()
                );
                IndexUpdateResult::NotFound
            }
            Err(err) => {
                warn!(repo_id = repo.repo_id, "Error updating {}: {err}", repo.address);
                self.context().emit_stage(repo.repo_id, UpdateStage::Failed(err.to_string()));
                IndexUpdateResult::Error(err)
            }
        }
    }
}

/// Collaborators shared by the updaters.
#[derive(Clone)]
pub struct UpdaterContext {
    pub db: Database,
    pub downloader_factory: Arc<dyn DownloaderFactory>,
    pub temp_files: Arc<dyn TempFileProvider>,
    pub checker: Arc<dyn CompatibilityChecker>,
    pub events: EventSinkHandle,
    /// Preferred locales, best first. Used for the cached app name and summary.
    pub locales: Vec<String>,
    pub proxy: Option<String>,
    /// Shared by every download of this context; once set, running updates stop.
    pub cancel: CancelFlag,
}

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

impl UpdaterContext {
    pub(crate) fn emit_stage(&self, repo_id: RepoId, stage: UpdateStage) {
        self.events.emit(SyncEvent::Update { repo_id, stage });
    }

    /// Builds the request for `file` against every usable mirror of `repo`.
    pub(crate) fn download_request(&self, repo: &Repository, file: IndexFile) -> DownloadRequest {
        let mirrors = repo
            .mirrors()
            .into_iter()
            .map(|mirror| {
                let mut result = Mirror::new(mirror.url);
                if let Some(code) = mirror.country_code {
                    result = result.with_location(code);
                }
                if mirror.is_ipfs_gateway {
                    result = result.ipfs_gateway();
                }
                if mirror.works_without_sni {
                    result = result.without_sni();
                }
                result
            })
            .collect();

        let mut request = DownloadRequest::new(file, mirrors);
        request.proxy = self.proxy.clone();
        request.username = repo.username().map(str::to_string);
        request.password = repo.password().map(str::to_string);
        request
    }

    /// Downloads into `dest`, reporting progress through the event sink.
    pub(crate) fn download(
        &self,
        request: DownloadRequest,
        dest: &Path,
        total_size: i64,
        sha256: Option<&str>,
    ) -> UpdateResult<()> {
        let op_id: OperationId = NEXT_OPERATION.fetch_add(1, Ordering::Relaxed);
        let url = request
            .try_first_mirror
            .as_ref()
            .or_else(|| request.mirrors.first())
            .map(|mirror| mirror.get_url(&request.index_file.name))
            .unwrap_or_else(|| request.index_file.name.clone());

        self.events.emit(SyncEvent::DownloadStarting {
            op_id,
            url: url.clone(),
            total: total_size,
        });

        let mut downloader = self
            .downloader_factory
            .create(request, dest, self.cancel.clone());
        let events = self.events.clone();
        let progress_url = url.clone();
        downloader.set_progress_listener(Arc::new(move |current, total| {
            events.emit(SyncEvent::DownloadProgress {
                op_id,
                url: progress_url.clone(),
                current,
                total,
            });
        }));
        downloader.download(total_size, sha256)?;

        let total = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        self.events
            .emit(SyncEvent::DownloadComplete { op_id, url, total });
        Ok(())
    }

    /// Swaps the stored timestamp from `expected` to `new`, failing if someone else moved it.
    pub(crate) fn claim_timestamp(
        conn: &mut SqliteConnection,
        repo_id: RepoId,
        expected: i64,
        new: i64,
    ) -> UpdateResult<()> {
        if RepositoryStore::compare_and_set_timestamp(conn, repo_id, expected, new)? {
            return Ok(());
        }
        let found = RepositoryStore::get_timestamp(conn, repo_id)?.unwrap_or(-1);
        Err(UpdateError::ConcurrentModification {
            repo_id,
            expected,
            found,
        })
    }

    /// Finishes a committed update: recomputes compatibility and stamps the update time.
    pub(crate) fn finish(&self, conn: &mut SqliteConnection, repo_id: RepoId) -> UpdateResult<()> {
        AppStore::update_compatibility(conn, repo_id, self.checker.as_ref())?;
        RepositoryStore::set_last_updated(conn, repo_id, now_millis())?;
        Ok(())
    }
}

/// Download description of a file listed in the entry.
pub(crate) fn index_file(file: &EntryFileV2) -> IndexFile {
    IndexFile {
        name: file.name.clone(),
        sha256: Some(file.sha256.clone()),
        size: Some(file.size),
        ipfs_cid_v1: file.ipfs_cid_v1.clone(),
    }
}

/// Replaces everything stored for `repo_id` with a full index.
#[allow(clippy::too_many_arguments)]
pub(crate) fn persist_full_index(
    conn: &mut SqliteConnection,
    repo_id: RepoId,
    index: &IndexV2,
    version: i64,
    format_version: IndexFormatVersion,
    certificate: &str,
    max_age: Option<i32>,
    locales: &[String],
) -> UpdateResult<()> {
    RepositoryStore::replace(
        conn,
        repo_id,
        &index.repo,
        version,
        format_version,
        certificate,
        max_age,
    )?;
    for (package_name, package) in &index.packages {
        AppStore::insert_package(conn, repo_id, package_name, package, locales)?;
    }
    debug!(repo_id, packages = index.packages.len(), "stored full index");
    Ok(())
}

/// A download target owned by one update cycle, removed when dropped.
pub(crate) struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub(crate) fn create(provider: &dyn TempFileProvider) -> UpdateResult<Self> {
        Ok(Self {
            path: provider.create_temp_file()?,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read(&self) -> UpdateResult<Vec<u8>> {
        fs::read(&self.path).map_err(|source| {
            UpdateError::Io {
                action: format!("reading {}", self.path.display()),
                source,
            }
        })
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(err) = safe_remove(&self.path) {
            warn!("Failed to remove {}: {err}", self.path.display());
        }
    }
}
