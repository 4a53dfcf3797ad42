//! Repository management on top of the updaters.
//!
//! [`RepoManager`] seeds the database from configuration, adds repositories the user points it
//! at, and picks the right updater for every sync.

use std::{collections::HashMap, sync::Arc};

use droidrepo_config::{
    config::{Config, MirrorChooserKind},
    repository::RepositoryConfig,
};
use droidrepo_db::{
    models::repository::is_archive_address, Database, InitialRepository, NewRepository,
    Repository, RepositoryStore, SqliteConnection,
};
use droidrepo_dl::{
    chooser::{MirrorChooser, ParameterMirrorChooser, RandomMirrorChooser},
    downloader::{CancelFlag, HttpDownloaderFactory},
    mirror::{DownloadRequest, IndexFile, Mirror},
    parameters::{FileMirrorParameterManager, LocationPreferences},
};
use droidrepo_events::{
    AddRepoErrorKind, AddRepoState, EventSinkHandle, FetchResult, RepoId, RepoPreview, SyncEvent,
};
use droidrepo_index::{
    entry::{EntryV2, ENTRY_JAR, ENTRY_JSON},
    jar::{certificate_fingerprint, JarVerifier},
    locale::best_locale,
    v1::{IndexV1, DATA_FILE_NAME, SIGNED_FILE_NAME},
    v2::{IndexV2, RepoV2},
    IndexFormatVersion,
};
use droidrepo_utils::{
    fs::{ensure_dir_exists, DirTempFileProvider},
    time::now_millis,
};
use tracing::{debug, info, trace};

use crate::{
    compatibility::DeviceCompatibilityChecker,
    error::{CoreError, CoreResult, UpdateError},
    updater::{
        index_file, IndexUpdateResult, IndexUpdater, IndexV1Updater, IndexV2Updater, TempFile,
        UpdateResult, UpdaterContext,
    },
    uri::normalize,
};

/// Name of the mirror statistics file inside the cache directory.
pub const MIRROR_STATS_FILE: &str = "mirrors.toml";

pub struct RepoManager {
    ctx: UpdaterContext,
    /// Normalized address to lower-case certificate fingerprint.
    known_fingerprints: HashMap<String, String>,
    allow_unknown_sources: bool,
    /// Milliseconds between automatic updates of one repository.
    update_interval: u128,
}

/// A repository whose index was fetched and verified, ready to be stored.
#[derive(Debug, Clone)]
pub struct FetchedRepository {
    /// The normalized address the index was fetched from.
    pub fetch_url: String,
    pub preview: RepoPreview,
    repository: NewRepository,
}

struct FetchedIndex {
    certificate: String,
    format_version: IndexFormatVersion,
    repo: RepoV2,
    num_apps: usize,
}

/// Where to fetch an index from and what to trust.
struct FetchTarget<'a> {
    address: &'a str,
    certificate: Option<&'a str>,
    fingerprint: Option<&'a str>,
    username: Option<&'a str>,
    password: Option<&'a str>,
}

impl FetchTarget<'_> {
    fn request(&self, file: IndexFile, proxy: Option<String>) -> DownloadRequest {
        let mirror = Mirror::new(self.address);
        let mut request = DownloadRequest::new(file, vec![mirror.clone()]);
        request.try_first_mirror = Some(mirror);
        request.proxy = proxy;
        request.username = self.username.map(str::to_string);
        request.password = self.password.map(str::to_string);
        request
    }

    fn verifier(&self) -> JarVerifier {
        JarVerifier::new(self.certificate, self.fingerprint)
    }
}

impl RepoManager {
    pub fn new(ctx: UpdaterContext) -> Self {
        Self {
            ctx,
            known_fingerprints: HashMap::new(),
            allow_unknown_sources: true,
            update_interval: 0,
        }
    }

    /// Wires the database, downloader and compatibility checker described by `config`.
    pub fn from_config(config: &Config, events: EventSinkHandle) -> CoreResult<Self> {
        let db_path = config.get_db_path()?;
        if let Some(parent) = db_path.parent() {
            ensure_dir_exists(parent)?;
        }
        let db = Database::open(&db_path)?;
        let cache_path = config.get_cache_path()?;
        ensure_dir_exists(&cache_path)?;

        let preferences = LocationPreferences {
            prefer_regional: config.prefer_regional_mirrors.unwrap_or(false),
            prefer_worldwide: config.prefer_worldwide_mirrors.unwrap_or(false),
            current_locations: config.current_locations.clone().unwrap_or_default(),
        };
        let stats_path = cache_path.join(MIRROR_STATS_FILE);
        let chooser: Arc<dyn MirrorChooser> = match config.mirror_chooser.unwrap_or_default() {
            MirrorChooserKind::Random => Arc::new(RandomMirrorChooser),
            MirrorChooserKind::Weighted => {
                Arc::new(ParameterMirrorChooser::weighted(Arc::new(
                    FileMirrorParameterManager::load(&stats_path, preferences),
                )))
            }
            MirrorChooserKind::Location => {
                Arc::new(ParameterMirrorChooser::location_aware(Arc::new(
                    FileMirrorParameterManager::load(&stats_path, preferences),
                )))
            }
        };
        debug!(
            db = %db_path.display(),
            chooser = ?config.mirror_chooser,
            "opening repository manager"
        );

        let ctx = UpdaterContext {
            db,
            downloader_factory: Arc::new(HttpDownloaderFactory::new(chooser)),
            temp_files: Arc::new(DirTempFileProvider::new(cache_path.join("tmp"))),
            checker: Arc::new(DeviceCompatibilityChecker::from_config(config)),
            events,
            locales: config.locales(),
            proxy: config.proxy.clone(),
            cancel: CancelFlag::new(),
        };

        Ok(Self::new(ctx)
            .with_known_fingerprints(known_fingerprints(&config.repositories))
            .with_unknown_sources(config.allow_unknown_sources.unwrap_or(true))
            .with_update_interval(config.get_update_interval()))
    }

    pub fn with_known_fingerprints(mut self, fingerprints: HashMap<String, String>) -> Self {
        self.known_fingerprints = fingerprints;
        self
    }

    pub fn with_unknown_sources(mut self, allow: bool) -> Self {
        self.allow_unknown_sources = allow;
        self
    }

    pub fn with_update_interval(mut self, millis: u128) -> Self {
        self.update_interval = millis;
        self
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    pub fn context(&self) -> &UpdaterContext {
        &self.ctx
    }

    /// Cancelling this flag interrupts every running and future download of this manager.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.ctx.cancel.clone()
    }

    pub fn known_fingerprint(&self, address: &str) -> Option<&str> {
        self.known_fingerprints
            .get(address.trim_end_matches('/'))
            .map(String::as_str)
    }

    /// Inserts the configured repositories into an empty database.
    ///
    /// Repositories are stored top-down in configuration order, two weight units apart. An
    /// archive repository sits right below its parent. Returns the number of inserted rows, zero
    /// when the database already had repositories.
    pub fn init_from_config(&self, repositories: &[RepositoryConfig]) -> CoreResult<usize> {
        let inserted = self.ctx.db.transaction(|conn| {
            if !RepositoryStore::list(conn)?.is_empty() {
                return Ok(0);
            }

            let mut weights: HashMap<String, i32> = HashMap::new();
            let mut next_weight = i32::MAX - 1;

            let (archives, regular): (Vec<_>, Vec<_>) = repositories
                .iter()
                .partition(|repo| is_archive_address(&repo.address));

            for repo in regular {
                let address = repo.normalized_address().to_string();
                if weights.contains_key(&address) {
                    continue;
                }
                insert_configured(conn, repo, next_weight)?;
                weights.insert(address, next_weight);
                next_weight -= 2;
            }

            for repo in archives {
                let address = repo.normalized_address().to_string();
                if weights.contains_key(&address) {
                    continue;
                }
                let weight = match weights.get(&archive_parent(&address)) {
                    Some(parent_weight) => parent_weight - 1,
                    None => {
                        let weight = next_weight;
                        next_weight -= 2;
                        weight
                    }
                };
                insert_configured(conn, repo, weight)?;
                weights.insert(address, weight);
            }

            Ok(weights.len())
        })?;

        if inserted > 0 {
            info!("Initialized {inserted} repositories from configuration");
        }
        Ok(inserted)
    }

    pub fn repositories(&self) -> CoreResult<Vec<Repository>> {
        Ok(self.ctx.db.with_conn(RepositoryStore::list)?)
    }

    pub fn get_repository(&self, repo_id: RepoId) -> CoreResult<Repository> {
        self.ctx
            .db
            .with_conn(|conn| RepositoryStore::get(conn, repo_id))?
            .ok_or(CoreError::RepositoryNotFound(repo_id))
    }

    /// Updates one repository, falling back to the legacy index when there is no entry.
    pub fn update(&self, repo_id: RepoId) -> CoreResult<IndexUpdateResult> {
        let repo = self.get_repository(repo_id)?;
        Ok(self.update_repository(&repo))
    }

    pub fn update_repository(&self, repo: &Repository) -> IndexUpdateResult {
        let fingerprint = self.known_fingerprint(&repo.address);

        if repo.format_version == Some(IndexFormatVersion::One) {
            return IndexV1Updater::new(self.ctx.clone()).update(repo, fingerprint);
        }

        match IndexV2Updater::new(self.ctx.clone()).update(repo, fingerprint) {
            IndexUpdateResult::NotFound => {
                info!("[{}] No {ENTRY_JAR}, trying {SIGNED_FILE_NAME}", repo.address);
                IndexV1Updater::new(self.ctx.clone()).update(repo, fingerprint)
            }
            result => result,
        }
    }

    /// Enabled repositories whose last update is older than the update interval.
    pub fn repositories_due(&self, force: bool) -> CoreResult<Vec<Repository>> {
        let now = now_millis();
        let repos = self.repositories()?;
        Ok(repos
            .into_iter()
            .filter(|repo| repo.enabled())
            .filter(|repo| force || self.is_due(repo, now))
            .collect())
    }

    fn is_due(&self, repo: &Repository, now: i64) -> bool {
        match repo.preferences.last_updated {
            None => true,
            Some(last) => (now - last).max(0) as u128 >= self.update_interval,
        }
    }

    /// Updates every due repository in weight order.
    pub fn update_all(&self, force: bool) -> CoreResult<Vec<(RepoId, IndexUpdateResult)>> {
        let repos = self.repositories_due(force)?;
        trace!(count = repos.len(), force, "updating repositories");
        Ok(repos
            .iter()
            .map(|repo| (repo.repo_id, self.update_repository(repo)))
            .collect())
    }

    /// Fetches and verifies the repository at `url` without storing anything.
    ///
    /// Progress and failures are reported as [`SyncEvent::AddRepo`] states.
    pub fn fetch_repository(&self, url: &str) -> CoreResult<FetchedRepository> {
        if !self.allow_unknown_sources {
            return Err(self.add_failed(
                AddRepoErrorKind::UnknownSourcesDisallowed,
                "Adding repositories is not allowed",
            ));
        }

        let uri = normalize(url)
            .map_err(|err| self.add_failed(AddRepoErrorKind::InvalidIndex, err.to_string()))?;
        if !uri.is_supported_scheme() {
            return Err(self.add_failed(
                AddRepoErrorKind::InvalidIndex,
                format!("Unsupported scheme: {}", uri.uri.scheme()),
            ));
        }
        if uri.is_archive() {
            return Err(self.add_failed(
                AddRepoErrorKind::IsArchiveRepo,
                "Archive repositories can not be added directly",
            ));
        }

        let address = uri.address();
        self.emit_add(AddRepoState::Fetching {
            url: address.clone(),
            preview: None,
            done: false,
        });

        let target = FetchTarget {
            address: &address,
            certificate: None,
            fingerprint: uri.fingerprint.as_deref(),
            username: uri.username.as_deref(),
            password: uri.password.as_deref(),
        };
        let index = self
            .fetch_index(&target)
            .map_err(|err| self.add_failed(fetch_error_kind(&err), err.to_string()))?;

        let fingerprint = certificate_fingerprint(&index.certificate).map_err(|err| {
            self.add_failed(AddRepoErrorKind::InvalidFingerprint, err.to_string())
        })?;
        if let Some(known) = self.known_fingerprint(&index.repo.address) {
            if known != fingerprint {
                return Err(self.add_failed(
                    AddRepoErrorKind::InvalidFingerprint,
                    format!(
                        "{} is signed by {fingerprint}, expected {known}",
                        index.repo.address
                    ),
                ));
            }
        }

        let fetch_result = self
            .ctx
            .db
            .with_conn(|conn| classify(conn, &address, &index))
            .map_err(|err| self.add_failed(AddRepoErrorKind::IoError, err.to_string()))?;

        let preview = RepoPreview {
            name: best_locale(&index.repo.name, &self.ctx.locales)
                .cloned()
                .unwrap_or_else(|| index.repo.address.clone()),
            address: index.repo.address.clone(),
            certificate: index.certificate.clone(),
            timestamp: index.repo.timestamp,
            num_apps: index.num_apps,
            fetch_result,
        };
        self.emit_add(AddRepoState::Fetching {
            url: address.clone(),
            preview: Some(preview.clone()),
            done: true,
        });

        let repository = NewRepository {
            name: index.repo.name,
            icon: index.repo.icon,
            address: index.repo.address.trim_end_matches('/').to_string(),
            format_version: Some(index.format_version),
            certificate: index.certificate,
            username: uri.username,
            password: uri.password,
        };
        Ok(FetchedRepository {
            fetch_url: address,
            preview,
            repository,
        })
    }

    /// Stores a fetched repository, or the fetch address as a new mirror of a known one.
    pub fn add_fetched_repository(&self, fetched: FetchedRepository) -> CoreResult<RepoId> {
        let FetchedRepository {
            fetch_url,
            preview,
            repository,
        } = fetched;

        let repo_id = match preview.fetch_result {
            FetchResult::IsExistingRepository { existing_repo_id }
            | FetchResult::IsExistingMirror { existing_repo_id } => {
                return Err(CoreError::Custom(format!(
                    "{fetch_url} is already known as repository {existing_repo_id}"
                )));
            }
            FetchResult::IsNewRepository => {
                self.emit_add(AddRepoState::Adding);
                self.ctx
                    .db
                    .with_conn(|conn| RepositoryStore::insert_new(conn, &repository))?
            }
            FetchResult::IsNewRepoAndNewMirror => {
                self.emit_add(AddRepoState::Adding);
                self.ctx.db.transaction(|conn| {
                    let repo_id = RepositoryStore::insert_new(conn, &repository)?;
                    RepositoryStore::update_user_mirrors(conn, repo_id, &[fetch_url.clone()])?;
                    Ok(repo_id)
                })?
            }
            FetchResult::IsNewMirror { existing_repo_id } => {
                self.emit_add(AddRepoState::Adding);
                self.add_user_mirror(existing_repo_id, &fetch_url)?;
                existing_repo_id
            }
        };

        info!("Added {} as repository {repo_id}", preview.address);
        self.emit_add(AddRepoState::Added { repo_id });
        Ok(repo_id)
    }

    /// Adds the archive companion of `repo_id`, right below it.
    ///
    /// Returns the existing archive when there already is one.
    pub fn add_archive_repo(&self, repo_id: RepoId) -> CoreResult<RepoId> {
        let repo = self.get_repository(repo_id)?;
        if repo.is_archive_repo() {
            return Err(CoreError::Custom(format!(
                "{} is already an archive repository",
                repo.address
            )));
        }
        let Some(certificate) = repo.certificate.as_deref() else {
            return Err(CoreError::Custom(format!(
                "Repository {repo_id} has not been updated yet"
            )));
        };

        if let Some(archive_id) = self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::get_archive_repo_id(conn, certificate))?
        {
            return Ok(archive_id);
        }

        let address = archive_address(&repo.address).ok_or_else(|| {
            CoreError::InvalidUri(format!("{} does not end in /repo", repo.address))
        })?;
        let target = FetchTarget {
            address: &address,
            certificate: Some(certificate),
            fingerprint: None,
            username: repo.username(),
            password: repo.password(),
        };
        let index = self.fetch_index(&target)?;

        let archive = NewRepository {
            name: index.repo.name,
            icon: index.repo.icon,
            address,
            format_version: Some(index.format_version),
            certificate: index.certificate,
            username: repo.username().map(str::to_string),
            password: repo.password().map(str::to_string),
        };
        let weight = repo.weight() - 1;
        let archive_id = self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::insert_new_at(conn, &archive, weight))?;

        info!("Added archive {} as repository {archive_id}", archive.address);
        Ok(archive_id)
    }

    pub fn set_enabled(&self, repo_id: RepoId, enabled: bool) -> CoreResult<()> {
        self.get_repository(repo_id)?;
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::set_enabled(conn, repo_id, enabled))?)
    }

    /// Moves `repo_id` to the position of `target_id`.
    pub fn reorder(&self, repo_id: RepoId, target_id: RepoId) -> CoreResult<()> {
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::reorder(conn, repo_id, target_id))?)
    }

    pub fn delete(&self, repo_id: RepoId) -> CoreResult<()> {
        self.get_repository(repo_id)?;
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::delete(conn, repo_id))?)
    }

    pub fn add_user_mirror(&self, repo_id: RepoId, url: &str) -> CoreResult<()> {
        let url = url.trim_end_matches('/').to_string();
        let mut mirrors = self.get_repository(repo_id)?.preferences.user_mirrors;
        if mirrors.contains(&url) {
            return Ok(());
        }
        mirrors.push(url);
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::update_user_mirrors(conn, repo_id, &mirrors))?)
    }

    pub fn remove_user_mirror(&self, repo_id: RepoId, url: &str) -> CoreResult<()> {
        let url = url.trim_end_matches('/');
        let mut mirrors = self.get_repository(repo_id)?.preferences.user_mirrors;
        mirrors.retain(|mirror| mirror != url);
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::update_user_mirrors(conn, repo_id, &mirrors))?)
    }

    /// Enables or disables any mirror of `repo_id`, including the canonical address.
    pub fn set_mirror_enabled(&self, repo_id: RepoId, url: &str, enabled: bool) -> CoreResult<()> {
        let url = url.trim_end_matches('/').to_string();
        let mut disabled = self.get_repository(repo_id)?.preferences.disabled_mirrors;
        disabled.retain(|mirror| mirror != &url);
        if !enabled {
            disabled.push(url);
        }
        Ok(self
            .ctx
            .db
            .with_conn(|conn| RepositoryStore::update_disabled_mirrors(conn, repo_id, &disabled))?)
    }

    fn fetch_index(&self, target: &FetchTarget) -> UpdateResult<FetchedIndex> {
        match self.fetch_index_v2(target) {
            Err(UpdateError::NotFound(url)) => {
                debug!("No entry at {url}, trying {SIGNED_FILE_NAME}");
                self.fetch_index_v1(target)
            }
            result => result,
        }
    }

    fn fetch_index_v2(&self, target: &FetchTarget) -> UpdateResult<FetchedIndex> {
        let entry_file = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = target.request(IndexFile::new(ENTRY_JAR), self.ctx.proxy.clone());
        self.ctx.download(request, entry_file.path(), -1, None)?;
        let verified = target.verifier().verify_file(entry_file.path(), ENTRY_JSON)?;
        let entry = EntryV2::from_slice(&verified.payload)?;

        let index_path = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = target.request(index_file(&entry.index), self.ctx.proxy.clone());
        self.ctx.download(
            request,
            index_path.path(),
            entry.index.size,
            Some(&entry.index.sha256),
        )?;
        let index = IndexV2::from_slice(&index_path.read()?)?;

        Ok(FetchedIndex {
            certificate: verified.certificate,
            format_version: IndexFormatVersion::Two,
            num_apps: index.packages.len(),
            repo: index.repo,
        })
    }

    fn fetch_index_v1(&self, target: &FetchTarget) -> UpdateResult<FetchedIndex> {
        let file = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = target.request(IndexFile::new(SIGNED_FILE_NAME), self.ctx.proxy.clone());
        self.ctx.download(request, file.path(), -1, None)?;
        let verified = target.verifier().verify_file(file.path(), DATA_FILE_NAME)?;
        let index = IndexV1::from_slice(&verified.payload)?.into_v2();

        Ok(FetchedIndex {
            certificate: verified.certificate,
            format_version: IndexFormatVersion::One,
            num_apps: index.packages.len(),
            repo: index.repo,
        })
    }

    fn emit_add(&self, state: AddRepoState) {
        self.ctx.events.emit(SyncEvent::AddRepo(state));
    }

    fn add_failed(&self, kind: AddRepoErrorKind, message: impl Into<String>) -> CoreError {
        let message = message.into();
        debug!(?kind, "adding repository failed: {message}");
        self.emit_add(AddRepoState::Error {
            kind,
            message: message.clone(),
        });
        CoreError::AddRepo { kind, message }
    }
}

fn insert_configured(
    conn: &mut SqliteConnection,
    repo: &RepositoryConfig,
    weight: i32,
) -> droidrepo_db::Result<i64> {
    RepositoryStore::insert_initial(
        conn,
        &InitialRepository {
            name: repo.name.clone(),
            address: repo.normalized_address().to_string(),
            description: repo.description.clone().unwrap_or_default(),
            certificate: repo.certificate.clone().unwrap_or_default(),
            mirrors: repo.mirrors.clone(),
            version: 0,
            enabled: repo.is_enabled(),
            weight,
        },
    )
}

fn known_fingerprints(repositories: &[RepositoryConfig]) -> HashMap<String, String> {
    repositories
        .iter()
        .filter_map(|repo| {
            let fingerprint = match (&repo.fingerprint, &repo.certificate) {
                (Some(fingerprint), _) => fingerprint.trim().to_lowercase(),
                (None, Some(certificate)) => certificate_fingerprint(certificate).ok()?,
                (None, None) => return None,
            };
            Some((repo.normalized_address().to_string(), fingerprint))
        })
        .collect()
}

/// A not-found index means the address does not host a repository.
fn fetch_error_kind(err: &UpdateError) -> AddRepoErrorKind {
    match err {
        UpdateError::NotFound(_) => AddRepoErrorKind::InvalidIndex,
        err => err.add_repo_error_kind(),
    }
}

fn same_address(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn classify(
    conn: &mut SqliteConnection,
    fetch_url: &str,
    index: &FetchedIndex,
) -> droidrepo_db::Result<FetchResult> {
    let Some(existing) = RepositoryStore::get_by_certificate(conn, &index.certificate)? else {
        return Ok(if same_address(fetch_url, &index.repo.address) {
            FetchResult::IsNewRepository
        } else {
            FetchResult::IsNewRepoAndNewMirror
        });
    };

    let existing_repo_id = existing.repo_id;
    if same_address(fetch_url, &existing.address) {
        return Ok(FetchResult::IsExistingRepository { existing_repo_id });
    }

    let known_mirror = existing
        .declared_mirrors()
        .iter()
        .map(|mirror| mirror.url.as_str())
        .chain(existing.preferences.user_mirrors.iter().map(String::as_str))
        .chain(existing.preferences.disabled_mirrors.iter().map(String::as_str))
        .any(|url| same_address(fetch_url, url));

    Ok(if known_mirror {
        FetchResult::IsExistingMirror { existing_repo_id }
    } else {
        FetchResult::IsNewMirror { existing_repo_id }
    })
}

/// `.../archive` for `.../repo`.
fn archive_address(address: &str) -> Option<String> {
    address
        .trim_end_matches('/')
        .strip_suffix("/repo")
        .map(|base| format!("{base}/archive"))
}

/// `.../repo` for `.../archive`.
fn archive_parent(address: &str) -> String {
    let address = address.trim_end_matches('/');
    match address.strip_suffix("/archive") {
        Some(base) => format!("{base}/repo"),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use droidrepo_events::CollectorSink;
    use droidrepo_index::jar::JarSigner;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::test_utils::{minimal_index, publish_v2, FakeDownloaderFactory};

    const ADDRESS: &str = "https://example.org/fdroid/repo";
    const MIRROR: &str = "https://mirror.example.org/fdroid/repo";

    struct Fixture {
        _dir: TempDir,
        factory: Arc<FakeDownloaderFactory>,
        events: Arc<CollectorSink>,
        signer: JarSigner,
        manager: RepoManager,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let factory = Arc::new(FakeDownloaderFactory::default());
            let events = Arc::new(CollectorSink::default());
            let ctx = UpdaterContext {
                db: Database::open_in_memory().unwrap(),
                downloader_factory: factory.clone(),
                temp_files: Arc::new(DirTempFileProvider::new(dir.path().join("tmp"))),
                checker: Arc::new(DeviceCompatibilityChecker::new(34, vec![], vec![])),
                events: events.clone(),
                locales: vec!["en-US".into()],
                proxy: None,
                cancel: CancelFlag::new(),
            };
            Self {
                _dir: dir,
                factory,
                events,
                signer: JarSigner::from_seed([3u8; 32], "REPO"),
                manager: RepoManager::new(ctx),
            }
        }

        fn publish(&self, base_url: &str, address: &str, timestamp: i64) {
            publish_v2(
                &self.factory,
                &self.signer,
                base_url,
                timestamp,
                &minimal_index(address, "Example Repo", timestamp),
            );
        }

        fn add_states(&self) -> Vec<AddRepoState> {
            self.events
                .events()
                .into_iter()
                .filter_map(|event| {
                    match event {
                        SyncEvent::AddRepo(state) => Some(state),
                        _ => None,
                    }
                })
                .collect()
        }

        fn last_error_kind(&self) -> Option<AddRepoErrorKind> {
            self.add_states().into_iter().rev().find_map(|state| {
                match state {
                    AddRepoState::Error { kind, .. } => Some(kind),
                    _ => None,
                }
            })
        }
    }

    fn configured(name: &str, address: &str, enabled: bool) -> RepositoryConfig {
        RepositoryConfig {
            name: name.into(),
            address: address.into(),
            description: None,
            certificate: None,
            fingerprint: None,
            mirrors: vec![],
            enabled: Some(enabled),
        }
    }

    #[test]
    fn test_init_from_config_orders_by_weight() {
        let fixture = Fixture::new();
        let repos = vec![
            configured("Main", "https://a.example.org/fdroid/repo/", true),
            configured("Main Archive", "https://a.example.org/fdroid/archive", false),
            configured("Other", "https://b.example.org/fdroid/repo", true),
        ];

        assert_eq!(fixture.manager.init_from_config(&repos).unwrap(), 3);
        let stored = fixture.manager.repositories().unwrap();
        let summary: Vec<(&str, i32, bool)> = stored
            .iter()
            .map(|repo| (repo.address.as_str(), repo.weight(), repo.enabled()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("https://a.example.org/fdroid/repo", i32::MAX - 1, true),
                ("https://a.example.org/fdroid/archive", i32::MAX - 2, false),
                ("https://b.example.org/fdroid/repo", i32::MAX - 3, true),
            ]
        );

        assert_eq!(fixture.manager.init_from_config(&repos).unwrap(), 0);
        assert_eq!(fixture.manager.repositories().unwrap().len(), 3);
    }

    #[test]
    fn test_fetch_and_add_new_repository() {
        let fixture = Fixture::new();
        fixture.publish(ADDRESS, ADDRESS, 42);

        let fetched = fixture
            .manager
            .fetch_repository("fdroidrepos://example.org/fdroid/repo")
            .unwrap();
        assert_eq!(fetched.fetch_url, ADDRESS);
        assert_eq!(fetched.preview.name, "Example Repo");
        assert_eq!(fetched.preview.num_apps, 1);
        assert_eq!(fetched.preview.timestamp, 42);
        assert_eq!(fetched.preview.fetch_result, FetchResult::IsNewRepository);

        let repo_id = fixture.manager.add_fetched_repository(fetched).unwrap();
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.address, ADDRESS);
        assert_eq!(repo.timestamp, -1);
        assert_eq!(repo.certificate, Some(fixture.signer.certificate()));
        assert_eq!(repo.weight(), i32::MAX);

        let states = fixture.add_states();
        assert!(matches!(
            states.first(),
            Some(AddRepoState::Fetching { done: false, .. })
        ));
        assert!(states.contains(&AddRepoState::Adding));
        assert_eq!(states.last(), Some(&AddRepoState::Added { repo_id }));

        let result = fixture.manager.update(repo_id).unwrap();
        assert!(matches!(result, IndexUpdateResult::Processed), "{result:?}");
        assert_eq!(fixture.manager.get_repository(repo_id).unwrap().timestamp, 42);
    }

    #[test]
    fn test_fetch_falls_back_to_v1() {
        let fixture = Fixture::new();
        let index = json!({
            "repo": {
                "timestamp": 7,
                "version": 21,
                "name": "Legacy Repo",
                "address": ADDRESS,
                "description": "Old",
            },
            "apps": [],
            "packages": {},
        });
        let bytes = serde_json::to_vec(&index).unwrap();
        let jar = fixture
            .signer
            .sign(&[(DATA_FILE_NAME, bytes.as_slice())])
            .unwrap();
        fixture.factory.serve(ADDRESS, SIGNED_FILE_NAME, jar);

        let fetched = fixture.manager.fetch_repository(ADDRESS).unwrap();
        assert_eq!(fetched.preview.name, "Legacy Repo");
        assert_eq!(fetched.preview.num_apps, 0);
        assert_eq!(
            fixture.factory.requested(),
            vec![ENTRY_JAR, SIGNED_FILE_NAME]
        );

        let repo_id = fixture.manager.add_fetched_repository(fetched).unwrap();
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.format_version, Some(IndexFormatVersion::One));
    }

    #[test]
    fn test_fetch_rejects_wrong_fingerprint() {
        let fixture = Fixture::new();
        fixture.publish(ADDRESS, ADDRESS, 42);

        let url = format!("{ADDRESS}?fingerprint={}", "ab".repeat(32));
        let err = fixture.manager.fetch_repository(&url).unwrap_err();
        assert!(matches!(
            err,
            CoreError::AddRepo {
                kind: AddRepoErrorKind::InvalidFingerprint,
                ..
            }
        ));
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::InvalidFingerprint)
        );
    }

    #[test]
    fn test_fetch_checks_known_fingerprints() {
        let fixture = Fixture::new();
        fixture.publish(ADDRESS, ADDRESS, 42);
        let known = HashMap::from([(ADDRESS.to_string(), "cd".repeat(32))]);
        let manager =
            RepoManager::new(fixture.manager.context().clone()).with_known_fingerprints(known);
        let expected = "cd".repeat(32);
        assert_eq!(
            manager.known_fingerprint(&format!("{ADDRESS}/")),
            Some(expected.as_str())
        );

        assert!(manager.fetch_repository(ADDRESS).is_err());
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::InvalidFingerprint)
        );
    }

    #[test]
    fn test_fetch_rejects_archive_and_unknown_sources() {
        let fixture = Fixture::new();
        assert!(fixture
            .manager
            .fetch_repository("https://example.org/fdroid/archive")
            .is_err());
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::IsArchiveRepo)
        );

        assert!(fixture
            .manager
            .fetch_repository("ftp://example.org/fdroid/repo")
            .is_err());
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::InvalidIndex)
        );

        let manager =
            RepoManager::new(fixture.manager.context().clone()).with_unknown_sources(false);
        assert!(manager.fetch_repository(ADDRESS).is_err());
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::UnknownSourcesDisallowed)
        );
        assert!(fixture.factory.requested().is_empty());
    }

    #[test]
    fn test_missing_repository_is_invalid_index() {
        let fixture = Fixture::new();
        assert!(fixture.manager.fetch_repository(ADDRESS).is_err());
        assert_eq!(
            fixture.last_error_kind(),
            Some(AddRepoErrorKind::InvalidIndex)
        );
    }

    #[test]
    fn test_classifies_existing_repository_and_mirrors() {
        let fixture = Fixture::new();
        fixture.publish(ADDRESS, ADDRESS, 42);
        let fetched = fixture.manager.fetch_repository(ADDRESS).unwrap();
        let repo_id = fixture.manager.add_fetched_repository(fetched).unwrap();
        fixture.manager.update(repo_id).unwrap();

        let again = fixture.manager.fetch_repository(ADDRESS).unwrap();
        assert_eq!(
            again.preview.fetch_result,
            FetchResult::IsExistingRepository {
                existing_repo_id: repo_id
            }
        );
        assert!(fixture.manager.add_fetched_repository(again).is_err());

        // declared by the index
        fixture.publish(MIRROR, ADDRESS, 42);
        let declared = fixture.manager.fetch_repository(MIRROR).unwrap();
        assert_eq!(
            declared.preview.fetch_result,
            FetchResult::IsExistingMirror {
                existing_repo_id: repo_id
            }
        );

        let other = "https://other.example.net/fdroid/repo";
        fixture.publish(other, ADDRESS, 42);
        let fetched = fixture.manager.fetch_repository(other).unwrap();
        assert_eq!(
            fetched.preview.fetch_result,
            FetchResult::IsNewMirror {
                existing_repo_id: repo_id
            }
        );
        assert_eq!(
            fixture.manager.add_fetched_repository(fetched).unwrap(),
            repo_id
        );
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.preferences.user_mirrors, vec![other.to_string()]);
    }

    #[test]
    fn test_new_repository_from_mirror_keeps_mirror() {
        let fixture = Fixture::new();
        fixture.publish(MIRROR, ADDRESS, 42);

        let fetched = fixture.manager.fetch_repository(MIRROR).unwrap();
        assert_eq!(
            fetched.preview.fetch_result,
            FetchResult::IsNewRepoAndNewMirror
        );
        let repo_id = fixture.manager.add_fetched_repository(fetched).unwrap();
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.address, ADDRESS);
        assert_eq!(repo.preferences.user_mirrors, vec![MIRROR.to_string()]);
    }

    #[test]
    fn test_add_archive_repo_sits_below_parent() {
        let fixture = Fixture::new();
        fixture.publish(ADDRESS, ADDRESS, 42);
        let fetched = fixture.manager.fetch_repository(ADDRESS).unwrap();
        let repo_id = fixture.manager.add_fetched_repository(fetched).unwrap();

        let archive = "https://example.org/fdroid/archive";
        fixture.publish(archive, archive, 40);

        let archive_id = fixture.manager.add_archive_repo(repo_id).unwrap();
        let parent = fixture.manager.get_repository(repo_id).unwrap();
        let stored = fixture.manager.get_repository(archive_id).unwrap();
        assert!(stored.is_archive_repo());
        assert_eq!(stored.address, archive);
        assert_eq!(stored.weight(), parent.weight() - 1);

        assert_eq!(fixture.manager.add_archive_repo(repo_id).unwrap(), archive_id);
        assert!(fixture.manager.add_archive_repo(archive_id).is_err());
    }

    #[test]
    fn test_update_falls_back_to_v1_for_unknown_format() {
        let fixture = Fixture::new();
        fixture
            .manager
            .init_from_config(&[configured("Legacy", ADDRESS, true)])
            .unwrap();
        let repo_id = fixture.manager.repositories().unwrap()[0].repo_id;

        let index = json!({
            "repo": { "timestamp": 5, "version": 21, "name": "Legacy", "address": ADDRESS },
            "apps": [],
            "packages": {},
        });
        let bytes = serde_json::to_vec(&index).unwrap();
        let jar = fixture
            .signer
            .sign(&[(DATA_FILE_NAME, bytes.as_slice())])
            .unwrap();
        fixture.factory.serve(ADDRESS, SIGNED_FILE_NAME, jar);

        let result = fixture.manager.update(repo_id).unwrap();
        assert!(matches!(result, IndexUpdateResult::Processed), "{result:?}");
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.format_version, Some(IndexFormatVersion::One));
        assert_eq!(repo.timestamp, 5);
    }

    #[test]
    fn test_repositories_due_respects_interval() {
        let fixture = Fixture::new();
        fixture
            .manager
            .init_from_config(&[
                configured("One", ADDRESS, true),
                configured("Two", "https://b.example.org/fdroid/repo", false),
            ])
            .unwrap();
        let repo_id = fixture.manager.repositories().unwrap()[0].repo_id;
        fixture
            .manager
            .db()
            .with_conn(|conn| RepositoryStore::set_last_updated(conn, repo_id, now_millis()))
            .unwrap();

        let manager = RepoManager::new(fixture.manager.context().clone())
            .with_update_interval(3_600_000);
        assert!(manager.repositories_due(false).unwrap().is_empty());
        assert_eq!(manager.repositories_due(true).unwrap().len(), 1);

        let manager = manager.with_update_interval(0);
        assert_eq!(manager.repositories_due(false).unwrap().len(), 1);
    }

    #[test]
    fn test_update_all_skips_disabled_repositories() {
        let fixture = Fixture::new();
        fixture
            .manager
            .init_from_config(&[
                configured("One", ADDRESS, true),
                configured("Two", "https://b.example.org/fdroid/repo", false),
            ])
            .unwrap();

        let results = fixture.manager.update_all(false).unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].1, IndexUpdateResult::NotFound), "{:?}", results[0].1);
        assert_eq!(
            fixture.factory.requested(),
            vec![ENTRY_JAR.to_string(), SIGNED_FILE_NAME.to_string()]
        );
    }

    #[test]
    fn test_user_mirror_management() {
        let fixture = Fixture::new();
        fixture
            .manager
            .init_from_config(&[configured("One", ADDRESS, true)])
            .unwrap();
        let repo_id = fixture.manager.repositories().unwrap()[0].repo_id;

        fixture.manager.add_user_mirror(repo_id, "https://m.example.org/repo/").unwrap();
        fixture.manager.add_user_mirror(repo_id, "https://m.example.org/repo").unwrap();
        fixture.manager.set_mirror_enabled(repo_id, ADDRESS, false).unwrap();

        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert_eq!(repo.preferences.user_mirrors, vec!["https://m.example.org/repo"]);
        let urls: Vec<String> = repo.mirrors().into_iter().map(|m| m.url).collect();
        assert_eq!(urls, vec!["https://m.example.org/repo"]);

        fixture.manager.set_mirror_enabled(repo_id, ADDRESS, true).unwrap();
        fixture.manager.remove_user_mirror(repo_id, "https://m.example.org/repo").unwrap();
        let repo = fixture.manager.get_repository(repo_id).unwrap();
        assert!(repo.preferences.user_mirrors.is_empty());
        assert!(repo.preferences.disabled_mirrors.is_empty());

        assert!(matches!(
            fixture.manager.set_enabled(999, false),
            Err(CoreError::RepositoryNotFound(999))
        ));
    }

    #[test]
    fn test_from_config_seeds_default_repositories() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default_config();
        config.db_path = Some(dir.path().join("db/droidrepo.db").display().to_string());
        config.cache_path = Some(dir.path().join("cache").display().to_string());
        config.mirror_chooser = Some(MirrorChooserKind::Weighted);
        config.allow_unknown_sources = Some(false);

        let events = Arc::new(CollectorSink::default());
        let manager = RepoManager::from_config(&config, events.clone()).unwrap();
        assert_eq!(manager.init_from_config(&config.repositories).unwrap(), 3);

        let repos = manager.repositories().unwrap();
        assert_eq!(repos[0].address, "https://f-droid.org/repo");
        assert_eq!(repos[1].address, "https://f-droid.org/archive");
        assert_eq!(repos[1].weight(), repos[0].weight() - 1);
        assert!(manager
            .known_fingerprint("https://apt.izzysoft.de/fdroid/repo")
            .is_some());

        assert!(manager.fetch_repository(ADDRESS).is_err());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_archive_helpers() {
        assert_eq!(
            archive_address("https://example.org/fdroid/repo/").as_deref(),
            Some("https://example.org/fdroid/archive")
        );
        assert_eq!(archive_address("https://example.org/fdroid"), None);
        assert_eq!(
            archive_parent("https://example.org/fdroid/archive"),
            "https://example.org/fdroid/repo"
        );
    }
}
