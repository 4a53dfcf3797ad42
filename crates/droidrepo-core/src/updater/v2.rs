use droidrepo_db::{AppStore, Connection, Repository, RepositoryStore};
use droidrepo_dl::mirror::IndexFile;
use droidrepo_events::UpdateStage;
use droidrepo_index::{
    entry::{EntryFileV2, EntryV2, ENTRY_JAR, ENTRY_JSON},
    jar::JarVerifier,
    v2::IndexV2,
    IndexError, IndexFormatVersion,
};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    index_file, persist_full_index, IndexUpdateResult, IndexUpdater, TempFile, UpdateResult, UpdaterContext,
};
use crate::error::UpdateError;

/// Updates repositories from `entry.jar`, preferring a diff over the full index.
pub struct IndexV2Updater {
    ctx: UpdaterContext,
}

/// What the verified entry said, plus the certificate that signed it.
struct VerifiedEntry {
    certificate: String,
    entry: EntryV2,
}

impl IndexV2Updater {
    pub fn new(ctx: UpdaterContext) -> Self {
        Self { ctx }
    }

    fn fetch_entry(
        &self,
        repo: &Repository,
        fingerprint: Option<&str>,
    ) -> UpdateResult<VerifiedEntry> {
        self.ctx.emit_stage(repo.repo_id, UpdateStage::FetchingEntry);

        let file = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = self.ctx.download_request(repo, IndexFile::new(ENTRY_JAR));
        // the entry has no published hash, its signature covers it
        self.ctx.download(request, file.path(), -1, None)?;

        let verified = JarVerifier::new(repo.certificate.as_deref(), fingerprint)
            .verify_file(file.path(), ENTRY_JSON)?;
        let entry = EntryV2::from_slice(&verified.payload)?;

        self.ctx.emit_stage(
            repo.repo_id,
            UpdateStage::EntryVerified {
                timestamp: entry.timestamp,
            },
        );
        Ok(VerifiedEntry {
            certificate: verified.certificate,
            entry,
        })
    }

    /// Picks the diff for the stored timestamp, if the repository may use one.
    fn choose_diff<'a>(repo: &Repository, entry: &'a EntryV2) -> Option<&'a EntryFileV2> {
        if repo.format_version != Some(IndexFormatVersion::CURRENT) || repo.timestamp < 0 {
            return None;
        }
        entry.get_diff(repo.timestamp)
    }

    fn download_file(&self, repo: &Repository, file: &EntryFileV2) -> UpdateResult<Vec<u8>> {
        let temp = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = self.ctx.download_request(repo, index_file(file));
        self.ctx
            .download(request, temp.path(), file.size, Some(&file.sha256))?;
        temp.read()
    }

    fn process_diff(
        &self,
        repo: &Repository,
        verified: &VerifiedEntry,
        diff_file: &EntryFileV2,
    ) -> UpdateResult<()> {
        let entry = &verified.entry;
        self.ctx.emit_stage(
            repo.repo_id,
            UpdateStage::DownloadingDiff {
                name: diff_file.name.clone(),
            },
        );
        let bytes = self.download_file(repo, diff_file)?;
        let diff: Value = serde_json::from_slice(&bytes).map_err(IndexError::from)?;
        let Value::Object(diff) = diff else {
            return Err(IndexError::serialization("diff no dict").into());
        };
        let repo_diff = object_or_empty(&diff, "repo")?;
        let packages_diff = object_or_empty(&diff, "packages")?;

        self.ctx.emit_stage(repo.repo_id, UpdateStage::Applying);
        let mut guard = self.ctx.db.conn()?;
        guard.conn().transaction::<_, UpdateError, _>(|conn| {
            UpdaterContext::claim_timestamp(conn, repo.repo_id, repo.timestamp, entry.timestamp)?;
            RepositoryStore::apply_diff(
                conn,
                repo.repo_id,
                &repo_diff,
                entry.version,
                entry.max_age,
            )?;
            AppStore::apply_packages_diff(conn, repo.repo_id, &packages_diff, &self.ctx.locales)?;
            self.ctx.finish(conn, repo.repo_id)
        })
    }

    fn process_full(&self, repo: &Repository, verified: &VerifiedEntry) -> UpdateResult<()> {
        let entry = &verified.entry;
        self.ctx.emit_stage(
            repo.repo_id,
            UpdateStage::DownloadingIndex {
                name: entry.index.name.clone(),
            },
        );
        let bytes = self.download_file(repo, &entry.index)?;
        let index = IndexV2::from_slice(&bytes)?;

        self.ctx.emit_stage(repo.repo_id, UpdateStage::Applying);
        let mut guard = self.ctx.db.conn()?;
        guard.conn().transaction::<_, UpdateError, _>(|conn| {
            UpdaterContext::claim_timestamp(conn, repo.repo_id, repo.timestamp, entry.timestamp)?;
            persist_full_index(
                conn,
                repo.repo_id,
                &index,
                entry.version,
                IndexFormatVersion::Two,
                &verified.certificate,
                entry.max_age,
                &self.ctx.locales,
            )?;
            self.ctx.finish(conn, repo.repo_id)
        })
    }
}

impl IndexUpdater for IndexV2Updater {
    fn format_version(&self) -> IndexFormatVersion {
        IndexFormatVersion::Two
    }

    fn context(&self) -> &UpdaterContext {
        &self.ctx
    }

    fn update_repo(
        &self,
        repo: &Repository,
        fingerprint: Option<&str>,
    ) -> UpdateResult<IndexUpdateResult> {
        let verified = self.fetch_entry(repo, fingerprint)?;
        let entry = &verified.entry;

        if entry.timestamp <= repo.timestamp {
            debug!(
                repo_id = repo.repo_id,
                "entry timestamp {} not newer than {}", entry.timestamp, repo.timestamp
            );
            self.ctx.emit_stage(repo.repo_id, UpdateStage::Unchanged);
            return Ok(IndexUpdateResult::Unchanged);
        }

        match Self::choose_diff(repo, entry) {
            Some(diff_file) => {
                info!("Applying diff {} to {}", diff_file.name, repo.address);
                self.process_diff(repo, &verified, diff_file)?;
            }
            None => {
                info!("Fetching full index {} of {}", entry.index.name, repo.address);
                self.process_full(repo, &verified)?;
            }
        }

        self.ctx.emit_stage(
            repo.repo_id,
            UpdateStage::Committed {
                timestamp: entry.timestamp,
            },
        );
        Ok(IndexUpdateResult::Processed)
    }
}

fn object_or_empty(diff: &Map<String, Value>, key: &str) -> UpdateResult<Map<String, Value>> {
    match diff.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(IndexError::serialization(format!("{key} no dict")).into()),
    }
}
