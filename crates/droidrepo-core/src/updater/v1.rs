use droidrepo_db::{Connection, Repository};
use droidrepo_dl::mirror::IndexFile;
use droidrepo_events::UpdateStage;
use droidrepo_index::{
    jar::JarVerifier,
    v1::{IndexV1, DATA_FILE_NAME, SIGNED_FILE_NAME},
    IndexFormatVersion,
};
use tracing::{debug, info};

use super::{
    persist_full_index, IndexUpdateResult, IndexUpdater, TempFile, UpdateResult, UpdaterContext,
};
use crate::error::UpdateError;

/// Updates repositories that only publish the legacy `index-v1.jar`.
///
/// There are no diffs for this format; every update replaces the stored data.
pub struct IndexV1Updater {
    ctx: UpdaterContext,
}

impl IndexV1Updater {
    pub fn new(ctx: UpdaterContext) -> Self {
        Self { ctx }
    }
}

impl IndexUpdater for IndexV1Updater {
    fn format_version(&self) -> IndexFormatVersion {
        IndexFormatVersion::One
    }

    fn context(&self) -> &UpdaterContext {
        &self.ctx
    }

    fn update_repo(
        &self,
        repo: &Repository,
        fingerprint: Option<&str>,
    ) -> UpdateResult<IndexUpdateResult> {
        self.ctx.emit_stage(
            repo.repo_id,
            UpdateStage::DownloadingIndex {
                name: SIGNED_FILE_NAME.to_string(),
            },
        );

        let file = TempFile::create(self.ctx.temp_files.as_ref())?;
        let request = self
            .ctx
            .download_request(repo, IndexFile::new(SIGNED_FILE_NAME));
        self.ctx.download(request, file.path(), -1, None)?;

        let verified = JarVerifier::new(repo.certificate.as_deref(), fingerprint)
            .verify_file(file.path(), DATA_FILE_NAME)?;
        drop(file);

        let index = IndexV1::from_slice(&verified.payload)?;
        let timestamp = index.repo.timestamp;
        self.ctx
            .emit_stage(repo.repo_id, UpdateStage::EntryVerified { timestamp });

        if timestamp <= repo.timestamp {
            debug!(
                repo_id = repo.repo_id,
                "v1 timestamp {timestamp} not newer than {}", repo.timestamp
            );
            self.ctx.emit_stage(repo.repo_id, UpdateStage::Unchanged);
            return Ok(IndexUpdateResult::Unchanged);
        }

        let version = index.repo.version;
        let max_age = index.repo.max_age;
        let index = index.into_v2();
        info!(
            "Storing v1 index of {} with {} packages",
            repo.address,
            index.packages.len()
        );

        self.ctx.emit_stage(repo.repo_id, UpdateStage::Applying);
        let mut guard = self.ctx.db.conn()?;
        guard.conn().transaction::<_, UpdateError, _>(|conn| {
            UpdaterContext::claim_timestamp(conn, repo.repo_id, repo.timestamp, timestamp)?;
            persist_full_index(
                conn,
                repo.repo_id,
                &index,
                version,
                IndexFormatVersion::One,
                &verified.certificate,
                max_age,
                &self.ctx.locales,
            )?;
            self.ctx.finish(conn, repo.repo_id)
        })?;

        self.ctx
            .emit_stage(repo.repo_id, UpdateStage::Committed { timestamp });
        Ok(IndexUpdateResult::Processed)
    }
}
