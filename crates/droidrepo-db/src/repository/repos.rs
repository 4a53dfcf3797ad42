use std::collections::BTreeMap;

use diesel::{dsl::min, prelude::*};
use droidrepo_index::{
    differ::{self, Diffable},
    v1::DEFAULT_LOCALE,
    v2::{AntiFeatureV2, CategoryV2, CoreRepository, MirrorV2, ReleaseChannelV2, RepoV2},
    IndexError, IndexFormatVersion,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{DbError, Result},
    models::{
        repository::{
            is_archive_address, AntiFeatureRow, CategoryRow, InitialRepository, MirrorRow,
            NewRepository, NewRepositoryRow, PreferencesRow, ReleaseChannelRow, Repository,
            RepositoryPreferences, RepositoryRow,
        },
        to_json,
    },
    schema::{
        anti_features, apps, categories, mirrors, release_channels, repositories,
        repository_preferences,
    },
};

/// Repository level persistence: CRUD, preferences, ordering and index reconciliation.
pub struct RepositoryStore;

impl RepositoryStore {
    /// Inserts a repository shipped with the configuration. It stays unsynced until its first
    /// update.
    pub fn insert_initial(conn: &mut SqliteConnection, repo: &InitialRepository) -> Result<i64> {
        conn.transaction(|conn| {
            let name = BTreeMap::from([(DEFAULT_LOCALE.to_string(), repo.name.clone())]);
            let description =
                BTreeMap::from([(DEFAULT_LOCALE.to_string(), repo.description.clone())]);
            let certificate = (!repo.certificate.is_empty()).then_some(repo.certificate.as_str());

            let row = NewRepositoryRow {
                address: &repo.address,
                name: to_json(&name)?,
                icon: Value::Object(Map::new()),
                description: to_json(&description)?,
                web_base_url: None,
                timestamp: -1,
                version: Some(repo.version),
                format_version: None,
                max_age: None,
                certificate,
            };
            let repo_id: i64 = diesel::insert_into(repositories::table)
                .values(&row)
                .returning(repositories::repo_id)
                .get_result(conn)?;

            let declared: Vec<MirrorV2> = repo.mirrors.iter().map(MirrorV2::new).collect();
            insert_mirrors(conn, repo_id, &declared)?;
            insert_preferences(conn, repo_id, repo.weight, repo.enabled, None, None)?;

            debug!(repo_id, address = repo.address, "inserted initial repository");
            Ok(repo_id)
        })
    }

    /// Inserts a repository the user added, below every existing one.
    pub fn insert_new(conn: &mut SqliteConnection, repo: &NewRepository) -> Result<i64> {
        conn.transaction(|conn| {
            let weight = Self::next_weight(conn)?;
            Self::insert_new_at(conn, repo, weight)
        })
    }

    /// Inserts a repository with an explicit weight, used for archive repositories which sit
    /// right below their parent.
    pub fn insert_new_at(
        conn: &mut SqliteConnection,
        repo: &NewRepository,
        weight: i32,
    ) -> Result<i64> {
        conn.transaction(|conn| {
            let row = NewRepositoryRow {
                address: &repo.address,
                name: to_json(&repo.name)?,
                icon: to_json(&repo.icon)?,
                description: Value::Object(Map::new()),
                web_base_url: None,
                timestamp: -1,
                version: None,
                format_version: repo.format_version.map(|v| v.as_str()),
                max_age: None,
                certificate: Some(repo.certificate.as_str()),
            };
            let repo_id: i64 = diesel::insert_into(repositories::table)
                .values(&row)
                .returning(repositories::repo_id)
                .get_result(conn)?;

            insert_preferences(
                conn,
                repo_id,
                weight,
                true,
                repo.username.clone(),
                repo.password.clone(),
            )?;

            debug!(repo_id, weight, address = repo.address, "inserted new repository");
            Ok(repo_id)
        })
    }

    pub fn get(conn: &mut SqliteConnection, repo_id: i64) -> Result<Option<Repository>> {
        let row = repositories::table
            .find(repo_id)
            .select(RepositoryRow::as_select())
            .first(conn)
            .optional()?;
        row.map(|row| load(conn, row)).transpose()
    }

    /// Finds the non-archive repository signed with `certificate`.
    pub fn get_by_certificate(
        conn: &mut SqliteConnection,
        certificate: &str,
    ) -> Result<Option<Repository>> {
        let rows: Vec<RepositoryRow> = repositories::table
            .filter(repositories::certificate.eq(certificate))
            .order(repositories::repo_id.asc())
            .select(RepositoryRow::as_select())
            .load(conn)?;

        rows.into_iter()
            .find(|row| !is_archive_address(&row.address))
            .map(|row| load(conn, row))
            .transpose()
    }

    /// All repositories, best first.
    pub fn list(conn: &mut SqliteConnection) -> Result<Vec<Repository>> {
        let rows: Vec<RepositoryRow> = repositories::table
            .inner_join(repository_preferences::table)
            .order(repository_preferences::weight.desc())
            .select(RepositoryRow::as_select())
            .load(conn)?;

        rows.into_iter().map(|row| load(conn, row)).collect()
    }

    pub fn get_preferences(
        conn: &mut SqliteConnection,
        repo_id: i64,
    ) -> Result<Option<RepositoryPreferences>> {
        repository_preferences::table
            .find(repo_id)
            .select(PreferencesRow::as_select())
            .first(conn)
            .optional()?
            .map(RepositoryPreferences::from_row)
            .transpose()
    }

    pub fn get_timestamp(conn: &mut SqliteConnection, repo_id: i64) -> Result<Option<i64>> {
        Ok(repositories::table
            .find(repo_id)
            .select(repositories::timestamp)
            .first(conn)
            .optional()?)
    }

    pub fn min_weight(conn: &mut SqliteConnection) -> Result<Option<i32>> {
        Ok(repository_preferences::table
            .select(min(repository_preferences::weight))
            .first(conn)?)
    }

    fn next_weight(conn: &mut SqliteConnection) -> Result<i32> {
        Ok(Self::min_weight(conn)?.map_or(i32::MAX, |w| w.saturating_sub(2)))
    }

    pub fn set_enabled(conn: &mut SqliteConnection, repo_id: i64, enabled: bool) -> Result<()> {
        let updated = diesel::update(repository_preferences::table.find(repo_id))
            .set(repository_preferences::enabled.eq(enabled))
            .execute(conn)?;
        expect_row(updated, repo_id)
    }

    pub fn update_user_mirrors(
        conn: &mut SqliteConnection,
        repo_id: i64,
        user_mirrors: &[String],
    ) -> Result<()> {
        let updated = diesel::update(repository_preferences::table.find(repo_id))
            .set(repository_preferences::user_mirrors.eq(Some(to_json(&user_mirrors)?)))
            .execute(conn)?;
        expect_row(updated, repo_id)
    }

    pub fn update_disabled_mirrors(
        conn: &mut SqliteConnection,
        repo_id: i64,
        disabled_mirrors: &[String],
    ) -> Result<()> {
        let updated = diesel::update(repository_preferences::table.find(repo_id))
            .set(repository_preferences::disabled_mirrors.eq(Some(to_json(&disabled_mirrors)?)))
            .execute(conn)?;
        expect_row(updated, repo_id)
    }

    pub fn update_username_and_password(
        conn: &mut SqliteConnection,
        repo_id: i64,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let updated = diesel::update(repository_preferences::table.find(repo_id))
            .set((
                repository_preferences::username.eq(username),
                repository_preferences::password.eq(password),
            ))
            .execute(conn)?;
        expect_row(updated, repo_id)
    }

    pub fn set_last_updated(conn: &mut SqliteConnection, repo_id: i64, millis: i64) -> Result<()> {
        diesel::update(repository_preferences::table.find(repo_id))
            .set(repository_preferences::last_updated.eq(Some(millis)))
            .execute(conn)?;
        Ok(())
    }

    /// Removes a repository with all its data and preferences.
    pub fn delete(conn: &mut SqliteConnection, repo_id: i64) -> Result<()> {
        conn.transaction(|conn| {
            let deleted = diesel::delete(repositories::table.find(repo_id)).execute(conn)?;
            diesel::delete(repository_preferences::table.find(repo_id)).execute(conn)?;
            expect_row(deleted, repo_id)
        })
    }

    pub fn clear_all(conn: &mut SqliteConnection) -> Result<()> {
        conn.transaction(|conn| {
            diesel::delete(repositories::table).execute(conn)?;
            diesel::delete(repository_preferences::table).execute(conn)?;
            Ok(())
        })
    }

    /// Forces the next update of every repository to download the full index.
    pub fn reset_timestamps(conn: &mut SqliteConnection) -> Result<usize> {
        Ok(diesel::update(repositories::table)
            .set(repositories::timestamp.eq(-1))
            .execute(conn)?)
    }

    /// Drops everything a repository's index put into the database, keeping the repository
    /// row and its preferences.
    pub fn clear(conn: &mut SqliteConnection, repo_id: i64) -> Result<()> {
        conn.transaction(|conn| {
            diesel::delete(apps::table.filter(apps::repo_id.eq(repo_id))).execute(conn)?;
            diesel::delete(mirrors::table.filter(mirrors::repo_id.eq(repo_id))).execute(conn)?;
            diesel::delete(anti_features::table.filter(anti_features::repo_id.eq(repo_id)))
                .execute(conn)?;
            diesel::delete(categories::table.filter(categories::repo_id.eq(repo_id)))
                .execute(conn)?;
            diesel::delete(release_channels::table.filter(release_channels::repo_id.eq(repo_id)))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Returns the archive repository signed with `certificate`.
    ///
    /// More than one candidate is a broken ordering state and yields
    /// [`DbError::Precondition`].
    pub fn get_archive_repo_id(
        conn: &mut SqliteConnection,
        certificate: &str,
    ) -> Result<Option<i64>> {
        let rows: Vec<(i64, String)> = repositories::table
            .filter(repositories::certificate.eq(certificate))
            .select((repositories::repo_id, repositories::address))
            .load(conn)?;

        let archives: Vec<i64> = rows
            .into_iter()
            .filter(|(_, address)| is_archive_address(address))
            .map(|(repo_id, _)| repo_id)
            .collect();

        match archives.as_slice() {
            [] => Ok(None),
            [repo_id] => Ok(Some(*repo_id)),
            _ => {
                Err(DbError::Precondition(format!(
                    "Found {} archive repositories for certificate {certificate}",
                    archives.len()
                )))
            }
        }
    }

    pub fn set_weight(conn: &mut SqliteConnection, repo_id: i64, weight: i32) -> Result<()> {
        let updated = diesel::update(repository_preferences::table.find(repo_id))
            .set(repository_preferences::weight.eq(weight))
            .execute(conn)?;
        expect_row(updated, repo_id)
    }

    /// Adds `offset` to every weight in `from..=to`.
    pub fn shift_weights(
        conn: &mut SqliteConnection,
        from: i32,
        to: i32,
        offset: i32,
    ) -> Result<usize> {
        Ok(diesel::update(
            repository_preferences::table.filter(repository_preferences::weight.between(from, to)),
        )
        .set(repository_preferences::weight.eq(repository_preferences::weight + offset))
        .execute(conn)?)
    }

    /// Moves `repo_id` to the position of `target_id`.
    ///
    /// Repositories in between move by one slot (two weight units) towards the old position.
    /// An archive repository of the moved one follows it to `weight - 1`.
    pub fn reorder(conn: &mut SqliteConnection, repo_id: i64, target_id: i64) -> Result<()> {
        conn.transaction(|conn| {
            let repo = Self::get(conn, repo_id)?
                .ok_or_else(|| DbError::NotFound(format!("Repository {repo_id}")))?;
            let target = Self::get(conn, target_id)?
                .ok_or_else(|| DbError::NotFound(format!("Repository {target_id}")))?;

            if repo.is_archive_repo() || target.is_archive_repo() {
                return Err(DbError::Precondition(
                    "Archive repositories can not be reordered".to_string(),
                ));
            }

            let weight = repo.weight();
            let target_weight = target.weight();
            if weight == target_weight {
                return Ok(());
            }

            let archive_id = match repo.certificate.as_deref() {
                Some(certificate) => Self::get_archive_repo_id(conn, certificate)?,
                None => None,
            };

            if weight > target_weight {
                Self::shift_weights(conn, target_weight - 1, weight - 2, 2)?;
            } else {
                Self::shift_weights(conn, weight + 1, target_weight, -2)?;
            }
            Self::set_weight(conn, repo_id, target_weight)?;
            if let Some(archive_id) = archive_id {
                Self::set_weight(conn, archive_id, target_weight - 1)?;
            }

            debug!(repo_id, from = weight, to = target_weight, "reordered repository");
            Ok(())
        })
    }

    /// Swaps the stored timestamp if it still equals `expected`.
    ///
    /// Returns `false` when another writer got there first.
    pub fn compare_and_set_timestamp(
        conn: &mut SqliteConnection,
        repo_id: i64,
        expected: i64,
        new: i64,
    ) -> Result<bool> {
        let updated = diesel::update(
            repositories::table
                .filter(repositories::repo_id.eq(repo_id))
                .filter(repositories::timestamp.eq(expected)),
        )
        .set(repositories::timestamp.eq(new))
        .execute(conn)?;
        Ok(updated == 1)
    }

    /// Replaces all repository level index data with `repo`.
    ///
    /// Apps are dropped as well; the caller inserts the new packages afterwards.
    pub fn replace(
        conn: &mut SqliteConnection,
        repo_id: i64,
        repo: &RepoV2,
        version: i64,
        format_version: IndexFormatVersion,
        certificate: &str,
        max_age: Option<i32>,
    ) -> Result<()> {
        conn.transaction(|conn| {
            Self::clear(conn, repo_id)?;
            write_core(
                conn,
                repo_id,
                &repo.core_repository(max_age),
                version,
                format_version,
            )?;
            diesel::update(repositories::table.find(repo_id))
                .set(repositories::certificate.eq(Some(certificate)))
                .execute(conn)?;

            insert_mirrors(conn, repo_id, &repo.mirrors)?;
            for (id, value) in &repo.anti_features {
                upsert_anti_feature(conn, repo_id, id, value)?;
            }
            for (id, value) in &repo.categories {
                upsert_category(conn, repo_id, id, value)?;
            }
            for (id, value) in &repo.release_channels {
                upsert_release_channel(conn, repo_id, id, value)?;
            }
            Ok(())
        })
    }

    /// Applies the `repo` part of a diff to the stored repository.
    ///
    /// The core record goes through the schema differ. The mirror list is replaced whenever the
    /// diff mentions it. Anti-features, categories and release channels are reconciled per key.
    pub fn apply_diff(
        conn: &mut SqliteConnection,
        repo_id: i64,
        diff: &Map<String, Value>,
        version: i64,
        max_age: Option<i32>,
    ) -> Result<()> {
        conn.transaction(|conn| {
            let repo = Self::get(conn, repo_id)?
                .ok_or_else(|| DbError::NotFound(format!("Repository {repo_id}")))?;

            let mut core: CoreRepository = differ::apply_diff(&repo.core_repository(), diff)?;
            core.max_age = max_age;
            write_core(conn, repo_id, &core, version, IndexFormatVersion::Two)?;

            if let Some(value) = diff.get("mirrors") {
                diesel::delete(mirrors::table.filter(mirrors::repo_id.eq(repo_id))).execute(conn)?;
                if !value.is_null() {
                    let new_mirrors: Vec<MirrorV2> = serde_json::from_value(value.clone())
                        .map_err(|e| IndexError::serialization(format!("mirrors: {e}")))?;
                    insert_mirrors(conn, repo_id, &new_mirrors)?;
                }
            }

            diff_collection(
                conn,
                repo_id,
                "antiFeatures",
                &repo.anti_features,
                diff.get("antiFeatures"),
                upsert_anti_feature,
                |conn, repo_id, id| {
                    diesel::delete(
                        anti_features::table
                            .filter(anti_features::repo_id.eq(repo_id))
                            .filter(anti_features::id.eq(id)),
                    )
                    .execute(conn)
                },
            )?;
            diff_collection(
                conn,
                repo_id,
                "categories",
                &repo.categories,
                diff.get("categories"),
                upsert_category,
                |conn, repo_id, id| {
                    diesel::delete(
                        categories::table
                            .filter(categories::repo_id.eq(repo_id))
                            .filter(categories::id.eq(id)),
                    )
                    .execute(conn)
                },
            )?;
            diff_collection(
                conn,
                repo_id,
                "releaseChannels",
                &repo.release_channels,
                diff.get("releaseChannels"),
                upsert_release_channel,
                |conn, repo_id, id| {
                    diesel::delete(
                        release_channels::table
                            .filter(release_channels::repo_id.eq(repo_id))
                            .filter(release_channels::id.eq(id)),
                    )
                    .execute(conn)
                },
            )?;
            Ok(())
        })
    }
}

fn expect_row(updated: usize, repo_id: i64) -> Result<()> {
    if updated == 0 {
        return Err(DbError::NotFound(format!("Repository {repo_id}")));
    }
    Ok(())
}

fn load(conn: &mut SqliteConnection, row: RepositoryRow) -> Result<Repository> {
    let repo_id = row.repo_id;
    let preferences = RepositoryStore::get_preferences(conn, repo_id)?.ok_or_else(|| {
        DbError::IntegrityError(format!("No preferences for repository {repo_id}"))
    })?;

    let mirror_rows = mirrors::table
        .filter(mirrors::repo_id.eq(repo_id))
        .select(MirrorRow::as_select())
        .load(conn)?;
    let anti_feature_rows = anti_features::table
        .filter(anti_features::repo_id.eq(repo_id))
        .select(AntiFeatureRow::as_select())
        .load(conn)?;
    let category_rows = categories::table
        .filter(categories::repo_id.eq(repo_id))
        .select(CategoryRow::as_select())
        .load(conn)?;
    let release_channel_rows = release_channels::table
        .filter(release_channels::repo_id.eq(repo_id))
        .select(ReleaseChannelRow::as_select())
        .load(conn)?;

    row.into_model(
        preferences,
        mirror_rows,
        anti_feature_rows,
        category_rows,
        release_channel_rows,
    )
}

fn insert_preferences(
    conn: &mut SqliteConnection,
    repo_id: i64,
    weight: i32,
    enabled: bool,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let row = PreferencesRow {
        repo_id,
        weight,
        enabled,
        last_updated: None,
        user_mirrors: None,
        disabled_mirrors: None,
        username,
        password,
    };
    diesel::replace_into(repository_preferences::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

fn insert_mirrors(conn: &mut SqliteConnection, repo_id: i64, list: &[MirrorV2]) -> Result<()> {
    for mirror in list {
        let row = MirrorRow {
            repo_id,
            url: mirror.url.clone(),
            country_code: mirror.country_code.clone(),
            is_ipfs_gateway: mirror.is_ipfs_gateway,
            works_without_sni: mirror.works_without_sni,
        };
        diesel::insert_or_ignore_into(mirrors::table)
            .values(&row)
            .execute(conn)?;
    }
    Ok(())
}

fn write_core(
    conn: &mut SqliteConnection,
    repo_id: i64,
    core: &CoreRepository,
    version: i64,
    format_version: IndexFormatVersion,
) -> Result<()> {
    let updated = diesel::update(repositories::table.find(repo_id))
        .set((
            repositories::address.eq(&core.address),
            repositories::name.eq(to_json(&core.name)?),
            repositories::icon.eq(to_json(&core.icon)?),
            repositories::description.eq(to_json(&core.description)?),
            repositories::web_base_url.eq(core.web_base_url.as_deref()),
            repositories::timestamp.eq(core.timestamp),
            repositories::version.eq(Some(version)),
            repositories::format_version.eq(Some(format_version.as_str())),
            repositories::max_age.eq(core.max_age),
        ))
        .execute(conn)?;
    expect_row(updated, repo_id)
}

fn upsert_anti_feature(
    conn: &mut SqliteConnection,
    repo_id: i64,
    id: &str,
    value: &AntiFeatureV2,
) -> Result<()> {
    diesel::replace_into(anti_features::table)
        .values(&AntiFeatureRow::new(repo_id, id, value)?)
        .execute(conn)?;
    Ok(())
}

fn upsert_category(
    conn: &mut SqliteConnection,
    repo_id: i64,
    id: &str,
    value: &CategoryV2,
) -> Result<()> {
    diesel::replace_into(categories::table)
        .values(&CategoryRow::new(repo_id, id, value)?)
        .execute(conn)?;
    Ok(())
}

fn upsert_release_channel(
    conn: &mut SqliteConnection,
    repo_id: i64,
    id: &str,
    value: &ReleaseChannelV2,
) -> Result<()> {
    diesel::replace_into(release_channels::table)
        .values(&ReleaseChannelRow::new(repo_id, id, value)?)
        .execute(conn)?;
    Ok(())
}

/// Key diff of a keyed sub-collection: `null` deletes an item (or the whole collection),
/// objects patch existing items or construct new ones, unmentioned keys stay.
fn diff_collection<T, U, D>(
    conn: &mut SqliteConnection,
    repo_id: i64,
    name: &str,
    current: &BTreeMap<String, T>,
    diff: Option<&Value>,
    upsert: U,
    remove: D,
) -> Result<()>
where
    T: Diffable,
    U: Fn(&mut SqliteConnection, i64, &str, &T) -> Result<()>,
    D: Fn(&mut SqliteConnection, i64, &str) -> QueryResult<usize>,
{
    let Some(diff) = diff else {
        return Ok(());
    };

    let entries = match diff {
        Value::Null => {
            for id in current.keys() {
                remove(conn, repo_id, id)?;
            }
            return Ok(());
        }
        Value::Object(entries) => entries,
        _ => return Err(IndexError::serialization(format!("{name} no map")).into()),
    };

    for (id, value) in entries {
        match value {
            Value::Null => {
                remove(conn, repo_id, id)?;
            }
            Value::Object(item_diff) => {
                let item = match current.get(id) {
                    Some(existing) => differ::apply_diff(existing, item_diff)?,
                    None => differ::construct_from_json(item_diff)?,
                };
                upsert(conn, repo_id, id, &item)?;
            }
            other => {
                return Err(IndexError::serialization(format!("unsupported map value: {other}")).into())
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::connection::Database;

    const CERT: &str = "c0ffee";

    fn new_repo(address: &str, certificate: &str) -> NewRepository {
        NewRepository {
            name: BTreeMap::from([("en-US".to_string(), address.to_string())]),
            address: address.to_string(),
            format_version: Some(IndexFormatVersion::Two),
            certificate: certificate.to_string(),
            ..Default::default()
        }
    }

    fn repo_v2(timestamp: i64) -> RepoV2 {
        serde_json::from_value(json!({
            "name": { "en-US": "Test Repo" },
            "address": "https://example.org/repo",
            "timestamp": timestamp,
            "mirrors": [
                { "url": "https://mirror-a.example.org/repo", "countryCode": "de" },
                { "url": "https://mirror-b.example.org/repo", "worksWithoutSNI": true },
                { "url": "https://ipfs.example.org/ipfs", "isIpfsGateway": true }
            ],
            "antiFeatures": {
                "Ads": { "name": { "en-US": "Ads" } },
                "Tracking": { "name": { "en-US": "Tracking" } }
            },
            "categories": {
                "Games": { "name": { "en-US": "Games" } }
            },
            "releaseChannels": {
                "Beta": { "name": { "en-US": "Beta" } }
            }
        }))
        .unwrap()
    }

    fn weights(conn: &mut SqliteConnection, ids: &[i64]) -> Vec<i32> {
        ids.iter()
            .map(|id| RepositoryStore::get(conn, *id).unwrap().unwrap().weight())
            .collect()
    }

    #[test]
    fn test_insert_new_assigns_descending_weights() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        assert_eq!(RepositoryStore::min_weight(&mut conn).unwrap(), None);
        let a = RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/repo", "aa")).unwrap();
        let b = RepositoryStore::insert_new(&mut conn, &new_repo("https://b.org/repo", "bb")).unwrap();

        assert_eq!(weights(&mut conn, &[a, b]), vec![i32::MAX, i32::MAX - 2]);

        let listed: Vec<i64> = RepositoryStore::list(&mut conn)
            .unwrap()
            .into_iter()
            .map(|r| r.repo_id)
            .collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[test]
    fn test_insert_initial_and_preferences() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let initial = InitialRepository {
            name: "F-Droid".into(),
            address: "https://f-droid.org/repo".into(),
            description: "The official repository".into(),
            certificate: CERT.into(),
            mirrors: vec!["https://mirror.example/fdroid/repo".into()],
            version: 20002,
            enabled: true,
            weight: 100,
        };
        let repo_id = RepositoryStore::insert_initial(&mut conn, &initial).unwrap();
        RepositoryStore::update_user_mirrors(&mut conn, repo_id, &["https://mine.example/repo".into()])
            .unwrap();
        RepositoryStore::update_disabled_mirrors(&mut conn, repo_id, &["https://f-droid.org/repo".into()])
            .unwrap();
        RepositoryStore::update_username_and_password(&mut conn, repo_id, Some("user"), Some("pass"))
            .unwrap();
        RepositoryStore::set_enabled(&mut conn, repo_id, false).unwrap();

        let repo = RepositoryStore::get(&mut conn, repo_id).unwrap().unwrap();
        assert_eq!(repo.timestamp, -1);
        assert_eq!(repo.name(&[]), Some("F-Droid"));
        assert_eq!(repo.certificate.as_deref(), Some(CERT));
        assert!(!repo.enabled());
        assert_eq!(repo.username(), Some("user"));
        let urls: Vec<String> = repo.mirrors().into_iter().map(|m| m.url).collect();
        assert_eq!(
            urls,
            vec!["https://mirror.example/fdroid/repo", "https://mine.example/repo"]
        );

        assert!(RepositoryStore::set_enabled(&mut conn, 999, true).is_err());
    }

    #[test]
    fn test_get_by_certificate_skips_archive() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let archive =
            RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/archive", CERT)).unwrap();
        let repo = RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/repo", CERT)).unwrap();

        let found = RepositoryStore::get_by_certificate(&mut conn, CERT).unwrap().unwrap();
        assert_eq!(found.repo_id, repo);
        assert_eq!(
            RepositoryStore::get_archive_repo_id(&mut conn, CERT).unwrap(),
            Some(archive)
        );
        assert!(RepositoryStore::get_by_certificate(&mut conn, "other").unwrap().is_none());
    }

    #[test]
    fn test_reorder_moves_down() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let ids: Vec<i64> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| {
                RepositoryStore::insert_new(&mut conn, &new_repo(&format!("https://{n}.org/repo"), n))
                    .unwrap()
            })
            .collect();
        for (id, weight) in ids.iter().zip([10, 8, 6, 4]) {
            RepositoryStore::set_weight(&mut conn, *id, weight).unwrap();
        }

        RepositoryStore::reorder(&mut conn, ids[0], ids[3]).unwrap();
        assert_eq!(weights(&mut conn, &ids), vec![4, 10, 8, 6]);

        RepositoryStore::reorder(&mut conn, ids[0], ids[1]).unwrap();
        assert_eq!(weights(&mut conn, &ids), vec![10, 8, 6, 4]);
    }

    #[test]
    fn test_reorder_moves_archive_along() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let a = RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/repo", "aa")).unwrap();
        let a_archive =
            RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/archive", "aa")).unwrap();
        let b = RepositoryStore::insert_new(&mut conn, &new_repo("https://b.org/repo", "bb")).unwrap();
        let b_archive =
            RepositoryStore::insert_new(&mut conn, &new_repo("https://b.org/archive", "bb")).unwrap();
        let c = RepositoryStore::insert_new(&mut conn, &new_repo("https://c.org/repo", "cc")).unwrap();
        let ids = [a, a_archive, b, b_archive, c];
        for (id, weight) in ids.iter().zip([10, 9, 8, 7, 6]) {
            RepositoryStore::set_weight(&mut conn, *id, weight).unwrap();
        }

        // c up to a
        RepositoryStore::reorder(&mut conn, c, a).unwrap();
        assert_eq!(weights(&mut conn, &ids), vec![8, 7, 6, 5, 10]);

        // a down to b
        RepositoryStore::reorder(&mut conn, a, b).unwrap();
        assert_eq!(weights(&mut conn, &ids), vec![6, 5, 8, 7, 10]);

        let err = RepositoryStore::reorder(&mut conn, a_archive, c).unwrap_err();
        assert!(matches!(err, DbError::Precondition(_)));
    }

    #[test]
    fn test_reorder_with_multiple_archives_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let a = RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/repo", "aa")).unwrap();
        RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/archive", "aa")).unwrap();
        RepositoryStore::insert_new(&mut conn, &new_repo("https://mirror.org/archive", "aa")).unwrap();
        let b = RepositoryStore::insert_new(&mut conn, &new_repo("https://b.org/repo", "bb")).unwrap();
        let before = weights(&mut conn, &[a, b]);

        let err = RepositoryStore::reorder(&mut conn, a, b).unwrap_err();
        assert!(matches!(err, DbError::Precondition(_)));
        assert_eq!(weights(&mut conn, &[a, b]), before);
    }

    #[test]
    fn test_replace_then_clear_keeps_preferences() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let repo_id = RepositoryStore::insert_new(&mut conn, &new_repo("https://example.org/repo", CERT)).unwrap();
        RepositoryStore::replace(&mut conn, repo_id, &repo_v2(42), 20002, IndexFormatVersion::Two, CERT, Some(14))
            .unwrap();

        let repo = RepositoryStore::get(&mut conn, repo_id).unwrap().unwrap();
        assert_eq!(repo.timestamp, 42);
        assert_eq!(repo.max_age, Some(14));
        assert_eq!(repo.version, Some(20002));
        assert_eq!(repo.format_version, Some(IndexFormatVersion::Two));
        assert_eq!(repo.mirrors.len(), 3);
        assert_eq!(repo.anti_features.len(), 2);
        assert_eq!(repo.categories.len(), 1);
        assert_eq!(repo.release_channels.len(), 1);

        RepositoryStore::clear(&mut conn, repo_id).unwrap();
        let repo = RepositoryStore::get(&mut conn, repo_id).unwrap().unwrap();
        assert!(repo.mirrors.is_empty());
        assert!(repo.anti_features.is_empty());
        assert_eq!(repo.weight(), i32::MAX);
    }

    #[test]
    fn test_mirror_flags_are_persisted() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let repo_id = RepositoryStore::insert_new(&mut conn, &new_repo("https://example.org/repo", CERT)).unwrap();
        RepositoryStore::replace(&mut conn, repo_id, &repo_v2(42), 1, IndexFormatVersion::Two, CERT, None)
            .unwrap();

        let repo = RepositoryStore::get(&mut conn, repo_id).unwrap().unwrap();
        let flags: Vec<(&str, bool, bool)> = repo
            .mirrors
            .iter()
            .map(|m| (m.url.as_str(), m.is_ipfs_gateway, m.works_without_sni))
            .collect();
        assert!(flags.contains(&("https://mirror-a.example.org/repo", false, false)));
        assert!(flags.contains(&("https://mirror-b.example.org/repo", false, true)));
        assert!(flags.contains(&("https://ipfs.example.org/ipfs", true, false)));
    }

    #[test]
    fn test_apply_diff_reconciles_collections() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let repo_id = RepositoryStore::insert_new(&mut conn, &new_repo("https://example.org/repo", CERT)).unwrap();
        RepositoryStore::replace(&mut conn, repo_id, &repo_v2(42), 1, IndexFormatVersion::Two, CERT, None)
            .unwrap();

        let diff = json!({
            "timestamp": 1337,
            "name": { "de": "Testquelle" },
            "mirrors": [{ "url": "https://mirror-c.example.org/repo" }],
            "antiFeatures": {
                "Ads": null,
                "Tracking": { "description": { "en-US": "Tracks you" } },
                "NonFreeNet": { "name": { "en-US": "Non-free network" } }
            },
            "releaseChannels": null
        });
        RepositoryStore::apply_diff(&mut conn, repo_id, diff.as_object().unwrap(), 2, Some(7)).unwrap();

        let repo = RepositoryStore::get(&mut conn, repo_id).unwrap().unwrap();
        assert_eq!(repo.timestamp, 1337);
        assert_eq!(repo.version, Some(2));
        assert_eq!(repo.max_age, Some(7));
        assert_eq!(repo.name.get("en-US").map(String::as_str), Some("Test Repo"));
        assert_eq!(repo.name.get("de").map(String::as_str), Some("Testquelle"));

        let urls: Vec<&str> = repo.mirrors.iter().map(|m| m.url.as_str()).collect();
        assert_eq!(urls, vec!["https://mirror-c.example.org/repo"]);

        assert!(!repo.anti_features.contains_key("Ads"));
        let tracking = &repo.anti_features["Tracking"];
        assert_eq!(tracking.name.get("en-US").map(String::as_str), Some("Tracking"));
        assert_eq!(
            tracking.description.get("en-US").map(String::as_str),
            Some("Tracks you")
        );
        assert!(repo.anti_features.contains_key("NonFreeNet"));
        assert_eq!(repo.categories.len(), 1);
        assert!(repo.release_channels.is_empty());
    }

    #[test]
    fn test_apply_diff_rejects_new_item_without_name() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let repo_id = RepositoryStore::insert_new(&mut conn, &new_repo("https://example.org/repo", CERT)).unwrap();
        RepositoryStore::replace(&mut conn, repo_id, &repo_v2(42), 1, IndexFormatVersion::Two, CERT, None)
            .unwrap();

        let diff = json!({ "timestamp": 43, "categories": { "New": { "icon": {} } } });
        let err = RepositoryStore::apply_diff(&mut conn, repo_id, diff.as_object().unwrap(), 2, None)
            .unwrap_err();
        assert!(matches!(err, DbError::Index(_)));

        // nothing was written
        assert_eq!(RepositoryStore::get_timestamp(&mut conn, repo_id).unwrap(), Some(42));
    }

    #[test]
    fn test_compare_and_set_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let repo_id = RepositoryStore::insert_new(&mut conn, &new_repo("https://example.org/repo", CERT)).unwrap();
        assert!(RepositoryStore::compare_and_set_timestamp(&mut conn, repo_id, -1, 10).unwrap());
        assert!(!RepositoryStore::compare_and_set_timestamp(&mut conn, repo_id, -1, 20).unwrap());
        assert_eq!(RepositoryStore::get_timestamp(&mut conn, repo_id).unwrap(), Some(10));

        assert_eq!(RepositoryStore::reset_timestamps(&mut conn).unwrap(), 1);
        assert_eq!(RepositoryStore::get_timestamp(&mut conn, repo_id).unwrap(), Some(-1));
    }

    #[test]
    fn test_delete_and_clear_all() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();

        let a = RepositoryStore::insert_new(&mut conn, &new_repo("https://a.org/repo", "aa")).unwrap();
        RepositoryStore::insert_new(&mut conn, &new_repo("https://b.org/repo", "bb")).unwrap();

        RepositoryStore::delete(&mut conn, a).unwrap();
        assert!(RepositoryStore::get(&mut conn, a).unwrap().is_none());
        assert!(RepositoryStore::get_preferences(&mut conn, a).unwrap().is_none());
        assert_eq!(RepositoryStore::list(&mut conn).unwrap().len(), 1);

        RepositoryStore::clear_all(&mut conn).unwrap();
        assert!(RepositoryStore::list(&mut conn).unwrap().is_empty());
        assert_eq!(RepositoryStore::min_weight(&mut conn).unwrap(), None);
    }
}
