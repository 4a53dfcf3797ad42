use std::collections::BTreeMap;

use diesel::prelude::*;
use droidrepo_index::{
    differ,
    v2::{MetadataV2, PackageV2, PackageVersionV2},
    IndexError,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    error::{DbError, Result},
    models::{
        app::{
            local_strings, App, AppRow, LocalizedFileListRow, LocalizedFileRow, Version,
            VersionRow,
        },
        to_json,
    },
    repository::RepositoryStore,
    schema::{apps, localized_file_lists, localized_files, repository_preferences, versions},
};

/// Decides whether a version can be installed on this device.
pub trait CompatibilityChecker: Send + Sync {
    fn is_compatible(&self, version: &PackageVersionV2) -> bool;
}

/// App and version persistence.
pub struct AppStore;

impl AppStore {
    /// Writes a package from a full index: metadata, localized files and all versions.
    pub fn insert_package(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
        package: &PackageV2,
        locales: &[String],
    ) -> Result<()> {
        write_app(conn, repo_id, package_name, &package.metadata, locales)?;
        for (version_id, version) in &package.versions {
            upsert_version(conn, repo_id, package_name, version_id, version)?;
        }
        Ok(())
    }

    /// Applies the `packages` part of an index diff.
    pub fn apply_packages_diff(
        conn: &mut SqliteConnection,
        repo_id: i64,
        packages: &Map<String, Value>,
        locales: &[String],
    ) -> Result<()> {
        for (package_name, diff) in packages {
            Self::apply_package_diff(conn, repo_id, package_name, diff, locales)?;
        }
        Ok(())
    }

    /// Applies the diff of a single package.
    ///
    /// `null` removes the app. Otherwise the metadata is patched through the schema differ, or
    /// constructed when the app is new, and every mentioned version is deleted, merge-patched
    /// or inserted.
    pub fn apply_package_diff(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
        diff: &Value,
        locales: &[String],
    ) -> Result<()> {
        let diff = match diff {
            Value::Null => return Self::delete_app(conn, repo_id, package_name),
            Value::Object(diff) => diff,
            _ => {
                return Err(IndexError::serialization(format!("{package_name} no dict")).into());
            }
        };

        let existing = Self::get_app(conn, repo_id, package_name)?;
        match (existing, diff.get("metadata")) {
            (Some(app), Some(Value::Object(metadata_diff))) => {
                let metadata = differ::apply_diff(&app.metadata, metadata_diff)?;
                write_app(conn, repo_id, package_name, &metadata, locales)?;
            }
            (None, Some(Value::Object(metadata_diff))) => {
                let metadata: MetadataV2 = differ::construct_from_json(metadata_diff)?;
                write_app(conn, repo_id, package_name, &metadata, locales)?;
            }
            (_, Some(_)) => {
                return Err(IndexError::serialization("metadata no dict").into());
            }
            (Some(_), None) => {}
            (None, None) => {
                return Err(IndexError::serialization("metadata required but not found").into());
            }
        }

        match diff.get("versions") {
            None => {}
            Some(Value::Null) => {
                diesel::delete(
                    versions::table
                        .filter(versions::repo_id.eq(repo_id))
                        .filter(versions::package_name.eq(package_name)),
                )
                .execute(conn)?;
            }
            Some(Value::Object(version_diffs)) => {
                for (version_id, version_diff) in version_diffs {
                    apply_version_diff(conn, repo_id, package_name, version_id, version_diff)?;
                }
            }
            Some(_) => return Err(IndexError::serialization("versions no map").into()),
        }
        Ok(())
    }

    pub fn delete_app(conn: &mut SqliteConnection, repo_id: i64, package_name: &str) -> Result<()> {
        diesel::delete(apps::table.find((repo_id, package_name))).execute(conn)?;
        Ok(())
    }

    pub fn get_app(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
    ) -> Result<Option<App>> {
        apps::table
            .find((repo_id, package_name))
            .select(AppRow::as_select())
            .first(conn)
            .optional()?
            .map(App::from_row)
            .transpose()
    }

    pub fn list_apps(conn: &mut SqliteConnection, repo_id: i64) -> Result<Vec<App>> {
        apps::table
            .filter(apps::repo_id.eq(repo_id))
            .order(apps::package_name.asc())
            .select(AppRow::as_select())
            .load(conn)?
            .into_iter()
            .map(App::from_row)
            .collect()
    }

    /// Versions of an app, newest first.
    pub fn get_versions(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
    ) -> Result<Vec<Version>> {
        versions::table
            .filter(versions::repo_id.eq(repo_id))
            .filter(versions::package_name.eq(package_name))
            .order(versions::version_code.desc())
            .select(VersionRow::as_select())
            .load(conn)?
            .into_iter()
            .map(VersionRow::into_model)
            .collect()
    }

    pub fn get_localized_files(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
    ) -> Result<Vec<LocalizedFileRow>> {
        Ok(localized_files::table
            .filter(localized_files::repo_id.eq(repo_id))
            .filter(localized_files::package_name.eq(package_name))
            .select(LocalizedFileRow::as_select())
            .load(conn)?)
    }

    pub fn get_localized_file_lists(
        conn: &mut SqliteConnection,
        repo_id: i64,
        package_name: &str,
    ) -> Result<Vec<LocalizedFileListRow>> {
        Ok(localized_file_lists::table
            .filter(localized_file_lists::repo_id.eq(repo_id))
            .filter(localized_file_lists::package_name.eq(package_name))
            .select(LocalizedFileListRow::as_select())
            .load(conn)?)
    }

    pub fn count_apps(conn: &mut SqliteConnection, repo_id: i64) -> Result<i64> {
        Ok(apps::table
            .filter(apps::repo_id.eq(repo_id))
            .count()
            .get_result(conn)?)
    }

    pub fn count_versions(conn: &mut SqliteConnection, repo_id: i64) -> Result<i64> {
        Ok(versions::table
            .filter(versions::repo_id.eq(repo_id))
            .count()
            .get_result(conn)?)
    }

    /// The app named `package_name` from the enabled repository with the highest weight.
    pub fn find_preferred(conn: &mut SqliteConnection, package_name: &str) -> Result<Option<App>> {
        let repo_ids: Vec<i64> = apps::table
            .filter(apps::package_name.eq(package_name))
            .select(apps::repo_id)
            .load(conn)?;
        if repo_ids.is_empty() {
            return Ok(None);
        }

        let best: Option<i64> = repository_preferences::table
            .filter(repository_preferences::repo_id.eq_any(&repo_ids))
            .filter(repository_preferences::enabled.eq(true))
            .order(repository_preferences::weight.desc())
            .select(repository_preferences::repo_id)
            .first(conn)
            .optional()?;

        match best {
            Some(repo_id) => Self::get_app(conn, repo_id, package_name),
            None => Ok(None),
        }
    }

    /// Drops every app and forces a full index download for all repositories.
    pub fn clear_all_app_data(conn: &mut SqliteConnection) -> Result<()> {
        conn.transaction(|conn| {
            diesel::delete(apps::table).execute(conn)?;
            RepositoryStore::reset_timestamps(conn)?;
            Ok(())
        })
    }

    /// Recomputes the cached name and summary of every app for a new locale preference.
    pub fn after_locales_changed(conn: &mut SqliteConnection, locales: &[String]) -> Result<()> {
        conn.transaction(|conn| {
            let rows: Vec<AppRow> = apps::table.select(AppRow::as_select()).load(conn)?;
            for row in rows {
                let app = App::from_row(row)?;
                let (name, summary) = local_strings(&app.metadata, locales);
                diesel::update(apps::table.find((app.repo_id, app.package_name.as_str())))
                    .set((apps::local_name.eq(name), apps::local_summary.eq(summary)))
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    /// Recomputes compatibility of all versions of a repository, then of its apps.
    ///
    /// An app is compatible when at least one of its versions is.
    pub fn update_compatibility(
        conn: &mut SqliteConnection,
        repo_id: i64,
        checker: &dyn CompatibilityChecker,
    ) -> Result<()> {
        conn.transaction(|conn| {
            let rows: Vec<VersionRow> = versions::table
                .filter(versions::repo_id.eq(repo_id))
                .select(VersionRow::as_select())
                .load(conn)?;

            let mut compatible_apps: BTreeMap<String, bool> = BTreeMap::new();
            for row in rows {
                let version = row.into_model()?;
                let is_compatible = checker.is_compatible(&version.data);
                diesel::update(versions::table.find((
                    repo_id,
                    version.package_name.as_str(),
                    version.version_id.as_str(),
                )))
                .set(versions::is_compatible.eq(is_compatible))
                .execute(conn)?;

                let entry = compatible_apps.entry(version.package_name).or_insert(false);
                *entry |= is_compatible;
            }

            diesel::update(apps::table.filter(apps::repo_id.eq(repo_id)))
                .set(apps::is_compatible.eq(false))
                .execute(conn)?;
            let compatible: Vec<&String> = compatible_apps
                .iter()
                .filter(|(_, is_compatible)| **is_compatible)
                .map(|(name, _)| name)
                .collect();
            diesel::update(
                apps::table
                    .filter(apps::repo_id.eq(repo_id))
                    .filter(apps::package_name.eq_any(compatible)),
            )
            .set(apps::is_compatible.eq(true))
            .execute(conn)?;

            debug!(repo_id, apps = compatible_apps.len(), "updated compatibility");
            Ok(())
        })
    }
}

/// Inserts or updates an app row. Never replaces it, since that would cascade into its
/// versions.
fn write_app(
    conn: &mut SqliteConnection,
    repo_id: i64,
    package_name: &str,
    metadata: &MetadataV2,
    locales: &[String],
) -> Result<()> {
    let (local_name, local_summary) = local_strings(metadata, locales);
    let json = to_json(metadata)?;

    let updated = diesel::update(apps::table.find((repo_id, package_name)))
        .set((
            apps::metadata.eq(json.clone()),
            apps::added.eq(metadata.added),
            apps::last_updated.eq(metadata.last_updated),
            apps::local_name.eq(local_name.clone()),
            apps::local_summary.eq(local_summary.clone()),
        ))
        .execute(conn)?;

    if updated == 0 {
        let row = AppRow {
            repo_id,
            package_name: package_name.to_string(),
            metadata: json,
            added: metadata.added,
            last_updated: metadata.last_updated,
            local_name,
            local_summary,
            is_compatible: false,
        };
        diesel::insert_into(apps::table).values(&row).execute(conn)?;
    }

    write_localized_files(conn, repo_id, package_name, metadata)
}

fn write_localized_files(
    conn: &mut SqliteConnection,
    repo_id: i64,
    package_name: &str,
    metadata: &MetadataV2,
) -> Result<()> {
    diesel::delete(
        localized_files::table
            .filter(localized_files::repo_id.eq(repo_id))
            .filter(localized_files::package_name.eq(package_name)),
    )
    .execute(conn)?;
    diesel::delete(
        localized_file_lists::table
            .filter(localized_file_lists::repo_id.eq(repo_id))
            .filter(localized_file_lists::package_name.eq(package_name)),
    )
    .execute(conn)?;

    for (file_type, files) in metadata.localized_files() {
        for (locale, file) in files {
            let row = LocalizedFileRow::new(repo_id, package_name, file_type, locale, file);
            diesel::insert_into(localized_files::table)
                .values(&row)
                .execute(conn)?;
        }
    }

    if let Some(screenshots) = &metadata.screenshots {
        for (file_type, lists) in screenshots.lists() {
            for (locale, files) in lists {
                for file in files {
                    let row =
                        LocalizedFileListRow::new(repo_id, package_name, file_type, locale, file);
                    diesel::insert_or_ignore_into(localized_file_lists::table)
                        .values(&row)
                        .execute(conn)?;
                }
            }
        }
    }
    Ok(())
}

fn upsert_version(
    conn: &mut SqliteConnection,
    repo_id: i64,
    package_name: &str,
    version_id: &str,
    version: &PackageVersionV2,
) -> Result<()> {
    let row = VersionRow::new(repo_id, package_name, version_id, version, false)?;
    diesel::replace_into(versions::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

fn apply_version_diff(
    conn: &mut SqliteConnection,
    repo_id: i64,
    package_name: &str,
    version_id: &str,
    diff: &Value,
) -> Result<()> {
    let key = (repo_id, package_name, version_id);
    match diff {
        Value::Null => {
            diesel::delete(versions::table.find(key)).execute(conn)?;
            Ok(())
        }
        Value::Object(_) => {
            let existing = versions::table
                .find(key)
                .select(VersionRow::as_select())
                .first(conn)
                .optional()?;
            let version: PackageVersionV2 = match existing {
                Some(row) => differ::merge_patch(&row.into_model()?.data, diff)?,
                None => {
                    serde_json::from_value(diff.clone())
                        .map_err(|e| IndexError::serialization(format!("{version_id}: {e}")))?
                }
            };
            upsert_version(conn, repo_id, package_name, version_id, &version)
        }
        _ => Err(DbError::Index(IndexError::serialization(format!(
            "{version_id} no dict"
        )))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        connection::Database,
        models::repository::NewRepository,
    };

    struct MinSdkChecker(i32);

    impl CompatibilityChecker for MinSdkChecker {
        fn is_compatible(&self, version: &PackageVersionV2) -> bool {
            version
                .manifest
                .uses_sdk
                .map_or(true, |sdk| sdk.min_sdk_version <= self.0)
        }
    }

    fn version(code: i64, min_sdk: i32) -> Value {
        json!({
            "added": 1000 + code,
            "file": { "name": format!("/app_{code}.apk"), "sha256": format!("{code:064}"), "size": 4096 },
            "manifest": {
                "versionName": format!("1.{code}"),
                "versionCode": code,
                "usesSdk": { "minSdkVersion": min_sdk, "targetSdkVersion": 34 }
            }
        })
    }

    fn package() -> PackageV2 {
        serde_json::from_value(json!({
            "metadata": {
                "added": 1000,
                "lastUpdated": 2000,
                "name": { "en-US": "Notes", "de": "Notizen" },
                "summary": { "en-US": "Take notes" },
                "icon": { "en-US": { "name": "/icon.png", "sha256": "aa", "size": 12 } },
                "screenshots": {
                    "phone": { "en-US": [ { "name": "/1.png" }, { "name": "/2.png" } ] }
                }
            },
            "versions": {
                "v1": version(1, 21),
                "v2": version(2, 30)
            }
        }))
        .unwrap()
    }

    fn setup(conn: &mut SqliteConnection, address: &str) -> i64 {
        let repo = NewRepository {
            address: address.to_string(),
            certificate: address.to_string(),
            ..Default::default()
        };
        RepositoryStore::insert_new(conn, &repo).unwrap()
    }

    #[test]
    fn test_insert_package() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let repo_id = setup(&mut conn, "https://a.org/repo");

        AppStore::insert_package(&mut conn, repo_id, "org.notes", &package(), &["de".into()]).unwrap();

        let app = AppStore::get_app(&mut conn, repo_id, "org.notes").unwrap().unwrap();
        assert_eq!(app.name.as_deref(), Some("Notizen"));
        assert_eq!(app.summary.as_deref(), Some("Take notes"));
        assert_eq!(app.icon(&[]).unwrap().name, "/icon.png");

        let versions = AppStore::get_versions(&mut conn, repo_id, "org.notes").unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version_code()).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(AppStore::get_localized_files(&mut conn, repo_id, "org.notes").unwrap().len(), 1);
        assert_eq!(
            AppStore::get_localized_file_lists(&mut conn, repo_id, "org.notes").unwrap().len(),
            2
        );
        assert_eq!(AppStore::count_apps(&mut conn, repo_id).unwrap(), 1);
        assert_eq!(AppStore::count_versions(&mut conn, repo_id).unwrap(), 2);
    }

    #[test]
    fn test_package_diff_updates_metadata_and_versions() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let repo_id = setup(&mut conn, "https://a.org/repo");
        AppStore::insert_package(&mut conn, repo_id, "org.notes", &package(), &[]).unwrap();

        let diff = json!({
            "org.notes": {
                "metadata": {
                    "lastUpdated": 3000,
                    "summary": { "en-US": "Write notes" },
                    "screenshots": { "phone": null }
                },
                "versions": {
                    "v1": null,
                    "v2": { "manifest": { "versionName": "1.2-fixed" } },
                    "v3": version(3, 21)
                }
            },
            "org.new": {
                "metadata": { "added": 5, "lastUpdated": 6, "name": { "en-US": "New" } },
                "versions": { "n1": version(7, 21) }
            }
        });
        AppStore::apply_packages_diff(&mut conn, repo_id, diff.as_object().unwrap(), &[]).unwrap();

        let app = AppStore::get_app(&mut conn, repo_id, "org.notes").unwrap().unwrap();
        assert_eq!(app.last_updated(), 3000);
        assert_eq!(app.added(), 1000);
        assert_eq!(app.summary.as_deref(), Some("Write notes"));
        assert!(AppStore::get_localized_file_lists(&mut conn, repo_id, "org.notes")
            .unwrap()
            .is_empty());

        let versions = AppStore::get_versions(&mut conn, repo_id, "org.notes").unwrap();
        let ids: Vec<&str> = versions.iter().map(|v| v.version_id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v2"]);
        assert_eq!(versions[1].version_name(), "1.2-fixed");
        assert_eq!(versions[1].version_code(), 2);

        let new_app = AppStore::get_app(&mut conn, repo_id, "org.new").unwrap().unwrap();
        assert_eq!(new_app.name.as_deref(), Some("New"));

        let delete = json!({ "org.new": null });
        AppStore::apply_packages_diff(&mut conn, repo_id, delete.as_object().unwrap(), &[]).unwrap();
        assert!(AppStore::get_app(&mut conn, repo_id, "org.new").unwrap().is_none());
        assert_eq!(AppStore::count_versions(&mut conn, repo_id).unwrap(), 2);
    }

    #[test]
    fn test_package_diff_for_unknown_app_needs_metadata() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let repo_id = setup(&mut conn, "https://a.org/repo");

        let diff = json!({ "versions": { "v1": version(1, 21) } });
        let err = AppStore::apply_package_diff(&mut conn, repo_id, "org.ghost", &diff, &[]).unwrap_err();
        assert!(err.to_string().contains("metadata required"));

        let diff = json!({ "metadata": { "added": 1 } });
        let err = AppStore::apply_package_diff(&mut conn, repo_id, "org.ghost", &diff, &[]).unwrap_err();
        assert!(err.to_string().contains("lastUpdated required but not found"));
    }

    #[test]
    fn test_update_compatibility() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let repo_id = setup(&mut conn, "https://a.org/repo");
        AppStore::insert_package(&mut conn, repo_id, "org.notes", &package(), &[]).unwrap();

        AppStore::update_compatibility(&mut conn, repo_id, &MinSdkChecker(25)).unwrap();
        let app = AppStore::get_app(&mut conn, repo_id, "org.notes").unwrap().unwrap();
        assert!(app.is_compatible);
        let versions = AppStore::get_versions(&mut conn, repo_id, "org.notes").unwrap();
        assert_eq!(
            versions.iter().map(|v| v.is_compatible).collect::<Vec<_>>(),
            vec![false, true]
        );

        AppStore::update_compatibility(&mut conn, repo_id, &MinSdkChecker(19)).unwrap();
        let app = AppStore::get_app(&mut conn, repo_id, "org.notes").unwrap().unwrap();
        assert!(!app.is_compatible);
    }

    #[test]
    fn test_find_preferred_uses_enabled_highest_weight() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let first = setup(&mut conn, "https://a.org/repo");
        let second = setup(&mut conn, "https://b.org/repo");
        AppStore::insert_package(&mut conn, first, "org.notes", &package(), &[]).unwrap();
        AppStore::insert_package(&mut conn, second, "org.notes", &package(), &[]).unwrap();

        let app = AppStore::find_preferred(&mut conn, "org.notes").unwrap().unwrap();
        assert_eq!(app.repo_id, first);

        RepositoryStore::set_enabled(&mut conn, first, false).unwrap();
        let app = AppStore::find_preferred(&mut conn, "org.notes").unwrap().unwrap();
        assert_eq!(app.repo_id, second);

        assert!(AppStore::find_preferred(&mut conn, "org.none").unwrap().is_none());
    }

    #[test]
    fn test_locales_changed_and_clear_all() {
        let db = Database::open_in_memory().unwrap();
        let mut conn = db.conn().unwrap();
        let repo_id = setup(&mut conn, "https://a.org/repo");
        AppStore::insert_package(&mut conn, repo_id, "org.notes", &package(), &[]).unwrap();
        RepositoryStore::compare_and_set_timestamp(&mut conn, repo_id, -1, 99).unwrap();

        AppStore::after_locales_changed(&mut conn, &["de-DE".into()]).unwrap();
        let app = AppStore::get_app(&mut conn, repo_id, "org.notes").unwrap().unwrap();
        assert_eq!(app.name.as_deref(), Some("Notizen"));

        AppStore::clear_all_app_data(&mut conn).unwrap();
        assert_eq!(AppStore::count_apps(&mut conn, repo_id).unwrap(), 0);
        assert_eq!(AppStore::count_versions(&mut conn, repo_id).unwrap(), 0);
        assert_eq!(RepositoryStore::get_timestamp(&mut conn, repo_id).unwrap(), Some(-1));
    }
}
