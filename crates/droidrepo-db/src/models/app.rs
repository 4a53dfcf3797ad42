use diesel::prelude::*;
use droidrepo_index::{
    locale::best_locale_opt,
    v2::{FileV2, MetadataV2, PackageVersionV2},
};
use serde_json::Value;

use super::{from_json, to_json};
use crate::{
    error::Result,
    schema::{apps, localized_file_lists, localized_files, versions},
};

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = apps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppRow {
    pub repo_id: i64,
    pub package_name: String,
    pub metadata: Value,
    pub added: i64,
    pub last_updated: i64,
    pub local_name: Option<String>,
    pub local_summary: Option<String>,
    pub is_compatible: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = localized_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LocalizedFileRow {
    pub repo_id: i64,
    pub package_name: String,
    pub file_type: String,
    pub locale: String,
    pub name: String,
    pub sha256: Option<String>,
    pub size: Option<i64>,
    pub ipfs_cid_v1: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = localized_file_lists)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LocalizedFileListRow {
    pub repo_id: i64,
    pub package_name: String,
    pub file_type: String,
    pub locale: String,
    pub name: String,
    pub sha256: Option<String>,
    pub size: Option<i64>,
    pub ipfs_cid_v1: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VersionRow {
    pub repo_id: i64,
    pub package_name: String,
    pub version_id: String,
    pub version_code: i64,
    pub version_name: String,
    pub added: i64,
    pub min_sdk: Option<i32>,
    pub max_sdk: Option<i32>,
    pub is_compatible: bool,
    pub data: Value,
}

impl VersionRow {
    pub fn new(
        repo_id: i64,
        package_name: &str,
        version_id: &str,
        version: &PackageVersionV2,
        is_compatible: bool,
    ) -> Result<Self> {
        let manifest = &version.manifest;
        Ok(Self {
            repo_id,
            package_name: package_name.to_string(),
            version_id: version_id.to_string(),
            version_code: manifest.version_code,
            version_name: manifest.version_name.clone(),
            added: version.added,
            min_sdk: manifest.uses_sdk.map(|sdk| sdk.min_sdk_version),
            max_sdk: manifest.max_sdk_version,
            is_compatible,
            data: to_json(version)?,
        })
    }

    pub fn into_model(self) -> Result<Version> {
        Ok(Version {
            repo_id: self.repo_id,
            package_name: self.package_name,
            version_id: self.version_id,
            is_compatible: self.is_compatible,
            data: serde_json::from_value(self.data)?,
        })
    }
}

impl LocalizedFileRow {
    pub fn new(repo_id: i64, package_name: &str, file_type: &str, locale: &str, file: &FileV2) -> Self {
        Self {
            repo_id,
            package_name: package_name.to_string(),
            file_type: file_type.to_string(),
            locale: locale.to_string(),
            name: file.name.clone(),
            sha256: file.sha256.clone(),
            size: file.size,
            ipfs_cid_v1: file.ipfs_cid_v1.clone(),
        }
    }
}

impl LocalizedFileListRow {
    pub fn new(repo_id: i64, package_name: &str, file_type: &str, locale: &str, file: &FileV2) -> Self {
        Self {
            repo_id,
            package_name: package_name.to_string(),
            file_type: file_type.to_string(),
            locale: locale.to_string(),
            name: file.name.clone(),
            sha256: file.sha256.clone(),
            size: file.size,
            ipfs_cid_v1: file.ipfs_cid_v1.clone(),
        }
    }
}

/// An app as published by one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub repo_id: i64,
    pub package_name: String,
    pub metadata: MetadataV2,
    /// Name in the best matching locale at the time of the last write.
    pub name: Option<String>,
    pub summary: Option<String>,
    pub is_compatible: bool,
}

impl App {
    pub(crate) fn from_row(row: AppRow) -> Result<Self> {
        Ok(Self {
            repo_id: row.repo_id,
            package_name: row.package_name,
            metadata: from_json(row.metadata)?,
            name: row.local_name,
            summary: row.local_summary,
            is_compatible: row.is_compatible,
        })
    }

    pub fn added(&self) -> i64 {
        self.metadata.added
    }

    pub fn last_updated(&self) -> i64 {
        self.metadata.last_updated
    }

    pub fn icon(&self, locales: &[String]) -> Option<&FileV2> {
        best_locale_opt(self.metadata.icon.as_ref(), locales)
    }

    pub fn description(&self, locales: &[String]) -> Option<&str> {
        best_locale_opt(self.metadata.description.as_ref(), locales).map(String::as_str)
    }
}

/// Name and summary of an app in the preferred locale.
pub(crate) fn local_strings(
    metadata: &MetadataV2,
    locales: &[String],
) -> (Option<String>, Option<String>) {
    (
        best_locale_opt(metadata.name.as_ref(), locales).cloned(),
        best_locale_opt(metadata.summary.as_ref(), locales).cloned(),
    )
}

/// One release of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub repo_id: i64,
    pub package_name: String,
    pub version_id: String,
    pub is_compatible: bool,
    pub data: PackageVersionV2,
}

impl Version {
    pub fn version_code(&self) -> i64 {
        self.data.manifest.version_code
    }

    pub fn version_name(&self) -> &str {
        &self.data.manifest.version_name
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_local_strings_follow_locale_preference() {
        let metadata = MetadataV2 {
            name: Some(BTreeMap::from([
                ("en-US".to_string(), "Maps".to_string()),
                ("de".to_string(), "Karten".to_string()),
            ])),
            ..Default::default()
        };

        let (name, summary) = local_strings(&metadata, &["de-AT".to_string()]);
        assert_eq!(name.as_deref(), Some("Karten"));
        assert_eq!(summary, None);

        let (name, _) = local_strings(&metadata, &[]);
        assert_eq!(name.as_deref(), Some("Maps"));
    }

    #[test]
    fn test_version_row_columns() {
        let version: PackageVersionV2 = serde_json::from_value(serde_json::json!({
            "added": 1234,
            "file": { "name": "/app_42.apk", "sha256": "abcd", "size": 1024 },
            "manifest": {
                "versionName": "1.0",
                "versionCode": 42,
                "usesSdk": { "minSdkVersion": 21, "targetSdkVersion": 33 },
                "maxSdkVersion": 34
            }
        }))
        .unwrap();

        let row = VersionRow::new(1, "org.example", "abcd", &version, true).unwrap();
        assert_eq!(row.version_code, 42);
        assert_eq!(row.min_sdk, Some(21));
        assert_eq!(row.max_sdk, Some(34));

        let model = row.into_model().unwrap();
        assert_eq!(model.version_code(), 42);
        assert_eq!(model.version_name(), "1.0");
        assert_eq!(model.data, version);
    }
}
