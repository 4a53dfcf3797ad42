use std::collections::BTreeMap;

use diesel::prelude::*;
use droidrepo_index::{
    jar::certificate_fingerprint,
    locale::best_locale,
    v2::{
        AntiFeatureV2, CategoryV2, CoreRepository, LocalizedFile, LocalizedText, MirrorV2,
        ReleaseChannelV2,
    },
    IndexFormatVersion,
};
use serde_json::Value;

use super::{from_json, to_json};
use crate::{
    error::Result,
    schema::{
        anti_features, categories, mirrors, release_channels, repositories,
        repository_preferences,
    },
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = repositories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RepositoryRow {
    pub repo_id: i64,
    pub address: String,
    pub name: Value,
    pub icon: Value,
    pub description: Value,
    pub web_base_url: Option<String>,
    pub timestamp: i64,
    pub version: Option<i64>,
    pub format_version: Option<String>,
    pub max_age: Option<i32>,
    pub certificate: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = repositories)]
pub struct NewRepositoryRow<'a> {
    pub address: &'a str,
    pub name: Value,
    pub icon: Value,
    pub description: Value,
    pub web_base_url: Option<&'a str>,
    pub timestamp: i64,
    pub version: Option<i64>,
    pub format_version: Option<&'a str>,
    pub max_age: Option<i32>,
    pub certificate: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = repository_preferences)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PreferencesRow {
    pub repo_id: i64,
    pub weight: i32,
    pub enabled: bool,
    pub last_updated: Option<i64>,
    pub user_mirrors: Option<Value>,
    pub disabled_mirrors: Option<Value>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = mirrors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MirrorRow {
    pub repo_id: i64,
    pub url: String,
    pub country_code: Option<String>,
    pub is_ipfs_gateway: bool,
    pub works_without_sni: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = anti_features)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AntiFeatureRow {
    pub repo_id: i64,
    pub id: String,
    pub icon: Value,
    pub name: Value,
    pub description: Value,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = categories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CategoryRow {
    pub repo_id: i64,
    pub id: String,
    pub icon: Value,
    pub name: Value,
    pub description: Value,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = release_channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReleaseChannelRow {
    pub repo_id: i64,
    pub id: String,
    pub name: Value,
    pub description: Value,
}

impl AntiFeatureRow {
    pub fn new(repo_id: i64, id: &str, value: &AntiFeatureV2) -> Result<Self> {
        Ok(Self {
            repo_id,
            id: id.to_string(),
            icon: to_json(&value.icon)?,
            name: to_json(&value.name)?,
            description: to_json(&value.description)?,
        })
    }

    pub fn into_model(self) -> Result<(String, AntiFeatureV2)> {
        Ok((
            self.id,
            AntiFeatureV2 {
                icon: from_json(self.icon)?,
                name: from_json(self.name)?,
                description: from_json(self.description)?,
            },
        ))
    }
}

impl CategoryRow {
    pub fn new(repo_id: i64, id: &str, value: &CategoryV2) -> Result<Self> {
        Ok(Self {
            repo_id,
            id: id.to_string(),
            icon: to_json(&value.icon)?,
            name: to_json(&value.name)?,
            description: to_json(&value.description)?,
        })
    }

    pub fn into_model(self) -> Result<(String, CategoryV2)> {
        Ok((
            self.id,
            CategoryV2 {
                icon: from_json(self.icon)?,
                name: from_json(self.name)?,
                description: from_json(self.description)?,
            },
        ))
    }
}

impl ReleaseChannelRow {
    pub fn new(repo_id: i64, id: &str, value: &ReleaseChannelV2) -> Result<Self> {
        Ok(Self {
            repo_id,
            id: id.to_string(),
            name: to_json(&value.name)?,
            description: to_json(&value.description)?,
        })
    }

    pub fn into_model(self) -> Result<(String, ReleaseChannelV2)> {
        Ok((
            self.id,
            ReleaseChannelV2 {
                name: from_json(self.name)?,
                description: from_json(self.description)?,
            },
        ))
    }
}

/// A mirror of a repository as stored locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub url: String,
    pub country_code: Option<String>,
    pub is_ipfs_gateway: bool,
    pub works_without_sni: bool,
}

impl Mirror {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            country_code: None,
            is_ipfs_gateway: false,
            works_without_sni: false,
        }
    }
}

impl From<MirrorV2> for Mirror {
    fn from(value: MirrorV2) -> Self {
        Self {
            url: value.url,
            country_code: value.country_code,
            is_ipfs_gateway: value.is_ipfs_gateway,
            works_without_sni: value.works_without_sni,
        }
    }
}

/// User controlled settings of a repository. These survive index replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPreferences {
    pub repo_id: i64,
    pub weight: i32,
    pub enabled: bool,
    pub last_updated: Option<i64>,
    pub user_mirrors: Vec<String>,
    pub disabled_mirrors: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RepositoryPreferences {
    pub(crate) fn from_row(row: PreferencesRow) -> Result<Self> {
        Ok(Self {
            repo_id: row.repo_id,
            weight: row.weight,
            enabled: row.enabled,
            last_updated: row.last_updated,
            user_mirrors: string_list(row.user_mirrors)?,
            disabled_mirrors: string_list(row.disabled_mirrors)?,
            username: row.username,
            password: row.password,
        })
    }
}

fn string_list(value: Option<Value>) -> Result<Vec<String>> {
    match value {
        Some(value) => from_json(value),
        None => Ok(Vec::new()),
    }
}

/// A repository with everything the local database knows about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub repo_id: i64,
    pub address: String,
    pub name: LocalizedText,
    pub icon: LocalizedFile,
    pub description: LocalizedText,
    pub web_base_url: Option<String>,
    /// Index generation time, `-1` before the first successful sync.
    pub timestamp: i64,
    pub version: Option<i64>,
    pub format_version: Option<IndexFormatVersion>,
    pub max_age: Option<i32>,
    /// Hex encoded signing certificate, pinned on first sync.
    pub certificate: Option<String>,
    pub mirrors: Vec<Mirror>,
    pub anti_features: BTreeMap<String, AntiFeatureV2>,
    pub categories: BTreeMap<String, CategoryV2>,
    pub release_channels: BTreeMap<String, ReleaseChannelV2>,
    pub preferences: RepositoryPreferences,
}

impl Repository {
    pub fn weight(&self) -> i32 {
        self.preferences.weight
    }

    pub fn enabled(&self) -> bool {
        self.preferences.enabled
    }

    pub fn username(&self) -> Option<&str> {
        self.preferences.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.preferences.password.as_deref()
    }

    pub fn is_archive_repo(&self) -> bool {
        is_archive_address(&self.address)
    }

    /// SHA-256 of the pinned certificate, if one is pinned and well formed.
    pub fn fingerprint(&self) -> Option<String> {
        self.certificate
            .as_deref()
            .and_then(|cert| certificate_fingerprint(cert).ok())
    }

    pub fn name(&self, locales: &[String]) -> Option<&str> {
        best_locale(&self.name, locales).map(String::as_str)
    }

    pub fn description(&self, locales: &[String]) -> Option<&str> {
        best_locale(&self.description, locales).map(String::as_str)
    }

    /// Every usable mirror: the canonical address first, then the declared mirrors, then the ones
    /// the user added, without the disabled ones.
    pub fn mirrors(&self) -> Vec<Mirror> {
        let mut result: Vec<Mirror> = Vec::new();
        let candidates = std::iter::once(Mirror::new(self.address.clone()))
            .chain(self.mirrors.iter().cloned())
            .chain(self.preferences.user_mirrors.iter().map(Mirror::new));

        for mirror in candidates {
            if self.preferences.disabled_mirrors.contains(&mirror.url) {
                continue;
            }
            if result.iter().any(|m| m.url == mirror.url) {
                continue;
            }
            result.push(mirror);
        }
        result
    }

    /// Mirrors declared by the repository itself, including the canonical address.
    pub fn declared_mirrors(&self) -> Vec<Mirror> {
        let mut result = vec![Mirror::new(self.address.clone())];
        result.extend(
            self.mirrors
                .iter()
                .filter(|m| m.url != self.address)
                .cloned(),
        );
        result
    }

    pub fn core_repository(&self) -> CoreRepository {
        CoreRepository {
            name: self.name.clone(),
            icon: self.icon.clone(),
            address: self.address.clone(),
            web_base_url: self.web_base_url.clone(),
            timestamp: self.timestamp,
            description: self.description.clone(),
            max_age: self.max_age,
        }
    }
}

pub fn is_archive_address(address: &str) -> bool {
    address.trim_end_matches('/').to_lowercase().ends_with("/archive")
}

/// A repository seeded from configuration, not yet synced.
#[derive(Debug, Clone, Default)]
pub struct InitialRepository {
    pub name: String,
    pub address: String,
    pub description: String,
    pub certificate: String,
    pub mirrors: Vec<String>,
    pub version: i64,
    pub enabled: bool,
    pub weight: i32,
}

/// A repository the user added after fetching its index.
#[derive(Debug, Clone, Default)]
pub struct NewRepository {
    pub name: LocalizedText,
    pub icon: LocalizedFile,
    pub address: String,
    pub format_version: Option<IndexFormatVersion>,
    pub certificate: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RepositoryRow {
    pub(crate) fn into_model(
        self,
        preferences: RepositoryPreferences,
        mirrors: Vec<MirrorRow>,
        anti_features: Vec<AntiFeatureRow>,
        categories: Vec<CategoryRow>,
        release_channels: Vec<ReleaseChannelRow>,
    ) -> Result<Repository> {
        Ok(Repository {
            repo_id: self.repo_id,
            address: self.address,
            name: from_json(self.name)?,
            icon: from_json(self.icon)?,
            description: from_json(self.description)?,
            web_base_url: self.web_base_url,
            timestamp: self.timestamp,
            version: self.version,
            format_version: self
                .format_version
                .as_deref()
                .and_then(IndexFormatVersion::parse),
            max_age: self.max_age,
            certificate: self.certificate,
            mirrors: mirrors
                .into_iter()
                .map(|m| Mirror {
                    url: m.url,
                    country_code: m.country_code,
                    is_ipfs_gateway: m.is_ipfs_gateway,
                    works_without_sni: m.works_without_sni,
                })
                .collect(),
            anti_features: anti_features
                .into_iter()
                .map(AntiFeatureRow::into_model)
                .collect::<Result<_>>()?,
            categories: categories
                .into_iter()
                .map(CategoryRow::into_model)
                .collect::<Result<_>>()?,
            release_channels: release_channels
                .into_iter()
                .map(ReleaseChannelRow::into_model)
                .collect::<Result<_>>()?,
            preferences,
        })
    }
}
