//! Index v2 document model.
//!
//! Field names follow the camelCase wire format. Optional fields that may be cleared by a diff are
//! `Option`s, collections default to empty so diffs may omit them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `locale -> text`
pub type LocalizedText = BTreeMap<String, String>;
/// `locale -> file`
pub type LocalizedFile = BTreeMap<String, FileV2>;
/// `locale -> files`, used for screenshots.
pub type LocalizedFileList = BTreeMap<String, Vec<FileV2>>;

/// A file referenced by the index, relative to the repository address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileV2 {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(
        rename = "ipfsCIDv1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ipfs_cid_v1: Option<String>,
}

impl FileV2 {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A file whose hash and size are always known, such as an APK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileV1 {
    pub name: String,
    pub sha256: String,
    pub size: i64,
    #[serde(
        rename = "ipfsCIDv1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ipfs_cid_v1: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorV2 {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Serves files by IPFS CID instead of by path.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ipfs_gateway: bool,
    #[serde(
        rename = "worksWithoutSNI",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub works_without_sni: bool,
}

impl MirrorV2 {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            country_code: None,
            is_ipfs_gateway: false,
            works_without_sni: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiFeatureV2 {
    #[serde(default)]
    pub icon: LocalizedFile,
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryV2 {
    #[serde(default)]
    pub icon: LocalizedFile,
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseChannelV2 {
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoV2 {
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub icon: LocalizedFile,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_base_url: Option<String>,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub mirrors: Vec<MirrorV2>,
    pub timestamp: i64,
    #[serde(default)]
    pub anti_features: BTreeMap<String, AntiFeatureV2>,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryV2>,
    #[serde(default)]
    pub release_channels: BTreeMap<String, ReleaseChannelV2>,
}

/// The repository attributes that live on the repository row itself.
///
/// Sub-collections (mirrors, anti-features, categories, release channels) are reconciled
/// separately, so they are not part of this record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreRepository {
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub icon: LocalizedFile,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_base_url: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i32>,
}

impl RepoV2 {
    pub fn core_repository(&self, max_age: Option<i32>) -> CoreRepository {
        CoreRepository {
            name: self.name.clone(),
            icon: self.icon.clone(),
            address: self.address.clone(),
            web_base_url: self.web_base_url.clone(),
            timestamp: self.timestamp,
            description: self.description.clone(),
            max_age,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<LocalizedFileList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seven_inch: Option<LocalizedFileList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ten_inch: Option<LocalizedFileList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wear: Option<LocalizedFileList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv: Option<LocalizedFileList>,
}

impl Screenshots {
    /// Form factor and file list pairs that carry data.
    pub fn lists(&self) -> impl Iterator<Item = (&'static str, &LocalizedFileList)> {
        [
            ("phone", &self.phone),
            ("sevenInch", &self.seven_inch),
            ("tenInch", &self.ten_inch),
            ("wear", &self.wear),
            ("tv", &self.tv),
        ]
        .into_iter()
        .filter_map(|(kind, list)| list.as_ref().map(|l| (kind, l)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataV2 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizedText>,
    pub added: i64,
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_tracker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_signer: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_web_site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_phone: Option<String>,
    #[serde(default)]
    pub donate: Vec<String>,
    #[serde(rename = "liberapayID", default, skip_serializing_if = "Option::is_none")]
    pub liberapay_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liberapay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_collective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub litecoin: Option<String>,
    #[serde(rename = "flattrID", default, skip_serializing_if = "Option::is_none")]
    pub flattr_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<LocalizedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_graphic: Option<LocalizedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_graphic: Option<LocalizedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tv_banner: Option<LocalizedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Screenshots>,
}

impl MetadataV2 {
    /// Localized single files keyed by their type.
    pub fn localized_files(&self) -> impl Iterator<Item = (&'static str, &LocalizedFile)> {
        [
            ("icon", &self.icon),
            ("featureGraphic", &self.feature_graphic),
            ("promoGraphic", &self.promo_graphic),
            ("tvBanner", &self.tv_banner),
        ]
        .into_iter()
        .filter_map(|(kind, files)| files.as_ref().map(|f| (kind, f)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsesSdkV2 {
    pub min_sdk_version: i32,
    pub target_sdk_version: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerV2 {
    pub sha256: Vec<String>,
    #[serde(default)]
    pub has_multiple_signers: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionV2 {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sdk_version: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureV2 {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV2 {
    pub version_name: String,
    pub version_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_sdk: Option<UsesSdkV2>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sdk_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<SignerV2>,
    #[serde(default)]
    pub uses_permission: Vec<PermissionV2>,
    #[serde(default)]
    pub uses_permission_sdk23: Vec<PermissionV2>,
    #[serde(default)]
    pub nativecode: Vec<String>,
    #[serde(default)]
    pub features: Vec<FeatureV2>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVersionV2 {
    pub added: i64,
    pub file: FileV1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<FileV2>,
    pub manifest: ManifestV2,
    #[serde(default)]
    pub release_channels: Vec<String>,
    #[serde(default)]
    pub anti_features: BTreeMap<String, LocalizedText>,
    #[serde(default)]
    pub whats_new: LocalizedText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageV2 {
    pub metadata: MetadataV2,
    #[serde(default)]
    pub versions: BTreeMap<String, PackageVersionV2>,
}

/// The full v2 index document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexV2 {
    pub repo: RepoV2,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageV2>,
}

impl IndexV2 {
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_index_v2_parse_minimal() {
        let index: IndexV2 = serde_json::from_value(json!({
            "repo": {
                "name": { "en-US": "MinRepo" },
                "address": "https://min-v1.org/repo",
                "timestamp": 42
            }
        }))
        .unwrap();

        assert_eq!(index.repo.address, "https://min-v1.org/repo");
        assert_eq!(index.repo.timestamp, 42);
        assert!(index.repo.mirrors.is_empty());
        assert!(index.packages.is_empty());
    }

    #[test]
    fn test_index_v2_parse_package() {
        let index: IndexV2 = serde_json::from_value(json!({
            "repo": { "address": "https://example.org/repo", "timestamp": 1 },
            "packages": {
                "org.example": {
                    "metadata": {
                        "added": 10,
                        "lastUpdated": 20,
                        "liberapayID": "42",
                        "icon": { "en-US": { "name": "/icon.png", "sha256": "ab", "size": 3 } },
                        "screenshots": { "phone": { "en-US": [{ "name": "/1.png" }] } }
                    },
                    "versions": {
                        "abc": {
                            "added": 10,
                            "file": { "name": "/org.example_1.apk", "sha256": "cd", "size": 1024 },
                            "manifest": {
                                "versionName": "1.0",
                                "versionCode": 1,
                                "usesSdk": { "minSdkVersion": 21, "targetSdkVersion": 33 },
                                "nativecode": ["arm64-v8a"]
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();

        let package = &index.packages["org.example"];
        assert_eq!(package.metadata.liberapay_id.as_deref(), Some("42"));
        assert_eq!(package.metadata.localized_files().count(), 1);
        let screenshots = package.metadata.screenshots.as_ref().unwrap();
        assert_eq!(screenshots.lists().map(|(k, _)| k).collect::<Vec<_>>(), ["phone"]);

        let version = &package.versions["abc"];
        assert_eq!(version.manifest.uses_sdk.unwrap().min_sdk_version, 21);
        assert_eq!(version.file.size, 1024);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result = serde_json::from_value::<RepoV2>(json!({ "address": "https://x" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_serializes_ipfs_cid() {
        let file = FileV2 {
            ipfs_cid_v1: Some("bafy".to_string()),
            ..FileV2::new("/index-v2.json")
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value, json!({ "name": "/index-v2.json", "ipfsCIDv1": "bafy" }));
    }
}
