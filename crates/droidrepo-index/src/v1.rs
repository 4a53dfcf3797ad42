//! Legacy index v1 model and its conversion to the v2 model.
//!
//! v1 repositories are only ever fetched in full from `index-v1.jar`; there are no diffs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    v2::{
        AntiFeatureV2, CategoryV2, FeatureV2, FileV1, FileV2, IndexV2, LocalizedFile,
        LocalizedFileList, LocalizedText, ManifestV2, MetadataV2, MirrorV2, PackageV2,
        PackageVersionV2, PermissionV2, RepoV2, Screenshots, SignerV2, UsesSdkV2,
    },
};

/// Name of the signed v1 archive at the repository root.
pub const SIGNED_FILE_NAME: &str = "index-v1.jar";
/// Name of the index document inside [`SIGNED_FILE_NAME`].
pub const DATA_FILE_NAME: &str = "index-v1.json";

/// Locale used for v1 fields that carry no locale of their own.
pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoV1 {
    pub timestamp: i64,
    pub version: i64,
    #[serde(rename = "maxage", default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i32>,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedV1 {
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub whats_new: Option<String>,
    pub video: Option<String>,
    pub icon: Option<String>,
    pub feature_graphic: Option<String>,
    pub promo_graphic: Option<String>,
    pub tv_banner: Option<String>,
    pub phone_screenshots: Option<Vec<String>>,
    pub seven_inch_screenshots: Option<Vec<String>>,
    pub ten_inch_screenshots: Option<Vec<String>>,
    pub wear_screenshots: Option<Vec<String>>,
    pub tv_screenshots: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppV1 {
    pub package_name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub anti_features: Vec<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub license: Option<String>,
    pub web_site: Option<String>,
    pub source_code: Option<String>,
    pub issue_tracker: Option<String>,
    pub changelog: Option<String>,
    pub translation: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_web_site: Option<String>,
    pub author_phone: Option<String>,
    pub donate: Option<String>,
    #[serde(rename = "liberapayID")]
    pub liberapay_id: Option<String>,
    pub liberapay: Option<String>,
    pub open_collective: Option<String>,
    pub bitcoin: Option<String>,
    pub litecoin: Option<String>,
    #[serde(rename = "flattrID")]
    pub flattr_id: Option<String>,
    pub suggested_version_code: Option<String>,
    pub added: Option<i64>,
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub localized: BTreeMap<String, LocalizedV1>,
}

/// `[name, maxSdkVersion]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionV1(pub String, pub Option<i32>);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageV1 {
    pub package_name: String,
    pub apk_name: String,
    pub hash: String,
    #[serde(default)]
    pub hash_type: String,
    pub size: i64,
    pub added: Option<i64>,
    pub version_name: Option<String>,
    pub version_code: Option<i64>,
    pub min_sdk_version: Option<i32>,
    pub target_sdk_version: Option<i32>,
    pub max_sdk_version: Option<i32>,
    pub nativecode: Option<Vec<String>>,
    pub features: Option<Vec<String>>,
    pub signer: Option<String>,
    pub srcname: Option<String>,
    #[serde(default)]
    pub anti_features: Vec<String>,
    #[serde(rename = "uses-permission", default)]
    pub uses_permission: Vec<PermissionV1>,
    #[serde(rename = "uses-permission-sdk-23", default)]
    pub uses_permission_sdk23: Vec<PermissionV1>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexV1 {
    pub repo: RepoV1,
    #[serde(default)]
    pub apps: Vec<AppV1>,
    #[serde(default)]
    pub packages: BTreeMap<String, Vec<PackageV1>>,
}

impl IndexV1 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Converts the legacy document into the v2 model.
    pub fn into_v2(self) -> IndexV2 {
        let mut anti_features = BTreeMap::new();
        let mut categories = BTreeMap::new();

        for app in &self.apps {
            for id in &app.anti_features {
                anti_features
                    .entry(id.clone())
                    .or_insert_with(|| AntiFeatureV2 {
                        name: default_text(id),
                        ..Default::default()
                    });
            }
            for id in &app.categories {
                categories.entry(id.clone()).or_insert_with(|| CategoryV2 {
                    name: default_text(id),
                    ..Default::default()
                });
            }
        }
        for id in self.packages.values().flatten().flat_map(|p| &p.anti_features) {
            anti_features
                .entry(id.clone())
                .or_insert_with(|| AntiFeatureV2 {
                    name: default_text(id),
                    ..Default::default()
                });
        }

        let repo = RepoV2 {
            name: default_text(&self.repo.name),
            icon: non_empty(&self.repo.icon)
                .map(|icon| default_file(format!("/icons/{icon}")))
                .unwrap_or_default(),
            address: self.repo.address,
            web_base_url: None,
            description: non_empty(&self.repo.description)
                .map(default_text)
                .unwrap_or_default(),
            mirrors: self.repo.mirrors.into_iter().map(MirrorV2::new).collect(),
            timestamp: self.repo.timestamp,
            anti_features,
            categories,
            release_channels: BTreeMap::new(),
        };

        let mut versions_by_package = self.packages;
        let packages = self
            .apps
            .into_iter()
            .map(|app| {
                let versions = versions_by_package
                    .remove(&app.package_name)
                    .unwrap_or_default();
                convert_package(app, versions)
            })
            .collect();

        IndexV2 { repo, packages }
    }
}

fn convert_package(app: AppV1, packages: Vec<PackageV1>) -> (String, PackageV2) {
    let localized = &app.localized;
    let package_name = &app.package_name;

    let text = |default: &Option<String>, f: fn(&LocalizedV1) -> &Option<String>| {
        let mut map: LocalizedText = localized
            .iter()
            .filter_map(|(locale, l)| f(l).clone().map(|v| (locale.clone(), v)))
            .collect();
        if let Some(value) = default {
            map.entry(DEFAULT_LOCALE.to_string())
                .or_insert_with(|| value.clone());
        }
        (!map.is_empty()).then_some(map)
    };
    let file = |f: fn(&LocalizedV1) -> &Option<String>| {
        let map: LocalizedFile = localized
            .iter()
            .filter_map(|(locale, l)| {
                f(l).as_ref()
                    .map(|name| (locale.clone(), FileV2::new(format!("/{package_name}/{locale}/{name}"))))
            })
            .collect();
        (!map.is_empty()).then_some(map)
    };
    let file_list = |kind: &str, f: fn(&LocalizedV1) -> &Option<Vec<String>>| {
        let map: LocalizedFileList = localized
            .iter()
            .filter_map(|(locale, l)| {
                f(l).as_ref().map(|names| {
                    let files = names
                        .iter()
                        .map(|name| FileV2::new(format!("/{package_name}/{locale}/{kind}/{name}")))
                        .collect();
                    (locale.clone(), files)
                })
            })
            .collect();
        (!map.is_empty()).then_some(map)
    };

    let icon = file(|l| &l.icon).or_else(|| {
        app.icon
            .as_ref()
            .map(|icon| default_file(format!("/icons/{icon}")))
    });
    let screenshots = Screenshots {
        phone: file_list("phoneScreenshots", |l| &l.phone_screenshots),
        seven_inch: file_list("sevenInchScreenshots", |l| &l.seven_inch_screenshots),
        ten_inch: file_list("tenInchScreenshots", |l| &l.ten_inch_screenshots),
        wear: file_list("wearScreenshots", |l| &l.wear_screenshots),
        tv: file_list("tvScreenshots", |l| &l.tv_screenshots),
    };

    let metadata = MetadataV2 {
        name: text(&app.name, |l| &l.name),
        summary: text(&app.summary, |l| &l.summary),
        description: text(&app.description, |l| &l.description),
        added: app.added.unwrap_or(0),
        last_updated: app.last_updated.or(app.added).unwrap_or(0),
        web_site: app.web_site.clone(),
        changelog: app.changelog.clone(),
        license: app.license.clone(),
        source_code: app.source_code.clone(),
        issue_tracker: app.issue_tracker.clone(),
        translation: app.translation.clone(),
        preferred_signer: None,
        categories: app.categories.clone(),
        author_name: app.author_name.clone(),
        author_email: app.author_email.clone(),
        author_web_site: app.author_web_site.clone(),
        author_phone: app.author_phone.clone(),
        donate: app.donate.clone().into_iter().collect(),
        liberapay_id: app.liberapay_id.clone(),
        liberapay: app.liberapay.clone(),
        open_collective: app.open_collective.clone(),
        bitcoin: app.bitcoin.clone(),
        litecoin: app.litecoin.clone(),
        flattr_id: app.flattr_id.clone(),
        icon,
        feature_graphic: file(|l| &l.feature_graphic),
        promo_graphic: file(|l| &l.promo_graphic),
        tv_banner: file(|l| &l.tv_banner),
        video: text(&None, |l| &l.video),
        screenshots: (screenshots != Screenshots::default()).then_some(screenshots),
    };

    let whats_new: LocalizedText = text(&None, |l| &l.whats_new).unwrap_or_default();
    let suggested = app
        .suggested_version_code
        .as_deref()
        .and_then(|code| code.parse::<i64>().ok());

    let versions = packages
        .into_iter()
        .map(|p| {
            let is_suggested = suggested.is_some() && p.version_code == suggested;
            let version = convert_version(p, is_suggested.then(|| whats_new.clone()));
            (version.file.sha256.clone(), version)
        })
        .collect();

    (app.package_name, PackageV2 { metadata, versions })
}

fn convert_version(p: PackageV1, whats_new: Option<LocalizedText>) -> PackageVersionV2 {
    let permissions = |list: Vec<PermissionV1>| {
        list.into_iter()
            .map(|PermissionV1(name, max_sdk_version)| {
                PermissionV2 {
                    name,
                    max_sdk_version,
                }
            })
            .collect()
    };
    let min_sdk_version = p.min_sdk_version.unwrap_or(1);

    PackageVersionV2 {
        added: p.added.unwrap_or(0),
        file: FileV1 {
            name: format!("/{}", p.apk_name),
            sha256: p.hash,
            size: p.size,
            ipfs_cid_v1: None,
        },
        src: p.srcname.map(|name| FileV2::new(format!("/{name}"))),
        manifest: ManifestV2 {
            version_name: p.version_name.unwrap_or_default(),
            version_code: p.version_code.unwrap_or(0),
            uses_sdk: Some(UsesSdkV2 {
                min_sdk_version,
                target_sdk_version: p.target_sdk_version.unwrap_or(min_sdk_version),
            }),
            max_sdk_version: p.max_sdk_version,
            signer: p.signer.map(|sha256| {
                SignerV2 {
                    sha256: vec![sha256],
                    has_multiple_signers: false,
                }
            }),
            uses_permission: permissions(p.uses_permission),
            uses_permission_sdk23: permissions(p.uses_permission_sdk23),
            nativecode: p.nativecode.unwrap_or_default(),
            features: p
                .features
                .unwrap_or_default()
                .into_iter()
                .map(|name| FeatureV2 { name })
                .collect(),
        },
        release_channels: Vec::new(),
        anti_features: p
            .anti_features
            .into_iter()
            .map(|id| (id, LocalizedText::new()))
            .collect(),
        whats_new: whats_new.unwrap_or_default(),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn default_text(value: &str) -> LocalizedText {
    LocalizedText::from([(DEFAULT_LOCALE.to_string(), value.to_string())])
}

fn default_file(name: String) -> LocalizedFile {
    LocalizedFile::from([(DEFAULT_LOCALE.to_string(), FileV2::new(name))])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> IndexV1 {
        serde_json::from_value(json!({
            "repo": {
                "timestamp": 1_600_000_000_000i64,
                "version": 21,
                "maxage": 14,
                "name": "Legacy Repo",
                "icon": "icon.png",
                "address": "https://legacy.example.org/repo",
                "description": "Old but gold",
                "mirrors": ["https://mirror.example.org/repo"]
            },
            "requests": { "install": [], "uninstall": [] },
            "apps": [{
                "packageName": "org.example.app",
                "categories": ["System"],
                "antiFeatures": ["Ads"],
                "name": "Example",
                "summary": "An example",
                "icon": "org.example.app.1.png",
                "license": "GPL-3.0-only",
                "suggestedVersionCode": "2",
                "added": 100,
                "lastUpdated": 200,
                "localized": {
                    "de": { "name": "Beispiel", "whatsNew": "Neu" },
                    "en-US": { "phoneScreenshots": ["1.png"] }
                }
            }],
            "packages": {
                "org.example.app": [{
                    "packageName": "org.example.app",
                    "apkName": "org.example.app_2.apk",
                    "hash": "abcd",
                    "hashType": "sha256",
                    "size": 4096,
                    "versionName": "2.0",
                    "versionCode": 2,
                    "minSdkVersion": 21,
                    "nativecode": ["arm64-v8a"],
                    "uses-permission": [["android.permission.INTERNET", null]]
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_into_v2_repo() {
        let index = sample().into_v2();
        let repo = &index.repo;

        assert_eq!(repo.name[DEFAULT_LOCALE], "Legacy Repo");
        assert_eq!(repo.icon[DEFAULT_LOCALE].name, "/icons/icon.png");
        assert_eq!(repo.mirrors, vec![MirrorV2::new("https://mirror.example.org/repo")]);
        assert!(repo.anti_features.contains_key("Ads"));
        assert!(repo.categories.contains_key("System"));
    }

    #[test]
    fn test_into_v2_packages() {
        let index = sample().into_v2();
        let package = &index.packages["org.example.app"];
        let metadata = &package.metadata;

        let name = metadata.name.as_ref().unwrap();
        assert_eq!(name["de"], "Beispiel");
        assert_eq!(name[DEFAULT_LOCALE], "Example");
        assert_eq!(metadata.icon.as_ref().unwrap()[DEFAULT_LOCALE].name, "/icons/org.example.app.1.png");
        let phone = metadata.screenshots.as_ref().unwrap().phone.as_ref().unwrap();
        assert_eq!(phone["en-US"][0].name, "/org.example.app/en-US/phoneScreenshots/1.png");

        let version = &package.versions["abcd"];
        assert_eq!(version.file.name, "/org.example.app_2.apk");
        assert_eq!(version.manifest.uses_sdk.unwrap().target_sdk_version, 21);
        assert_eq!(version.manifest.uses_permission[0].name, "android.permission.INTERNET");
        assert_eq!(version.whats_new["de"], "Neu");
    }
}
