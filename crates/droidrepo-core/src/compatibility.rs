use droidrepo_config::config::Config;
use droidrepo_db::CompatibilityChecker;
use droidrepo_index::v2::PackageVersionV2;

/// Decides compatibility from the SDK level, ABIs and features of the target device.
#[derive(Debug, Clone)]
pub struct DeviceCompatibilityChecker {
    pub sdk_level: i32,
    pub supported_abis: Vec<String>,
    pub features: Vec<String>,
    /// Accept versions whose native code does not match any supported ABI.
    pub force_touch_apps: bool,
}

impl DeviceCompatibilityChecker {
    pub fn new(sdk_level: i32, supported_abis: Vec<String>, features: Vec<String>) -> Self {
        Self {
            sdk_level,
            supported_abis,
            features,
            force_touch_apps: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sdk_level.unwrap_or(34),
            config.supported_abis.clone().unwrap_or_default(),
            config.device_features.clone().unwrap_or_default(),
        )
    }

    fn supports_sdk(&self, version: &PackageVersionV2) -> bool {
        let manifest = &version.manifest;
        let min_sdk = manifest
            .uses_sdk
            .as_ref()
            .map_or(1, |sdk| sdk.min_sdk_version);
        if self.sdk_level < min_sdk {
            return false;
        }
        manifest
            .max_sdk_version
            .map_or(true, |max_sdk| self.sdk_level <= max_sdk)
    }

    fn supports_features(&self, version: &PackageVersionV2) -> bool {
        version
            .manifest
            .features
            .iter()
            .all(|feature| self.features.iter().any(|f| f == &feature.name))
    }

    fn supports_abi(&self, version: &PackageVersionV2) -> bool {
        let nativecode = &version.manifest.nativecode;
        if nativecode.is_empty() || self.force_touch_apps {
            return true;
        }
        nativecode
            .iter()
            .any(|abi| self.supported_abis.iter().any(|s| s == abi))
    }
}

impl CompatibilityChecker for DeviceCompatibilityChecker {
    fn is_compatible(&self, version: &PackageVersionV2) -> bool {
        self.supports_sdk(version) && self.supports_features(version) && self.supports_abi(version)
    }
}

#[cfg(test)]
mod tests {
    use droidrepo_index::v2::{FeatureV2, UsesSdkV2};

    use super::*;

    fn version(min_sdk: i32, max_sdk: Option<i32>, abis: &[&str], features: &[&str]) -> PackageVersionV2 {
        let mut version = PackageVersionV2::default();
        version.manifest.uses_sdk = Some(UsesSdkV2 {
            min_sdk_version: min_sdk,
            target_sdk_version: 34,
        });
        version.manifest.max_sdk_version = max_sdk;
        version.manifest.nativecode = abis.iter().map(|s| s.to_string()).collect();
        version.manifest.features = features
            .iter()
            .map(|name| {
                FeatureV2 {
                    name: name.to_string(),
                }
            })
            .collect();
        version
    }

    fn checker() -> DeviceCompatibilityChecker {
        DeviceCompatibilityChecker::new(
            30,
            vec!["arm64-v8a".into(), "armeabi-v7a".into()],
            vec!["android.hardware.camera".into()],
        )
    }

    #[test]
    fn test_sdk_range() {
        let checker = checker();
        assert!(checker.is_compatible(&version(21, None, &[], &[])));
        assert!(checker.is_compatible(&version(30, Some(30), &[], &[])));
        assert!(!checker.is_compatible(&version(31, None, &[], &[])));
        assert!(!checker.is_compatible(&version(21, Some(29), &[], &[])));
    }

    #[test]
    fn test_native_code() {
        let mut checker = checker();
        assert!(checker.is_compatible(&version(21, None, &["x86", "arm64-v8a"], &[])));
        assert!(!checker.is_compatible(&version(21, None, &["x86", "x86_64"], &[])));

        checker.force_touch_apps = true;
        assert!(checker.is_compatible(&version(21, None, &["x86"], &[])));
    }

    #[test]
    fn test_features() {
        let checker = checker();
        assert!(checker.is_compatible(&version(21, None, &[], &["android.hardware.camera"])));
        assert!(!checker.is_compatible(&version(
            21,
            None,
            &[],
            &["android.hardware.camera", "android.hardware.nfc"]
        )));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default_config();
        config.sdk_level = Some(23);
        config.supported_abis = Some(vec!["x86".into()]);
        let checker = DeviceCompatibilityChecker::from_config(&config);

        assert_eq!(checker.sdk_level, 23);
        assert!(checker.is_compatible(&version(23, None, &["x86"], &[])));
        assert!(!checker.is_compatible(&version(24, None, &[], &[])));
    }
}
