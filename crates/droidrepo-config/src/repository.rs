use documented::{Documented, DocumentedFields};
use serde::{Deserialize, Serialize};

/// A repository that is added to the database on first start.
#[derive(Clone, Debug, Deserialize, Serialize, Documented, DocumentedFields)]
pub struct RepositoryConfig {
    /// Display name of the repository.
    pub name: String,

    /// Canonical address of the repository, e.g. https://f-droid.org/repo
    pub address: String,

    /// Short description shown until the first index has been fetched.
    pub description: Option<String>,

    /// Hex encoded signing certificate to pin. Takes precedence over `fingerprint`.
    pub certificate: Option<String>,

    /// SHA-256 fingerprint of the signing certificate, checked on first fetch.
    pub fingerprint: Option<String>,

    /// Additional mirrors, tried in addition to the ones declared by the index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,

    /// Whether the repository is enabled.
    /// Default: true
    pub enabled: Option<bool>,
}

impl RepositoryConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// The address without a trailing slash, used to detect duplicates.
    pub fn normalized_address(&self) -> &str {
        self.address.trim().trim_end_matches('/')
    }
}

/// Repositories shipped with the default configuration.
pub fn default_repositories() -> Vec<RepositoryConfig> {
    vec![
        RepositoryConfig {
            name: "F-Droid".into(),
            address: "https://f-droid.org/repo".into(),
            description: Some(
                "The official F-Droid Free Software repository. Everything in this repository is always built from the source code.".into(),
            ),
            certificate: None,
            fingerprint: Some(
                "43238d512c1e5eb2d6569f4a3afbf5523418b82e0a3ed1552770abb9a9c9ccab".into(),
            ),
            mirrors: Vec::new(),
            enabled: Some(true),
        },
        RepositoryConfig {
            name: "F-Droid Archive".into(),
            address: "https://f-droid.org/archive".into(),
            description: Some(
                "The archive of the official F-Droid Free Software repository. Apps here are old and can contain known vulnerabilities and security issues!".into(),
            ),
            certificate: None,
            fingerprint: Some(
                "43238d512c1e5eb2d6569f4a3afbf5523418b82e0a3ed1552770abb9a9c9ccab".into(),
            ),
            mirrors: Vec::new(),
            enabled: Some(false),
        },
        RepositoryConfig {
            name: "IzzyOnDroid".into(),
            address: "https://apt.izzysoft.de/fdroid/repo".into(),
            description: Some(
                "This is a repository of apps to be used with F-Droid. Applications in this repository are official binaries built by the original application developers.".into(),
            ),
            certificate: None,
            fingerprint: Some(
                "3bf0d6abfeae2f401707b6d966be743bf0eee49c2561b9ba39073711f628937a".into(),
            ),
            mirrors: Vec::new(),
            enabled: Some(false),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_repositories() {
        let repos = default_repositories();

        assert_eq!(repos.len(), 3);
        assert!(repos[0].is_enabled());
        assert!(!repos[1].is_enabled());
        assert!(repos[1].normalized_address().ends_with("/archive"));
        assert!(repos.iter().all(|r| r.fingerprint.is_some()));
    }

    #[test]
    fn test_normalized_address() {
        let repo = RepositoryConfig {
            name: "test".into(),
            address: " https://example.org/fdroid/repo/ ".into(),
            description: None,
            certificate: None,
            fingerprint: None,
            mirrors: Vec::new(),
            enabled: None,
        };

        assert_eq!(repo.normalized_address(), "https://example.org/fdroid/repo");
        assert!(repo.is_enabled());
    }
}
