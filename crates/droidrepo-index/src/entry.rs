use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name of the signed entry archive at the repository root.
pub const ENTRY_JAR: &str = "entry.jar";
/// Name of the entry document inside [`ENTRY_JAR`].
pub const ENTRY_JSON: &str = "entry.json";

/// A file listed by the entry document: either the full index or a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFileV2 {
    pub name: String,
    pub sha256: String,
    pub size: i64,
    #[serde(
        rename = "ipfsCIDv1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ipfs_cid_v1: Option<String>,
    pub num_packages: i32,
}

/// The small signed document that points at the full index and the available diffs.
///
/// `diffs` is keyed by the repository timestamp a diff applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryV2 {
    pub timestamp: i64,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i32>,
    pub index: EntryFileV2,
    #[serde(default)]
    pub diffs: BTreeMap<String, EntryFileV2>,
}

impl EntryV2 {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Returns the diff that upgrades a repository currently at `timestamp`.
    pub fn get_diff(&self, timestamp: i64) -> Option<&EntryFileV2> {
        self.diffs.get(&timestamp.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_entry_parse_and_get_diff() {
        let entry: EntryV2 = serde_json::from_value(json!({
            "timestamp": 1337,
            "version": 20001,
            "index": {
                "name": "/index-v2.json",
                "sha256": "aa",
                "size": 100,
                "numPackages": 3
            },
            "diffs": {
                "42": {
                    "name": "/diff/42.json",
                    "sha256": "bb",
                    "size": 10,
                    "numPackages": 1
                }
            }
        }))
        .unwrap();

        assert_eq!(entry.max_age, None);
        assert_eq!(entry.get_diff(42).unwrap().name, "/diff/42.json");
        assert!(entry.get_diff(23).is_none());
        assert!(entry.get_diff(-1).is_none());
    }

    #[test]
    fn test_entry_rejects_missing_index() {
        let result = EntryV2::from_slice(br#"{"timestamp": 1, "version": 1}"#);
        assert!(result.is_err());
    }
}
