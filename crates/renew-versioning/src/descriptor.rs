//! ---
//! renew_section: "14-versioning"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Remote update descriptor model and validation."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, NoneAsEmptyString};
use url::Url;

use crate::version::ReleaseVersion;

/// Release metadata published by the remote version endpoint.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: ReleaseVersion,
    /// Oldest version allowed to upgrade directly to `version`.
    #[serde(default)]
    #[serde_as(as = "NoneAsEmptyString")]
    pub minimum_required_version: Option<ReleaseVersion>,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    pub download_url: Url,
    /// Hex SHA-256 of the package, when published.
    #[serde(default)]
    #[serde_as(as = "NoneAsEmptyString")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub release_notes: String,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub metadata: IndexMap<String, String>,
}

/// A descriptor paired with the locally running version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpdate {
    pub descriptor: VersionDescriptor,
    pub current: ReleaseVersion,
    pub is_newer: bool,
}

impl ResolvedUpdate {
    pub fn new(descriptor: VersionDescriptor, current: ReleaseVersion) -> Self {
        let is_newer = descriptor.version.is_newer_than(&current);
        Self {
            descriptor,
            current,
            is_newer,
        }
    }

    /// The running version satisfies the descriptor's minimum-upgradable-from bound.
    pub fn meets_minimum(&self) -> bool {
        self.descriptor
            .minimum_required_version
            .map_or(true, |minimum| self.current >= minimum)
    }

    /// Newer and reachable from the running version.
    pub fn is_applicable(&self) -> bool {
        self.is_newer && self.meets_minimum()
    }

    pub fn target(&self) -> ReleaseVersion {
        self.descriptor.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(json: serde_json::Value) -> VersionDescriptor {
        serde_json::from_value(json).expect("descriptor parses")
    }

    #[test]
    fn parses_full_descriptor() {
        let parsed = descriptor(serde_json::json!({
            "version": "1.2.0.0",
            "minimumRequiredVersion": "1.0.0.0",
            "releaseDate": "2026-03-01T12:00:00Z",
            "downloadUrl": "https://updates.example.invalid/renewd-1.2.0.0.zip",
            "checksum": "ABCDEF",
            "fileSize": 1024,
            "releaseNotes": "Bug fixes",
            "isMandatory": true,
            "metadata": { "channel": "stable" }
        }));
        assert_eq!(parsed.version, ReleaseVersion::new(1, 2, 0, 0));
        assert_eq!(
            parsed.minimum_required_version,
            Some(ReleaseVersion::new(1, 0, 0, 0))
        );
        assert_eq!(parsed.file_size, Some(1024));
        assert!(parsed.is_mandatory);
        assert_eq!(parsed.metadata.get("channel").map(String::as_str), Some("stable"));
    }

    #[test]
    fn tolerates_empty_and_null_optionals() {
        let parsed = descriptor(serde_json::json!({
            "version": "1.1",
            "minimumRequiredVersion": "",
            "downloadUrl": "https://updates.example.invalid/pkg.zip",
            "checksum": "",
            "releaseNotes": null,
            "metadata": null
        }));
        assert_eq!(parsed.minimum_required_version, None);
        assert_eq!(parsed.checksum, None);
        assert!(parsed.release_notes.is_empty());
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn rejects_missing_download_url() {
        let result = serde_json::from_value::<VersionDescriptor>(serde_json::json!({
            "version": "1.1.0.0"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn resolved_update_respects_minimum() {
        let mut parsed = descriptor(serde_json::json!({
            "version": "2.0.0.0",
            "minimumRequiredVersion": "1.5.0.0",
            "downloadUrl": "https://updates.example.invalid/pkg.zip"
        }));
        let resolved = ResolvedUpdate::new(parsed.clone(), ReleaseVersion::new(1, 0, 0, 0));
        assert!(resolved.is_newer);
        assert!(!resolved.is_applicable());

        parsed.minimum_required_version = None;
        let resolved = ResolvedUpdate::new(parsed, ReleaseVersion::new(1, 0, 0, 0));
        assert!(resolved.is_applicable());
    }
}
