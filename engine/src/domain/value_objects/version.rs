//! Version records and per-process version tracking

use crate::constants::update::MAX_VERSION_HISTORY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A single release of a process binary.
///
/// Tags are opaque strings whose lexicographic order matches semantic
/// versioning for the tags the release pipeline actually emits (fields up to
/// three digits). Treated as an intentional limitation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub tag: String,
    #[serde(default)]
    pub release_url: String,
    #[serde(default)]
    pub asset_url: String,
    #[serde(default)]
    pub asset_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_prerelease: bool,
}

impl Version {
    /// A version known only by its tag (e.g. recovered from a binary filename)
    pub fn from_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }
}

/// Version tracking document persisted per process as
/// `data/<name>.version.json`.
///
/// Invariant: `current_version` is always the first history entry when
/// present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub process_name: String,
    #[serde(default)]
    pub current_version: Option<Version>,
    #[serde(default)]
    pub latest_version: Option<Version>,
    #[serde(default)]
    pub update_available: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Version>,
}

impl VersionInfo {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            ..Default::default()
        }
    }

    /// Record `version` as current, moving it to the head of history if not
    /// already present and truncating to the bounded length.
    pub fn set_current(&mut self, version: Version) {
        if !self.history.iter().any(|v| v.tag == version.tag) {
            self.history.insert(0, version.clone());
            self.history.truncate(MAX_VERSION_HISTORY);
        }
        self.current_version = Some(version);
    }

    /// The second history entry (the version before current)
    pub fn previous(&self) -> Option<&Version> {
        self.history.get(1)
    }
}

/// Extract a release tag from a versioned binary filename.
///
/// Matches `^.*_v?(\d+\.\d+\.\d+)\.exe$` and always re-emits the tag with a
/// leading `v`, e.g. `db_service_1.12.1.exe` -> `v1.12.1`.
pub fn extract_tag_from_filename(filename: &str) -> Option<String> {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        regex::Regex::new(r"_v?(\d+\.\d+\.\d+)\.exe$").expect("version filename pattern")
    });
    re.captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| format!("v{}", m.as_str()))
}
