//! Common types shared by registries, selectors and the checker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single tag/digest pair as reported by a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTag {
    pub tag: String,
    pub sha: String,
    /// Creation time; the Unix epoch when the registry does not report one
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
}

impl ImageTag {
    pub fn new(tag: &str, sha: &str) -> Self {
        Self {
            tag: tag.to_string(),
            sha: sha.to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            architecture: String::new(),
            os: String::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Outcome of comparing a running container image against its registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub current_version: String,
    pub latest_version: String,
    pub is_latest: bool,
    pub image_url: String,
}
