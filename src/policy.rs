//! Per-container tag selection policy
//!
//! A [`Policy`] is built once per container from pod annotations of the form
//! `<option>.version-checker.io/<container-name>` and then passed by reference
//! to the checker.

use std::collections::HashMap;

use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Domain suffix of every policy annotation
pub const ANNOTATION_DOMAIN: &str = "version-checker.io";

pub const ENABLE: &str = "enable";
pub const USE_SHA: &str = "use-sha";
pub const USE_METADATA: &str = "use-metadata";
pub const MATCH_REGEX: &str = "match-regex";
pub const PIN_MAJOR: &str = "pin-major";
pub const PIN_MINOR: &str = "pin-minor";
pub const PIN_PATCH: &str = "pin-patch";
pub const OVERRIDE_URL: &str = "override-url";
pub const RESOLVE_SHA_TO_TAGS: &str = "resolve-sha-to-tags";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid boolean for {key}: {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("Invalid version pin for {key}: {value:?}")]
    InvalidPin { key: String, value: String },

    #[error("Invalid regex for {key}: {source}")]
    InvalidRegex {
        key: String,
        #[source]
        source: regex::Error,
    },

    #[error("{key} cannot be combined with {other}")]
    Conflict { key: String, other: String },
}

/// Constraints on which tags are eligible and how "latest" is decided
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Policy {
    /// Compare digests instead of tag versions
    pub use_sha: bool,
    /// Try to map a pinned digest back to a tag before comparing
    pub resolve_sha_to_tags: bool,
    /// Only tags matching this regex are candidates; other filters are skipped
    #[serde(
        serialize_with = "serialize_regex",
        skip_serializing_if = "Option::is_none"
    )]
    pub match_regex: Option<Regex>,
    /// Allow tags carrying metadata (`-alpha`, `-debian-10`, ...)
    pub use_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_major: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_patch: Option<i64>,
    /// Registry URL to query instead of the declared one (mirrors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_url: Option<String>,
}

fn serialize_regex<S: Serializer>(regex: &Option<Regex>, serializer: S) -> Result<S::Ok, S::Error> {
    match regex {
        Some(regex) => serializer.serialize_some(regex.as_str()),
        None => serializer.serialize_none(),
    }
}

/// Annotation key for an option applied to a container
pub fn annotation_key(option: &str, container: &str) -> String {
    format!("{}.{}/{}", option, ANNOTATION_DOMAIN, container)
}

impl Policy {
    /// Build the policy for `container` from pod annotations.
    ///
    /// Returns `Ok(None)` when the container is not enabled for checking:
    /// either `enable` is `"false"`, or it is absent and `test_all` is unset.
    pub fn from_annotations(
        annotations: &HashMap<String, String>,
        container: &str,
        test_all: bool,
    ) -> Result<Option<Self>, PolicyError> {
        let get = |option: &str| lookup(annotations, option, container);

        let enabled = match get(ENABLE) {
            Some((key, value)) => parse_bool(key, value)?,
            None => test_all,
        };
        if !enabled {
            return Ok(None);
        }

        let mut policy = Policy::default();

        if let Some((key, value)) = get(USE_SHA) {
            policy.use_sha = parse_bool(key, value)?;
        }
        if let Some((key, value)) = get(RESOLVE_SHA_TO_TAGS) {
            policy.resolve_sha_to_tags = parse_bool(key, value)?;
        }
        if let Some((key, value)) = get(USE_METADATA) {
            policy.use_metadata = parse_bool(key, value)?;
        }
        if let Some((key, value)) = get(MATCH_REGEX).filter(|(_, value)| !value.is_empty()) {
            let regex =
                Regex::new(value).map_err(|source| PolicyError::InvalidRegex { key, source })?;
            policy.match_regex = Some(regex);
        }
        if let Some((key, value)) = get(PIN_MAJOR) {
            policy.pin_major = Some(parse_pin(key, value)?);
        }
        if let Some((key, value)) = get(PIN_MINOR) {
            policy.pin_minor = Some(parse_pin(key, value)?);
        }
        if let Some((key, value)) = get(PIN_PATCH) {
            policy.pin_patch = Some(parse_pin(key, value)?);
        }
        if let Some((_, value)) = get(OVERRIDE_URL).filter(|(_, value)| !value.is_empty()) {
            policy.override_url = Some(value.to_string());
        }

        policy.validate(container)?;
        Ok(Some(policy))
    }

    /// Digest comparison cannot honour version filters
    fn validate(&self, container: &str) -> Result<(), PolicyError> {
        if !self.use_sha {
            return Ok(());
        }

        let conflicts = [
            (MATCH_REGEX, self.match_regex.is_some()),
            (PIN_MAJOR, self.pin_major.is_some()),
            (PIN_MINOR, self.pin_minor.is_some()),
            (PIN_PATCH, self.pin_patch.is_some()),
            (USE_METADATA, self.use_metadata),
        ];
        match conflicts.iter().find(|(_, set)| *set) {
            Some((option, _)) => Err(PolicyError::Conflict {
                key: annotation_key(USE_SHA, container),
                other: annotation_key(option, container),
            }),
            None => Ok(()),
        }
    }
}

fn lookup<'a>(
    annotations: &'a HashMap<String, String>,
    option: &str,
    container: &str,
) -> Option<(String, &'a str)> {
    let key = annotation_key(option, container);
    let value = annotations.get(&key)?.trim();
    Some((key, value))
}

fn parse_bool(key: String, value: &str) -> Result<bool, PolicyError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(PolicyError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_pin(key: String, value: &str) -> Result<i64, PolicyError> {
    value
        .parse::<i64>()
        .ok()
        .filter(|pin| *pin >= 0)
        .ok_or_else(|| PolicyError::InvalidPin {
            key,
            value: value.to_string(),
        })
}
