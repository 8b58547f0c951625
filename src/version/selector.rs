//! Latest tag selection
//!
//! Both selectors are pure reductions over the candidate list, so the result
//! does not depend on the order in which a registry returns tags.

use crate::policy::Policy;
use crate::version::error::SelectError;
use crate::version::semver::SemVer;
use crate::version::types::ImageTag;

/// Suffixes of cosign/SBOM artifacts pushed alongside real images
const ARTIFACT_SUFFIXES: &[&str] = &[".att", ".sig", ".sbom"];

/// Select the highest versioned tag allowed by the policy
pub fn select_latest_semver<'a>(
    tags: &'a [ImageTag],
    policy: &Policy,
) -> Result<&'a ImageTag, SelectError> {
    let mut latest: Option<(&ImageTag, SemVer)> = None;

    for tag in tags {
        let version = SemVer::parse(&tag.tag);
        if !semver_allowed(tag, &version, policy) {
            continue;
        }

        let replace = match &latest {
            None => true,
            Some((best, best_version)) => {
                best_version.less_than(&version)
                    || (best_version.equal(&version) && tag.timestamp > best.timestamp)
            }
        };
        if replace {
            latest = Some((tag, version));
        }
    }

    latest.map(|(tag, _)| tag).ok_or(SelectError::NotFound)
}

fn semver_allowed(tag: &ImageTag, version: &SemVer, policy: &Policy) -> bool {
    if let Some(regex) = &policy.match_regex {
        return regex.is_match(&tag.tag);
    }

    if !policy.use_metadata && version.has_metadata() {
        return false;
    }

    let pins = [
        (policy.pin_major, version.major()),
        (policy.pin_minor, version.minor()),
        (policy.pin_patch, version.patch()),
    ];
    pins.iter()
        .all(|(pin, actual)| pin.is_none_or(|pin| pin == *actual))
}

/// Select the most recently created tag allowed by the policy
pub fn select_latest_digest<'a>(
    tags: &'a [ImageTag],
    policy: &Policy,
) -> Result<&'a ImageTag, SelectError> {
    let mut latest: Option<&ImageTag> = None;

    for tag in tags {
        if ARTIFACT_SUFFIXES.iter().any(|suffix| tag.tag.ends_with(suffix)) {
            continue;
        }
        if let Some(regex) = &policy.match_regex
            && !regex.is_match(&tag.tag)
        {
            continue;
        }

        if latest.is_none_or(|best| tag.timestamp > best.timestamp) {
            latest = Some(tag);
        }
    }

    latest.ok_or(SelectError::NotFound)
}
