//! Per-container image freshness check

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::image_ref::{parse_image, split_image_url};
use crate::policy::Policy;
use crate::version::cache::{Cache, CacheHandler};
use crate::version::error::{CacheError, CheckError, RegistryError};
use crate::version::registry::Registry;
use crate::version::selector::{select_latest_digest, select_latest_semver};
use crate::version::semver::SemVer;
use crate::version::types::{CheckResult, ImageTag};
use crate::workload::{Container, Pod};

/// Floating tag that is always compared by digest
const LATEST_TAG: &str = "latest";

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

/// 32-bit FNV-1 hash
fn fnv1_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV_PRIME) ^ u32::from(*byte)
    })
}

/// Cache key for the tags of `image_url` looked up under `policy`.
///
/// Hashes the JSON encoding of the policy followed by the URL. Distinct
/// inputs may collide.
pub fn version_key(policy: &Policy, image_url: &str) -> String {
    let mut data = serde_json::to_vec(policy).unwrap_or_default();
    data.extend_from_slice(image_url.as_bytes());
    fnv1_32(&data).to_string()
}

/// Loads the tag list of an image URL from a registry
pub struct TagFetcher {
    registry: Arc<dyn Registry>,
}

impl TagFetcher {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl CacheHandler for TagFetcher {
    type Value = Vec<ImageTag>;
    type Args = String;

    async fn fetch(&self, image_url: &String) -> Result<Vec<ImageTag>, RegistryError> {
        let location = split_image_url(image_url);
        debug!(
            "Fetching tags for {} from {}",
            location.name(),
            location.host
        );
        self.registry
            .tags(&location.host, &location.repo, &location.image)
            .await
    }
}

/// Compares running containers against the newest image in their registry
pub struct Checker {
    registry: Arc<dyn Registry>,
    cache: Arc<Cache<TagFetcher>>,
}

impl Checker {
    pub fn new(registry: Arc<dyn Registry>, cache_timeout: Duration) -> Self {
        let cache = Cache::new(cache_timeout, TagFetcher::new(registry.clone()));
        Self {
            registry,
            cache: Arc::new(cache),
        }
    }

    /// Tag cache shared by every check, for garbage collection and shutdown
    pub fn cache(&self) -> &Arc<Cache<TagFetcher>> {
        &self.cache
    }

    /// Check whether `container` of `pod` runs the latest image allowed by
    /// `policy`.
    ///
    /// Returns `Ok(None)` while the container has no recorded running digest.
    pub async fn container(
        &self,
        token: &CancellationToken,
        pod: &Pod,
        container: &Container,
        policy: &Policy,
    ) -> Result<Option<CheckResult>, CheckError> {
        let status_sha = pod.status_sha(&container.name);
        if status_sha.is_empty() {
            debug!(
                "Container {}/{} has no running digest yet",
                pod.metadata.name, container.name
            );
            return Ok(None);
        }

        let image = parse_image(&container.image);
        let mut image_url = image.url;
        let mut current_tag = image.tag;
        let mut using_sha = !image.digest.is_empty();

        if policy.resolve_sha_to_tags && using_sha {
            let resolved = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Resolving {}@{} cancelled", image_url, image.digest);
                    return Err(CheckError::Fetch {
                        image_url: image_url.clone(),
                        source: CacheError::Cancelled,
                    });
                }
                result = self.registry.resolve_sha_to_tag(&image_url, &image.digest) => result,
            };

            match resolved {
                Ok(tag) if !tag.is_empty() => {
                    debug!("Resolved {}@{} to tag {}", image_url, image.digest, tag);
                    current_tag = tag;
                    using_sha = false;
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Failed to resolve {}@{} to a tag: {}",
                    image_url, image.digest, e
                ),
            }
        }

        let use_sha = policy.use_sha || current_tag.is_empty() || current_tag == LATEST_TAG;

        if let Some(override_url) = &policy.override_url
            && *override_url != image_url
        {
            debug!("Looking up {} instead of {}", override_url, image_url);
            image_url = override_url.clone();
        }

        let key = version_key(policy, &image_url);
        let tags = self
            .cache
            .get(token, &key, &image_url)
            .await
            .map_err(|source| CheckError::Fetch {
                image_url: image_url.clone(),
                source,
            })?;

        let result = if use_sha {
            let latest = select_latest_digest(&tags, policy).map_err(|_| CheckError::NotFound {
                image_url: image_url.clone(),
            })?;
            digest_result(latest, &current_tag, status_sha, image_url)
        } else {
            let latest = select_latest_semver(&tags, policy).map_err(|_| CheckError::NotFound {
                image_url: image_url.clone(),
            })?;
            let current_version = if using_sha {
                format!("{}@{}", current_tag, image.digest)
            } else {
                current_tag.clone()
            };
            semver_result(latest, &current_tag, current_version, status_sha, image_url)
        };

        Ok(Some(result))
    }
}

fn tag_at_sha(tag: &str, sha: &str) -> String {
    if tag.is_empty() {
        sha.to_string()
    } else {
        format!("{}@{}", tag, sha)
    }
}

fn digest_result(
    latest: &ImageTag,
    current_tag: &str,
    status_sha: &str,
    image_url: String,
) -> CheckResult {
    CheckResult {
        current_version: tag_at_sha(current_tag, status_sha),
        latest_version: tag_at_sha(&latest.tag, &latest.sha),
        is_latest: latest.sha == status_sha,
        image_url,
    }
}

fn semver_result(
    latest: &ImageTag,
    current_tag: &str,
    current_version: String,
    status_sha: &str,
    image_url: String,
) -> CheckResult {
    let current = SemVer::parse(current_tag);
    let newest = SemVer::parse(&latest.tag);

    let mut is_latest = !current.less_than(&newest);
    let mut latest_version = latest.tag.clone();

    // Same tag republished with different content
    if current.equal(&newest) && !latest.sha.is_empty() && latest.sha != status_sha {
        is_latest = false;
        latest_version = format!("{}@{}", latest.tag, latest.sha);
    }

    CheckResult {
        current_version,
        latest_version,
        is_latest,
        image_url,
    }
}
