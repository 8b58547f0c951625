//! OCI distribution API registry implementation
//!
//! Anonymous client for any registry speaking the distribution API: tags come
//! from `/v2/<name>/tags/list` and digests from a `HEAD` on each manifest. The
//! tags API exposes no creation time, so timestamps stay at the Unix epoch.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::parser::image_ref::{ImageLocation, split_image_url};
use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::ImageTag;

/// Host actually serving Docker Hub's distribution API
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Media types accepted when resolving a tag to its digest
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json";

const DIGEST_HEADER: &str = "docker-content-digest";

/// Manifest requests in flight per image
const MAX_CONCURRENT_MANIFEST_REQUESTS: usize = 8;

/// Upper bound on `Link` pages followed per image
const MAX_TAG_PAGES: usize = 100;

/// Response from the tags list endpoint
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry implementation for the OCI distribution API
pub struct OciRegistry {
    client: reqwest::Client,
    base_url: Option<String>,
    insecure_hosts: Vec<String>,
}

impl OciRegistry {
    /// Creates a client that talks HTTPS to each image's own host, or plain
    /// HTTP for hosts listed in `insecure_hosts`
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        insecure_hosts: Vec<String>,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: None,
            insecure_hosts,
        })
    }

    /// Sends every request to `base_url` regardless of the image host
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    fn base_url(&self, host: &str) -> String {
        if let Some(base_url) = &self.base_url {
            return base_url.clone();
        }

        let host = if host == "docker.io" {
            DOCKER_HUB_API_HOST
        } else {
            host
        };
        let scheme = if self.insecure_hosts.iter().any(|h| h == host) {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, host)
    }

    /// Reject non-success responses with the matching error
    fn check_status(
        response: reqwest::Response,
        name: &str,
    ) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            warn!("Registry returned status {} for {}", status, response.url());
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        Ok(response)
    }

    /// List tag names, following `Link: <...>; rel="next"` pagination
    async fn list_tags(&self, base_url: &str, name: &str) -> Result<Vec<String>, RegistryError> {
        let mut tags = Vec::new();
        let mut url = format!("{}/v2/{}/tags/list", base_url, name);
        let mut visited = HashSet::new();

        loop {
            if visited.len() >= MAX_TAG_PAGES {
                warn!("Stopping tag listing for {} after {} pages", name, MAX_TAG_PAGES);
                break;
            }
            visited.insert(url.clone());

            let response = self.client.get(&url).send().await?;
            let response = Self::check_status(response, name)?;
            let next = next_page(&response, base_url);

            let page: TagList = response.json().await.map_err(|e| {
                warn!("Failed to parse tag list for {}: {}", name, e);
                RegistryError::InvalidResponse(e.to_string())
            })?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) if visited.contains(&next) => {
                    warn!("Registry repeated tag page {} for {}", next, name);
                    break;
                }
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(tags)
    }

    /// Resolve a tag to its manifest digest
    async fn digest(&self, base_url: &str, name: &str, tag: &str) -> Result<String, RegistryError> {
        let url = format!("{}/v2/{}/manifests/{}", base_url, name, tag);

        let response = self
            .client
            .head(&url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;
        let response = Self::check_status(response, name)?;

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                RegistryError::InvalidResponse(format!("Missing digest for {}:{}", name, tag))
            })
    }

    async fn image_tags(&self, location: &ImageLocation) -> Result<Vec<ImageTag>, RegistryError> {
        let base_url = self.base_url(&location.host);
        let name = location.name();

        let names = self.list_tags(&base_url, &name).await?;
        debug!("Found {} tags for {}/{}", names.len(), location.host, name);

        let tags: Vec<Option<ImageTag>> = stream::iter(names)
            .map(|tag| {
                let base_url = &base_url;
                let name = &name;
                async move {
                    match self.digest(base_url, name, &tag).await {
                        Ok(sha) => Ok(Some(ImageTag::new(&tag, &sha))),
                        // Deleted between listing and resolving
                        Err(RegistryError::NotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .buffered(MAX_CONCURRENT_MANIFEST_REQUESTS)
            .try_collect()
            .await?;

        Ok(tags.into_iter().flatten().collect())
    }
}

/// Extract the next page URL from a `Link` header
fn next_page(response: &reqwest::Response, base_url: &str) -> Option<String> {
    let link = response.headers().get(reqwest::header::LINK)?.to_str().ok()?;
    if !link.contains("rel=\"next\"") {
        return None;
    }

    let start = link.find('<')? + 1;
    let end = link[start..].find('>')? + start;
    let target = &link[start..end];

    if target.starts_with("http://") || target.starts_with("https://") {
        Some(target.to_string())
    } else {
        Some(format!("{}{}", base_url, target))
    }
}

#[async_trait::async_trait]
impl Registry for OciRegistry {
    fn name(&self) -> &'static str {
        "oci"
    }

    fn is_host(&self, _host: &str) -> bool {
        true
    }

    async fn tags(
        &self,
        host: &str,
        repo: &str,
        image: &str,
    ) -> Result<Vec<ImageTag>, RegistryError> {
        let location = ImageLocation {
            host: host.to_string(),
            repo: repo.to_string(),
            image: image.to_string(),
        };
        self.image_tags(&location).await
    }

    async fn resolve_sha_to_tag(&self, image_url: &str, sha: &str) -> Result<String, RegistryError> {
        let location = split_image_url(image_url);
        let tags = self.image_tags(&location).await?;

        tags.into_iter()
            .find(|tag| tag.sha == sha)
            .map(|tag| tag.tag)
            .ok_or_else(|| RegistryError::NotFound(format!("{}@{}", image_url, sha)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn registry(server: &Server) -> OciRegistry {
        OciRegistry::new("version-checker", Duration::from_secs(5), vec![])
            .unwrap()
            .with_base_url(&server.url())
    }

    #[test]
    fn base_url_uses_https_docker_hub_and_insecure_hosts() {
        let registry = OciRegistry::new(
            "version-checker",
            Duration::from_secs(5),
            vec!["localhost:5000".to_string()],
        )
        .unwrap();

        assert_eq!(registry.base_url("quay.io"), "https://quay.io");
        assert_eq!(registry.base_url("docker.io"), "https://registry-1.docker.io");
        assert_eq!(registry.base_url("localhost:5000"), "http://localhost:5000");
    }

    #[tokio::test]
    async fn tags_lists_tags_and_resolves_digests() {
        let mut server = Server::new_async().await;

        let list = server
            .mock("GET", "/v2/jetstack/app/tags/list")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "jetstack/app", "tags": ["v1.0.0", "v1.1.0"]}"#)
            .create_async()
            .await;
        let v1 = server
            .mock("HEAD", "/v2/jetstack/app/manifests/v1.0.0")
            .match_header("accept", Matcher::Regex("manifest".to_string()))
            .with_status(200)
            .with_header("docker-content-digest", "sha256:aaa")
            .create_async()
            .await;
        let v11 = server
            .mock("HEAD", "/v2/jetstack/app/manifests/v1.1.0")
            .with_status(200)
            .with_header("docker-content-digest", "sha256:bbb")
            .create_async()
            .await;

        let tags = registry(&server)
            .tags("quay.io", "jetstack", "app")
            .await
            .unwrap();

        list.assert_async().await;
        v1.assert_async().await;
        v11.assert_async().await;
        assert_eq!(
            tags,
            vec![
                ImageTag::new("v1.0.0", "sha256:aaa"),
                ImageTag::new("v1.1.0", "sha256:bbb"),
            ]
        );
    }

    #[tokio::test]
    async fn tags_follows_link_pagination() {
        let mut server = Server::new_async().await;

        let first = server
            .mock("GET", "/v2/app/tags/list")
            .with_status(200)
            .with_header("link", r#"</v2/app/tags/list?last=a&n=1>; rel="next""#)
            .with_body(r#"{"tags": ["a"]}"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v2/app/tags/list?last=a&n=1")
            .with_status(200)
            .with_body(r#"{"tags": ["b"]}"#)
            .create_async()
            .await;
        server
            .mock("HEAD", Matcher::Regex(r"^/v2/app/manifests/.*$".to_string()))
            .with_status(200)
            .with_header("docker-content-digest", "sha256:ccc")
            .expect(2)
            .create_async()
            .await;

        let tags = registry(&server).tags("localhost:5000", "", "app").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let names: Vec<_> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn tags_stops_when_next_link_repeats_a_page() {
        let mut server = Server::new_async().await;

        let first = server
            .mock("GET", "/v2/app/tags/list")
            .with_status(200)
            .with_header("link", r#"</v2/app/tags/list?last=a>; rel="next""#)
            .with_body(r#"{"tags": ["a"]}"#)
            .expect(1)
            .create_async()
            .await;
        let looping = server
            .mock("GET", "/v2/app/tags/list?last=a")
            .with_status(200)
            .with_header("link", r#"</v2/app/tags/list?last=a>; rel="next""#)
            .with_body(r#"{"tags": ["b"]}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("HEAD", Matcher::Regex(r"^/v2/app/manifests/.*$".to_string()))
            .with_status(200)
            .with_header("docker-content-digest", "sha256:ccc")
            .create_async()
            .await;

        let tags = registry(&server).tags("localhost:5000", "", "app").await.unwrap();

        first.assert_async().await;
        looping.assert_async().await;
        let names: Vec<_> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn tags_returns_empty_when_registry_reports_null_tags() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/v2/app/tags/list")
            .with_status(200)
            .with_body(r#"{"name": "app", "tags": null}"#)
            .create_async()
            .await;

        let tags = registry(&server).tags("localhost:5000", "", "app").await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn tags_skips_tags_deleted_before_digest_lookup() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/v2/app/tags/list")
            .with_status(200)
            .with_body(r#"{"tags": ["gone", "kept"]}"#)
            .create_async()
            .await;
        server
            .mock("HEAD", "/v2/app/manifests/gone")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/v2/app/manifests/kept")
            .with_status(200)
            .with_header("docker-content-digest", "sha256:kept")
            .create_async()
            .await;

        let tags = registry(&server).tags("localhost:5000", "", "app").await.unwrap();
        assert_eq!(tags, vec![ImageTag::new("kept", "sha256:kept")]);
    }

    #[tokio::test]
    async fn tags_returns_not_found_for_unknown_image() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/v2/nobody/app/tags/list")
            .with_status(404)
            .with_body(r#"{"errors": [{"code": "NAME_UNKNOWN"}]}"#)
            .create_async()
            .await;

        let result = registry(&server).tags("quay.io", "nobody", "app").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn tags_returns_rate_limited_for_429() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/v2/app/tags/list")
            .with_status(429)
            .with_header("retry-after", "30")
            .create_async()
            .await;

        let result = registry(&server).tags("localhost:5000", "", "app").await;

        assert!(matches!(
            result,
            Err(RegistryError::RateLimited {
                retry_after_secs: Some(30)
            })
        ));
    }

    #[tokio::test]
    async fn tags_returns_invalid_response_for_missing_digest() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/v2/app/tags/list")
            .with_status(200)
            .with_body(r#"{"tags": ["v1"]}"#)
            .create_async()
            .await;
        server
            .mock("HEAD", "/v2/app/manifests/v1")
            .with_status(200)
            .create_async()
            .await;

        let result = registry(&server).tags("localhost:5000", "", "app").await;
        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn resolve_sha_to_tag_returns_matching_tag() {
        let mut server = Server::new_async().await;

        server
            .mock("GET", "/v2/org/app/tags/list")
            .with_status(200)
            .with_body(r#"{"tags": ["v1", "v2"]}"#)
            .create_async()
            .await;
        server
            .mock("HEAD", "/v2/org/app/manifests/v1")
            .with_status(200)
            .with_header("docker-content-digest", "sha256:one")
            .create_async()
            .await;
        server
            .mock("HEAD", "/v2/org/app/manifests/v2")
            .with_status(200)
            .with_header("docker-content-digest", "sha256:two")
            .create_async()
            .await;

        let registry = registry(&server);

        assert_eq!(
            registry
                .resolve_sha_to_tag("ghcr.io/org/app", "sha256:two")
                .await
                .unwrap(),
            "v2"
        );
        assert!(matches!(
            registry
                .resolve_sha_to_tag("ghcr.io/org/app", "sha256:none")
                .await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
