//! Registry test utilities

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use version_checker::parser::split_image_url;
use version_checker::version::error::RegistryError;
use version_checker::version::registry::Registry;
use version_checker::version::types::ImageTag;

/// In-memory registry keyed by `host/repo/image`
#[derive(Default)]
pub struct FakeRegistry {
    images: HashMap<String, Vec<ImageTag>>,
    requests: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tags of an image URL such as `quay.io/jetstack/app`
    pub fn with_tags(mut self, image_url: &str, tags: Vec<(&str, &str)>) -> Self {
        let location = split_image_url(image_url);
        let key = format!("{}/{}", location.host, location.name());
        self.images.insert(
            key,
            tags.into_iter()
                .map(|(tag, sha)| ImageTag::new(tag, sha))
                .collect(),
        );
        self
    }

    /// Every `tags` lookup so far, as `host/repo/image`
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    fn name(&self) -> &'static str {
        "fake"
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
        let key = if repo.is_empty() {
            format!("{}/{}", host, image)
        } else {
            format!("{}/{}/{}", host, repo, image)
        };
        self.requests.lock().unwrap().push(key.clone());

        self.images
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotFound(key))
    }

    async fn resolve_sha_to_tag(&self, image_url: &str, sha: &str) -> Result<String, RegistryError> {
        let location = split_image_url(image_url);
        let tags = self
            .tags(&location.host, &location.repo, &location.image)
            .await?;

        tags.into_iter()
            .find(|tag| tag.sha == sha)
            .map(|tag| tag.tag)
            .ok_or_else(|| RegistryError::NotFound(sha.to_string()))
    }
}
