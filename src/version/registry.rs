//! Registry trait for fetching image tags from various sources

#[cfg(test)]
use mockall::automock;

use crate::version::error::RegistryError;
use crate::version::types::ImageTag;

/// Trait for listing the tags of an image in a container registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Short name of this implementation, used in logs
    fn name(&self) -> &'static str;

    /// Returns true if this client serves images hosted on `host`
    fn is_host(&self, host: &str) -> bool;

    /// Fetches every tag of an image
    ///
    /// # Arguments
    /// * `host` - Registry host, e.g. "quay.io" or "localhost:5000"
    /// * `repo` - Repository path inside the registry, e.g. "jetstack"
    /// * `image` - Image name, e.g. "cert-manager"
    async fn tags(&self, host: &str, repo: &str, image: &str)
    -> Result<Vec<ImageTag>, RegistryError>;

    /// Finds a tag pointing at `sha`, best effort
    async fn resolve_sha_to_tag(&self, image_url: &str, sha: &str)
    -> Result<String, RegistryError>;
}
