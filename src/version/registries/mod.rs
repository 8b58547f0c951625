//! Registry implementations and host-based dispatch

pub mod oci;

pub use oci::OciRegistry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::parser::image_ref::split_image_url;
use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::ImageTag;

/// Routes each request to the first client claiming the image host
///
/// Clients are asked in registration order; hosts nobody claims go to the
/// fallback. The choice is remembered per host.
pub struct Registries {
    clients: Vec<Arc<dyn Registry>>,
    fallback: Arc<dyn Registry>,
    resolved: Mutex<HashMap<String, Arc<dyn Registry>>>,
}

impl Registries {
    pub fn new(clients: Vec<Arc<dyn Registry>>, fallback: Arc<dyn Registry>) -> Self {
        Self {
            clients,
            fallback,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Client responsible for `host`
    pub fn for_host(&self, host: &str) -> Arc<dyn Registry> {
        if let Ok(resolved) = self.resolved.lock()
            && let Some(client) = resolved.get(host)
        {
            return client.clone();
        }

        let client = self
            .clients
            .iter()
            .find(|client| client.is_host(host))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        debug!("Using {} registry client for host {}", client.name(), host);

        // A poisoned memo only costs another lookup next time
        if let Ok(mut resolved) = self.resolved.lock() {
            resolved.insert(host.to_string(), client.clone());
        }
        client
    }
}

#[async_trait::async_trait]
impl Registry for Registries {
    fn name(&self) -> &'static str {
        "registries"
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
        self.for_host(host).tags(host, repo, image).await
    }

    async fn resolve_sha_to_tag(&self, image_url: &str, sha: &str) -> Result<String, RegistryError> {
        let location = split_image_url(image_url);
        self.for_host(&location.host)
            .resolve_sha_to_tag(image_url, sha)
            .await
    }
}
