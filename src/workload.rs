//! Minimal Kubernetes Pod model
//!
//! Only the fields needed to check images are decoded: annotations, declared
//! container images and the digests recorded in the container statuses. Input
//! is the JSON printed by `kubectl get pod -o json`, either a single Pod or a
//! `List` of them.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerStatus {
    pub name: String,
    /// Running image as recorded by the kubelet, e.g.
    /// `docker-pullable://nginx@sha256:...`
    #[serde(rename = "imageID")]
    pub image_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodStatus {
    pub container_statuses: Vec<ContainerStatus>,
    pub init_container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

impl Pod {
    /// Digest of the image the named container is running.
    ///
    /// Returns the part after `@` of the recorded image ID, the whole ID when
    /// it carries no `@`, or an empty string when the container has not
    /// reported a status yet.
    pub fn status_sha(&self, container: &str) -> &str {
        let status = self
            .status
            .container_statuses
            .iter()
            .chain(&self.status.init_container_statuses)
            .find(|status| status.name == container);

        match status {
            Some(status) => match status.image_id.split_once('@') {
                Some((_, sha)) => sha,
                None => &status.image_id,
            },
            None => "",
        }
    }

    /// Declared containers, init containers first
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.spec.init_containers.iter().chain(&self.spec.containers)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PodDocument {
    List { items: Vec<Pod> },
    Single(Box<Pod>),
}

/// Decode a single Pod or a `List` of Pods
pub fn parse_pods(content: &str) -> Result<Vec<Pod>, serde_json::Error> {
    let document: PodDocument = serde_json::from_str(content)?;
    Ok(match document {
        PodDocument::List { items } => items,
        PodDocument::Single(pod) => vec![*pod],
    })
}
