//! Checks every enabled container of a set of pods

use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FETCH_STAGGER_DELAY_MS;
use crate::policy::Policy;
use crate::version::checker::Checker;
use crate::version::types::CheckResult;
use crate::workload::{Container, Pod};

/// Check result tagged with the container it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerReport {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub reports: Vec<ContainerReport>,
    /// Containers whose policy matched no tag
    pub not_found: usize,
    /// Containers with an invalid policy or a failed fetch
    pub failures: usize,
    /// Checks interrupted by the cancellation token
    pub cancelled: usize,
}

enum Outcome {
    Report(ContainerReport),
    Skipped,
    NotFound,
    Failed,
    Cancelled,
}

async fn check_container(
    checker: &Checker,
    token: &CancellationToken,
    pod: &Pod,
    container: &Container,
    test_all: bool,
) -> Outcome {
    let policy =
        match Policy::from_annotations(&pod.metadata.annotations, &container.name, test_all) {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                debug!(
                    "Skipping {}/{}: not enabled",
                    pod.metadata.name, container.name
                );
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(
                    "Invalid policy for {}/{}: {}",
                    pod.metadata.name, container.name, e
                );
                return Outcome::Failed;
            }
        };

    match checker.container(token, pod, container, &policy).await {
        Ok(Some(result)) => Outcome::Report(ContainerReport {
            namespace: pod.metadata.namespace.clone(),
            pod: pod.metadata.name.clone(),
            container: container.name.clone(),
            result,
        }),
        Ok(None) => Outcome::Skipped,
        Err(e) if e.is_not_found() => {
            warn!("{}/{}: {}", pod.metadata.name, container.name, e);
            Outcome::NotFound
        }
        Err(e) if e.is_cancelled() => {
            debug!("Check of {}/{} cancelled", pod.metadata.name, container.name);
            Outcome::Cancelled
        }
        Err(e) => {
            error!(
                "Failed to check {}/{}: {}",
                pod.metadata.name, container.name, e
            );
            Outcome::Failed
        }
    }
}

/// Check all containers of `pods` concurrently, staggering their start
/// times to avoid rate limiting.
///
/// Errors are logged and counted; they do not stop other checks.
pub async fn scan_pods(
    checker: &Checker,
    token: &CancellationToken,
    pods: &[Pod],
    test_all: bool,
) -> ScanSummary {
    let checks = pods
        .iter()
        .flat_map(|pod| pod.all_containers().map(move |container| (pod, container)))
        .enumerate()
        .map(|(i, (pod, container))| {
            let delay = Duration::from_millis(FETCH_STAGGER_DELAY_MS * i as u64);
            async move {
                sleep(delay).await;
                check_container(checker, token, pod, container, test_all).await
            }
        });

    let mut summary = ScanSummary::default();
    for outcome in join_all(checks).await {
        match outcome {
            Outcome::Report(report) => summary.reports.push(report),
            Outcome::Skipped => {}
            Outcome::NotFound => summary.not_found += 1,
            Outcome::Failed => summary.failures += 1,
            Outcome::Cancelled => summary.cancelled += 1,
        }
    }

    if summary.cancelled > 0 {
        info!("{} container checks cancelled", summary.cancelled);
    }

    info!(
        "Checked {} containers: {} reported, {} without candidates, {} failed",
        summary.reports.len() + summary.not_found + summary.failures,
        summary.reports.len(),
        summary.not_found,
        summary.failures
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::policy::annotation_key;
    use crate::version::error::RegistryError;
    use crate::version::registry::MockRegistry;
    use crate::version::types::ImageTag;
    use crate::workload::{ContainerStatus, ObjectMeta, PodSpec, PodStatus};

    fn pod(containers: &[(&str, &str)], annotations: &[(String, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: "web".to_string(),
                namespace: "prod".to_string(),
                annotations: annotations
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect::<HashMap<_, _>>(),
            },
            spec: PodSpec {
                containers: containers
                    .iter()
                    .map(|(name, image)| Container {
                        name: name.to_string(),
                        image: image.to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
            status: PodStatus {
                container_statuses: containers
                    .iter()
                    .map(|(name, _)| ContainerStatus {
                        name: name.to_string(),
                        image_id: "sha:running".to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    fn checker(registry: MockRegistry) -> Checker {
        Checker::new(Arc::new(registry), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn scan_pods_reports_enabled_containers_only() {
        let mut registry = MockRegistry::new();
        registry
            .expect_tags()
            .times(1)
            .returning(|_, _, _| Ok(vec![ImageTag::new("1.1.0", "sha:new")]));

        let pods = vec![pod(
            &[("app", "app:1.0.0"), ("sidecar", "envoy:1.0.0")],
            &[(annotation_key("enable", "app"), "true")],
        )];

        let summary = scan_pods(&checker(registry), &CancellationToken::new(), &pods, false).await;

        assert_eq!(summary.reports.len(), 1);
        let report = &summary.reports[0];
        assert_eq!(report.namespace, "prod");
        assert_eq!(report.pod, "web");
        assert_eq!(report.container, "app");
        assert_eq!(report.result.latest_version, "1.1.0");
        assert!(!report.result.is_latest);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_pods_counts_not_found_and_failures() {
        let mut registry = MockRegistry::new();
        registry.expect_tags().returning(|_, _, image| {
            if image == "broken" {
                Err(RegistryError::InvalidResponse("boom".to_string()))
            } else {
                Ok(vec![])
            }
        });

        let pods = vec![pod(
            &[
                ("empty", "empty:1.0.0"),
                ("broken", "broken:1.0.0"),
                ("invalid", "invalid:1.0.0"),
            ],
            &[(annotation_key("pin-major", "invalid"), "x")],
        )];

        let summary = scan_pods(&checker(registry), &CancellationToken::new(), &pods, true).await;

        assert!(summary.reports.is_empty());
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_pods_does_not_count_cancelled_checks_as_failures() {
        let mut registry = MockRegistry::new();
        registry.expect_tags().never();

        let pods = vec![pod(&[("app", "app:1.0.0"), ("db", "db:2.0.0")], &[])];
        let token = CancellationToken::new();
        token.cancel();

        let summary = scan_pods(&checker(registry), &token, &pods, true).await;

        assert!(summary.reports.is_empty());
        assert_eq!(summary.not_found, 0);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.cancelled, 2);
    }

    #[test]
    fn container_report_serializes_flat() {
        let report = ContainerReport {
            namespace: "prod".to_string(),
            pod: "web".to_string(),
            container: "app".to_string(),
            result: CheckResult {
                current_version: "1.0.0".to_string(),
                latest_version: "1.1.0".to_string(),
                is_latest: false,
                image_url: "app".to_string(),
            },
        };

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({
                "namespace": "prod",
                "pod": "web",
                "container": "app",
                "currentVersion": "1.0.0",
                "latestVersion": "1.1.0",
                "isLatest": false,
                "imageUrl": "app"
            })
        );
    }
}
