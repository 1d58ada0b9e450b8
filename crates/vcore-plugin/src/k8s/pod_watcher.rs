use std::sync::Arc;
use std::time::Duration;

use api_types::ContainerCgroup;
use api_types::PodCgroupIdentity;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::WatchStreamExt;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::KubernetesError;
use crate::cgroup::CgroupLocator;

/// Wait before re-opening a failed pod watch.
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// A running container of a pod that requests the plugin resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub container_name: String,
    pub identity: PodCgroupIdentity,
}

/// Watches pods scheduled on this node and publishes the cgroups of their
/// vcore containers.
///
/// Enforcement is done by whoever consumes the records.
pub struct PodWatcher {
    client: Client,
    node_name: String,
    resource_name: String,
    locator: Arc<CgroupLocator>,
}

impl PodWatcher {
    pub fn new(
        client: Client,
        node_name: String,
        resource_name: String,
        locator: Arc<CgroupLocator>,
    ) -> Self {
        Self {
            client,
            node_name,
            resource_name,
            locator,
        }
    }

    /// Start watching pods on this node.
    ///
    /// Runs until cancelled, reconnecting [`WATCH_RETRY_DELAY`] after watch
    /// failures.
    #[tracing::instrument(skip(self, update_sender, cancellation_token), fields(node_name = %self.node_name))]
    pub async fn run(
        &self,
        update_sender: mpsc::Sender<ContainerCgroup>,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting pod watcher");
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod watcher shutdown requested");
                    break;
                }
                result = self.watch_pods(&update_sender) => {
                    match result {
                        Ok(()) => {
                            warn!("Pod watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Pod watch failed: {e:?}");
                            select! {
                                _ = cancellation_token.cancelled() => {
                                    info!("Pod watcher shutdown requested");
                                    break;
                                }
                                _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch_pods(
        &self,
        update_sender: &mpsc::Sender<ContainerCgroup>,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let config = Config::default().fields(&format!("spec.nodeName={}", self.node_name));

        let mut stream = watcher(api, config).applied_objects().boxed();
        while let Some(event) = stream.next().await {
            match event {
                Ok(pod) => self.handle_pod_event(&pod, update_sender).await,
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Locates every vcore container of the pod and sends its cgroup.
    async fn handle_pod_event(&self, pod: &Pod, update_sender: &mpsc::Sender<ContainerCgroup>) {
        if pod.metadata.deletion_timestamp.is_some() {
            return;
        }
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        for container in container_identities(pod, &self.resource_name) {
            let located = match self.locator.locate(&container.identity).await {
                Ok(located) => located,
                Err(e) => {
                    warn!(
                        pod = %pod_name,
                        container = %container.container_name,
                        "failed to resolve container cgroup: {e}"
                    );
                    continue;
                }
            };
            debug!(
                pod = %pod_name,
                container = %container.container_name,
                pids = located.pids.len(),
                "located container cgroup: {}",
                located.dir.display()
            );

            let update = ContainerCgroup {
                namespace: namespace.clone(),
                pod_name: pod_name.clone(),
                container_name: container.container_name,
                cgroup_path: located.dir,
                pids: located.pids,
            };
            if let Err(e) = update_sender.send(update).await {
                warn!("Failed to send container cgroup: {e}");
                return;
            }
        }
    }
}

fn requests_resource(container: &Container, resource_name: &str) -> bool {
    container.resources.as_ref().is_some_and(|resources| {
        [&resources.limits, &resources.requests]
            .into_iter()
            .flatten()
            .any(|quantities| quantities.contains_key(resource_name))
    })
}

/// Whether any container of `pod` requests `resource_name`.
pub fn pod_requests_resource(pod: &Pod, resource_name: &str) -> bool {
    pod.spec.as_ref().is_some_and(|spec| {
        spec.containers
            .iter()
            .any(|container| requests_resource(container, resource_name))
    })
}

/// Running containers of `pod` that request `resource_name`.
///
/// Containers without a runtime ID yet are skipped; identity validation is
/// left to the cgroup resolver.
pub fn container_identities(pod: &Pod, resource_name: &str) -> Vec<ContainerIdentity> {
    let (Some(spec), Some(status)) = (pod.spec.as_ref(), pod.status.as_ref()) else {
        return Vec::new();
    };
    let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
    let qos_class = status.qos_class.clone().unwrap_or_default();
    let statuses = status.container_statuses.as_deref().unwrap_or_default();

    spec.containers
        .iter()
        .filter(|container| requests_resource(container, resource_name))
        .filter_map(|container| {
            let status = statuses.iter().find(|s| s.name == container.name)?;
            let running = status
                .state
                .as_ref()
                .is_some_and(|state| state.running.is_some());
            if !running {
                return None;
            }
            let container_runtime_id = status.container_id.clone()?;
            Some(ContainerIdentity {
                container_name: container.name.clone(),
                identity: PodCgroupIdentity {
                    pod_uid: pod_uid.clone(),
                    qos_class: qos_class.clone(),
                    container_runtime_id,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cgroup::CgroupLayout;
    use crate::cgroup::CgroupPathResolver;
    use crate::cgroup::CgroupTopology;
    use crate::cgroup::ProcessEnumerator;

    const RESOURCE: &str = "doslab.io/vcore";

    fn test_pod(qos: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "trainer",
                "namespace": "ml",
                "uid": "13bb153e-b6b5-4ff5-972d-2384da15832f"
            },
            "spec": {
                "nodeName": "node-a",
                "containers": [
                    { "name": "cuda", "resources": { "limits": { "doslab.io/vcore": "50" } } },
                    { "name": "sidecar", "resources": { "limits": { "cpu": "1" } } },
                    { "name": "starting", "resources": { "requests": { "doslab.io/vcore": "10" } } }
                ]
            },
            "status": {
                "phase": "Running",
                "qosClass": qos,
                "containerStatuses": [
                    {
                        "name": "cuda",
                        "containerID": "docker://2ca438972fbd",
                        "image": "cuda", "imageID": "", "ready": true, "restartCount": 0,
                        "state": { "running": { "startedAt": "2024-01-01T00:00:00Z" } }
                    },
                    {
                        "name": "sidecar",
                        "containerID": "docker://ffff",
                        "image": "envoy", "imageID": "", "ready": true, "restartCount": 0,
                        "state": { "running": {} }
                    },
                    {
                        "name": "starting",
                        "image": "cuda", "imageID": "", "ready": false, "restartCount": 0,
                        "state": { "waiting": { "reason": "ContainerCreating" } }
                    }
                ]
            }
        }))
        .unwrap()
    }

    /// A client whose API server refuses every connection.
    fn unreachable_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    fn watcher(cgroup_root: &Path) -> PodWatcher {
        let layout = CgroupLayout {
            root: cgroup_root.to_path_buf(),
            topology: CgroupTopology::Unified,
            legacy_controller: "memory".to_string(),
        };
        let locator = CgroupLocator::new(
            layout,
            CgroupPathResolver::default(),
            ProcessEnumerator::new(Duration::from_secs(2)),
        );
        PodWatcher::new(
            unreachable_client(),
            "node-a".to_string(),
            RESOURCE.to_string(),
            Arc::new(locator),
        )
    }

    #[test]
    fn only_running_resource_containers_are_selected() {
        let identities = container_identities(&test_pod("BestEffort"), RESOURCE);
        assert_eq!(
            identities,
            vec![ContainerIdentity {
                container_name: "cuda".to_string(),
                identity: PodCgroupIdentity {
                    pod_uid: "13bb153e-b6b5-4ff5-972d-2384da15832f".to_string(),
                    qos_class: "BestEffort".to_string(),
                    container_runtime_id: "docker://2ca438972fbd".to_string(),
                },
            }]
        );
    }

    #[test]
    fn pod_requests_resource_checks_limits_and_requests() {
        let pod = test_pod("Burstable");
        assert!(pod_requests_resource(&pod, RESOURCE));
        assert!(pod_requests_resource(&pod, "cpu"));
        assert!(!pod_requests_resource(&pod, "nvidia.com/gpu"));
    }

    #[test]
    fn pod_without_status_has_no_identities() {
        let mut pod = test_pod("Guaranteed");
        pod.status = None;
        assert!(container_identities(&pod, RESOURCE).is_empty());
    }

    #[test(tokio::test)]
    async fn handle_pod_event_sends_located_cgroup() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(
            "kubepods.slice/kubepods-besteffort.slice/\
             kubepods-besteffort-pod13bb153e_b6b5_4ff5_972d_2384da15832f.slice/\
             docker-2ca438972fbd.scope",
        );
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cgroup.procs"), "101\n102\n").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        watcher(root.path())
            .handle_pod_event(&test_pod("BestEffort"), &tx)
            .await;

        let update = rx.try_recv().unwrap();
        assert_eq!(
            update,
            ContainerCgroup {
                namespace: "ml".to_string(),
                pod_name: "trainer".to_string(),
                container_name: "cuda".to_string(),
                cgroup_path: dir,
                pids: vec![101, 102],
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test(tokio::test)]
    async fn unresolvable_containers_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        watcher(root.path())
            .handle_pod_event(&test_pod("Platinum"), &tx)
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[test(tokio::test)]
    async fn run_stops_promptly_while_waiting_to_retry() {
        let root = tempfile::tempdir().unwrap();
        let watcher = Arc::new(watcher(root.path()));
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(4);

        let task = tokio::spawn({
            let watcher = watcher.clone();
            let token = token.clone();
            async move { watcher.run(tx, token).await }
        });
        // long enough for the first watch to fail against the closed port
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();

        let result = tokio::time::timeout(WATCH_RETRY_DELAY / 2, task)
            .await
            .expect("watcher should stop before the retry delay elapses")
            .unwrap();
        assert!(result.is_ok());
    }
}
