use std::collections::BTreeMap;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use super::ClusterApi;
use super::KubernetesError;
use super::ResourceKind;

/// Pod phase of pods waiting for scheduling or startup.
const PENDING_PHASE: &str = "Pending";

#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Reads and updates this node and the pods bound to it.
#[derive(Clone)]
pub struct NodeMessenger {
    api: Arc<dyn ClusterApi>,
    node_name: String,
}

impl NodeMessenger {
    pub fn new(api: Arc<dyn ClusterApi>, node_name: impl Into<String>) -> Self {
        Self {
            api,
            node_name: node_name.into(),
        }
    }

    pub async fn get_node(&self) -> Result<Node, Report<KubernetesError>> {
        let bytes = self
            .api
            .get_resource(ResourceKind::Node, None, &self.node_name)
            .await?;
        decode(ResourceKind::Node, &bytes)
    }

    /// Sets `status.capacity[resource]` on the node.
    #[tracing::instrument(skip(self), fields(node = %self.node_name))]
    pub async fn set_capacity(
        &self,
        resource: &str,
        quantity: u64,
    ) -> Result<(), Report<KubernetesError>> {
        let mut node = self.get_node().await?;
        let capacity = node
            .status
            .get_or_insert_with(Default::default)
            .capacity
            .get_or_insert_with(BTreeMap::new);
        capacity.insert(resource.to_string(), Quantity(quantity.to_string()));

        self.update_node_status(&node).await?;
        info!("node capacity updated");
        Ok(())
    }

    /// Removes `resource` from the node capacity. Returns whether it was present.
    #[tracing::instrument(skip(self), fields(node = %self.node_name))]
    pub async fn remove_capacity(&self, resource: &str) -> Result<bool, Report<KubernetesError>> {
        let mut node = self.get_node().await?;
        let removed = node
            .status
            .as_mut()
            .and_then(|status| status.capacity.as_mut())
            .is_some_and(|capacity| capacity.remove(resource).is_some());
        if removed {
            self.update_node_status(&node).await?;
            info!("node capacity removed");
        }
        Ok(removed)
    }

    /// Pods bound to this node that are still `Pending`.
    pub async fn pending_pods(&self) -> Result<Vec<Pod>, Report<KubernetesError>> {
        let selector = format!("spec.nodeName={}", self.node_name);
        let bytes = self
            .api
            .list_resources(ResourceKind::Pod, None, Some(&selector))
            .await?;
        let pods: ItemList<Pod> = decode(ResourceKind::Pod, &bytes)?;
        Ok(pods
            .items
            .into_iter()
            .filter(|pod| {
                let on_node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
                    == Some(self.node_name.as_str());
                let pending = pod.status.as_ref().and_then(|s| s.phase.as_deref())
                    == Some(PENDING_PHASE);
                on_node && pending
            })
            .collect())
    }

    async fn update_node_status(&self, node: &Node) -> Result<(), Report<KubernetesError>> {
        let body = encode(ResourceKind::Node, node)?;
        self.api
            .update_resource_status(ResourceKind::Node, &body)
            .await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(
    kind: ResourceKind,
    bytes: &[u8],
) -> Result<T, Report<KubernetesError>> {
    serde_json::from_slice(bytes).change_context(KubernetesError::Serialization {
        kind,
        message: "malformed object JSON".to_string(),
    })
}

fn encode<T: serde::Serialize>(
    kind: ResourceKind,
    value: &T,
) -> Result<Vec<u8>, Report<KubernetesError>> {
    serde_json::to_vec(value).change_context(KubernetesError::Serialization {
        kind,
        message: "failed to encode object".to_string(),
    })
}
