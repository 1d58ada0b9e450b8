use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;
use serde_json::json;
use serde_json::Value;

use super::ClusterApi;
use super::KubernetesError;
use super::ResourceKind;

/// In-memory cluster holding one node and a pod list.
#[derive(Default)]
pub(crate) struct FakeCluster {
    pub node: Vec<u8>,
    pub pods: Vec<u8>,
    pub status_updates: Mutex<Vec<Value>>,
    pub selectors: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_resource(
        &self,
        kind: ResourceKind,
        _namespace: Option<&str>,
        _name: &str,
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        assert_eq!(kind, ResourceKind::Node);
        Ok(self.node.clone())
    }

    async fn list_resources(
        &self,
        _kind: ResourceKind,
        _namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        self.selectors
            .lock()
            .unwrap()
            .push(field_selector.map(str::to_string));
        Ok(self.pods.clone())
    }

    async fn update_resource(
        &self,
        _kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        Ok(object.to_vec())
    }

    async fn update_resource_status(
        &self,
        _kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        self.status_updates
            .lock()
            .unwrap()
            .push(serde_json::from_slice(object).unwrap());
        Ok(object.to_vec())
    }
}

pub(crate) fn node(capacity: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": "node-a" },
        "status": { "capacity": capacity }
    }))
    .unwrap()
}

pub(crate) fn pod(name: &str, phase: &str, node_name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "nodeName": node_name, "containers": [] },
        "status": { "phase": phase }
    })
}
