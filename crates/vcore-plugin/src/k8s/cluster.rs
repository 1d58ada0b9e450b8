use async_trait::async_trait;
use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use tracing::debug;

use super::KubernetesError;

/// Objects the plugin reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResourceKind {
    Node,
    Pod,
}

impl ResourceKind {
    fn api_resource(self) -> ApiResource {
        match self {
            ResourceKind::Node => ApiResource::erase::<Node>(&()),
            ResourceKind::Pod => ApiResource::erase::<Pod>(&()),
        }
    }
}

/// Raw access to the cluster. Objects cross this boundary as JSON bytes;
/// callers own the typed view.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Vec<u8>, Report<KubernetesError>>;

    /// Returns a JSON list object with an `items` array.
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<u8>, Report<KubernetesError>>;

    /// Replaces the object (spec and metadata), returns the stored object.
    async fn update_resource(
        &self,
        kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>>;

    /// Replaces the status subresource, returns the stored object.
    async fn update_resource_status(
        &self,
        kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>>;
}

/// [`ClusterApi`] backed by the API server through dynamic objects.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match (kind, namespace) {
            (ResourceKind::Pod, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    /// Name and namespace of a serialized object, rejecting anything unparsable.
    fn parse_target(
        kind: ResourceKind,
        object: &[u8],
    ) -> Result<(DynamicObject, String), Report<KubernetesError>> {
        let parsed: DynamicObject =
            serde_json::from_slice(object).change_context(KubernetesError::Serialization {
                kind,
                message: "invalid object JSON".to_string(),
            })?;
        let name = parsed.metadata.name.clone().ok_or_else(|| {
            Report::new(KubernetesError::Serialization {
                kind,
                message: "object has no metadata.name".to_string(),
            })
        })?;
        Ok((parsed, name))
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
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        let object = self
            .api(kind, namespace)
            .get(name)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("get {kind} {name}"),
            })?;
        Self::encode(kind, &object)
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        let mut params = ListParams::default();
        if let Some(selector) = field_selector {
            params = params.fields(selector);
        }
        let list = self
            .api(kind, namespace)
            .list(&params)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("list {kind}"),
            })?;
        debug!(%kind, items = list.items.len(), "listed resources");
        Self::encode(kind, &list)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        let (parsed, name) = Self::parse_target(kind, object)?;
        let stored = self
            .api(kind, parsed.metadata.namespace.as_deref())
            .replace(&name, &PostParams::default(), &parsed)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("update {kind} {name}"),
            })?;
        Self::encode(kind, &stored)
    }

    async fn update_resource_status(
        &self,
        kind: ResourceKind,
        object: &[u8],
    ) -> Result<Vec<u8>, Report<KubernetesError>> {
        let (parsed, name) = Self::parse_target(kind, object)?;
        let stored = self
            .api(kind, parsed.metadata.namespace.as_deref())
            .replace_status(&name, &PostParams::default(), object.to_vec())
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("update {kind} {name} status"),
            })?;
        Self::encode(kind, &stored)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn api_resources_match_core_v1() {
        let node = ResourceKind::Node.api_resource();
        assert_eq!(node.api_version, "v1");
        assert_eq!(node.kind, "Node");
        assert_eq!(node.plural, "nodes");

        let pod = ResourceKind::Pod.api_resource();
        assert_eq!(pod.kind, "Pod");
        assert_eq!(pod.plural, "pods");
    }

    #[test]
    fn update_target_requires_name() {
        let err = KubeClusterApi::parse_target(
            ResourceKind::Node,
            br#"{"apiVersion":"v1","kind":"Node","metadata":{}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.current_context(),
            KubernetesError::Serialization { .. }
        ));

        let err = KubeClusterApi::parse_target(ResourceKind::Node, b"not json").unwrap_err();
        assert!(matches!(
            err.current_context(),
            KubernetesError::Serialization { .. }
        ));
    }
}
