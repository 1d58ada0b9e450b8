//! Kubernetes side of the plugin: node capacity and pod cgroup discovery.

pub mod cluster;
pub mod kube_client;
pub mod node;
pub mod pod_watcher;
#[cfg(test)]
pub(crate) mod testing;

use core::error::Error;

pub use cluster::ClusterApi;
pub use cluster::KubeClusterApi;
pub use cluster::ResourceKind;
pub use node::NodeMessenger;
pub use pod_watcher::PodWatcher;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch pods: {message}")]
    WatchFailed { message: String },
    #[display("Kubernetes request failed: {message}")]
    RequestFailed { message: String },
    #[display("Failed to serialize or parse {kind}: {message}")]
    Serialization { kind: ResourceKind, message: String },
}

impl Error for KubernetesError {}
