use std::sync::Arc;

use crate::cgroup::CgroupLocator;
use crate::device::DeviceDiscovery;
use crate::device::DeviceInventory;
use crate::k8s::NodeMessenger;
use crate::k8s::PodWatcher;
use crate::plugin::RegistrationClient;
use crate::plugin::VcorePlugin;

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub inventory: Arc<DeviceInventory>,
    pub plugin: Arc<VcorePlugin>,
    pub registration: RegistrationClient,
    pub locator: Arc<CgroupLocator>,
    /// Present when Kubernetes integration is enabled
    pub node: Option<NodeMessenger>,
    pub pod_watcher: Option<Arc<PodWatcher>>,
}
