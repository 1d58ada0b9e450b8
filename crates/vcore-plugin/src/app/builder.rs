use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::config::DiscoveryMode;
use crate::device::DeviceDiscovery;
use crate::device::DeviceInventory;
use crate::device::NvmlDiscovery;
use crate::device::StaticDiscovery;
use crate::k8s::kube_client;
use crate::k8s::KubeClusterApi;
use crate::k8s::NodeMessenger;
use crate::k8s::PodWatcher;
use crate::plugin::AllocationConfig;
use crate::plugin::PluginConfig;
use crate::plugin::RegistrationClient;
use crate::plugin::VcorePlugin;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    /// Create new application builder
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");
        let args = &self.daemon_args;

        let discovery = self.create_discovery()?;
        let devices = discovery
            .discover()
            .context("initial device discovery failed")?;
        tracing::info!(
            "Advertising {} device(s) as {}",
            devices.len(),
            args.resource_name
        );
        let inventory = Arc::new(DeviceInventory::new(args.resource_name.clone(), devices)?);

        let allocation = match &args.allocation_config {
            Some(path) => AllocationConfig::load(path).await?,
            None => AllocationConfig::default(),
        };

        let plugin_config = PluginConfig::from(args);
        let registration = RegistrationClient::new(
            plugin_config.kubelet_socket_path(),
            Duration::from_millis(args.registration_timeout_ms),
        );
        let plugin = VcorePlugin::new(plugin_config, inventory.clone(), allocation);

        let locator = Arc::new(args.cgroup.build_locator().await);
        tracing::info!(
            "cgroup hierarchy: {} at {}",
            locator.layout().topology,
            locator.layout().root.display()
        );

        let (node, pod_watcher) = if args.enable_k8s {
            let node_name = args
                .node_name
                .clone()
                .context("--node-name (or NODE_NAME) is required when Kubernetes is enabled")?;
            let client = kube_client::init_kube_client(args.kubeconfig.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!("{e:?}"))?;
            let node = NodeMessenger::new(
                Arc::new(KubeClusterApi::new(client.clone())),
                node_name.clone(),
            );
            let pod_watcher = Arc::new(PodWatcher::new(
                client,
                node_name,
                args.resource_name.clone(),
                locator.clone(),
            ));
            (Some(node), Some(pod_watcher))
        } else {
            (None, None)
        };

        let services = ApplicationServices {
            discovery,
            inventory,
            plugin,
            registration,
            locator,
            node,
            pod_watcher,
        };
        Ok(Application::new(services, self.daemon_args))
    }

    fn create_discovery(&self) -> Result<Arc<dyn DeviceDiscovery>> {
        let args = &self.daemon_args;
        let discovery: Arc<dyn DeviceDiscovery> = match args.discovery {
            DiscoveryMode::Nvml => Arc::new(
                NvmlDiscovery::init(args.vcores_per_gpu).context("failed to initialize NVML")?,
            ),
            DiscoveryMode::Static => Arc::new(StaticDiscovery::new(
                args.resource_name.clone(),
                args.static_device_count,
            )),
        };
        Ok(discovery)
    }
}
