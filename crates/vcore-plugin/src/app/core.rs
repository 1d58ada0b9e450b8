use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;
use crate::k8s::pod_watcher::pod_requests_resource;
use crate::k8s::NodeMessenger;
use crate::plugin::BackoffPolicy;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    daemon_args: DaemonArgs,
}

impl Application {
    /// Create new application with explicit service dependencies
    pub fn new(services: ApplicationServices, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    /// Get access to services
    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    /// Get daemon arguments
    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run until SIGTERM/SIGINT or a task failure.
    pub async fn run(&self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Serve and register the plugin, start all tasks and wait until
    /// `shutdown` is cancelled, a signal arrives or a task fails.
    ///
    /// Bind and registration failures are fatal; the plugin socket is removed
    /// before returning them.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("Starting all application tasks...");
        let mut tasks = Tasks::new(shutdown);
        let plugin = &self.services.plugin;

        plugin.start(tasks.cancellation_token()).await?;

        let backoff = BackoffPolicy::from(&self.daemon_args);
        if let Err(e) = self
            .services
            .registration
            .register_with_backoff(
                plugin.endpoint(),
                plugin.resource_name(),
                &backoff,
                tasks.cancellation_token(),
            )
            .await
        {
            tracing::error!("Failed to register device plugin with kubelet: {e}");
            plugin.stop().await;
            return Err(e.into());
        }

        self.publish_capacity().await;

        tasks.spawn_all_tasks(self);

        let result = tasks.wait_for_completion().await;
        if let Err(e) = &result {
            tracing::error!("Error during task execution: {e}");
        }
        result
    }

    /// Gracefully shutdown application
    ///
    /// Stops the plugin server and withdraws the published node capacity.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");
        self.services.plugin.stop().await;
        self.withdraw_capacity().await;
        tracing::info!("Application shutdown completed");
        Ok(())
    }

    fn capacity_node(&self) -> Option<&NodeMessenger> {
        if !self.daemon_args.patch_node_capacity {
            return None;
        }
        self.services.node.as_ref()
    }

    /// Writes the advertised device count into the node capacity and reports
    /// pods on this node that are still waiting for the resource. Failures
    /// are logged; the kubelet keeps publishing its own view.
    async fn publish_capacity(&self) {
        let Some(node) = self.capacity_node() else {
            return;
        };
        let resource = self.services.inventory.resource_name();
        let count = self.services.inventory.list().len() as u64;
        if let Err(e) = node.set_capacity(resource, count).await {
            tracing::error!("Failed to patch node capacity: {e:?}");
            return;
        }

        match node.pending_pods().await {
            Ok(pods) => {
                for pod in pods.iter().filter(|pod| pod_requests_resource(pod, resource)) {
                    tracing::info!(
                        namespace = pod.metadata.namespace.as_deref().unwrap_or_default(),
                        pod = pod.metadata.name.as_deref().unwrap_or_default(),
                        "pending pod is waiting for {resource}"
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to list pending pods: {e:?}"),
        }
    }

    async fn withdraw_capacity(&self) {
        let Some(node) = self.capacity_node() else {
            return;
        };
        if let Err(e) = node
            .remove_capacity(self.services.inventory.resource_name())
            .await
        {
            tracing::error!("Failed to remove node capacity: {e:?}");
        }
    }
}
