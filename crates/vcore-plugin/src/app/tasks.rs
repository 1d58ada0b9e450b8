use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use api_types::ContainerCgroup;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::device::HealthProbe;
use crate::device::HealthProbeConfig;
use crate::plugin::BackoffPolicy;
use crate::plugin::KubeletRestartWatcher;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    /// All tasks stop when `cancellation_token` is cancelled.
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Spawns a named task. Its error ends the daemon.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(async move {
            tracing::info!("Starting {name} task");
            let result = task.await;
            match &result {
                Ok(()) => tracing::info!("{name} task completed"),
                Err(e) => tracing::error!("{name} task failed: {e}"),
            }
            result
        }));
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let cli = app.daemon_args();
        let services = app.services();

        let probe = HealthProbe::new(
            services.discovery.clone(),
            services.inventory.clone(),
            HealthProbeConfig::from(cli),
        );
        let token = self.cancellation_token.clone();
        self.spawn("device health probe", async move {
            probe.run(token).await;
            Ok(())
        });

        let watcher = KubeletRestartWatcher::new(
            services.plugin.clone(),
            services.registration.clone(),
            BackoffPolicy::from(cli),
            Duration::from_secs(cli.socket_check_interval_secs.max(1)),
        );
        let token = self.cancellation_token.clone();
        self.spawn("kubelet restart watcher", async move {
            watcher.run(token).await?;
            Ok(())
        });

        if let Some(pod_watcher) = services.pod_watcher.clone() {
            let (sender, receiver) = mpsc::channel::<ContainerCgroup>(32);

            let token = self.cancellation_token.clone();
            self.spawn("Kubernetes pod watcher", async move {
                pod_watcher
                    .run(sender, token)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e:?}"))
            });

            let token = self.cancellation_token.clone();
            self.spawn(
                "container cgroup publisher",
                publish_container_cgroups(receiver, token),
            );
        }
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        let token = self.cancellation_token.clone();
        let outcome = tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
                Ok(())
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
                Ok(())
            }
            _ = token.cancelled() => {
                tracing::info!("Shutdown requested");
                Ok(())
            }
            finished = async {
                let (result, index, _) = futures::future::select_all(&mut self.tasks).await;
                (result, index)
            }, if !self.tasks.is_empty() => {
                let (result, index) = finished;
                // a finished handle must not be awaited again
                drop(self.tasks.swap_remove(index));
                match result {
                    Ok(Ok(())) => {
                        tracing::warn!("Task completed unexpectedly");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(e) => {
                        tracing::error!("Task completed with error: {e}");
                        Err(e.into())
                    }
                }
            }
        };

        tracing::info!("Cancelling all tasks");
        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
        outcome
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                match task.await {
                    Ok(_) => {}
                    Err(e) => tracing::error!("Task failed during shutdown: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}

/// Hands located container cgroups to the log; limits are enforced by the
/// node agent consuming these records.
async fn publish_container_cgroups(
    mut receiver: mpsc::Receiver<ContainerCgroup>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            update = receiver.recv() => {
                let Some(update) = update else {
                    tracing::info!("Container cgroup receiver closed");
                    return Ok(());
                };
                tracing::info!(
                    namespace = %update.namespace,
                    pod = %update.pod_name,
                    container = %update.container_name,
                    pids = ?update.pids,
                    "container cgroup: {}",
                    update.cgroup_path.display()
                );
            }
            _ = token.cancelled() => return Ok(()),
        }
    }
}
