use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use notify::Config;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BackoffPolicy;
use super::RegistrationClient;
use super::RegistrationError;
use super::VcorePlugin;
use super::KUBELET_SOCKET;

/// Brings the plugin back after a kubelet restart.
///
/// A restarting kubelet wipes the plugin directory and recreates
/// `kubelet.sock`; registrations made with the old kubelet are gone. The
/// watcher reacts to the socket creation and, as a fallback, polls for a
/// missing plugin socket.
pub struct KubeletRestartWatcher {
    plugin: Arc<VcorePlugin>,
    registration: RegistrationClient,
    backoff: BackoffPolicy,
    poll_interval: Duration,
}

impl KubeletRestartWatcher {
    pub fn new(
        plugin: Arc<VcorePlugin>,
        registration: RegistrationClient,
        backoff: BackoffPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            plugin,
            registration,
            backoff,
            poll_interval,
        }
    }

    /// Runs until cancelled. Fails only when re-registration is exhausted.
    #[tracing::instrument(skip_all)]
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), RegistrationError> {
        let plugin_dir = self.plugin.config().plugin_dir.clone();
        info!("watching kubelet restarts in {}", plugin_dir.display());

        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
        // dropping the watcher stops event delivery
        let _watcher = match Self::setup_filesystem_watcher(&plugin_dir, fs_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("failed to watch plugin directory, falling back to polling only: {e}");
                None
            }
        };

        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("kubelet restart watcher shutdown requested");
                    return Ok(());
                }
                Some(event) = fs_rx.recv() => {
                    if is_kubelet_socket_created(&event) {
                        info!("kubelet socket recreated, kubelet restarted");
                        self.reregister(&cancellation_token).await?;
                    }
                }
                _ = poll.tick() => {
                    if !self.plugin.is_serving().await {
                        warn!("device plugin socket is gone, restarting plugin");
                        self.reregister(&cancellation_token).await?;
                    }
                }
            }
        }
    }

    async fn reregister(&self, cancellation_token: &CancellationToken) -> Result<(), RegistrationError> {
        if let Err(e) = self.plugin.restart(cancellation_token).await {
            // the kubelet may still be cleaning the directory, the next tick retries
            error!("failed to restart device plugin server: {e}");
            return Ok(());
        }
        match self
            .registration
            .register_with_backoff(
                self.plugin.endpoint(),
                self.plugin.resource_name(),
                &self.backoff,
                cancellation_token,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(RegistrationError::Cancelled) => Ok(()),
            Err(e) => {
                error!("re-registration with kubelet failed: {e}");
                Err(e)
            }
        }
    }

    fn setup_filesystem_watcher(
        plugin_dir: &std::path::Path,
        fs_tx: mpsc::UnboundedSender<Event>,
    ) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    debug!("filesystem event: {:?}", event);
                    // receiver gone means the watcher is shutting down
                    let _ = fs_tx.send(event);
                }
                Err(e) => {
                    error!("filesystem watch error: {:?}", e);
                }
            },
            Config::default(),
        )?;
        watcher.watch(plugin_dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

fn is_kubelet_socket_created(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(OsStr::new(KUBELET_SOCKET)))
}
