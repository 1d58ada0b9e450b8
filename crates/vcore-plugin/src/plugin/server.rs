use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use api_types::Device;
use futures::Stream;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::api;
use super::api::device_plugin_server::DevicePlugin;
use super::api::device_plugin_server::DevicePluginServer;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::DevicePluginOptions;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use super::state::StateTracker;
use super::AllocationConfig;
use super::PluginConfig;
use super::PluginState;
use super::HEALTHY;
use super::UNHEALTHY;
use crate::device::DeviceInventory;

/// Upper bound on waiting for the gRPC server to drain in [`VcorePlugin::stop`].
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to bind device plugin socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct RunningServer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Virtual GPU core device plugin for Kubernetes
pub struct VcorePlugin {
    config: PluginConfig,
    inventory: Arc<DeviceInventory>,
    allocation: AllocationConfig,
    options: DevicePluginOptions,
    state: Arc<StateTracker>,
    running: Mutex<Option<RunningServer>>,
}

impl std::fmt::Debug for VcorePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcorePlugin")
            .field("config", &self.config)
            .field("resource_name", &self.inventory.resource_name())
            .field("state", &self.state.current())
            .finish()
    }
}

impl VcorePlugin {
    /// create a new plugin instance; nothing is bound until [`Self::start`]
    pub fn new(
        config: PluginConfig,
        inventory: Arc<DeviceInventory>,
        allocation: AllocationConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            inventory,
            allocation,
            options: super::plugin_options(),
            state: Arc::new(StateTracker::new()),
            running: Mutex::new(None),
        })
    }

    /// Socket file name announced to the kubelet.
    pub fn endpoint(&self) -> &str {
        &self.config.socket_name
    }

    pub fn resource_name(&self) -> &str {
        self.inventory.resource_name()
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn state(&self) -> PluginState {
        self.state.current()
    }

    /// Binds the plugin socket and serves the device plugin API until `stop`
    /// is called or `parent` is cancelled.
    ///
    /// A stale socket from a previous run is removed first. Bind failures are
    /// returned; they are fatal for startup.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), PluginError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("device plugin server already running");
            return Ok(());
        }

        let socket_path = self.config.socket_path();
        info!("start device plugin server: {}", socket_path.display());

        remove_socket(&socket_path).map_err(|source| PluginError::Bind {
            path: socket_path.clone(),
            source,
        })?;
        let listener = UnixListener::bind(&socket_path).map_err(|source| PluginError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        let token = parent.child_token();
        let device_plugin_server =
            DevicePluginServer::new(DevicePluginService::new(self.clone(), token.clone()));
        self.state.listening();
        info!("gRPC server is bound to: {}", socket_path.display());

        let state = self.state.clone();
        let shutdown = token.clone();
        let handle = tokio::spawn(async move {
            let result = tonic::transport::Server::builder()
                .add_service(device_plugin_server)
                .serve_with_incoming_shutdown(
                    tokio_stream::wrappers::UnixListenerStream::new(listener),
                    async move {
                        shutdown.cancelled().await;
                        info!("shutting down gRPC server");
                    },
                )
                .await;
            if let Err(e) = result {
                error!("device plugin gRPC server failed: {e}");
            }
            state.stopped();
        });

        *running = Some(RunningServer { token, handle });
        Ok(())
    }

    /// Stops serving and removes the socket file.
    ///
    /// Waits at most [`STOP_TIMEOUT`] for the server task, then aborts it.
    pub async fn stop(&self) {
        let running = self.running.lock().await.take();
        if let Some(mut running) = running {
            running.token.cancel();
            match time::timeout(STOP_TIMEOUT, &mut running.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("device plugin server task failed: {e}"),
                Err(_) => {
                    warn!("device plugin server did not stop within {STOP_TIMEOUT:?}, aborting");
                    running.handle.abort();
                }
            }
        }
        if let Err(e) = remove_socket(&self.config.socket_path()) {
            warn!("failed to remove device plugin socket: {e}");
        }
        self.state.stopped();
    }

    /// Stops and starts again on a fresh socket.
    pub async fn restart(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), PluginError> {
        self.stop().await;
        self.start(parent).await
    }

    /// Whether the server task is running and its socket file exists.
    pub async fn is_serving(&self) -> bool {
        let running = self.running.lock().await;
        matches!(&*running, Some(r) if !r.handle.is_finished()) && self.config.socket_path().exists()
    }
}

fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sends `response` unless the server stops first. A kubelet that keeps the
/// stream open without reading must not hold up shutdown.
///
/// Returns `false` when the stream should end.
async fn send_or_cancel(
    tx: &mpsc::Sender<TonicResult<ListAndWatchResponse>>,
    response: ListAndWatchResponse,
    cancellation_token: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => false,
        sent = tx.send(Ok(response)) => sent.is_ok(),
    }
}

fn advertisement(devices: &[Device]) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: devices
            .iter()
            .map(|d| api::Device {
                id: d.id.clone(),
                health: if d.healthy { HEALTHY } else { UNHEALTHY }.to_string(),
                topology: None,
            })
            .collect(),
    }
}

/// DevicePlugin service implementation
#[derive(Debug)]
pub struct DevicePluginService {
    plugin: Arc<VcorePlugin>,
    /// cancelled when the server stops; ends all open streams
    cancellation_token: CancellationToken,
}

impl DevicePluginService {
    pub fn new(plugin: Arc<VcorePlugin>, cancellation_token: CancellationToken) -> Self {
        Self {
            plugin,
            cancellation_token,
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    /// get device plugin options
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(self.plugin.options.clone()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// Sends the current devices, then a new list on every inventory change.
    ///
    /// The stream ends when the kubelet goes away or the server stops.
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!(resource = %self.plugin.resource_name(), "starting to watch device list");

        let (tx, rx) = mpsc::channel(4);
        let mut updates = self.plugin.inventory.subscribe();
        debug!(
            watchers = self.plugin.inventory.subscriber_count(),
            "device watch subscribed"
        );
        let cancellation_token = self.cancellation_token.clone();
        self.plugin.state.advertising();

        tokio::spawn(async move {
            let initial = advertisement(&updates.borrow_and_update());
            if !send_or_cancel(&tx, initial, &cancellation_token).await {
                info!("device watch ended before the initial device list was sent");
                return;
            }

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("device watch task stopped");
                        break;
                    }
                    _ = tx.closed() => {
                        info!("kubelet closed the device watch stream");
                        break;
                    }
                    changed = updates.changed() => {
                        if changed.is_err() {
                            warn!("device inventory dropped, ending device watch");
                            break;
                        }
                        let response = advertisement(&updates.borrow_and_update());
                        debug!(devices = response.devices.len(), "sending updated device list");
                        if !send_or_cancel(&tx, response, &cancellation_token).await {
                            info!("device watch task stopped");
                            break;
                        }
                    }
                }
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    /// no preference, the kubelet picks devices itself
    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);
        let response = PreferredAllocationResponse {
            container_responses: vec![],
        };
        Ok(Response::new(response))
    }

    /// allocate devices to containers, one response per container request
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let _in_flight = self.plugin.state.begin_allocation();
        let req = request.into_inner();
        info!("{:?} allocation request for vcore", req);

        let devices = self.plugin.inventory.list();
        match self.plugin.allocation.allocate(&req, &devices) {
            Ok(response) => {
                info!(
                    "device allocation completed for {} container(s)",
                    response.container_responses.len()
                );
                Ok(Response::new(response))
            }
            Err(e) => {
                warn!("rejecting allocation request: {e}");
                Err(Status::invalid_argument(e.to_string()))
            }
        }
    }

    /// nothing to prepare; required because the options ask for the call
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container processing: {:?}", req);
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
