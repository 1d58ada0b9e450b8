//! Kubelet device plugin for virtual GPU cores.
//!
//! The plugin serves the `v1beta1` device plugin API on a unix socket in the
//! kubelet's plugin directory and registers that socket with the kubelet.
//!
//! - [`VcorePlugin`]: socket lifecycle and the gRPC service
//! - [`RegistrationClient`]: registration call with bounded backoff
//! - [`KubeletRestartWatcher`]: re-registration after kubelet restarts

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod allocation;
pub mod kubelet_watch;
pub mod registration;
pub mod server;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;

pub use allocation::AllocationConfig;
pub use kubelet_watch::KubeletRestartWatcher;
pub use registration::BackoffPolicy;
pub use registration::RegistrationClient;
pub use registration::RegistrationError;
pub use server::VcorePlugin;
pub use state::PluginState;

/// Directory where the kubelet looks for device plugin sockets.
pub const DEFAULT_PLUGIN_DIR: &str = "/var/lib/kubelet/device-plugins";

/// Kubelet registration socket name inside the plugin directory.
pub const KUBELET_SOCKET: &str = "kubelet.sock";

/// Device plugin API version spoken by this plugin.
pub const API_VERSION: &str = "v1beta1";

/// Health strings understood by the kubelet.
pub const HEALTHY: &str = "Healthy";
pub const UNHEALTHY: &str = "Unhealthy";

/// Options announced at registration and returned by the plugin service.
pub fn plugin_options() -> api::DevicePluginOptions {
    api::DevicePluginOptions {
        pre_start_required: true,
        get_preferred_allocation_available: false,
    }
}

/// Configuration of one plugin endpoint.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Kubelet device plugin directory
    pub plugin_dir: PathBuf,
    /// Socket file name of this plugin, e.g. `vcore.sock`
    pub socket_name: String,
}

impl PluginConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.socket_name)
    }

    pub fn kubelet_socket_path(&self) -> PathBuf {
        self.plugin_dir.join(KUBELET_SOCKET)
    }
}

/// Opens a gRPC channel over a unix domain socket.
pub async fn connect_uds(
    socket_path: &Path,
    connect_timeout: Duration,
) -> Result<Channel, tonic::transport::Error> {
    let socket_path = socket_path.to_path_buf();

    // the URL is a placeholder, the connector always dials the socket
    Endpoint::from_static("http://tonic")
        .connect_timeout(connect_timeout)
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket_path = socket_path.clone();
            async move {
                match UnixStream::connect(socket_path).await {
                    Ok(stream) => Ok(TokioIo::new(stream)),
                    Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        }))
        .await
}
