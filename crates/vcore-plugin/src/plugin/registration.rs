use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Status;
use tracing::info;
use tracing::warn;

use super::api::registration_client;
use super::api::RegisterRequest;
use super::connect_uds;
use super::plugin_options;
use super::API_VERSION;

/// Upper bound for one registration attempt, connect included.
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("failed to connect to kubelet at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("registration with kubelet timed out after {0:?}")]
    Timeout(Duration),

    #[error("kubelet rejected registration: {0}")]
    Rejected(Status),

    #[error("registration cancelled")]
    Cancelled,
}

/// Retry schedule for [`RegistrationClient::register_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Client side of the kubelet `Registration` service.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    kubelet_socket: PathBuf,
    timeout: Duration,
}

impl RegistrationClient {
    pub fn new(kubelet_socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            kubelet_socket: kubelet_socket.into(),
            timeout,
        }
    }

    /// Registers `endpoint` (the plugin socket file name) for `resource_name`.
    ///
    /// The connection is dropped once the kubelet answered.
    pub async fn register(
        &self,
        endpoint: &str,
        resource_name: &str,
    ) -> Result<(), RegistrationError> {
        info!(
            endpoint,
            resource_name,
            "registering device plugin with kubelet: {}",
            self.kubelet_socket.display()
        );

        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint: endpoint.to_string(),
            resource_name: resource_name.to_string(),
            options: Some(plugin_options()),
        };

        let attempt = async {
            let channel = connect_uds(&self.kubelet_socket, self.timeout)
                .await
                .map_err(|source| RegistrationError::Connect {
                    path: self.kubelet_socket.clone(),
                    source,
                })?;
            let mut client = registration_client::RegistrationClient::new(channel);
            client
                .register(Request::new(request))
                .await
                .map_err(RegistrationError::Rejected)?;
            Ok(())
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(())) => {
                info!("successfully registered device plugin with kubelet");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RegistrationError::Timeout(self.timeout)),
        }
    }

    /// Retries [`Self::register`] until it succeeds, attempts run out or
    /// `token` is cancelled. The last error is returned.
    pub async fn register_with_backoff(
        &self,
        endpoint: &str,
        resource_name: &str,
        policy: &BackoffPolicy,
        token: &CancellationToken,
    ) -> Result<(), RegistrationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.register(endpoint, resource_name).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if attempt >= policy.max_attempts.max(1) {
                warn!(attempt, "giving up on kubelet registration: {err}");
                return Err(err);
            }

            let delay = policy.delay(attempt);
            warn!(attempt, "registration failed: {err}, retrying in {delay:?}");
            tokio::select! {
                _ = token.cancelled() => return Err(RegistrationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
