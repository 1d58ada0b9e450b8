use std::path::Path;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Status;

use super::api::registration_server::Registration;
use super::api::registration_server::RegistrationServer;
use super::api::Empty;
use super::api::RegisterRequest;

/// In-process kubelet that records requests and optionally rejects them.
struct FakeKubelet {
    requests: mpsc::UnboundedSender<RegisterRequest>,
    reject: bool,
}

#[tonic::async_trait]
impl Registration for FakeKubelet {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        let _ = self.requests.send(request.into_inner());
        if self.reject {
            Err(Status::invalid_argument("unsupported version"))
        } else {
            Ok(Response::new(Empty {}))
        }
    }
}

/// Serves a fake kubelet registration endpoint on `socket` until the
/// returned token is cancelled.
pub(crate) fn serve_kubelet(
    socket: &Path,
    reject: bool,
) -> (mpsc::UnboundedReceiver<RegisterRequest>, CancellationToken) {
    let listener = UnixListener::bind(socket).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(RegistrationServer::new(FakeKubelet {
                requests: tx,
                reject,
            }))
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::UnixListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
            .unwrap();
    });
    (rx, token)
}
