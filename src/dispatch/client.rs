use super::message::{DispatchError, DownloadRequest, DownloadResponse, Message, MessageSender};
use super::server::Incoming;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,
    #[error("The message port closed before a response was received.")]
    PortClosed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, message: Value) -> Result<Value, TransportError>;
}

/// In-process channel to a [`super::DispatchServer`].
/// Every message is stamped with this side's identity.
pub struct ChannelTransport {
    tx: mpsc::Sender<Incoming>,
    sender: MessageSender,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Incoming>, sender: MessageSender) -> Self {
        Self { tx, sender }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(&self, message: Value) -> Result<Value, TransportError> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(Incoming {
                message,
                sender: self.sender.clone(),
                respond_to,
            })
            .await
            .map_err(|_| TransportError::NoReceiver)?;
        response.await.map_err(|_| TransportError::PortClosed)
    }
}

#[derive(Clone)]
pub struct DispatchClient {
    transport: Arc<dyn Transport>,
}

impl DispatchClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Never fails: transport problems come back as a failed response.
    pub async fn send(&self, request: DownloadRequest) -> DownloadResponse {
        let message = match serde_json::to_value(Message::DownloadVideo(request)) {
            Ok(message) => message,
            Err(e) => return transport_failure(&e.to_string()),
        };

        match self.transport.send_message(message).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Malformed download response: {}", e);
                DownloadResponse {
                    ok: false,
                    download_id: None,
                    error: None,
                }
            }),
            Err(e) => transport_failure(&e.to_string()),
        }
    }
}

fn transport_failure(detail: &str) -> DownloadResponse {
    let detail = if detail.is_empty() {
        "transport-failed"
    } else {
        detail
    };
    DownloadResponse::failed(&DispatchError::Transport(detail.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use url::Url;

    struct FixedTransport(Result<Value, TransportError>);

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send_message(&self, message: Value) -> Result<Value, TransportError> {
            assert_eq!(message["type"], "download-video");
            self.0.clone()
        }
    }

    fn client(result: Result<Value, TransportError>) -> DispatchClient {
        DispatchClient::new(Arc::new(FixedTransport(result)))
    }

    #[tokio::test]
    async fn test_passes_server_response_through() {
        let response = client(Ok(json!({ "ok": false, "error": "missing-url" })))
            .send(DownloadRequest::default())
            .await;
        assert_eq!(response.error.as_deref(), Some("missing-url"));

        let response = client(Ok(json!({ "ok": true, "downloadId": 4 })))
            .send(DownloadRequest::new("https://a/b.mp4", "b.mp4"))
            .await;
        assert_eq!(response, DownloadResponse::started(4));
    }

    #[tokio::test]
    async fn test_transport_errors_become_failures() {
        let response = client(Err(TransportError::PortClosed))
            .send(DownloadRequest::default())
            .await;
        assert!(!response.ok);
        assert_eq!(
            response.error_message(),
            "The message port closed before a response was received."
        );

        assert_eq!(transport_failure("").error_message(), "transport-failed");
    }

    #[tokio::test]
    async fn test_malformed_response_is_unknown_error() {
        let response = client(Ok(json!("yes"))).send(DownloadRequest::default()).await;
        assert!(!response.ok);
        assert_eq!(response.error_message(), "Unknown error");
    }

    #[tokio::test]
    async fn test_channel_without_server() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let transport = ChannelTransport::new(
            tx,
            MessageSender::new(Url::parse("https://sora.chatgpt.com/").unwrap()),
        );
        let response = DispatchClient::new(Arc::new(transport))
            .send(DownloadRequest::default())
            .await;
        assert_eq!(
            response.error_message(),
            "Could not establish connection. Receiving end does not exist."
        );
    }
}
