use super::allowlist::AllowList;
use super::message::{DispatchError, DownloadRequest, DownloadResponse, Message, MessageSender};
use crate::host::{DownloadFacility, DownloadOptions};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A message as delivered by the channel, with the sender identity attached by the channel.
pub struct Incoming {
    pub message: Value,
    pub sender: MessageSender,
    pub respond_to: oneshot::Sender<Value>,
}

#[derive(Clone)]
pub struct DispatchServer {
    allow_list: AllowList,
    facility: Arc<dyn DownloadFacility>,
}

impl DispatchServer {
    pub fn new(allow_list: AllowList, facility: Arc<dyn DownloadFacility>) -> Self {
        Self {
            allow_list,
            facility,
        }
    }

    pub async fn run(self, mut incoming: mpsc::Receiver<Incoming>) {
        info!(
            "Dispatch server accepting downloads for {} via {}",
            self.allow_list.domain(),
            self.facility.name()
        );

        while let Some(Incoming {
            message,
            sender,
            respond_to,
        }) = incoming.recv().await
        {
            let Some(Message::DownloadVideo(request)) = Message::from_value(&message) else {
                debug!("Ignoring message from {}: {}", sender.url, message);
                continue;
            };

            // The response is delivered later, from its own task.
            let server = self.clone();
            tokio::spawn(async move {
                let response = server.handle_download(request, &sender).await;
                match serde_json::to_value(&response) {
                    Ok(value) => {
                        if respond_to.send(value).is_err() {
                            debug!("Requester went away before the response was delivered");
                        }
                    }
                    Err(e) => warn!("Failed to encode response: {}", e),
                }
            });
        }

        info!("Dispatch channel closed");
    }

    /// Guards run in order: sender origin, then payload, then the host call.
    pub async fn handle_download(
        &self,
        request: DownloadRequest,
        sender: &MessageSender,
    ) -> DownloadResponse {
        if !self.allow_list.allows(sender.hostname()) {
            warn!("Rejected download request from {}", sender.url);
            return DownloadResponse::failed(&DispatchError::UnauthorizedHost);
        }

        let Some(url) = request.url.filter(|url| !url.is_empty()) else {
            return DownloadResponse::failed(&DispatchError::MissingUrl);
        };

        let options = DownloadOptions {
            url,
            filename: request.filename.filter(|name| !name.is_empty()),
            save_as: false,
        };

        match self.facility.initiate_download(options).await {
            Ok(download_id) => DownloadResponse::started(download_id),
            Err(e) if e.description.is_empty() => {
                DownloadResponse::failed(&DispatchError::DownloadFailed)
            }
            Err(e) => DownloadResponse::failed(&DispatchError::Host(e.description)),
        }
    }
}
