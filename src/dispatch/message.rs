use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub const DOWNLOAD_VIDEO: &str = "download-video";

/// Messages understood by the dispatch server. Anything else on the channel is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    #[serde(rename = "download-video")]
    DownloadVideo(DownloadRequest),
}

impl Message {
    /// Recognizes a message envelope. A recognized type with a missing or malformed payload
    /// yields an empty request so that validation can reject it.
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("type")?.as_str()? != DOWNLOAD_VIDEO {
            return None;
        }
        let request = match value.get("payload") {
            None | Some(Value::Null) => DownloadRequest::default(),
            Some(payload) => serde_json::from_value(payload.clone()).unwrap_or_default(),
        };
        Some(Message::DownloadVideo(request))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: &str, filename: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            filename: Some(filename.to_string()),
        }
    }
}

pub type DownloadId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<DownloadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResponse {
    pub fn started(download_id: DownloadId) -> Self {
        Self {
            ok: true,
            download_id: Some(download_id),
            error: None,
        }
    }

    pub fn failed(error: &DispatchError) -> Self {
        Self {
            ok: false,
            download_id: None,
            error: Some(error.to_string()),
        }
    }

    /// Error detail for display, with a generic marker when the server gave none.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unauthorized-host")]
    UnauthorizedHost,
    #[error("missing-url")]
    MissingUrl,
    #[error("download-failed")]
    DownloadFailed,
    #[error("{0}")]
    Host(String),
    #[error("{0}")]
    Transport(String),
}

/// Identity of the context a message came from, filled in by the transport rather than the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSender {
    pub url: Url,
}

impl MessageSender {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }
}
