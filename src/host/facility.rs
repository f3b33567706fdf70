use crate::dispatch::DownloadId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    pub url: String,
    pub filename: Option<String>,
    pub save_as: bool,
}

/// Failure reported by the host. The description may be empty.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{description}")]
pub struct HostError {
    pub description: String,
}

impl HostError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait DownloadFacility: Send + Sync {
    /// Human-readable name of the facility
    fn name(&self) -> &'static str;

    /// Start a download and return the id the host assigned to it.
    /// Resolves once the transfer has begun, not when it finishes.
    async fn initiate_download(&self, options: DownloadOptions) -> Result<DownloadId, HostError>;
}
