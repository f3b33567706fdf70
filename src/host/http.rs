use super::{DownloadFacility, DownloadOptions, HostError};
use crate::content::suggested_filename;
use crate::dispatch::DownloadId;
use crate::utils::{format_size, numbered_filename, sanitize_filename};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Fetches downloads over HTTP into a directory, one background transfer per download.
pub struct HttpDownloadFacility {
    client: reqwest::Client,
    directory: PathBuf,
    next_id: AtomicU64,
    transfers: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpDownloadFacility {
    pub fn new(directory: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Self::with_client(directory, client)
    }

    pub fn with_client(directory: PathBuf, client: reqwest::Client) -> Result<Self> {
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create {}", directory.display()))?;

        info!("Saving downloads to {}", directory.display());

        Ok(Self {
            client,
            directory,
            next_id: AtomicU64::new(1),
            transfers: Mutex::new(Vec::new()),
        })
    }

    /// Waits for every transfer started so far.
    pub async fn finish(&self) {
        let transfers = std::mem::take(
            &mut *self
                .transfers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for transfer in transfers {
            if let Err(e) = transfer.await {
                warn!("Transfer task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl DownloadFacility for HttpDownloadFacility {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn initiate_download(&self, options: DownloadOptions) -> Result<DownloadId, HostError> {
        let url = Url::parse(&options.url).map_err(|_| HostError::new("Invalid URL"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HostError::new(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }
        if options.save_as {
            debug!("Save-as prompt requested, saving to the download directory instead");
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HostError::new(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HostError::new(format!(
                "Server responded with HTTP {}",
                response.status()
            )));
        }

        let requested = match options.filename.as_deref() {
            Some(name) => name.to_string(),
            None => suggested_filename(Some(url.as_str())),
        };
        let (path, file) = reserve_file(&self.directory, &sanitize_filename(&requested))
            .await
            .map_err(|e| HostError::new(format!("Failed to create file: {e}")))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        info!("Download {} started: {} -> {}", id, url, path.display());

        let transfer = tokio::spawn(async move {
            match write_body(response, file).await {
                Ok(bytes) => info!(
                    "Download {} complete: {} ({})",
                    id,
                    path.display(),
                    format_size(bytes)
                ),
                Err(e) => warn!("Download {} interrupted: {:#}", id, e),
            }
        });
        let mut transfers = self
            .transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transfers.retain(|t| !t.is_finished());
        transfers.push(transfer);

        Ok(id)
    }
}

/// Creates the first free `name`, `name (1)`, ... in `dir`. Creation is exclusive, so
/// concurrent downloads with the same name never share a file.
async fn reserve_file(dir: &Path, filename: &str) -> std::io::Result<(PathBuf, tokio::fs::File)> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(numbered_filename(filename, n));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {filename}"),
    ))
}

async fn write_body(mut response: reqwest::Response, mut file: tokio::fs::File) -> Result<u64> {
    let mut total = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .context("Failed to read response body")?
    {
        file.write_all(&chunk)
            .await
            .context("Failed to write download")?;
        total += chunk.len() as u64;
    }
    file.flush().await.context("Failed to flush download")?;
    Ok(total)
}
