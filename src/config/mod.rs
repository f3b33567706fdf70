use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    /// Pages on this domain or any subdomain may request downloads.
    pub allowed_domain: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_domain: "sora.chatgpt.com".to_string(),
        }
    }
}

/// Where the bulk control is mounted on the page.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PageConfig {
    pub bulk_heading_label: String,
    pub bulk_container_class: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            bulk_heading_label: "drafts".to_string(),
            bulk_container_class: "flex".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DownloadsConfig {
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub policy: PolicyConfig,
    pub page: PageConfig,
    pub downloads: DownloadsConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    /// Configured directory, else the platform download directory, else the working directory.
    pub fn download_directory(&self) -> PathBuf {
        self.downloads
            .directory
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
