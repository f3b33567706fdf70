use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use url::Url;

mod config;
mod content;
mod dispatch;
mod host;
mod page;
mod utils;

use config::Config;
use content::ContentScript;
use dispatch::{AllowList, ChannelTransport, DispatchClient, DispatchServer, MessageSender};
use host::HttpDownloadFacility;
use page::{Document, NodeId};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// HTML snapshot of the page to scan
    #[arg(short, long)]
    page: PathBuf,

    /// Address the snapshot was taken from
    #[arg(short, long)]
    url: String,

    /// Directory to save downloads in
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Download every distinct video found on the page
    #[arg(long)]
    download_all: bool,

    /// Download the Nth video on the page (1-based), may be repeated
    #[arg(long = "video", value_name = "N")]
    videos: Vec<usize>,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/vidrelay/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/vidrelay/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_config_path(&args);
    let config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting vidrelay...");
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using defaults"),
    }

    let location = Url::parse(&args.url).with_context(|| format!("Invalid page URL {}", args.url))?;
    let html = std::fs::read_to_string(&args.page)
        .with_context(|| format!("Failed to read page snapshot {}", args.page.display()))?;

    let allow_list = AllowList::new(&config.policy.allowed_domain);
    let directory = args
        .output
        .clone()
        .unwrap_or_else(|| config.download_directory());
    let facility = Arc::new(HttpDownloadFacility::new(directory)?);

    let (tx, rx) = dispatch::channel();
    let server = DispatchServer::new(allow_list.clone(), facility.clone());
    tokio::spawn(server.run(rx));

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let doc = Document::from_html(location.clone(), &html);
            let transport = ChannelTransport::new(tx, MessageSender::new(location));
            let script = Rc::new(ContentScript::new(
                doc.clone(),
                DispatchClient::new(Arc::new(transport)),
                config.page.clone(),
                allow_list,
            ));

            let Some(observer) = script.bootstrap() else {
                return Ok(());
            };
            tokio::task::spawn_local({
                let script = Rc::clone(&script);
                async move { script.watch(observer).await }
            });

            let videos = doc.query_all(doc.document_element(), "video");
            for (index, video) in videos.iter().enumerate() {
                match content::resolve(&doc, *video) {
                    Some(source) => info!(
                        "Found video #{}: {} ({})",
                        index + 1,
                        source.url,
                        source.filename
                    ),
                    None => info!("Found video #{} without a downloadable source", index + 1),
                }
            }

            if !args.videos.is_empty() {
                download_videos(&script, &videos, &args.videos).await?;
            }
            if args.download_all {
                download_all(&script).await?;
            }

            Ok::<_, anyhow::Error>(())
        })
        .await?;

    facility.finish().await;
    Ok(())
}

async fn download_videos(script: &ContentScript, videos: &[NodeId], picks: &[usize]) -> Result<()> {
    let doc = script.document();
    for &n in picks {
        let video = n
            .checked_sub(1)
            .and_then(|index| videos.get(index))
            .with_context(|| format!("Page has no video #{}", n))?;
        let Some(button) = script.control_of(*video) else {
            warn!("Video #{} has no download control", n);
            continue;
        };

        doc.click(button);
        if !doc.is_disabled(button) {
            let title = doc.attribute(button, "title").unwrap_or_default();
            warn!("Video #{} was not downloaded: {}", n, title);
        }
    }

    for download in script.take_downloads() {
        let response = download.await.context("Download task failed")?;
        if let Some(id) = response.download_id {
            info!("Download {} accepted", id);
        }
    }
    Ok(())
}

async fn download_all(script: &ContentScript) -> Result<()> {
    let doc = script.document();
    let button = match script.ensure_bulk_control() {
        Some(button) => button,
        None => {
            info!("Page has no bulk download control, using a detached one");
            script.create_bulk_control()
        }
    };

    if !doc.click(button).default_prevented() {
        warn!("Bulk download control is busy");
        return Ok(());
    }
    let Some(run) = script.take_bulk_run() else {
        warn!("No downloadable videos found");
        return Ok(());
    };

    let outcome = run.await.context("Bulk download task failed")?;
    if outcome.had_error() {
        warn!(
            "{} of {} downloads failed to start",
            outcome.failed, outcome.total
        );
    }
    Ok(())
}
