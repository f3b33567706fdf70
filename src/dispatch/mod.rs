mod allowlist;
mod client;
mod message;
mod server;

pub use allowlist::AllowList;
pub use client::{ChannelTransport, DispatchClient};
pub use message::{DownloadId, DownloadRequest, DownloadResponse, MessageSender};
pub use server::DispatchServer;

use server::Incoming;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// Creates the message channel between page-side clients and the dispatch server.
pub fn channel() -> (mpsc::Sender<Incoming>, mpsc::Receiver<Incoming>) {
    mpsc::channel(CHANNEL_CAPACITY)
}
