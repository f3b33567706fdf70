mod facility;
mod http;

pub use facility::{DownloadFacility, DownloadOptions, HostError};
pub use http::HttpDownloadFacility;
