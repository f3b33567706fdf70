use crate::page::{Document, NodeId};
use crate::utils::DEFAULT_FILENAME;
use url::Url;

const BLOB_FILENAME: &str = "video.webm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSource {
    pub url: String,
    pub filename: String,
}

/// Downloadable URL and suggested filename of a video element, if it has a source.
pub fn resolve(doc: &Document, video: NodeId) -> Option<VideoSource> {
    let url = source_url(doc, video)?;
    let filename = suggested_filename(Some(&url));
    Some(VideoSource { url, filename })
}

/// `currentSrc`, then the `src` attribute, then the first `<source>` with a `src`.
pub fn source_url(doc: &Document, video: NodeId) -> Option<String> {
    let current = doc.current_src(video);
    if !current.is_empty() {
        return Some(current);
    }

    let declared = doc.resolved_url_attribute(video, "src");
    if !declared.is_empty() {
        return Some(declared);
    }

    doc.query_all(video, "source")
        .into_iter()
        .map(|source| doc.resolved_url_attribute(source, "src"))
        .find(|src| !src.is_empty())
}

/// Always returns a non-empty name with an extension.
pub fn suggested_filename(url: Option<&str>) -> String {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return DEFAULT_FILENAME.to_string();
    };

    if url.starts_with("blob:") {
        return BLOB_FILENAME.to_string();
    }

    let Ok(parsed) = Url::parse(url) else {
        return DEFAULT_FILENAME.to_string();
    };

    match parsed.path().split('/').filter(|s| !s.is_empty()).last() {
        Some(segment) if segment.contains('.') => segment.to_string(),
        Some(segment) => format!("{segment}.mp4"),
        None => DEFAULT_FILENAME.to_string(),
    }
}
