use super::source::{source_url, suggested_filename};
use super::{Activity, ContentScript, DOWNLOAD_ALL_ID};
use crate::dispatch::{DispatchClient, DownloadRequest, DownloadResponse};
use crate::page::{Document, Event, EventKind, NodeId};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

const DEFAULT_LABEL: &str = "Download All";
const RETRY_LABEL: &str = "Retry Downloads";
const IDLE_BACKGROUND: &str = "rgba(0, 0, 0, 0.8)";
const HOVER_BACKGROUND: &str = "rgba(0, 0, 0, 0.9)";

/// Counters of one bulk activation. Owned by the task collecting its completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperationState {
    total: usize,
    remaining: usize,
    had_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Remaining(usize),
    Finished { had_error: bool },
}

impl BulkOperationState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            remaining: total,
            had_error: false,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Accounts for one completion. Must be called exactly `total` times.
    pub fn record(&mut self, ok: bool) -> Progress {
        debug_assert!(self.remaining > 0, "more completions than requests");
        self.remaining = self.remaining.saturating_sub(1);
        if !ok {
            self.had_error = true;
        }

        if self.remaining > 0 {
            Progress::Remaining(self.remaining)
        } else {
            Progress::Finished {
                had_error: self.had_error,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    pub total: usize,
    pub failed: usize,
}

impl BulkOutcome {
    pub fn had_error(&self) -> bool {
        self.failed > 0
    }
}

impl ContentScript {
    /// Mounts the "download all" control next to the target heading, once.
    /// Returns the control when the page has a place for it.
    pub fn ensure_bulk_control(&self) -> Option<NodeId> {
        let container = self.find_header_container()?;

        if let Some(existing) = self.doc.find_by_id(container, DOWNLOAD_ALL_ID) {
            return Some(existing);
        }

        let button = self.create_bulk_control();
        self.doc.append_child(container, button);
        info!("Mounted bulk download control");
        Some(button)
    }

    fn find_header_container(&self) -> Option<NodeId> {
        let label = self.page.bulk_heading_label.trim().to_lowercase();
        let root = self.doc.document_element();

        self.doc
            .query_all_of(root, &["h1", "h2"])
            .into_iter()
            .filter(|heading| self.doc.text_content(*heading).trim().to_lowercase() == label)
            .filter_map(|heading| self.doc.parent_element(heading))
            .find(|parent| self.doc.has_class(*parent, &self.page.bulk_container_class))
    }

    /// Builds a detached bulk control. Runs started by its clicks are kept for
    /// [`ContentScript::take_bulk_run`].
    pub fn create_bulk_control(&self) -> NodeId {
        build_bulk_control(&self.doc, &self.client, &self.activity)
    }
}

fn build_bulk_control(
    doc: &Document,
    client: &DispatchClient,
    activity: &Rc<RefCell<Activity>>,
) -> NodeId {
    let button = doc.create_element("button");
    doc.set_attribute(button, "id", DOWNLOAD_ALL_ID);
    doc.set_attribute(button, "type", "button");
    doc.set_attribute(button, "data-default-label", DEFAULT_LABEL);
    doc.set_attribute(button, "aria-label", "Download all videos");
    doc.set_attribute(button, "title", "Download all videos on this page");
    doc.set_text_content(button, DEFAULT_LABEL);
    for (property, value) in [
        ("display", "inline-flex"),
        ("align-items", "center"),
        ("justify-content", "center"),
        ("padding", "0.4rem 0.9rem"),
        ("border-radius", "999px"),
        ("border", "none"),
        ("cursor", "pointer"),
        ("background", IDLE_BACKGROUND),
        ("color", "#fff"),
        ("font-size", "0.9rem"),
        ("font-weight", "600"),
        ("transition", "transform 0.18s ease, background 0.18s ease"),
    ] {
        doc.set_style(button, property, value);
    }

    doc.add_event_listener(
        button,
        EventKind::MouseEnter,
        Rc::new(move |doc: &Document, _: &mut Event| {
            if doc.is_disabled(button) {
                return;
            }
            doc.set_style(button, "transform", "scale(1.03)");
            doc.set_style(button, "background", HOVER_BACKGROUND);
        }),
    );
    doc.add_event_listener(
        button,
        EventKind::MouseLeave,
        Rc::new(move |doc: &Document, _: &mut Event| {
            doc.set_style(button, "transform", "scale(1)");
            doc.set_style(button, "background", IDLE_BACKGROUND);
        }),
    );

    let client = client.clone();
    let activity = Rc::clone(activity);
    doc.add_event_listener(
        button,
        EventKind::Click,
        Rc::new(move |doc: &Document, event: &mut Event| {
            event.prevent_default();
            event.stop_propagation();
            if let Some(run) = trigger_bulk_download(doc, &client, button) {
                activity.borrow_mut().bulk = Some(run);
            }
        }),
    );

    button
}

fn progress_label(remaining: usize) -> String {
    format!("Downloading ({remaining})")
}

/// Distinct source URLs of every video in the document, in document order.
fn unique_sources(doc: &Document) -> Vec<String> {
    let mut seen = HashSet::new();
    doc.query_all(doc.document_element(), "video")
        .into_iter()
        .filter_map(|video| source_url(doc, video))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Sends one request per distinct source and tracks them on `button`.
/// Returns `None` when there is nothing to download. Must run inside a `LocalSet`.
fn trigger_bulk_download(
    doc: &Document,
    client: &DispatchClient,
    button: NodeId,
) -> Option<JoinHandle<BulkOutcome>> {
    let sources = unique_sources(doc);
    if sources.is_empty() {
        doc.set_attribute(button, "title", "No downloadable videos found");
        return None;
    }

    doc.set_disabled(button, true);
    let default_label = doc
        .attribute(button, "data-default-label")
        .filter(|label| !label.is_empty())
        .or_else(|| Some(doc.text_content(button)).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    let state = BulkOperationState::new(sources.len());
    doc.set_text_content(button, &progress_label(state.remaining()));

    info!("Starting bulk download of {} video(s)", sources.len());

    let mut pending = JoinSet::new();
    for (index, url) in sources.into_iter().enumerate() {
        let mut filename = suggested_filename(Some(&url));
        if filename.is_empty() {
            filename = format!("video-{}.mp4", index + 1);
        }
        let client = client.clone();
        pending.spawn(async move {
            let response = client.send(DownloadRequest::new(&url, &filename)).await;
            (url, response)
        });
    }

    Some(tokio::task::spawn_local(collect_completions(
        doc.clone(),
        button,
        default_label,
        state,
        pending,
    )))
}

async fn collect_completions(
    doc: Document,
    button: NodeId,
    default_label: String,
    mut state: BulkOperationState,
    mut pending: JoinSet<(String, DownloadResponse)>,
) -> BulkOutcome {
    let mut failed = 0;

    while let Some(joined) = pending.join_next().await {
        let ok = match joined {
            Ok((_, response)) if response.ok => true,
            Ok((url, response)) => {
                warn!("Download of {} failed: {}", url, response.error_message());
                false
            }
            Err(e) => {
                warn!("Download request task failed: {}", e);
                false
            }
        };
        if !ok {
            failed += 1;
        }

        match state.record(ok) {
            Progress::Remaining(remaining) => {
                doc.set_text_content(button, &progress_label(remaining));
            }
            Progress::Finished { had_error } => {
                doc.set_disabled(button, false);
                if had_error {
                    doc.set_text_content(button, RETRY_LABEL);
                    doc.set_attribute(
                        button,
                        "title",
                        "Some downloads may have failed. Try again.",
                    );
                } else {
                    doc.set_text_content(button, &default_label);
                    doc.set_attribute(button, "title", "All downloads started.");
                }
            }
        }
    }

    let outcome = BulkOutcome {
        total: state.total(),
        failed,
    };
    info!(
        "Bulk download finished: {} of {} started",
        outcome.total - outcome.failed,
        outcome.total
    );
    outcome
}
