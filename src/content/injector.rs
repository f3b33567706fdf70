use super::source::{resolve, VideoSource};
use super::{Activity, ContentScript, BUTTON_CLASS, POSITION_FLAG, WRAPPER_CLASS};
use crate::dispatch::{DispatchClient, DownloadRequest, DownloadResponse};
use crate::page::{Document, Event, EventKind, NodeId};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

const NO_SOURCE_TITLE: &str = "Unable to locate a downloadable source for this video";
const IDLE_BACKGROUND: &str = "rgba(0, 0, 0, 0.7)";
const HOVER_BACKGROUND: &str = "rgba(0, 0, 0, 0.85)";

impl ContentScript {
    /// Mounts the per-video download control. Each video gets at most one.
    pub fn attach(&self, video: NodeId) {
        if self.is_processed(video) || !self.doc.is_element(video) {
            return;
        }

        let Some(host) = ensure_positioned_parent(&self.doc, video) else {
            return;
        };

        let wrapper = create_wrapper(&self.doc);
        let button = create_download_button(&self.doc, &self.client, &self.activity, video);
        self.doc.append_child(wrapper, button);
        self.doc.append_child(host, wrapper);

        self.processed.borrow_mut().insert(video, button);
    }
}

/// Parent of `element`, switched to relative positioning once if it was static.
fn ensure_positioned_parent(doc: &Document, element: NodeId) -> Option<NodeId> {
    let parent = doc.parent_element(element)?;

    if doc.computed_position(parent) == "static" && !doc.has_attribute(parent, POSITION_FLAG) {
        doc.set_attribute(parent, POSITION_FLAG, "true");
        doc.set_style(parent, "position", "relative");
    }

    Some(parent)
}

fn create_wrapper(doc: &Document) -> NodeId {
    let wrapper = doc.create_element("div");
    doc.set_attribute(wrapper, "class", WRAPPER_CLASS);
    for (property, value) in [
        ("position", "absolute"),
        ("bottom", "8px"),
        ("right", "8px"),
        ("z-index", "2147483646"),
        ("display", "flex"),
        ("align-items", "center"),
        ("justify-content", "center"),
        // Only the button itself takes clicks.
        ("pointer-events", "none"),
    ] {
        doc.set_style(wrapper, property, value);
    }
    wrapper
}

fn create_icon(doc: &Document) -> NodeId {
    let svg = doc.create_element("svg");
    for (name, value) in [
        ("xmlns", "http://www.w3.org/2000/svg"),
        ("viewBox", "0 0 24 24"),
        ("width", "18"),
        ("height", "18"),
        ("aria-hidden", "true"),
    ] {
        doc.set_attribute(svg, name, value);
    }
    let path = doc.create_element("path");
    doc.set_attribute(path, "fill", "currentColor");
    doc.set_attribute(
        path,
        "d",
        "M5 20a2 2 0 0 1-2-2v-3h2v3h14v-3h2v3a2 2 0 0 1-2 2zm7-4-6-6 1.41-1.41L11 12.17V2h2v10.17l3.59-3.58L18 10z",
    );
    doc.append_child(svg, path);
    svg
}

fn create_download_button(
    doc: &Document,
    client: &DispatchClient,
    activity: &Rc<RefCell<Activity>>,
    video: NodeId,
) -> NodeId {
    let button = doc.create_element("button");
    doc.set_attribute(button, "type", "button");
    doc.set_attribute(button, "class", BUTTON_CLASS);
    doc.set_attribute(button, "aria-label", "Download video");
    doc.set_attribute(button, "title", "Download this video");
    for (property, value) in [
        ("pointer-events", "auto"),
        ("display", "inline-flex"),
        ("align-items", "center"),
        ("justify-content", "center"),
        ("width", "36px"),
        ("height", "36px"),
        ("border-radius", "50%"),
        ("border", "none"),
        ("cursor", "pointer"),
        ("background", IDLE_BACKGROUND),
        ("color", "#fff"),
        ("box-shadow", "0 2px 6px rgba(0, 0, 0, 0.35)"),
        ("transition", "transform 0.18s ease, background 0.18s ease"),
    ] {
        doc.set_style(button, property, value);
    }
    let icon = create_icon(doc);
    doc.append_child(button, icon);

    doc.add_event_listener(
        button,
        EventKind::MouseEnter,
        Rc::new(move |doc: &Document, _: &mut Event| {
            doc.set_style(button, "transform", "scale(1.05)");
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

            let Some(source) = resolve(doc, video) else {
                doc.set_attribute(button, "title", NO_SOURCE_TITLE);
                return;
            };

            doc.set_disabled(button, true);
            doc.set_style(button, "opacity", "0.6");
            let download = tokio::task::spawn_local(download_video(
                doc.clone(),
                client.clone(),
                button,
                source,
            ));
            activity.borrow_mut().push_download(download);
        }),
    );

    button
}

async fn download_video(
    doc: Document,
    client: DispatchClient,
    button: NodeId,
    source: VideoSource,
) -> DownloadResponse {
    let response = client
        .send(DownloadRequest::new(&source.url, &source.filename))
        .await;

    doc.set_disabled(button, false);
    doc.set_style(button, "opacity", "1");

    if response.ok {
        doc.set_attribute(button, "title", "Download started.");
    } else {
        warn!(
            "Download of {} failed: {}",
            source.url,
            response.error_message()
        );
        doc.set_attribute(
            button,
            "title",
            &format!("Download failed: {}", response.error_message()),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::super::testing::{harness, wait_until};
    use super::*;
    use crate::host::testing::RecordingFacility;
    use std::sync::Arc;
    use tokio::task::LocalSet;

    const PAGE: &str = r#"<body>
        <div id="card"><video src="https://cdn.example.com/gen/one.mp4"></video></div>
        <div id="empty"><video></video></div>
    </body>"#;

    fn title(doc: &Document, button: NodeId) -> Option<String> {
        doc.attribute(button, "title")
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        LocalSet::new()
            .run_until(async {
                let (script, _) = harness(PAGE, RecordingFacility::new());
                let doc = script.document();
                let video = doc.query_all(doc.document_element(), "video")[0];

                script.attach(video);
                script.attach(video);
                script.attach(video);

                let host = doc.parent_element(video).unwrap();
                let buttons = doc.query_all(host, "button");
                assert_eq!(buttons, vec![script.control_of(video).unwrap()]);
                assert!(script.is_processed(video));
                assert_eq!(doc.attribute(host, POSITION_FLAG).as_deref(), Some("true"));
                assert_eq!(doc.computed_position(host), "relative");
            })
            .await;
    }

    #[tokio::test]
    async fn test_positioned_parent_is_left_alone() {
        LocalSet::new()
            .run_until(async {
                let (script, _) = harness(
                    r#"<div style="position: absolute"><video src="/a.mp4"></video></div>"#,
                    RecordingFacility::new(),
                );
                let doc = script.document();
                let video = doc.query_all(doc.document_element(), "video")[0];
                script.attach(video);

                let host = doc.parent_element(video).unwrap();
                assert!(!doc.has_attribute(host, POSITION_FLAG));
                assert_eq!(doc.computed_position(host), "absolute");
            })
            .await;
    }

    #[tokio::test]
    async fn test_detached_video_is_skipped() {
        LocalSet::new()
            .run_until(async {
                let (script, _) = harness(PAGE, RecordingFacility::new());
                let video = script.document().create_element("video");
                script.attach(video);
                assert!(!script.is_processed(video));
                assert_eq!(script.control_of(video), None);
            })
            .await;
    }

    #[tokio::test]
    async fn test_click_downloads_and_reenables() {
        LocalSet::new()
            .run_until(async {
                let facility = Arc::new(RecordingFacility::new());
                let (script, _) = harness(PAGE, Arc::clone(&facility));
                let doc = script.document().clone();
                let video = doc.query_all(doc.document_element(), "video")[0];
                script.attach(video);
                let button = script.control_of(video).unwrap();

                let event = doc.click(button);
                assert!(event.default_prevented());
                assert!(event.propagation_stopped());
                assert!(doc.is_disabled(button));
                assert_eq!(doc.style(button, "opacity").as_deref(), Some("0.6"));

                wait_until(|| !doc.is_disabled(button)).await;
                assert_eq!(title(&doc, button).as_deref(), Some("Download started."));
                assert_eq!(doc.style(button, "opacity").as_deref(), Some("1"));

                let calls = facility.calls();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].url, "https://cdn.example.com/gen/one.mp4");
                assert_eq!(calls[0].filename.as_deref(), Some("one.mp4"));
            })
            .await;
    }

    #[tokio::test]
    async fn test_click_hands_out_its_download() {
        LocalSet::new()
            .run_until(async {
                let (script, _) = harness(PAGE, RecordingFacility::new());
                let doc = script.document().clone();
                let video = doc.query_all(doc.document_element(), "video")[0];
                script.attach(video);
                let button = script.control_of(video).unwrap();

                doc.click(button);
                // Disabled until the first request settles.
                doc.click(button);

                let downloads = script.take_downloads();
                assert_eq!(downloads.len(), 1);
                for download in downloads {
                    let response = download.await.unwrap();
                    assert_eq!(response, DownloadResponse::started(1));
                }
                assert!(!doc.is_disabled(button));
                assert!(script.take_downloads().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_click_reports_failure() {
        LocalSet::new()
            .run_until(async {
                let url = "https://cdn.example.com/gen/one.mp4";
                let (script, _) = harness(PAGE, RecordingFacility::new().failing(url));
                let doc = script.document().clone();
                let video = doc.query_all(doc.document_element(), "video")[0];
                script.attach(video);
                let button = script.control_of(video).unwrap();

                doc.click(button);
                wait_until(|| !doc.is_disabled(button)).await;
                assert_eq!(
                    title(&doc, button).as_deref(),
                    Some("Download failed: download-failed")
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_click_without_source_is_advisory_only() {
        LocalSet::new()
            .run_until(async {
                let facility = Arc::new(RecordingFacility::new());
                let (script, _) = harness(PAGE, Arc::clone(&facility));
                let doc = script.document().clone();
                let video = doc.query_all(doc.document_element(), "video")[1];
                script.attach(video);
                let button = script.control_of(video).unwrap();

                doc.click(button);
                assert!(!doc.is_disabled(button));
                assert_eq!(title(&doc, button).as_deref(), Some(NO_SOURCE_TITLE));
                assert!(script.take_downloads().is_empty());
                tokio::task::yield_now().await;
                assert!(facility.calls().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_hover_only_changes_emphasis() {
        LocalSet::new()
            .run_until(async {
                let (script, _) = harness(PAGE, RecordingFacility::new());
                let doc = script.document().clone();
                let video = doc.query_all(doc.document_element(), "video")[0];
                script.attach(video);
                let button = script.control_of(video).unwrap();

                doc.dispatch_event(button, EventKind::MouseEnter);
                let transform = doc.style(button, "transform");
                assert_eq!(transform.as_deref(), Some("scale(1.05)"));

                doc.dispatch_event(button, EventKind::MouseLeave);
                let transform = doc.style(button, "transform");
                assert_eq!(transform.as_deref(), Some("scale(1)"));
                assert_eq!(title(&doc, button).as_deref(), Some("Download this video"));
            })
            .await;
    }
}
