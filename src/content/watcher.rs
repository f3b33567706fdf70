use super::ContentScript;
use crate::page::{MutationObserver, MutationRecord};
use tracing::{debug, info};

impl ContentScript {
    /// Covers what is already on the page and starts observing it.
    /// Returns `None` on pages outside the allowed domain.
    pub fn bootstrap(&self) -> Option<MutationObserver> {
        let location = self.doc.location();
        if !self.allow_list.allows(location.host_str().unwrap_or("")) {
            info!(
                "Skipping execution outside {}: {}",
                self.allow_list.domain(),
                location
            );
            return None;
        }

        let root = self.doc.document_element();
        for video in self.doc.query_all(root, "video") {
            self.attach(video);
        }
        self.ensure_bulk_control();

        info!(
            "Watching {} for videos ({} found)",
            location,
            self.processed_count()
        );
        Some(self.doc.observe())
    }

    /// Processes mutation batches for as long as the page exists.
    pub async fn watch(&self, mut observer: MutationObserver) {
        while let Some(batch) = observer.next_batch().await {
            self.handle_mutations(&batch);
        }
    }

    pub fn handle_mutations(&self, batch: &[MutationRecord]) {
        debug!("Processing {} mutation record(s)", batch.len());

        for record in batch {
            for node in &record.added_nodes {
                match self.doc.tag_name(*node).as_deref() {
                    None => {}
                    Some("video") => self.attach(*node),
                    Some(_) => {
                        for video in self.doc.query_all(*node, "video") {
                            self.attach(video);
                        }
                    }
                }
            }
        }

        self.ensure_bulk_control();
    }
}
