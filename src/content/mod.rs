mod bulk;
mod injector;
mod source;
mod watcher;

pub use bulk::BulkOutcome;
pub use source::{resolve, suggested_filename};

use crate::config::PageConfig;
use crate::dispatch::{AllowList, DispatchClient, DownloadResponse};
use crate::page::{Document, NodeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::task::JoinHandle;

pub const BUTTON_CLASS: &str = "vidrelay__button";
pub const WRAPPER_CLASS: &str = "vidrelay__wrapper";
pub const POSITION_FLAG: &str = "data-vidrelay-positioned";
pub const DOWNLOAD_ALL_ID: &str = "vidrelay__download-all";

/// Page-side half: finds videos, mounts controls and talks to the dispatch server.
pub struct ContentScript {
    doc: Document,
    client: DispatchClient,
    page: PageConfig,
    allow_list: AllowList,
    /// Processed videos and the control mounted for each.
    processed: RefCell<HashMap<NodeId, NodeId>>,
    activity: Rc<RefCell<Activity>>,
}

/// Requests started by clicks on the controls, kept so the caller can wait for them.
#[derive(Default)]
struct Activity {
    downloads: Vec<JoinHandle<DownloadResponse>>,
    bulk: Option<JoinHandle<BulkOutcome>>,
}

impl Activity {
    fn push_download(&mut self, download: JoinHandle<DownloadResponse>) {
        self.downloads.retain(|d| !d.is_finished());
        self.downloads.push(download);
    }
}

impl ContentScript {
    pub fn new(
        doc: Document,
        client: DispatchClient,
        page: PageConfig,
        allow_list: AllowList,
    ) -> Self {
        Self {
            doc,
            client,
            page,
            allow_list,
            processed: RefCell::new(HashMap::new()),
            activity: Rc::default(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn is_processed(&self, video: NodeId) -> bool {
        self.processed.borrow().contains_key(&video)
    }

    /// Download control mounted for `video`, if it was processed.
    pub fn control_of(&self, video: NodeId) -> Option<NodeId> {
        self.processed.borrow().get(&video).copied()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.borrow().len()
    }

    /// Per-video downloads started by clicks and not yet handed out.
    pub fn take_downloads(&self) -> Vec<JoinHandle<DownloadResponse>> {
        std::mem::take(&mut self.activity.borrow_mut().downloads)
    }

    /// The latest bulk run started from a "download all" control.
    pub fn take_bulk_run(&self) -> Option<JoinHandle<BulkOutcome>> {
        self.activity.borrow_mut().bulk.take()
    }
}
