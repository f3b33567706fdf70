mod dom;
mod html;

pub use dom::{Document, Event, EventKind, MutationObserver, MutationRecord, NodeId};
