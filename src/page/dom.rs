use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tokio::sync::mpsc;
use url::Url;

/// Stable handle to a node. Handles are never reused for the lifetime of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Click,
    MouseEnter,
    MouseLeave,
}

impl EventKind {
    fn bubbles(self) -> bool {
        matches!(self, EventKind::Click)
    }
}

#[derive(Debug, Default)]
pub struct Event {
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    #[cfg(test)]
    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

pub type Listener = Rc<dyn Fn(&Document, &mut Event)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

enum NodeKind {
    Element(String),
    Text(String),
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    disabled: bool,
    current_src: String,
    listeners: Vec<(EventKind, Listener)>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            style: BTreeMap::new(),
            disabled: false,
            current_src: String::new(),
            listeners: Vec::new(),
        }
    }
}

struct Tree {
    location: Url,
    nodes: Vec<Node>,
    root: NodeId,
    observer: Option<mpsc::UnboundedSender<MutationRecord>>,
}

impl Tree {
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn is_connected(&self, id: NodeId) -> bool {
        self.is_inclusive_ancestor(self.root, id)
    }

    /// True when `ancestor` is `node` or lies on its parent chain.
    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }

    fn notify(&mut self, record: MutationRecord) {
        if !self.is_connected(record.target) {
            return;
        }
        if let Some(observer) = &self.observer {
            if observer.send(record).is_err() {
                self.observer = None;
            }
        }
    }

    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.node(child).parent?;
        self.node_mut(parent).children.retain(|c| *c != child);
        self.node_mut(child).parent = None;
        Some(parent)
    }

    fn descendants(&self, root: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.node(root).children {
            out.push(*child);
            self.descendants(*child, out);
        }
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        match &self.node(id).kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                for child in &self.node(id).children {
                    self.text_content(*child, out);
                }
            }
        }
    }
}

/// In-process document tree. Cloning yields another handle to the same page.
#[derive(Clone)]
pub struct Document {
    inner: Rc<RefCell<Tree>>,
}

impl Document {
    pub fn new(location: Url) -> Self {
        let root = Node::new(NodeKind::Element("html".to_string()));
        Self {
            inner: Rc::new(RefCell::new(Tree {
                location,
                nodes: vec![root],
                root: NodeId(0),
                observer: None,
            })),
        }
    }

    pub fn location(&self) -> Url {
        self.inner.borrow().location.clone()
    }

    pub fn document_element(&self) -> NodeId {
        self.inner.borrow().root
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.push(Node::new(NodeKind::Element(tag.to_ascii_lowercase())))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.push(Node::new(NodeKind::Text(text.to_string())))
    }

    fn push(&self, node: Node) -> NodeId {
        let mut tree = self.inner.borrow_mut();
        tree.nodes.push(node);
        NodeId(tree.nodes.len() - 1)
    }

    /// Moves `child` under `parent`, detaching it from any previous parent first.
    /// Returns false and leaves the tree alone when `child` is `parent` or one of its ancestors.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> bool {
        let mut tree = self.inner.borrow_mut();
        if tree.is_inclusive_ancestor(child, parent) {
            return false;
        }
        if let Some(previous) = tree.detach(child) {
            tree.notify(MutationRecord {
                target: previous,
                added_nodes: Vec::new(),
                removed_nodes: vec![child],
            });
        }
        tree.node_mut(child).parent = Some(parent);
        tree.node_mut(parent).children.push(child);
        tree.notify(MutationRecord {
            target: parent,
            added_nodes: vec![child],
            removed_nodes: Vec::new(),
        });
        true
    }

    #[cfg(test)]
    pub fn remove_child(&self, parent: NodeId, child: NodeId) {
        let mut tree = self.inner.borrow_mut();
        if tree.node(child).parent != Some(parent) {
            return;
        }
        tree.detach(child);
        tree.notify(MutationRecord {
            target: parent,
            added_nodes: Vec::new(),
            removed_nodes: vec![child],
        });
    }

    /// Replaces all children with a single text node.
    pub fn set_text_content(&self, id: NodeId, text: &str) {
        let text_node = self.create_text(text);
        let mut tree = self.inner.borrow_mut();
        let removed = std::mem::take(&mut tree.node_mut(id).children);
        for child in &removed {
            tree.node_mut(*child).parent = None;
        }
        tree.node_mut(text_node).parent = Some(id);
        tree.node_mut(id).children.push(text_node);
        tree.notify(MutationRecord {
            target: id,
            added_nodes: vec![text_node],
            removed_nodes: removed,
        });
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.inner.borrow().text_content(id, &mut out);
        out
    }

    pub fn tag_name(&self, id: NodeId) -> Option<String> {
        match &self.inner.borrow().node(id).kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag_name(id).is_some()
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.inner.borrow().node(id).parent
    }

    /// Descendants of `root` with the given tag, in document order. `root` itself is excluded.
    pub fn query_all(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.query_all_of(root, &[tag])
    }

    pub fn query_all_of(&self, root: NodeId, tags: &[&str]) -> Vec<NodeId> {
        let tree = self.inner.borrow();
        let mut all = Vec::new();
        tree.descendants(root, &mut all);
        let matching = all
            .into_iter()
            .filter(|id| match &tree.node(*id).kind {
                NodeKind::Element(tag) => tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
                NodeKind::Text(_) => false,
            })
            .collect();
        matching
    }

    pub fn find_by_id(&self, root: NodeId, element_id: &str) -> Option<NodeId> {
        let tree = self.inner.borrow();
        let mut all = Vec::new();
        tree.descendants(root, &mut all);
        let found = all.into_iter().find(|id| {
            tree.node(*id).attributes.get("id").map(String::as_str) == Some(element_id)
        });
        found
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        self.inner.borrow().node(id).attributes.get(name).cloned()
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.inner.borrow().node(id).attributes.contains_key(name)
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) {
        self.inner
            .borrow_mut()
            .node_mut(id)
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attribute(id, "class")
            .map(|value| value.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// Attribute value resolved against the document URL, like the `src` IDL property.
    pub fn resolved_url_attribute(&self, id: NodeId, name: &str) -> String {
        let Some(value) = self.attribute(id, name) else {
            return String::new();
        };
        let value = value.trim();
        if value.is_empty() {
            return String::new();
        }
        match self.inner.borrow().location.join(value) {
            Ok(url) => url.to_string(),
            Err(_) => value.to_string(),
        }
    }

    pub fn current_src(&self, id: NodeId) -> String {
        self.inner.borrow().node(id).current_src.clone()
    }

    #[cfg(test)]
    pub fn set_current_src(&self, id: NodeId, src: &str) {
        self.inner.borrow_mut().node_mut(id).current_src = src.to_string();
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<String> {
        self.inner.borrow().node(id).style.get(property).cloned()
    }

    pub fn set_style(&self, id: NodeId, property: &str, value: &str) {
        self.inner
            .borrow_mut()
            .node_mut(id)
            .style
            .insert(property.to_string(), value.to_string());
    }

    /// No stylesheets are modelled, so the computed position is the inline one.
    pub fn computed_position(&self, id: NodeId) -> String {
        self.style(id, "position")
            .unwrap_or_else(|| "static".to_string())
    }

    pub fn is_disabled(&self, id: NodeId) -> bool {
        self.inner.borrow().node(id).disabled
    }

    pub fn set_disabled(&self, id: NodeId, disabled: bool) {
        self.inner.borrow_mut().node_mut(id).disabled = disabled;
    }

    pub fn add_event_listener(&self, id: NodeId, kind: EventKind, listener: Listener) {
        self.inner
            .borrow_mut()
            .node_mut(id)
            .listeners
            .push((kind, listener));
    }

    /// Runs listeners on the target and, for bubbling events, its ancestors.
    pub fn dispatch_event(&self, target: NodeId, kind: EventKind) -> Event {
        let mut event = Event::default();
        if kind == EventKind::Click && self.is_disabled(target) {
            return event;
        }

        let mut current = Some(target);
        while let Some(node) = current {
            let listeners: Vec<Listener> = self
                .inner
                .borrow()
                .node(node)
                .listeners
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, l)| Rc::clone(l))
                .collect();
            for listener in listeners {
                listener(self, &mut event);
            }
            if event.propagation_stopped || !kind.bubbles() {
                break;
            }
            current = self.parent_element(node);
        }

        event
    }

    pub fn click(&self, target: NodeId) -> Event {
        self.dispatch_event(target, EventKind::Click)
    }

    /// Starts delivering structural mutations of connected nodes.
    /// A second call replaces the first observer.
    pub fn observe(&self) -> MutationObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.borrow_mut().observer = Some(tx);
        MutationObserver { rx }
    }
}

pub struct MutationObserver {
    rx: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationObserver {
    /// Waits for the next mutation and returns it together with everything queued behind it.
    pub async fn next_batch(&mut self) -> Option<Vec<MutationRecord>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(record) = self.rx.try_recv() {
            batch.push(record);
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn document() -> Document {
        Document::new(Url::parse("https://sora.chatgpt.com/drafts").unwrap())
    }

    #[test]
    fn test_query_all_is_document_order_and_excludes_root() {
        let doc = document();
        let root = doc.document_element();
        let outer = doc.create_element("div");
        let first = doc.create_element("video");
        let inner = doc.create_element("div");
        let second = doc.create_element("VIDEO");
        doc.append_child(root, outer);
        doc.append_child(outer, first);
        doc.append_child(outer, inner);
        doc.append_child(inner, second);

        assert_eq!(doc.query_all(root, "video"), vec![first, second]);
        assert_eq!(doc.query_all(first, "video"), Vec::<NodeId>::new());
        assert_eq!(doc.tag_name(second).as_deref(), Some("video"));
    }

    #[test]
    fn test_resolved_url_attribute() {
        let doc = document();
        let video = doc.create_element("video");
        assert_eq!(doc.resolved_url_attribute(video, "src"), "");

        doc.set_attribute(video, "src", "/media/clip.mp4");
        assert_eq!(
            doc.resolved_url_attribute(video, "src"),
            "https://sora.chatgpt.com/media/clip.mp4"
        );
    }

    #[test]
    fn test_text_content_and_replacement() {
        let doc = document();
        let heading = doc.create_element("h2");
        let span = doc.create_element("span");
        doc.append_child(heading, span);
        let text = doc.create_text(" Drafts ");
        doc.append_child(span, text);
        assert_eq!(doc.text_content(heading), " Drafts ");

        doc.set_text_content(heading, "Other");
        assert_eq!(doc.text_content(heading), "Other");
        assert_eq!(doc.query_all(heading, "span"), Vec::<NodeId>::new());
    }

    #[test]
    fn test_computed_position_defaults_to_static() {
        let doc = document();
        let div = doc.create_element("div");
        assert_eq!(doc.computed_position(div), "static");
        doc.set_style(div, "position", "absolute");
        assert_eq!(doc.computed_position(div), "absolute");
    }

    #[test]
    fn test_click_bubbles_until_stopped() {
        let doc = document();
        let root = doc.document_element();
        let parent = doc.create_element("div");
        let button = doc.create_element("button");
        doc.append_child(root, parent);
        doc.append_child(parent, button);

        let parent_hits = Rc::new(Cell::new(0));
        let hits = Rc::clone(&parent_hits);
        doc.add_event_listener(
            parent,
            EventKind::Click,
            Rc::new(move |_: &Document, _: &mut Event| hits.set(hits.get() + 1)),
        );

        doc.click(button);
        assert_eq!(parent_hits.get(), 1);

        doc.add_event_listener(
            button,
            EventKind::Click,
            Rc::new(|_: &Document, event: &mut Event| {
                event.prevent_default();
                event.stop_propagation();
            }),
        );
        let event = doc.click(button);
        assert!(event.default_prevented());
        assert!(event.propagation_stopped());
        assert_eq!(parent_hits.get(), 1);
    }

    #[test]
    fn test_disabled_element_ignores_click() {
        let doc = document();
        let button = doc.create_element("button");
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        doc.add_event_listener(
            button,
            EventKind::Click,
            Rc::new(move |_: &Document, _: &mut Event| counter.set(counter.get() + 1)),
        );

        doc.set_disabled(button, true);
        doc.click(button);
        assert_eq!(hits.get(), 0);

        doc.set_disabled(button, false);
        doc.click(button);
        assert_eq!(hits.get(), 1);
    }

    #[tokio::test]
    async fn test_observer_batches_connected_mutations_only() {
        let doc = document();
        let root = doc.document_element();
        let mut observer = doc.observe();

        let detached = doc.create_element("div");
        let video = doc.create_element("video");
        doc.append_child(detached, video);

        doc.append_child(root, detached);
        let other = doc.create_element("p");
        doc.append_child(root, other);

        let batch = observer.next_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].added_nodes, vec![detached]);
        assert_eq!(batch[1].added_nodes, vec![other]);

        doc.remove_child(root, other);
        let batch = observer.next_batch().await.unwrap();
        assert_eq!(batch[0].removed_nodes, vec![other]);
    }

    #[test]
    fn test_append_child_rejects_cycles() {
        let doc = document();
        let root = doc.document_element();
        let outer = doc.create_element("div");
        let inner = doc.create_element("span");
        assert!(doc.append_child(root, outer));
        assert!(doc.append_child(outer, inner));

        assert!(!doc.append_child(inner, outer));
        assert!(!doc.append_child(outer, outer));
        assert!(!doc.append_child(inner, root));

        assert_eq!(doc.parent_element(outer), Some(root));
        assert_eq!(doc.parent_element(inner), Some(outer));
        assert_eq!(doc.query_all(root, "span"), vec![inner]);
    }
}
