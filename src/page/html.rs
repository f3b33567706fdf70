use super::dom::{Document, NodeId};
use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

impl Document {
    /// Builds a document from an HTML snapshot served at `location`.
    pub fn from_html(location: Url, html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let doc = Document::new(location);
        let root = doc.document_element();

        let html_root = parsed.root_element();
        copy_attributes(&doc, root, html_root);
        import_children(&doc, root, html_root);

        debug!(
            "Loaded page snapshot with {} video element(s)",
            doc.query_all(root, "video").len()
        );
        doc
    }
}

fn copy_attributes(doc: &Document, target: NodeId, element: ElementRef<'_>) {
    for (name, value) in element.value().attrs() {
        doc.set_attribute(target, name, value);
        if name == "style" {
            for declaration in value.split(';') {
                if let Some((property, value)) = declaration.split_once(':') {
                    doc.set_style(target, property.trim(), value.trim());
                }
            }
        }
    }
}

fn import_children(doc: &Document, parent: NodeId, element: ElementRef<'_>) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let node = doc.create_element(child_element.value().name());
            copy_attributes(doc, node, child_element);
            doc.append_child(parent, node);
            import_children(doc, node, child_element);
        } else if let Some(text) = child.value().as_text() {
            let node = doc.create_text(text);
            doc.append_child(parent, node);
        }
    }
}
