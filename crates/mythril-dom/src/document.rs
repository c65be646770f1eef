//! Document - High-level document API

use crate::{DomError, DomTree, EventListeners, NodeId};

/// HTML Document
#[derive(Debug)]
pub struct Document {
    /// The DOM tree
    pub tree: DomTree,
    /// Registered event listeners
    pub listeners: EventListeners,
    /// Document URL
    url: String,
    /// Cached reference to <html> element
    html_element: NodeId,
    /// Cached reference to <head> element
    head_element: NodeId,
    /// Cached reference to <body> element
    body_element: NodeId,
}

impl Document {
    /// Create a new document with `<html>`, `<head>` and `<body>`
    pub fn new(url: &str) -> Self {
        let mut tree = DomTree::new();

        let html = tree.create_element("html");
        let head = tree.create_element("head");
        let body = tree.create_element("body");

        // Freshly created nodes under a fresh root cannot violate hierarchy rules
        let _ = tree.append_child(tree.root(), html);
        let _ = tree.append_child(html, head);
        let _ = tree.append_child(html, body);

        Self {
            tree,
            listeners: EventListeners::new(),
            url: url.to_string(),
            html_element: html,
            head_element: head,
            body_element: body,
        }
    }

    /// Get document URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get <html> element
    pub fn document_element(&self) -> NodeId {
        self.html_element
    }

    /// Get <head> element
    pub fn head(&self) -> NodeId {
        self.head_element
    }

    /// Get <body> element
    pub fn body(&self) -> NodeId {
        self.body_element
    }

    /// Get an attached element by ID
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.tree.find_descendant(self.tree.root(), &|node| {
            node.as_element()
                .and_then(|e| e.id.as_deref())
                .is_some_and(|elem_id| elem_id == id)
        })
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.tree.create_element(tag)
    }

    /// Create an element with an id and append it to `parent`
    pub fn append_element_with_id(&mut self, parent: NodeId, tag: &str, id: &str) -> Result<NodeId, DomError> {
        let elem = self.tree.create_element(tag);
        self.set_attribute(elem, "id", id)?;
        self.tree.append_child(parent, elem)?;
        Ok(elem)
    }

    /// Append a child node
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.tree.append_child(parent, child)
    }

    /// Insert a child as the first child of `parent`
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.tree.prepend_child(parent, child)
    }

    /// Detach a node from the document
    pub fn remove(&mut self, node: NodeId) -> Result<(), DomError> {
        tracing::trace!("Removing node {:?}", node);
        self.tree.detach(node)
    }

    /// Detach a node and free it with its subtree. Listeners registered on
    /// the freed nodes are dropped.
    pub fn dispose(&mut self, node: NodeId) -> Result<(), DomError> {
        self.tree.detach(node)?;
        let mut subtree = vec![node];
        let mut i = 0;
        while i < subtree.len() {
            subtree.extend(self.tree.children(subtree[i]).map(|(child, _)| child));
            i += 1;
        }
        self.tree.free(node)?;
        for id in subtree {
            self.listeners.clear_node(id);
        }
        Ok(())
    }

    /// Lowercased tag name of an element
    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.tree.get(node)?.as_element().map(|e| e.tag.as_str())
    }

    /// Get an attribute of an element
    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.tree.get(node)?.as_element()?.get_attr(name)
    }

    /// Set an attribute on an element
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.tree.get_mut(node)
            .ok_or(DomError::InvalidNode(node))?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(node))?
            .set_attr(name, value);
        Ok(())
    }

    /// Remove an attribute from an element
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<Option<String>, DomError> {
        Ok(self.tree.get_mut(node)
            .ok_or(DomError::InvalidNode(node))?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(node))?
            .remove_attr(name))
    }

    /// Concatenated text of a node's descendants
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let Some(text) = self.tree.get(node).and_then(|n| n.as_text()) {
            out.push_str(text);
            return;
        }
        for (child, _) in self.tree.children(node) {
            self.collect_text(child, out);
        }
    }

    /// Replace all children with a single text node
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        let children: Vec<NodeId> = self.tree.children(node).map(|(id, _)| id).collect();
        for child in children {
            self.dispose(child)?;
        }
        if !text.is_empty() {
            let text_node = self.tree.create_text(text);
            self.tree.append_child(node, text_node)?;
        }
        Ok(())
    }

    /// Access the DOM tree
    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    /// Access the DOM tree mutably
    pub fn tree_mut(&mut self) -> &mut DomTree {
        &mut self.tree
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new("about:blank")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_skeleton() {
        let doc = Document::new("http://example.com/");
        assert_eq!(doc.url(), "http://example.com/");
        assert_eq!(doc.tag_name(doc.document_element()), Some("html"));
        assert_eq!(doc.tag_name(doc.head()), Some("head"));
        assert_eq!(doc.tag_name(doc.body()), Some("body"));
        assert_eq!(doc.tree().parent(doc.head()), Some(doc.document_element()));
    }

    #[test]
    fn test_get_element_by_id() {
        let mut doc = Document::default();
        let body = doc.body();
        let outer = doc.append_element_with_id(body, "div", "outer").unwrap();
        let inner = doc.append_element_with_id(outer, "span", "inner").unwrap();

        assert_eq!(doc.get_element_by_id("outer"), Some(outer));
        assert_eq!(doc.get_element_by_id("inner"), Some(inner));
        assert_eq!(doc.get_element_by_id("missing"), None);
    }

    #[test]
    fn test_detached_element_not_found_by_id() {
        let mut doc = Document::default();
        let body = doc.body();
        let elem = doc.append_element_with_id(body, "div", "gone").unwrap();
        doc.remove(elem).unwrap();
        assert_eq!(doc.get_element_by_id("gone"), None);
    }

    #[test]
    fn test_dispose_frees_subtree_and_listeners() {
        let mut doc = Document::default();
        let head = doc.head();
        let before = doc.tree().len();

        let script = doc.create_element("script");
        doc.set_attribute(script, "src", "http://api.test/m?data=%22x%22").unwrap();
        doc.prepend_child(head, script).unwrap();
        doc.listeners.add(script, "load", std::rc::Rc::new(|_: &mut crate::Event| {}));

        doc.dispose(script).unwrap();
        assert_eq!(doc.tree().len(), before);
        assert_eq!(doc.tree().children(head).count(), 0);
        assert!(doc.listeners.is_empty());
        assert_eq!(doc.get_attribute(script, "src"), None);

        let reused = doc.create_element("script");
        assert_eq!(reused, script);
        assert_eq!(doc.get_attribute(reused, "src"), None);
    }

    #[test]
    fn test_text_content_roundtrip() {
        let mut doc = Document::default();
        let body = doc.body();
        let p = doc.append_element_with_id(body, "p", "msg").unwrap();

        doc.set_text_content(p, "hello").unwrap();
        assert_eq!(doc.text_content(p), "hello");

        doc.set_text_content(p, "bye").unwrap();
        assert_eq!(doc.text_content(p), "bye");
        assert_eq!(doc.tree().children(p).count(), 1);
        assert_eq!(doc.tree().len(), doc.tree().slot_count());
    }

    #[test]
    fn test_set_attribute_on_text_fails() {
        let mut doc = Document::default();
        let text = doc.tree_mut().create_text("x");
        assert_eq!(
            doc.set_attribute(text, "class", "y"),
            Err(DomError::NotAnElement(text))
        );
    }
}
