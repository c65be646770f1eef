//! DOM Tree (arena-based allocation)
//!
//! Detached nodes stay in the arena until freed; freed slots are reused
//! by later allocations.

use crate::{DomError, Node, NodeId};

/// Arena-based DOM tree
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Node>,
    /// Vacant slots, most recently freed last
    free: Vec<NodeId>,
}

impl DomTree {
    /// Create a tree holding only the document node
    pub fn new() -> Self {
        Self { nodes: vec![Node::document()], free: Vec::new() }
    }

    /// The document node
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|n| !n.is_vacant())
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).filter(|n| !n.is_vacant())
    }

    /// Number of live nodes (attached or not)
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of arena slots, vacant ones included
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.index()] = node;
            return id;
        }
        debug_assert!(self.nodes.len() < NodeId::NONE.index(), "DOM arena exhausted");
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Release a detached node and its whole subtree back to the arena.
    /// Returns the number of slots freed. Ids of freed nodes become invalid
    /// and may be handed out again.
    pub fn free(&mut self, id: NodeId) -> Result<usize, DomError> {
        let parent = self.node(id)?.parent;
        if id == NodeId::ROOT || parent.is_valid() {
            return Err(DomError::StillAttached(id));
        }

        let mut pending = vec![id];
        let mut freed = 0;
        while let Some(current) = pending.pop() {
            pending.extend(self.children(current).map(|(child, _)| child));
            self.nodes[current.index()] = Node::vacant();
            self.free.push(current);
            freed += 1;
        }
        tracing::trace!("Freed {} node(s) from {:?}", freed, id);
        Ok(freed)
    }

    /// Allocate a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(Node::element(tag))
    }

    /// Allocate a detached text node
    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.push(Node::text(content.to_string()))
    }

    /// Allocate a detached comment
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.push(Node::comment(content.to_string()))
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.get(id).ok_or(DomError::InvalidNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.get_mut(id).ok_or(DomError::InvalidNode(id))
    }

    /// Parent of a node, if attached to one
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)
            .map(|n| n.parent)
            .filter(|p| p.is_valid())
    }

    /// Check whether `ancestor` is `node` or one of its ancestors
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Check whether a node is reachable from the document root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.get(id).is_some() && self.is_inclusive_ancestor(NodeId::ROOT, id)
    }

    /// Unlink a node from its parent and siblings
    pub fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
        let (parent, prev, next) = {
            let node = self.node(id)?;
            (node.parent, node.prev_sibling, node.next_sibling)
        };
        if !parent.is_valid() {
            return Ok(());
        }

        if prev.is_valid() {
            self.node_mut(prev)?.next_sibling = next;
        } else {
            self.node_mut(parent)?.first_child = next;
        }
        if next.is_valid() {
            self.node_mut(next)?.prev_sibling = prev;
        } else {
            self.node_mut(parent)?.last_child = prev;
        }

        let node = self.node_mut(id)?;
        node.parent = NodeId::NONE;
        node.prev_sibling = NodeId::NONE;
        node.next_sibling = NodeId::NONE;
        Ok(())
    }

    /// Insert `child` under `parent` before `reference` (append if NONE)
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) -> Result<(), DomError> {
        self.node(parent)?;
        self.node(child)?;
        if child == NodeId::ROOT || self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if reference.is_valid() && self.parent(reference) != Some(parent) {
            return Err(DomError::HierarchyRequest { parent, child: reference });
        }
        if reference == child {
            return Ok(());
        }

        self.detach(child)?;

        let prev = if reference.is_valid() {
            self.node(reference)?.prev_sibling
        } else {
            self.node(parent)?.last_child
        };

        {
            let node = self.node_mut(child)?;
            node.parent = parent;
            node.prev_sibling = prev;
            node.next_sibling = reference;
        }
        if prev.is_valid() {
            self.node_mut(prev)?.next_sibling = child;
        } else {
            self.node_mut(parent)?.first_child = child;
        }
        if reference.is_valid() {
            self.node_mut(reference)?.prev_sibling = child;
        } else {
            self.node_mut(parent)?.last_child = child;
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, NodeId::NONE)
    }

    /// Insert `child` as the first child of `parent`
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let first = self.node(parent)?.first_child;
        self.insert_before(parent, child, first)
    }

    /// Detach every child of a node
    pub fn remove_children(&mut self, parent: NodeId) -> Result<(), DomError> {
        loop {
            let first = self.node(parent)?.first_child;
            if !first.is_valid() {
                return Ok(());
            }
            self.detach(first)?;
        }
    }

    /// Iterate over the direct children of a node
    pub fn children(&self, parent: NodeId) -> Children<'_> {
        let next = self.get(parent)
            .map(|n| n.first_child)
            .unwrap_or(NodeId::NONE);
        Children { tree: self, next }
    }

    /// Ancestors of a node, nearest first (excluding the node itself)
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// Depth-first search below `start` (excluding `start`)
    pub fn find_descendant(&self, start: NodeId, pred: &impl Fn(&Node) -> bool) -> Option<NodeId> {
        for (id, node) in self.children(start) {
            if pred(node) {
                return Some(id);
            }
            if let Some(found) = self.find_descendant(id, pred) {
                return Some(found);
            }
        }
        None
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the children of a node
pub struct Children<'a> {
    tree: &'a DomTree,
    next: NodeId,
}

impl<'a> Iterator for Children<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.next.is_valid() {
            return None;
        }
        let id = self.next;
        let node = self.tree.get(id)?;
        self.next = node.next_sibling;
        Some((id, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_ids(tree: &DomTree, parent: NodeId) -> Vec<NodeId> {
        tree.children(parent).map(|(id, _)| id).collect()
    }

    #[test]
    fn test_append_and_prepend() {
        let mut tree = DomTree::new();
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        let c = tree.create_element("c");

        tree.append_child(tree.root(), a).unwrap();
        tree.append_child(tree.root(), b).unwrap();
        tree.prepend_child(tree.root(), c).unwrap();

        assert_eq!(child_ids(&tree, tree.root()), vec![c, a, b]);
        assert_eq!(tree.parent(a), Some(NodeId::ROOT));
    }

    #[test]
    fn test_detach_middle_child() {
        let mut tree = DomTree::new();
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        let c = tree.create_element("c");
        for id in [a, b, c] {
            tree.append_child(tree.root(), id).unwrap();
        }

        tree.detach(b).unwrap();
        assert_eq!(child_ids(&tree, tree.root()), vec![a, c]);
        assert!(!tree.is_attached(b));
        assert!(tree.is_attached(c));

        // Detaching twice is harmless
        tree.detach(b).unwrap();
    }

    #[test]
    fn test_cannot_insert_ancestor() {
        let mut tree = DomTree::new();
        let outer = tree.create_element("div");
        let inner = tree.create_element("span");
        tree.append_child(tree.root(), outer).unwrap();
        tree.append_child(outer, inner).unwrap();

        assert!(matches!(
            tree.append_child(inner, outer),
            Err(DomError::HierarchyRequest { .. })
        ));
        assert!(tree.append_child(inner, NodeId::ROOT).is_err());
    }

    #[test]
    fn test_move_between_parents() {
        let mut tree = DomTree::new();
        let p1 = tree.create_element("div");
        let p2 = tree.create_element("div");
        let child = tree.create_element("p");
        tree.append_child(p1, child).unwrap();
        tree.append_child(p2, child).unwrap();

        assert!(child_ids(&tree, p1).is_empty());
        assert_eq!(child_ids(&tree, p2), vec![child]);
    }

    #[test]
    fn test_remove_children() {
        let mut tree = DomTree::new();
        let parent = tree.create_element("ul");
        for _ in 0..3 {
            let li = tree.create_element("li");
            tree.append_child(parent, li).unwrap();
        }
        tree.remove_children(parent).unwrap();
        assert_eq!(tree.children(parent).count(), 0);
    }

    #[test]
    fn test_free_reuses_slots() {
        let mut tree = DomTree::new();
        let list = tree.create_element("ul");
        let item = tree.create_element("li");
        tree.append_child(list, item).unwrap();
        assert_eq!(tree.len(), 3);

        assert_eq!(tree.free(list).unwrap(), 2);
        assert_eq!(tree.len(), 1);
        assert!(tree.get(list).is_none());
        assert!(tree.get(item).is_none());

        let a = tree.create_element("a");
        let b = tree.create_element("b");
        assert!([list, item].contains(&a));
        assert!([list, item].contains(&b));
        assert_eq!(tree.slot_count(), 3);
        assert_eq!(tree.get(a).unwrap().as_element().unwrap().tag, "a");
        assert_eq!(tree.children(a).count(), 0);
    }

    #[test]
    fn test_free_rejects_attached_nodes() {
        let mut tree = DomTree::new();
        let a = tree.create_element("a");
        tree.append_child(tree.root(), a).unwrap();

        assert_eq!(tree.free(a), Err(DomError::StillAttached(a)));
        assert_eq!(tree.free(NodeId::ROOT), Err(DomError::StillAttached(NodeId::ROOT)));

        tree.detach(a).unwrap();
        assert_eq!(tree.free(a), Ok(1));
        assert_eq!(tree.free(a), Err(DomError::InvalidNode(a)));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let mut tree = DomTree::new();
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        tree.append_child(tree.root(), a).unwrap();
        tree.append_child(a, b).unwrap();
        assert_eq!(tree.ancestors(b), vec![a, NodeId::ROOT]);
    }
}
