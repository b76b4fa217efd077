//! Output tree abstraction.
//!
//! The reconciler and the placeholder identifier never assume a real DOM:
//! they work against [`OutputTree`], and the concrete tree type is injected
//! by whoever owns the cell. [`NodeTree`] is the arena implementation used by
//! the reference host and the CLI.

use std::fmt::Debug;
use std::hash::Hash;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];

/// An owned subtree waiting to be inserted into an output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// An element with attributes and children.
    Element {
        /// Tag name.
        tag: String,
        /// Attributes in insertion order.
        attrs: Vec<(String, String)>,
        /// Child fragments.
        children: Vec<Fragment>,
    },
    /// Plain text, escaped on serialization.
    Text(String),
    /// Markup emitted verbatim. Only trusted renderers produce this.
    Raw(String),
}

impl Fragment {
    /// Create an empty element.
    pub fn element(tag: impl Into<String>) -> Self {
        Fragment::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create a text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text(text.into())
    }

    /// Create a raw markup fragment.
    pub fn raw(markup: impl Into<String>) -> Self {
        Fragment::Raw(markup.into())
    }

    /// Set an attribute, replacing any previous value. No-op on non-elements.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Fragment::Element { attrs, .. } = &mut self {
            set_attr(attrs, name.into(), value.into());
        }
        self
    }

    /// Append a class to the `class` attribute. No-op on non-elements.
    pub fn with_class(mut self, class: &str) -> Self {
        if let Fragment::Element { attrs, .. } = &mut self {
            let classes = match attrs.iter().find(|(k, _)| k == "class") {
                Some((_, existing)) if existing.split_whitespace().any(|c| c == class) => return self,
                Some((_, existing)) if !existing.is_empty() => format!("{} {}", existing, class),
                _ => class.to_string(),
            };
            set_attr(attrs, "class".to_string(), classes);
        }
        self
    }

    /// Append a child. No-op on non-elements.
    pub fn with_child(mut self, child: Fragment) -> Self {
        if let Fragment::Element { children, .. } = &mut self {
            children.push(child);
        }
        self
    }

    /// Get an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            Fragment::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Check whether the element carries a class.
    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Concatenated text of this fragment and its descendants.
    pub fn text_content(&self) -> String {
        match self {
            Fragment::Element { children, .. } => {
                children.iter().map(Fragment::text_content).collect()
            }
            Fragment::Text(text) | Fragment::Raw(text) => text.clone(),
        }
    }
}

fn set_attr(attrs: &mut Vec<(String, String)>, name: String, value: String) {
    match attrs.iter_mut().find(|(k, _)| *k == name) {
        Some(slot) => slot.1 = value,
        None => attrs.push((name, value)),
    }
}

/// A live output tree the cell renders into.
///
/// Node ids are non-owning handles: they stay valid after a node is detached
/// but no longer reach the root.
pub trait OutputTree: Send + Sync + 'static {
    /// Handle to a node in this tree.
    type NodeId: Copy + Eq + Hash + Debug + Send + Sync;

    /// The container every rendered block is appended to.
    fn root(&self) -> Self::NodeId;

    /// Children of a node in document order.
    fn children(&self, node: Self::NodeId) -> &[Self::NodeId];

    /// Attribute value of an element node.
    fn attr(&self, node: Self::NodeId, name: &str) -> Option<&str>;

    /// Check whether an element node carries a class.
    fn has_class(&self, node: Self::NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Whether the node is still reachable from the root.
    fn is_attached(&self, node: Self::NodeId) -> bool;

    /// Materialize a fragment as the last child of `parent`.
    fn append(&mut self, parent: Self::NodeId, fragment: Fragment) -> Self::NodeId;

    /// Remove every child of `node`, moving them to the holding area.
    fn clear(&mut self, node: Self::NodeId);

    /// Replace `node` in its parent with a new subtree.
    ///
    /// Returns the id of the new node, or `None` when `node` has no parent.
    /// The replaced node is moved to the holding area.
    fn replace(&mut self, node: Self::NodeId, fragment: Fragment) -> Option<Self::NodeId>;

    /// Detach a node from its parent and move it to the holding area.
    fn detach(&mut self, node: Self::NodeId);

    /// Dispose of every subtree in the holding area.
    ///
    /// Returns how many nodes were freed. Ids of freed nodes stop resolving.
    fn release_holding(&mut self) -> usize;

    /// All nodes below the root, depth-first pre-order.
    fn descendants(&self) -> Vec<Self::NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<Self::NodeId> = self.children(self.root()).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }
}

/// Handle to a node in a [`NodeTree`].
///
/// Slots are reused after release; the generation tells a stale handle
/// apart from the node now living in its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// The payload of a [`NodeTree`] node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// An element with tag and attributes.
    Element {
        /// Tag name.
        tag: String,
        /// Attributes in insertion order.
        attrs: Vec<(String, String)>,
    },
    /// Plain text.
    Text(String),
    /// Verbatim markup.
    Raw(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    generation: u32,
    live: bool,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed output tree.
///
/// Detached and cleared nodes are parked in the holding area until
/// [`OutputTree::release_holding`] frees them and returns their slots to the
/// free list.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<NodeData>,
    free_list: Vec<u32>,
    root: NodeId,
    holding: Vec<NodeId>,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// Create a tree with a `div` root.
    pub fn new() -> Self {
        Self::with_root("div")
    }

    /// Create a tree with a custom root tag.
    pub fn with_root(tag: impl Into<String>) -> Self {
        let root = NodeData {
            generation: 0,
            live: true,
            kind: NodeKind::Element {
                tag: tag.into(),
                attrs: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            free_list: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            holding: Vec::new(),
        }
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Whether the tree holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    /// Number of allocated slots, live or free.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `node` still refers to a live node.
    pub fn contains(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    /// Get the payload of a node.
    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.get(node).map(|n| &n.kind)
    }

    /// Get the tag of an element node.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    /// Get the parent of a node.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.get(node).and_then(|n| n.parent)
    }

    /// Nodes parked by `clear`, `detach` or `replace`.
    pub fn holding(&self) -> &[NodeId] {
        &self.holding
    }

    /// Concatenated text below a node.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.get(node) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) | NodeKind::Raw(text) => out.push_str(text),
            NodeKind::Element { .. } => {
                for child in &data.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Serialize the children of the root as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.write_html(*child, &mut out);
        }
        out
    }

    /// Serialize a single node as HTML.
    pub fn node_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(data) = self.get(node) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Raw(markup) => out.push_str(markup),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in &data.children {
                    self.write_html(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    fn get(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes
            .get(node.index as usize)
            .filter(|n| n.live && n.generation == node.generation)
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut NodeData> {
        self.nodes
            .get_mut(node.index as usize)
            .filter(|n| n.live && n.generation == node.generation)
    }

    fn build(&mut self, fragment: Fragment, parent: Option<NodeId>) -> NodeId {
        match fragment {
            Fragment::Element {
                tag,
                attrs,
                children,
            } => {
                let id = self.alloc(NodeKind::Element { tag, attrs }, parent);
                let child_ids: Vec<NodeId> = children
                    .into_iter()
                    .map(|child| self.build(child, Some(id)))
                    .collect();
                if let Some(data) = self.get_mut(id) {
                    data.children = child_ids;
                }
                id
            }
            Fragment::Text(text) => self.alloc(NodeKind::Text(text), parent),
            Fragment::Raw(markup) => self.alloc(NodeKind::Raw(markup), parent),
        }
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.nodes[index as usize];
            slot.generation += 1;
            slot.live = true;
            slot.kind = kind;
            slot.parent = parent;
            slot.children.clear();
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(NodeData {
            generation: 0,
            live: true,
            kind,
            parent,
            children: Vec::new(),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Free `node` and everything below it.
    fn free(&mut self, node: NodeId) -> usize {
        let mut freed = 0;
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let Some(data) = self.get_mut(current) else {
                continue;
            };
            data.live = false;
            data.parent = None;
            data.kind = NodeKind::Text(String::new());
            stack.append(&mut data.children);
            self.free_list.push(current.index);
            freed += 1;
        }
        freed
    }

    fn park(&mut self, node: NodeId) {
        if !self.holding.contains(&node) {
            self.holding.push(node);
        }
    }
}

impl OutputTree for NodeTree {
    type NodeId = NodeId;

    fn root(&self) -> NodeId {
        self.root
    }

    fn children(&self, node: NodeId) -> &[NodeId] {
        self.get(node).map_or(&[], |n| n.children.as_slice())
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    fn is_attached(&self, node: NodeId) -> bool {
        if !self.contains(node) {
            return false;
        }
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn append(&mut self, parent: NodeId, fragment: Fragment) -> NodeId {
        let id = self.build(fragment, Some(parent));
        if let Some(data) = self.get_mut(parent) {
            data.children.push(id);
        }
        id
    }

    fn clear(&mut self, node: NodeId) {
        let Some(data) = self.get_mut(node) else {
            return;
        };
        for child in std::mem::take(&mut data.children) {
            if let Some(child_data) = self.get_mut(child) {
                child_data.parent = None;
            }
            self.park(child);
        }
    }

    fn replace(&mut self, node: NodeId, fragment: Fragment) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let index = self.children(parent).iter().position(|c| *c == node)?;
        let id = self.build(fragment, Some(parent));
        self.get_mut(parent)?.children[index] = id;
        self.get_mut(node)?.parent = None;
        self.park(node);
        Some(id)
    }

    fn detach(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        let Some(data) = self.get_mut(node) else {
            return;
        };
        if let Some(parent) = data.parent.take() {
            if let Some(parent_data) = self.get_mut(parent) {
                parent_data.children.retain(|c| *c != node);
            }
        }
        self.park(node);
    }

    fn release_holding(&mut self) -> usize {
        let mut freed = 0;
        for node in std::mem::take(&mut self.holding) {
            if self.contains(node) && self.parent(node).is_none() {
                freed += self.free(node);
            }
        }
        freed
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a value for use inside a double-quoted HTML attribute.
pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph() -> Fragment {
        Fragment::element("p")
            .with_child(Fragment::text("a "))
            .with_child(Fragment::element("input").with_class("marker").with_attr("value", "x"))
            .with_child(Fragment::text(" b"))
    }

    #[test]
    fn test_append_and_serialize() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(root, paragraph());

        assert_eq!(
            tree.to_html(),
            "<p>a <input class=\"marker\" value=\"x\"> b</p>"
        );
    }

    #[test]
    fn test_descendants_are_preorder() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let p = tree.append(root, paragraph());
        let order = tree.descendants();

        assert_eq!(order[0], p);
        assert_eq!(order.len(), 4);
        assert_eq!(tree.tag(order[2]), Some("input"));
    }

    #[test]
    fn test_replace_parks_old_node() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(root, paragraph());
        let input = tree.descendants()[2];

        let new = tree.replace(input, Fragment::element("span").with_child(Fragment::text("2")));
        let new = new.unwrap();

        assert!(tree.is_attached(new));
        assert!(!tree.is_attached(input));
        assert_eq!(tree.holding(), &[input]);
        assert_eq!(tree.to_html(), "<p>a <span>2</span> b</p>");
    }

    #[test]
    fn test_clear_orphans_children() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let p = tree.append(root, paragraph());
        tree.clear(root);

        assert!(!tree.is_attached(p));
        assert!(tree.replace(p, Fragment::text("x")).is_none());
        assert_eq!(tree.holding(), &[p]);
        assert_eq!(tree.to_html(), "");
    }

    #[test]
    fn test_release_frees_parked_subtrees() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let p = tree.append(root, paragraph());
        let input = tree.descendants()[2];
        tree.clear(root);

        assert_eq!(tree.release_holding(), 4);
        assert!(tree.holding().is_empty());
        assert!(tree.is_empty());
        assert!(!tree.contains(p));
        assert_eq!(tree.attr(input, "value"), None);
    }

    #[test]
    fn test_freed_slots_are_reused_with_new_generation() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let old = tree.append(root, Fragment::text("a"));
        tree.clear(root);
        tree.release_holding();

        let new = tree.append(root, Fragment::text("b"));

        assert_ne!(old, new);
        assert_eq!(tree.capacity(), 2);
        assert!(!tree.is_attached(old));
        assert_eq!(tree.to_html(), "b");
    }

    #[test]
    fn test_release_skips_nodes_still_attached() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        let p = tree.append(root, paragraph());
        let input = tree.descendants()[2];
        tree.detach(input);
        tree.detach(input);

        assert_eq!(tree.holding(), &[input]);
        assert_eq!(tree.release_holding(), 1);
        assert!(tree.is_attached(p));
        assert_eq!(tree.to_html(), "<p>a  b</p>");
    }

    #[test]
    fn test_escaping() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(
            root,
            Fragment::element("span")
                .with_attr("title", "\"q\" & <t>")
                .with_child(Fragment::text("1 < 2")),
        );

        assert_eq!(
            tree.to_html(),
            "<span title=\"&quot;q&quot; &amp; &lt;t&gt;\">1 &lt; 2</span>"
        );
    }

    #[test]
    fn test_fragment_classes() {
        let fragment = Fragment::element("span").with_class("a").with_class("b").with_class("a");
        assert_eq!(fragment.attr("class"), Some("a b"));
        assert!(fragment.has_class("b"));
        assert!(!Fragment::text("t").has_class("a"));
    }
}
