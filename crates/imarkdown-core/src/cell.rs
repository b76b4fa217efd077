//! Markdown cells carrying inline expressions.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::expression::Expression;
use crate::gate::{GateController, RenderGate};
use crate::identify::{identify_placeholders, PlaceholderMatcher};
use crate::tree::{Fragment, NodeTree, OutputTree};

/// What the coordinator and the reconciler need from a cell.
pub trait ExpressionCell: Send {
    /// Stable cell identifier.
    fn id(&self) -> &str;

    /// Whether the cell's outputs may run untrusted renderers.
    fn trusted(&self) -> bool;

    /// Expressions found by the last identification pass, in order.
    fn expressions(&self) -> &[Expression];

    /// Gate for the most recent render.
    fn done_rendering(&self) -> RenderGate;

    /// Cell metadata.
    fn metadata(&self) -> &Map<String, Value>;

    /// Mutable cell metadata.
    fn metadata_mut(&mut self) -> &mut Map<String, Value>;

    /// Swap the node for expression `ordinal` with a rendered fragment.
    ///
    /// Returns false when there is no such expression or its node is gone.
    fn replace_expression_node(&mut self, ordinal: usize, fragment: Fragment) -> bool;
}

/// A cell shared between the render and execute flows.
pub type SharedCell<T = NodeTree> = Arc<Mutex<MarkdownCell<T>>>;

/// A Markdown cell rendered into an output tree.
#[derive(Debug)]
pub struct MarkdownCell<T: OutputTree = NodeTree> {
    id: String,
    source: String,
    rendered_source: Option<String>,
    trusted: bool,
    metadata: Map<String, Value>,
    tree: T,
    expressions: Vec<Expression>,
    nodes: Vec<T::NodeId>,
    gate: GateController,
}

impl MarkdownCell<NodeTree> {
    /// Create a cell over a fresh [`NodeTree`].
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_tree(NodeTree::new(), source)
    }
}

impl<T: OutputTree> MarkdownCell<T> {
    /// Create a cell rendering into `tree`. The id is random until set.
    pub fn with_tree(tree: T, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            rendered_source: None,
            trusted: true,
            metadata: Map::new(),
            tree,
            expressions: Vec::new(),
            nodes: Vec::new(),
            gate: GateController::new(),
        }
    }

    /// Builder: Set the cell id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: Set the trust flag.
    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Builder: Set the metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Wrap the cell for sharing between flows.
    pub fn into_shared(self) -> SharedCell<T> {
        Arc::new(Mutex::new(self))
    }

    /// Current source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replace the source. Takes effect on the next render.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    /// Set the trust flag.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    /// Whether the source changed since the last render (or never rendered).
    pub fn needs_render(&self) -> bool {
        self.rendered_source.as_deref() != Some(self.source.as_str())
    }

    /// The output tree.
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// Mutable output tree.
    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    /// Nodes currently standing for each expression.
    pub fn expression_nodes(&self) -> &[T::NodeId] {
        &self.nodes
    }

    /// Re-scan the tree for placeholders.
    ///
    /// Nodes from the previous pass that are not found again are detached.
    pub fn identify_expressions(&mut self, matcher: &PlaceholderMatcher) -> &[Expression] {
        let (expressions, nodes): (Vec<_>, Vec<_>) = identify_placeholders(&self.tree, matcher)
            .into_iter()
            .map(|p| (p.expression, p.node))
            .unzip();

        let stale: Vec<T::NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|old| !nodes.contains(old))
            .collect();
        for node in stale {
            self.tree.detach(node);
        }

        self.expressions = expressions;
        self.nodes = nodes;
        &self.expressions
    }

    /// Detach every expression node and forget the expressions.
    pub fn clear_expressions(&mut self) {
        for node in std::mem::take(&mut self.nodes) {
            self.tree.detach(node);
        }
        self.expressions.clear();
    }

    /// Open a render cycle and return the source to render.
    pub(crate) fn begin_render(&mut self) -> String {
        self.gate.reset();
        self.rendered_source = Some(self.source.clone());
        self.source.clone()
    }

    /// Close the render cycle, releasing everyone waiting on the gate.
    pub(crate) fn finish_render(&mut self) {
        self.gate.resolve();
    }
}

impl<T: OutputTree> ExpressionCell for MarkdownCell<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn trusted(&self) -> bool {
        self.trusted
    }

    fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    fn done_rendering(&self) -> RenderGate {
        self.gate.gate()
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata
    }

    fn replace_expression_node(&mut self, ordinal: usize, fragment: Fragment) -> bool {
        let Some(node) = self.nodes.get(ordinal).copied() else {
            return false;
        };
        match self.tree.replace(node, fragment) {
            Some(new) => {
                self.nodes[ordinal] = new;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(text: &str) -> Fragment {
        Fragment::element("input")
            .with_class("jupyter-imarkdown-expr")
            .with_attr("value", text)
    }

    fn matcher() -> PlaceholderMatcher {
        PlaceholderMatcher::new("jupyter-imarkdown-expr")
    }

    #[test]
    fn test_needs_render_tracks_source() {
        let mut cell = MarkdownCell::new("a");
        assert!(cell.needs_render());

        cell.begin_render();
        assert!(!cell.needs_render());

        cell.set_source("b");
        assert!(cell.needs_render());
    }

    #[test]
    fn test_identify_detaches_stale_nodes() {
        let mut cell = MarkdownCell::new("");
        let root = cell.tree().root();
        cell.tree_mut().append(root, placeholder("x"));
        cell.identify_expressions(&matcher());
        let old = cell.expression_nodes()[0];

        cell.tree_mut().clear(root);
        cell.tree_mut().append(root, placeholder("y"));
        let found = cell.identify_expressions(&matcher()).to_vec();

        assert_eq!(found, vec![Expression::new(0, "y")]);
        assert!(cell.tree().holding().contains(&old));
    }

    #[test]
    fn test_replace_expression_node() {
        let mut cell = MarkdownCell::new("");
        let root = cell.tree().root();
        cell.tree_mut().append(root, placeholder("x"));
        cell.identify_expressions(&matcher());

        assert!(cell.replace_expression_node(0, Fragment::text("2")));
        assert!(!cell.replace_expression_node(1, Fragment::text("3")));
        assert_eq!(cell.tree().to_html(), "2");
    }

    #[test]
    fn test_gate_follows_render_cycle() {
        let mut cell = MarkdownCell::new("a");
        assert!(!cell.done_rendering().is_resolved());

        cell.begin_render();
        cell.finish_render();
        assert!(cell.done_rendering().is_resolved());

        cell.begin_render();
        assert!(!cell.done_rendering().is_resolved());
    }
}
