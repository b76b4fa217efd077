//! Placeholder identification.

use crate::expression::Expression;
use crate::tree::OutputTree;
use crate::ImarkdownConfig;

/// Attribute holding the expression text on a placeholder node.
pub const VALUE_ATTR: &str = "value";

/// Decides which output nodes are placeholders.
///
/// A node is a placeholder when it carries the marker class, whatever its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMatcher {
    class: String,
}

impl PlaceholderMatcher {
    /// Match nodes carrying `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self { class: class.into() }
    }

    /// Match nodes carrying the configured placeholder class.
    pub fn from_config(config: &ImarkdownConfig) -> Self {
        Self::new(&config.placeholder_class)
    }

    /// The marker class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Check whether `node` is a placeholder.
    pub fn matches<T: OutputTree>(&self, tree: &T, node: T::NodeId) -> bool {
        tree.has_class(node, &self.class)
    }

    /// Expression text of a placeholder. A missing value is an empty expression.
    pub fn expression_text<T: OutputTree>(&self, tree: &T, node: T::NodeId) -> String {
        tree.attr(node, VALUE_ATTR).unwrap_or_default().to_string()
    }
}

/// A placeholder node paired with the expression it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<N> {
    /// The expression, numbered in document order.
    pub expression: Expression,
    /// The node to replace once a result arrives.
    pub node: N,
}

/// Collect every placeholder in `tree` in document order.
///
/// Reads the tree only, so running it twice without mutating the tree in
/// between yields identical results.
pub fn identify_placeholders<T: OutputTree>(
    tree: &T,
    matcher: &PlaceholderMatcher,
) -> Vec<Placeholder<T::NodeId>> {
    tree.descendants()
        .into_iter()
        .filter(|node| matcher.matches(tree, *node))
        .enumerate()
        .map(|(ordinal, node)| Placeholder {
            expression: Expression::new(ordinal, matcher.expression_text(tree, node)),
            node,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Fragment, NodeTree};

    fn placeholder(text: Option<&str>) -> Fragment {
        let fragment = Fragment::element("input")
            .with_attr("type", "hidden")
            .with_class("jupyter-imarkdown-expr");
        match text {
            Some(text) => fragment.with_attr("value", text),
            None => fragment,
        }
    }

    #[test]
    fn test_document_order_across_blocks() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(
            root,
            Fragment::element("p")
                .with_child(placeholder(Some("a")))
                .with_child(Fragment::element("em").with_child(placeholder(Some("b")))),
        );
        tree.append(root, Fragment::element("p").with_child(placeholder(Some("c"))));

        let found = identify_placeholders(&tree, &PlaceholderMatcher::new("jupyter-imarkdown-expr"));
        let texts: Vec<(usize, &str)> = found
            .iter()
            .map(|p| (p.expression.ordinal, p.expression.text.as_str()))
            .collect();

        assert_eq!(texts, vec![(0, "a"), (1, "b"), (2, "c")]);
    }

    #[test]
    fn test_missing_value_is_empty_expression() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(root, placeholder(None));

        let found = identify_placeholders(&tree, &PlaceholderMatcher::new("jupyter-imarkdown-expr"));
        assert_eq!(found[0].expression.text, "");
    }

    #[test]
    fn test_class_only_predicate() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(root, Fragment::element("span").with_class("jupyter-imarkdown-expr"));
        tree.append(root, Fragment::element("input").with_class("other"));

        let found = identify_placeholders(&tree, &PlaceholderMatcher::new("jupyter-imarkdown-expr"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_idempotent() {
        let mut tree = NodeTree::new();
        let root = tree.root();
        tree.append(root, placeholder(Some("x")));
        tree.append(root, placeholder(Some("y")));
        let matcher = PlaceholderMatcher::new("jupyter-imarkdown-expr");

        assert_eq!(
            identify_placeholders(&tree, &matcher),
            identify_placeholders(&tree, &matcher)
        );
    }
}
