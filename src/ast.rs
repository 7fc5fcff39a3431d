//! The tree handed back to the caller after a match.

use std::{ops::Range, sync::Arc};

/// One matched subtree.
///
/// A node owns its children outright; dropping a node drops its whole subtree, children first.
/// Nodes are never shared between parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) tag: Option<Arc<str>>,
    pub(crate) value: Option<Arc<str>>,
    pub(crate) children: Vec<AstNode>,
}

impl AstNode {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            tag: None,
            value: None,
            children: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(Arc::from(tag));
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(Arc::from(value));
        self
    }

    pub fn with_child(mut self, child: AstNode) -> Self {
        self.children.push(child);
        self
    }

    /// Byte offsets into the input, end exclusive.
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &[AstNode] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The slice of `input` this node covers, or `None` if the span doesn't fit in it.
    pub fn text<'i>(&self, input: &'i [u8]) -> Option<&'i [u8]> {
        input.get(self.span())
    }

    /// This node and everything under it, depth-first, parents before children.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { todo: vec![self] }
    }

    /// First node in [`descendants`](Self::descendants) order with this tag.
    pub fn find_tag(&self, tag: &str) -> Option<&AstNode> {
        self.descendants().find(|node| node.tag() == Some(tag))
    }

    /// How many nodes this subtree has, itself included.
    pub fn node_count(&self) -> usize {
        self.descendants().count()
    }
}

pub struct Descendants<'a> {
    todo: Vec<&'a AstNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a AstNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.todo.pop()?;
        // reversed so the leftmost child comes out first
        self.todo.extend(node.children.iter().rev());
        Some(node)
    }
}

#[test]
fn walk_order() {
    use itertools::Itertools;

    let tree = AstNode::new(0, 5)
        .with_tag("Sum")
        .with_child(AstNode::new(0, 1).with_tag("Int"))
        .with_child(AstNode::new(1, 2).with_tag("Plus"))
        .with_child(
            AstNode::new(2, 5)
                .with_tag("Paren")
                .with_child(AstNode::new(3, 4).with_tag("Int")),
        );

    let tags = tree.descendants().filter_map(AstNode::tag).collect_vec();
    assert_eq!(tags, ["Sum", "Int", "Plus", "Paren", "Int"]);
    assert_eq!(tree.node_count(), 5);
    assert_eq!(tree.find_tag("Paren").map(AstNode::span), Some(2..5));
    assert!(tree.find_tag("Minus").is_none());
    assert_eq!(tree.children()[0].text(b"1+(2)"), Some(&b"1"[..]));
    assert_eq!(AstNode::new(4, 9).text(b"1+(2)"), None);
}
