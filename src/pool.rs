//! Working memory for a run.
//!
//! Nodes built while parsing live here and are referred to by [`NodeId`]. Nothing is ever freed
//! one at a time: a subtree abandoned by backtracking just sits in the pool until the next
//! [`MemoryPool::reset`]. When a run matches, the winning tree is copied out into owned
//! [`AstNode`]s and the pool can be reset for the next run.

use std::{ops::Range, sync::Arc};

use crate::{ast::AstNode, error::RunError};

/// Upper bound on how much a bytecode's pool size hint is allowed to preallocate.
const MAX_PREALLOCATED_NODES: usize = 1 << 20;

/// Id of the `len`th node, if ids can still count that high.
fn next_id(len: usize) -> Result<NodeId, RunError> {
    u32::try_from(len)
        .map(NodeId)
        .map_err(|_| RunError::PoolExhausted { nodes: len })
}

/// Index of a node in a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node as the engine builds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolNode {
    pub start: usize,
    pub end: usize,
    pub tag: Option<Arc<str>>,
    pub value: Option<Arc<str>>,
    /// Range into the pool's shared child buffer.
    children: Range<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    nodes: Vec<PoolNode>,
    children: Vec<NodeId>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate room for about `hint` nodes.
    pub fn with_capacity(hint: usize) -> Self {
        let hint = hint.min(MAX_PREALLOCATED_NODES);
        Self {
            nodes: Vec::with_capacity(hint),
            children: Vec::with_capacity(hint),
        }
    }

    /// Store a node and its children (already in the pool) and hand back its id.
    ///
    /// Fails once the pool holds more nodes than a [`NodeId`] can count.
    pub fn acquire(
        &mut self,
        start: usize,
        end: usize,
        tag: Option<Arc<str>>,
        value: Option<Arc<str>>,
        children: impl IntoIterator<Item = NodeId>,
    ) -> Result<NodeId, RunError> {
        let id = next_id(self.nodes.len())?;
        let first = self.children.len();
        self.children.extend(children);
        self.nodes.push(PoolNode {
            start,
            end,
            tag,
            value,
            children: first..self.children.len(),
        });
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&PoolNode> {
        self.nodes.get(id.index())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id.index()) {
            Some(node) => &self.children[node.children.clone()],
            None => &[],
        }
    }

    /// Forget every node. Ids handed out before this are dangling afterwards.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.children.clear();
    }

    /// Number of nodes acquired since the last reset, abandoned ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy the tree rooted at `id` out of the pool.
    pub fn finalize(&self, id: NodeId) -> Option<AstNode> {
        let node = self.get(id)?;
        let children = self
            .children(id)
            .iter()
            .map(|&child| self.finalize(child))
            .collect::<Option<Vec<_>>>()?;
        Some(AstNode {
            start: node.start,
            end: node.end,
            tag: node.tag.clone(),
            value: node.value.clone(),
            children,
        })
    }
}

#[test]
fn acquire_and_finalize() {
    let mut pool = MemoryPool::with_capacity(4);
    let tag: Arc<str> = Arc::from("Digit");
    let a = pool.acquire(0, 1, Some(tag.clone()), None, None).unwrap();
    let b = pool.acquire(1, 2, Some(tag), None, None).unwrap();
    let root = pool
        .acquire(0, 2, None, Some(Arc::from("12")), vec![a, b])
        .unwrap();

    assert_eq!(pool.len(), 3);
    assert_eq!(pool.children(root), &[a, b]);
    assert!(pool.children(a).is_empty());

    let tree = pool.finalize(root).unwrap();
    assert_eq!(tree.span(), 0..2);
    assert_eq!(tree.value(), Some("12"));
    assert_eq!(tree.child_count(), 2);
    assert_eq!(tree.children()[1].tag(), Some("Digit"));

    pool.reset();
    assert!(pool.is_empty());
    assert!(pool.finalize(root).is_none());
}

#[test]
fn ids_stop_at_u32() {
    assert_eq!(next_id(7), Ok(NodeId(7)));
    assert_eq!(next_id(u32::MAX as usize), Ok(NodeId(u32::MAX)));
    if let Ok(len) = usize::try_from(u64::from(u32::MAX) + 1) {
        assert_eq!(next_id(len), Err(RunError::PoolExhausted { nodes: len }));
    }
}
