//! Left-balanced binary tree arithmetic over an array layout.
//!
//! Leaves sit at even node indices, parents at odd ones. A node's level is
//! the number of trailing one bits of its index; leaves are level 0. Every
//! function here is pure integer arithmetic and never touches node content.
//!
//! ```text
//!               3
//!         1           5
//!      0     2     4     6
//!     L0    L1    L2    L3
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Position of a node in the array layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIndex(u32);

/// Position of a leaf among the leaves.
///
/// Never exceeds [`LeafIndex::MAX`], so its node index always fits in a
/// `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct LeafIndex(u32);

impl LeafIndex {
    /// Highest addressable leaf position.
    pub const MAX: u32 = u32::MAX >> 1;

    /// Wrap a raw leaf position, clamped to [`Self::MAX`].
    ///
    /// No tree reaches that width, so a clamped index never names an
    /// occupied leaf.
    pub const fn new(value: u32) -> Self {
        if value > Self::MAX { Self(Self::MAX) } else { Self(value) }
    }

    /// Raw leaf position.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Node index of this leaf (`2 * leaf`).
    pub const fn node(self) -> NodeIndex {
        NodeIndex(self.0 * 2)
    }
}

impl TryFrom<u32> for LeafIndex {
    type Error = TreeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > Self::MAX {
            return Err(TreeError::LeafOutOfRange { leaf: value, leaf_count: Self::MAX + 1 });
        }
        Ok(Self(value))
    }
}

impl From<LeafIndex> for u32 {
    fn from(leaf: LeafIndex) -> Self {
        leaf.0
    }
}

impl NodeIndex {
    /// Wrap a raw node position.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw node position.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Array offset of this node.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether the node is a leaf.
    pub const fn is_leaf(self) -> bool {
        self.0 & 1 == 0
    }

    /// Leaf position for leaf nodes.
    pub const fn leaf(self) -> Option<LeafIndex> {
        if self.is_leaf() { Some(LeafIndex(self.0 >> 1)) } else { None }
    }

    /// Height above the leaves: the count of trailing one bits.
    pub const fn level(self) -> u32 {
        self.0.trailing_ones()
    }

    /// Left child, `None` for leaves.
    pub const fn left(self) -> Option<Self> {
        let k = self.level();
        if k == 0 { None } else { Some(Self(self.0 ^ (1 << (k - 1)))) }
    }

    /// Right child, `None` for leaves.
    pub const fn right(self) -> Option<Self> {
        let k = self.level();
        if k == 0 { None } else { Some(Self(self.0 ^ (3 << (k - 1)))) }
    }

    /// Parent in an unbounded tree.
    ///
    /// Callers bound the walk by the root of their tree; the root's parent
    /// computed here lies outside it.
    pub const fn parent(self) -> Self {
        let k = self.level();
        let b = (self.0 >> (k + 1)) & 1;
        Self((self.0 | (1 << k)) ^ (b << (k + 1)))
    }

    /// The other child of this node's parent.
    pub const fn sibling(self) -> Self {
        Self(self.0 ^ (2 << self.level()))
    }

    /// Whether `self` lies in the subtree rooted at `ancestor` (inclusive).
    pub const fn is_in_subtree(self, ancestor: Self) -> bool {
        let span = (1u32 << ancestor.level()) - 1;
        self.0 >= ancestor.0 - span && self.0 <= ancestor.0 + span
    }

    /// Lowest common ancestor of two nodes.
    pub fn common_ancestor(self, other: Self) -> Self {
        let mut node = self;
        while !other.is_in_subtree(node) {
            node = node.parent();
        }
        node
    }
}

/// Number of array slots for `leaf_count` leaves.
pub const fn node_width(leaf_count: u32) -> u32 {
    if leaf_count == 0 { 0 } else { 2 * (leaf_count - 1) + 1 }
}

/// Root of a tree with `leaf_count` leaves.
///
/// `leaf_count` must be at least one.
pub const fn root(leaf_count: u32) -> NodeIndex {
    let width = node_width(leaf_count);
    NodeIndex((1 << (31 - width.leading_zeros())) - 1)
}

/// Ancestors of `node` up to and including the root, nearest first.
///
/// Empty for the root itself and for nodes outside the tree.
pub fn direct_path(node: NodeIndex, leaf_count: u32) -> Vec<NodeIndex> {
    let root = root(leaf_count);
    let mut path = Vec::new();
    if node == root || node.value() >= node_width(leaf_count) {
        return path;
    }
    let mut current = node;
    while current != root {
        current = current.parent();
        path.push(current);
    }
    path
}

/// Siblings of `node` and of each non-root ancestor, nearest first.
///
/// Entry `i` is the child of `direct_path(node)[i]` that does not contain
/// `node`.
pub fn copath(node: NodeIndex, leaf_count: u32) -> Vec<NodeIndex> {
    let path = direct_path(node, leaf_count);
    let mut copath = Vec::with_capacity(path.len());
    if let Some((_, below_root)) = path.split_last() {
        copath.push(node.sibling());
        copath.extend(below_root.iter().map(|n| n.sibling()));
    }
    copath
}

/// Child of `parent` on the side that does not contain `leaf`.
pub fn copath_child(parent: NodeIndex, leaf: LeafIndex) -> Option<NodeIndex> {
    if leaf.node() < parent { parent.right() } else { parent.left() }
}
