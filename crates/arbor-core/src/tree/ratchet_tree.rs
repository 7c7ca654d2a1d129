//! The ratchet tree: a left-balanced binary tree of optional nodes.
//!
//! Mutating operations take `&self` and return a new tree, so a failed
//! commit never disturbs the tree it started from.
//!
//! # Invariants
//!
//! - The leaf count is a power of two
//! - Leaves occupy even slots, parents odd slots
//! - The root's right subtree is never entirely blank, except for a tree of
//!   one leaf
//! - Unmerged leaf lists are ascending and only name leaves below the node

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{
    index::{self, LeafIndex, NodeIndex},
    node::{LeafNode, Node, ParentNode},
};
use crate::error::TreeError;

/// Array-backed ratchet tree.
#[derive(Clone, PartialEq, Eq)]
pub struct RatchetTree {
    nodes: Vec<Option<Node>>,
}

impl RatchetTree {
    /// One-member tree.
    pub fn new(leaf: LeafNode) -> Self {
        Self { nodes: vec![Some(Node::Leaf(leaf))] }
    }

    /// Rebuild a tree from an exported node list.
    ///
    /// The list must be non-empty, end with a non-blank node and put each
    /// node kind at a matching position. It is padded with blanks up to the
    /// next power-of-two leaf count.
    pub fn from_nodes(mut nodes: Vec<Option<Node>>) -> Result<Self, TreeError> {
        match nodes.last() {
            None => return Err(TreeError::EmptyTree),
            Some(None) => return Err(TreeError::TrailingBlank),
            Some(Some(_)) => {},
        }
        for (i, slot) in nodes.iter().enumerate() {
            let index = u32::try_from(i).map_err(|_| TreeError::TreeFull)?;
            let leaf_slot = NodeIndex::new(index).is_leaf();
            match slot {
                Some(Node::Leaf(_)) if !leaf_slot => {
                    return Err(TreeError::NodeKindMismatch { index });
                },
                Some(Node::Parent(_)) if leaf_slot => {
                    return Err(TreeError::NodeKindMismatch { index });
                },
                _ => {},
            }
        }
        let leaf_count = (nodes.len() as u32 + 1).div_ceil(2).next_power_of_two();
        for (i, slot) in nodes.iter().enumerate() {
            if let Some(Node::Parent(parent)) = slot
                && let Some(leaf) = parent.unmerged_leaves.iter().find(|l| l.value() >= leaf_count)
            {
                return Err(TreeError::BadUnmergedLeaf { node: i as u32, leaf: leaf.value() });
            }
        }
        nodes.resize(index::node_width(leaf_count) as usize, None);
        Ok(Self { nodes })
    }

    /// Node list with trailing blanks stripped.
    pub fn export_nodes(&self) -> &[Option<Node>] {
        let end = self.nodes.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        &self.nodes[..end]
    }

    /// Number of leaf slots, blank or not.
    pub fn leaf_count(&self) -> u32 {
        (self.nodes.len() as u32).div_ceil(2)
    }

    /// Number of occupied leaves.
    pub fn member_count(&self) -> usize {
        self.leaves().count()
    }

    /// Root node index.
    pub fn root(&self) -> NodeIndex {
        index::root(self.leaf_count())
    }

    /// Node at `index`; `None` when blank or out of range.
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.as_usize()).and_then(Option::as_ref)
    }

    /// Leaf content at `leaf`; `None` when blank or out of range.
    pub fn leaf(&self, leaf: LeafIndex) -> Option<&LeafNode> {
        if !self.contains_leaf(leaf) {
            return None;
        }
        match self.node(leaf.node()) {
            Some(Node::Leaf(content)) => Some(content),
            _ => None,
        }
    }

    /// Parent content at `index`.
    pub fn parent(&self, index: NodeIndex) -> Option<&ParentNode> {
        match self.node(index) {
            Some(Node::Parent(content)) => Some(content),
            _ => None,
        }
    }

    /// Occupied leaves in ascending order.
    pub fn leaves(&self) -> impl Iterator<Item = (LeafIndex, &LeafNode)> {
        self.nodes.iter().step_by(2).enumerate().filter_map(|(i, slot)| match slot {
            Some(Node::Leaf(leaf)) => Some((LeafIndex::new(i as u32), leaf)),
            _ => None,
        })
    }

    /// Occupied nodes of either kind in ascending order.
    pub fn non_blank_nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|node| (NodeIndex::new(i as u32), node)))
    }

    /// First occupied leaf matching `predicate`.
    pub fn find_leaf(&self, predicate: impl Fn(&LeafNode) -> bool) -> Option<LeafIndex> {
        self.leaves().find(|(_, leaf)| predicate(leaf)).map(|(index, _)| index)
    }

    /// Whether `leaf` addresses a slot inside the tree.
    pub fn contains_leaf(&self, leaf: LeafIndex) -> bool {
        leaf.value() < self.leaf_count()
    }

    /// Ancestors of `leaf`, nearest first.
    pub fn direct_path(&self, leaf: LeafIndex) -> Vec<NodeIndex> {
        index::direct_path(leaf.node(), self.leaf_count())
    }

    /// Copath of `leaf`, nearest first.
    pub fn copath(&self, leaf: LeafIndex) -> Vec<NodeIndex> {
        index::copath(leaf.node(), self.leaf_count())
    }

    /// Minimal set of non-blank nodes covering the subtree at `node`.
    ///
    /// A non-blank node resolves to itself followed by its unmerged leaves; a
    /// blank parent to the concatenation of its children's resolutions; a
    /// blank leaf to nothing.
    pub fn resolution(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        self.resolve_into(node, &mut out);
        out
    }

    fn resolve_into(&self, node: NodeIndex, out: &mut Vec<NodeIndex>) {
        match self.node(node) {
            Some(Node::Parent(parent)) => {
                out.push(node);
                out.extend(parent.unmerged_leaves.iter().map(|leaf| leaf.node()));
            },
            Some(Node::Leaf(_)) => out.push(node),
            None => {
                if let (Some(left), Some(right)) = (node.left(), node.right())
                    && node.as_usize() < self.nodes.len()
                {
                    self.resolve_into(left, out);
                    self.resolve_into(right, out);
                }
            },
        }
    }

    /// Direct path entries whose copath child has a non-empty resolution,
    /// each paired with that copath child.
    pub fn filtered_path_with_copath(&self, leaf: LeafIndex) -> Vec<(NodeIndex, NodeIndex)> {
        self.direct_path(leaf)
            .into_iter()
            .zip(self.copath(leaf))
            .filter(|(_, child)| !self.resolution(*child).is_empty())
            .collect()
    }

    /// Direct path of `leaf` without nodes whose copath child resolves to
    /// nothing.
    pub fn filtered_direct_path(&self, leaf: LeafIndex) -> Vec<NodeIndex> {
        self.filtered_path_with_copath(leaf).into_iter().map(|(node, _)| node).collect()
    }

    /// Add `leaf` at the leftmost blank leaf slot, doubling the tree when
    /// full. The new leaf is recorded as unmerged at every occupied
    /// ancestor.
    pub fn insert(&self, leaf: LeafNode) -> Result<(Self, LeafIndex), TreeError> {
        let mut tree = self.clone();
        let index = tree.insert_in_place(leaf)?;
        Ok((tree, index))
    }

    pub(crate) fn insert_in_place(&mut self, leaf: LeafNode) -> Result<LeafIndex, TreeError> {
        let free = (0..self.leaf_count())
            .map(LeafIndex::new)
            .find(|candidate| self.node(candidate.node()).is_none());
        let index = match free {
            Some(index) => index,
            None => {
                let index = LeafIndex::new(self.leaf_count());
                self.extend()?;
                index
            },
        };
        self.nodes[index.node().as_usize()] = Some(Node::Leaf(leaf));
        for ancestor in self.direct_path(index) {
            if let Some(Some(Node::Parent(parent))) = self.nodes.get_mut(ancestor.as_usize()) {
                parent.add_unmerged(index);
            }
        }
        Ok(index)
    }

    /// Blank `leaf` and its direct path, then shrink while the right half
    /// of the tree is empty.
    pub fn remove(&self, leaf: LeafIndex) -> Result<Self, TreeError> {
        let mut tree = self.clone();
        tree.remove_in_place(leaf)?;
        Ok(tree)
    }

    pub(crate) fn remove_in_place(&mut self, leaf: LeafIndex) -> Result<(), TreeError> {
        self.require_leaf(leaf)?;
        self.nodes[leaf.node().as_usize()] = None;
        self.blank_direct_path(leaf);
        self.truncate();
        Ok(())
    }

    /// Replace the content of `leaf` and blank its direct path.
    pub fn update(&self, leaf: LeafIndex, content: LeafNode) -> Result<Self, TreeError> {
        let mut tree = self.clone();
        tree.update_in_place(leaf, content)?;
        Ok(tree)
    }

    pub(crate) fn update_in_place(
        &mut self,
        leaf: LeafIndex,
        content: LeafNode,
    ) -> Result<(), TreeError> {
        self.require_leaf(leaf)?;
        self.nodes[leaf.node().as_usize()] = Some(Node::Leaf(content));
        self.blank_direct_path(leaf);
        Ok(())
    }

    /// Blank every ancestor of `leaf`.
    pub(crate) fn blank_direct_path(&mut self, leaf: LeafIndex) {
        for ancestor in self.direct_path(leaf) {
            self.nodes[ancestor.as_usize()] = None;
        }
    }

    /// Overwrite a parent slot.
    pub(crate) fn set_parent(&mut self, index: NodeIndex, parent: ParentNode) {
        if let Some(slot) = self.nodes.get_mut(index.as_usize()) {
            *slot = Some(Node::Parent(parent));
        }
    }

    /// Overwrite an occupied leaf slot.
    pub(crate) fn set_leaf(&mut self, leaf: LeafIndex, content: LeafNode) -> Result<(), TreeError> {
        self.require_in_range(leaf)?;
        self.nodes[leaf.node().as_usize()] = Some(Node::Leaf(content));
        Ok(())
    }

    /// Mutable parent content at `index`.
    pub(crate) fn parent_mut(&mut self, index: NodeIndex) -> Option<&mut ParentNode> {
        match self.nodes.get_mut(index.as_usize()) {
            Some(Some(Node::Parent(parent))) => Some(parent),
            _ => None,
        }
    }

    fn extend(&mut self) -> Result<(), TreeError> {
        let leaf_count = self.leaf_count().checked_mul(2).ok_or(TreeError::TreeFull)?;
        self.nodes.resize(index::node_width(leaf_count) as usize, None);
        Ok(())
    }

    fn truncate(&mut self) {
        while self.nodes.len() > 1 {
            let root = self.root().as_usize();
            if self.nodes[root + 1..].iter().any(Option::is_some) {
                break;
            }
            self.nodes.truncate(root);
        }
    }

    fn require_in_range(&self, leaf: LeafIndex) -> Result<(), TreeError> {
        if self.contains_leaf(leaf) {
            Ok(())
        } else {
            Err(TreeError::LeafOutOfRange { leaf: leaf.value(), leaf_count: self.leaf_count() })
        }
    }

    fn require_leaf(&self, leaf: LeafIndex) -> Result<(), TreeError> {
        self.require_in_range(leaf)?;
        if self.leaf(leaf).is_none() {
            return Err(TreeError::BlankLeaf { leaf: leaf.value() });
        }
        Ok(())
    }
}

impl fmt::Debug for RatchetTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let occupancy: String = self
            .nodes
            .iter()
            .map(|slot| match slot {
                Some(Node::Leaf(_)) => 'L',
                Some(Node::Parent(_)) => 'P',
                None => '_',
            })
            .collect();
        f.debug_struct("RatchetTree")
            .field("leaf_count", &self.leaf_count())
            .field("nodes", &occupancy)
            .finish()
    }
}

impl Serialize for RatchetTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.export_nodes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RatchetTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = Vec::<Option<Node>>::deserialize(deserializer)?;
        Self::from_nodes(nodes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{HpkePublicKey, SignaturePublicKey};

    use super::*;
    use crate::{
        codec,
        tree::node::{Capabilities, Credential, LeafNodeSource, Lifetime},
    };

    fn leaf(tag: u8) -> LeafNode {
        LeafNode {
            encryption_key: HpkePublicKey::from(vec![tag; 32]),
            signature_key: SignaturePublicKey::from(vec![tag; 32]),
            credential: Credential::basic(vec![tag]),
            capabilities: Capabilities::for_suite(3),
            source: LeafNodeSource::KeyPackage { lifetime: Lifetime::starting_at(0, 10) },
            extensions: vec![],
            signature: vec![],
        }
    }

    fn parent(tag: u8) -> ParentNode {
        ParentNode::new(HpkePublicKey::from(vec![tag; 32]))
    }

    fn tree_of(count: u8) -> RatchetTree {
        let mut tree = RatchetTree::new(leaf(0));
        for tag in 1..count {
            tree = tree.insert(leaf(tag)).unwrap().0;
        }
        tree
    }

    #[test]
    fn insert_doubles_when_full() {
        let tree = RatchetTree::new(leaf(0));
        let (tree, index) = tree.insert(leaf(1)).unwrap();
        assert_eq!(index, LeafIndex::new(1));
        assert_eq!(tree.leaf_count(), 2);

        let (tree, index) = tree.insert(leaf(2)).unwrap();
        assert_eq!(index, LeafIndex::new(2));
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.member_count(), 3);
    }

    #[test]
    fn insert_fills_leftmost_blank() {
        let tree = tree_of(4).remove(LeafIndex::new(1)).unwrap();
        let (tree, index) = tree.insert(leaf(9)).unwrap();
        assert_eq!(index, LeafIndex::new(1));
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn insert_marks_unmerged_on_occupied_ancestors() {
        let mut tree = tree_of(3);
        tree.set_parent(NodeIndex::new(3), parent(30));
        let (tree, index) = tree.insert(leaf(3)).unwrap();
        assert_eq!(index, LeafIndex::new(3));
        assert_eq!(tree.parent(NodeIndex::new(3)).unwrap().unmerged_leaves, vec![index]);
        assert!(tree.parent(NodeIndex::new(5)).is_none());
    }

    #[test]
    fn remove_truncates_empty_right_half() {
        let tree = tree_of(2);
        let tree = tree.remove(LeafIndex::new(1)).unwrap();
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.export_nodes().len(), 1);
    }

    #[test]
    fn remove_keeps_width_when_right_half_occupied() {
        let tree = tree_of(3).remove(LeafIndex::new(1)).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert!(tree.leaf(LeafIndex::new(1)).is_none());
    }

    #[test]
    fn remove_blank_leaf_fails() {
        let tree = tree_of(3).remove(LeafIndex::new(1)).unwrap();
        assert_eq!(tree.remove(LeafIndex::new(1)), Err(TreeError::BlankLeaf { leaf: 1 }));
        assert_eq!(
            tree.remove(LeafIndex::new(9)),
            Err(TreeError::LeafOutOfRange { leaf: 9, leaf_count: 4 })
        );
    }

    #[test]
    fn update_blanks_direct_path() {
        let mut tree = tree_of(4);
        tree.set_parent(NodeIndex::new(1), parent(10));
        tree.set_parent(NodeIndex::new(3), parent(30));
        tree.set_parent(NodeIndex::new(5), parent(50));
        let tree = tree.update(LeafIndex::new(0), leaf(42)).unwrap();
        assert!(tree.node(NodeIndex::new(1)).is_none());
        assert!(tree.node(NodeIndex::new(3)).is_none());
        assert!(tree.node(NodeIndex::new(5)).is_some());
        assert_eq!(tree.leaf(LeafIndex::new(0)), Some(&leaf(42)));
    }

    #[test]
    fn resolution_expands_blanks_and_unmerged() {
        let mut tree = tree_of(4);
        let mut p5 = parent(50);
        p5.add_unmerged(LeafIndex::new(3));
        tree.set_parent(NodeIndex::new(5), p5);
        assert_eq!(
            tree.resolution(NodeIndex::new(3)),
            vec![NodeIndex::new(0), NodeIndex::new(2), NodeIndex::new(5), NodeIndex::new(6)]
        );
        let tree = tree.remove(LeafIndex::new(1)).unwrap();
        assert_eq!(tree.resolution(NodeIndex::new(2)), Vec::<NodeIndex>::new());
    }

    #[test]
    fn filtered_path_skips_empty_copath() {
        let tree = tree_of(3);
        // Leaf 2's copath is [leaf 3 (blank), node 1].
        assert_eq!(tree.filtered_direct_path(LeafIndex::new(2)), vec![NodeIndex::new(3)]);
        assert_eq!(
            tree.filtered_direct_path(LeafIndex::new(0)),
            vec![NodeIndex::new(1), NodeIndex::new(3)]
        );
    }

    #[test]
    fn export_strips_and_import_pads() {
        let tree = tree_of(3);
        let exported = tree.export_nodes().to_vec();
        assert_eq!(exported.len(), 5);
        let rebuilt = RatchetTree::from_nodes(exported).unwrap();
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn import_rejects_malformed_lists() {
        assert_eq!(RatchetTree::from_nodes(vec![]), Err(TreeError::EmptyTree));
        assert_eq!(
            RatchetTree::from_nodes(vec![Some(Node::Leaf(leaf(0))), None]),
            Err(TreeError::TrailingBlank)
        );
        assert_eq!(
            RatchetTree::from_nodes(vec![
                Some(Node::Leaf(leaf(0))),
                Some(Node::Leaf(leaf(1))),
                Some(Node::Leaf(leaf(2))),
            ]),
            Err(TreeError::NodeKindMismatch { index: 1 })
        );
    }

    #[test]
    fn import_rejects_unmerged_leaf_outside_tree() {
        for stray in [2, 0x8000_0000] {
            let mut p1 = parent(10);
            p1.unmerged_leaves.push(LeafIndex::new(stray));
            let nodes =
                vec![Some(Node::Leaf(leaf(0))), Some(Node::Parent(p1)), Some(Node::Leaf(leaf(1)))];
            assert_eq!(
                RatchetTree::from_nodes(nodes),
                Err(TreeError::BadUnmergedLeaf { node: 1, leaf: LeafIndex::new(stray).value() })
            );
        }
    }

    #[test]
    fn out_of_range_leaf_is_absent() {
        let tree = tree_of(2);
        assert_eq!(tree.leaf(LeafIndex::new(2)), None);
        assert_eq!(tree.leaf(LeafIndex::new(u32::MAX)), None);
        assert!(tree.direct_path(LeafIndex::new(u32::MAX)).is_empty());
    }

    #[test]
    fn codec_strips_trailing_blanks() {
        let tree = tree_of(3);
        let bytes = codec::encode(&tree).unwrap();
        let decoded: RatchetTree = codec::decode(&bytes).unwrap();
        assert_eq!(decoded, tree);

        let padded = vec![Some(Node::Leaf(leaf(0))), None, None];
        let bytes = codec::encode(&padded).unwrap();
        assert!(codec::decode::<RatchetTree>(&bytes).is_err());
    }
}
