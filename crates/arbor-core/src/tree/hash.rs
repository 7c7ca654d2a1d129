//! Tree hashes and parent hashes.
//!
//! ```text
//! TreeHash(leaf)   = Hash(Leaf   { leaf_index, leaf_node? })
//! TreeHash(parent) = Hash(Parent { parent_node?, TreeHash(left), TreeHash(right) })
//! ParentHash(P)    = Hash(P.encryption_key || P.parent_hash || original sibling tree hash)
//! ```
//!
//! The original sibling tree hash is the hash of the copath child's subtree
//! as it was when `P` was set: the leaves in `P.unmerged_leaves` are treated
//! as blank and dropped from every unmerged list below.

use arbor_crypto::{CipherSuite, HpkePublicKey};
use serde::Serialize;

use super::{
    index::{LeafIndex, NodeIndex, copath_child},
    node::{LeafNode, ParentNode},
    ratchet_tree::RatchetTree,
};
use crate::{codec, error::TreeError};

#[derive(Serialize)]
enum TreeHashInput<'a> {
    Leaf { leaf_index: LeafIndex, leaf_node: Option<&'a LeafNode> },
    Parent { parent_node: Option<&'a ParentNode>, left_hash: Vec<u8>, right_hash: Vec<u8> },
}

#[derive(Serialize)]
struct ParentHashInput<'a> {
    encryption_key: &'a HpkePublicKey,
    parent_hash: &'a [u8],
    original_sibling_tree_hash: Vec<u8>,
}

impl RatchetTree {
    /// Hash of the whole tree.
    pub fn tree_hash(&self, suite: &dyn CipherSuite) -> Result<Vec<u8>, TreeError> {
        self.subtree_hash(suite, self.root(), &[])
    }

    /// Hash of the subtree at `node`, treating `excluded` leaves as blank.
    fn subtree_hash(
        &self,
        suite: &dyn CipherSuite,
        node: NodeIndex,
        excluded: &[LeafIndex],
    ) -> Result<Vec<u8>, TreeError> {
        let input = match (node.leaf(), node.left(), node.right()) {
            (Some(leaf_index), _, _) => {
                let leaf_node =
                    if excluded.contains(&leaf_index) { None } else { self.leaf(leaf_index) };
                codec::encode(&TreeHashInput::Leaf { leaf_index, leaf_node })?
            },
            (None, Some(left), Some(right)) => {
                let left_hash = self.subtree_hash(suite, left, excluded)?;
                let right_hash = self.subtree_hash(suite, right, excluded)?;
                let filtered;
                let parent_node = match self.parent(node) {
                    Some(parent) if !excluded.is_empty() => {
                        let mut copy = parent.clone();
                        copy.unmerged_leaves.retain(|leaf| !excluded.contains(leaf));
                        filtered = copy;
                        Some(&filtered)
                    },
                    other => other,
                };
                codec::encode(&TreeHashInput::Parent { parent_node, left_hash, right_hash })?
            },
            _ => return Err(TreeError::NodeKindMismatch { index: node.value() }),
        };
        Ok(suite.hash(&input))
    }

    /// Parent hash of `parent`, committing to the original content of
    /// `sibling`, the child off the chain. Blank parents hash to nothing.
    pub fn parent_hash(
        &self,
        suite: &dyn CipherSuite,
        parent: NodeIndex,
        sibling: NodeIndex,
    ) -> Result<Vec<u8>, TreeError> {
        let Some(content) = self.parent(parent) else {
            return Ok(Vec::new());
        };
        let input = ParentHashInput {
            encryption_key: &content.encryption_key,
            parent_hash: &content.parent_hash,
            original_sibling_tree_hash: self.subtree_hash(
                suite,
                sibling,
                &content.unmerged_leaves,
            )?,
        };
        Ok(suite.hash(&codec::encode(&input)?))
    }

    /// Parent hash of `parent` on the chain that starts at `leaf`.
    pub fn parent_hash_for_leaf(
        &self,
        suite: &dyn CipherSuite,
        parent: NodeIndex,
        leaf: LeafIndex,
    ) -> Result<Vec<u8>, TreeError> {
        match copath_child(parent, leaf) {
            Some(sibling) => self.parent_hash(suite, parent, sibling),
            None => Ok(Vec::new()),
        }
    }

    /// Set parent hashes along `path` (nearest first), top down, and return
    /// the hash the leaf must declare.
    ///
    /// The topmost node gets an empty parent hash; each lower node stores the
    /// parent hash of the node above it.
    pub(crate) fn set_parent_hashes(
        &mut self,
        suite: &dyn CipherSuite,
        leaf: LeafIndex,
        path: &[NodeIndex],
    ) -> Result<Vec<u8>, TreeError> {
        let mut above = Vec::new();
        for node in path.iter().rev() {
            if let Some(parent) = self.parent_mut(*node) {
                parent.parent_hash = above;
            }
            above = self.parent_hash_for_leaf(suite, *node, leaf)?;
        }
        Ok(above)
    }
}
