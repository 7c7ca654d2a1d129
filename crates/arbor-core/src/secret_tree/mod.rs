//! Secret tree: per-leaf handshake and application ratchets derived from
//! the epoch's encryption secret.
//!
//! ```text
//! left  = ExpandWithLabel(node_secret, "tree", "left",  Nh)
//! right = ExpandWithLabel(node_secret, "tree", "right", Nh)
//! handshake_ratchet   = ExpandWithLabel(leaf_secret, "handshake",   "", Nh)
//! application_ratchet = ExpandWithLabel(leaf_secret, "application", "", Nh)
//! ```
//!
//! Construction walks the leaves left to right keeping only the secrets on
//! the current root-to-leaf path. Every interior secret is derived once and
//! wiped as soon as both children exist.

mod ratchet;

use arbor_crypto::{CipherSuite, Secret};
use tracing::trace;

pub use ratchet::{MessageSecrets, Ratchet};

use crate::{
    config::RatchetConfig,
    error::RatchetError,
    tree::{LeafIndex, NodeIndex, root},
};

const TREE_LABEL: &str = "tree";
const HANDSHAKE_LABEL: &str = "handshake";
const APPLICATION_LABEL: &str = "application";

/// Ratchet pair owned by one leaf.
#[derive(Debug)]
pub struct LeafRatchets {
    /// Ratchet for handshake messages
    pub handshake: Ratchet,
    /// Ratchet for application messages
    pub application: Ratchet,
}

/// Every leaf's ratchets for one epoch.
#[derive(Debug)]
pub struct SecretTree {
    leaves: Vec<LeafRatchets>,
}

impl SecretTree {
    /// Derive the ratchets for `leaf_count` leaves from `encryption_secret`.
    pub fn new(
        suite: &dyn CipherSuite,
        encryption_secret: &Secret,
        leaf_count: u32,
        config: RatchetConfig,
    ) -> Result<Self, RatchetError> {
        let mut leaves = Vec::with_capacity(leaf_count as usize);
        if leaf_count == 0 {
            return Ok(Self { leaves });
        }

        // Secrets of nodes whose right subtree has not been visited yet,
        // ending with the next leaf to emit.
        let mut stack: Vec<(NodeIndex, Secret)> = vec![(root(leaf_count), encryption_secret.clone())];
        descend_left(suite, &mut stack)?;

        while let Some((_, leaf_secret)) = stack.pop() {
            let hash_len = suite.hash_len();
            let handshake = suite.expand_with_label(&leaf_secret, HANDSHAKE_LABEL, &[], hash_len)?;
            let application =
                suite.expand_with_label(&leaf_secret, APPLICATION_LABEL, &[], hash_len)?;
            leaves.push(LeafRatchets {
                handshake: Ratchet::new(handshake, config),
                application: Ratchet::new(application, config),
            });
            if leaves.len() == leaf_count as usize {
                break;
            }

            let Some((ancestor, ancestor_secret)) = stack.pop() else {
                break;
            };
            let Some(right) = ancestor.right() else {
                break;
            };
            let right_secret =
                suite.expand_with_label(&ancestor_secret, TREE_LABEL, b"right", hash_len)?;
            stack.push((right, right_secret));
            descend_left(suite, &mut stack)?;
        }

        trace!(leaves = leaves.len(), "secret tree derived");
        Ok(Self { leaves })
    }

    /// Number of leaves covered.
    pub fn leaf_count(&self) -> u32 {
        self.leaves.len() as u32
    }

    /// Both ratchets of `leaf`.
    pub fn ratchets(&self, leaf: LeafIndex) -> Result<&LeafRatchets, RatchetError> {
        self.leaves.get(leaf.value() as usize).ok_or(RatchetError::UnknownLeaf {
            leaf: leaf.value(),
            leaf_count: self.leaf_count(),
        })
    }

    /// Handshake ratchet of `leaf`.
    pub fn handshake(&self, leaf: LeafIndex) -> Result<&Ratchet, RatchetError> {
        Ok(&self.ratchets(leaf)?.handshake)
    }

    /// Application ratchet of `leaf`.
    pub fn application(&self, leaf: LeafIndex) -> Result<&Ratchet, RatchetError> {
        Ok(&self.ratchets(leaf)?.application)
    }
}

/// Extend the stack with left children until its top is a leaf. Parents
/// stay on the stack until their right child is taken.
fn descend_left(
    suite: &dyn CipherSuite,
    stack: &mut Vec<(NodeIndex, Secret)>,
) -> Result<(), RatchetError> {
    while let Some((node, secret)) = stack.last() {
        let Some(left) = node.left() else {
            return Ok(());
        };
        let left_secret = suite.expand_with_label(secret, TREE_LABEL, b"left", suite.hash_len())?;
        stack.push((left, left_secret));
    }
    Ok(())
}
