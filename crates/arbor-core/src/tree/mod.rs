//! Ratchet tree: index arithmetic, node content, structural operations,
//! hashing, validation and private key storage.

mod check;
mod hash;
mod index;
mod node;
mod private;
mod ratchet_tree;

pub use check::{LeafNodeValidator, SourceKind, check_tree};
pub(crate) use check::check_unique_encryption_keys;
pub use index::{LeafIndex, NodeIndex, copath, copath_child, direct_path, node_width, root};
pub use node::{
    Capabilities, Credential, LeafNode, LeafNodeParams, LeafNodeSource, Lifetime, Node,
    ParentNode,
};
pub use private::TreePrivateKeyStore;
pub use ratchet_tree::RatchetTree;
