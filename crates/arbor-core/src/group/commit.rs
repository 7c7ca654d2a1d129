//! Commits and update paths.
//!
//! ```text
//! leaf_secret    (random, Nh bytes)
//!   path_secret[0] = DeriveSecret(leaf_secret, "path")
//!   path_secret[n] = DeriveSecret(path_secret[n-1], "path")
//!   commit_secret  = DeriveSecret(path_secret[last], "path")
//!   node key pair  = DeriveKeyPair(DeriveSecret(path_secret[n], "node"))
//! ```
//!
//! Path secrets are assigned to the committer's filtered direct path,
//! nearest first. Each one is sealed to every node in the resolution of the
//! matching copath child, except leaves added by the same commit.

use arbor_crypto::{
    CipherSuite, CryptoError, HpkeCiphertext, HpkeKeyPair, HpkePublicKey, Secret,
    SignaturePrivateKey,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::proposal::ProposalOrRef;
use crate::{
    env::Environment,
    error::{CommitValidationError, GroupError, TreeError},
    tree::{
        LeafIndex, LeafNode, LeafNodeSource, NodeIndex, ParentNode, RatchetTree,
        TreePrivateKeyStore, check_unique_encryption_keys,
    },
};

const UPDATE_PATH_LABEL: &str = "UpdatePathNode";

/// A commit: the proposals it covers and optionally a fresh update path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Proposals, inline or by reference
    pub proposals: Vec<ProposalOrRef>,
    /// Committer's new key material
    pub path: Option<UpdatePath>,
}

/// New leaf and parent keys for the committer's filtered direct path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePath {
    /// Committer's re-signed leaf
    pub leaf_node: LeafNode,
    /// One entry per filtered direct path node, nearest first
    pub nodes: Vec<UpdatePathNode>,
}

/// One parent on an update path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePathNode {
    /// New public key of the parent
    pub encryption_key: HpkePublicKey,
    /// Path secret sealed to each node of the copath resolution
    pub encrypted_path_secret: Vec<HpkeCiphertext>,
}

/// Secrets behind a freshly generated path.
pub(crate) struct PathSecrets {
    /// Filtered direct path nodes with their path secrets, nearest first
    pub nodes: Vec<(NodeIndex, Secret)>,
    pub commit_secret: Secret,
    /// Private keys of the new leaf and parents
    pub private_keys: TreePrivateKeyStore,
}

impl PathSecrets {
    /// Path secret assigned to `node`, if it is on the path.
    pub fn secret_for(&self, node: NodeIndex) -> Option<&Secret> {
        self.nodes.iter().find(|(index, _)| *index == node).map(|(_, secret)| secret)
    }
}

fn node_key_pair(suite: &dyn CipherSuite, secret: &Secret) -> Result<HpkeKeyPair, CryptoError> {
    let node_secret = suite.derive_secret(secret, "node")?;
    suite.derive_hpke_key_pair(node_secret.as_bytes())
}

/// Nodes that receive the path secret for a copath child.
fn recipients(tree: &RatchetTree, copath: NodeIndex, exclude: &[LeafIndex]) -> Vec<NodeIndex> {
    tree.resolution(copath)
        .into_iter()
        .filter(|node| node.leaf().is_none_or(|leaf| !exclude.contains(&leaf)))
        .collect()
}

/// Replace `leaf`'s direct path with fresh keys and re-sign the leaf.
///
/// The tree is modified in place; callers pass a provisional copy.
pub(crate) fn generate_path(
    suite: &dyn CipherSuite,
    env: &dyn Environment,
    tree: &mut RatchetTree,
    leaf: LeafIndex,
    group_id: &[u8],
    signer: &SignaturePrivateKey,
) -> Result<PathSecrets, GroupError> {
    let template = tree.leaf(leaf).cloned().ok_or(TreeError::BlankLeaf { leaf: leaf.value() })?;
    let filtered = tree.filtered_direct_path(leaf);
    let leaf_secret = Secret::from(env.random_vec(suite.hash_len()));

    let mut private_keys = TreePrivateKeyStore::new();
    let mut nodes = Vec::with_capacity(filtered.len());
    let mut current = suite.derive_secret(&leaf_secret, "path")?;
    tree.blank_direct_path(leaf);
    for node in &filtered {
        let key_pair = node_key_pair(suite, &current)?;
        tree.set_parent(*node, ParentNode::new(key_pair.public_key.clone()));
        private_keys.insert(suite, &key_pair.public_key, key_pair.private_key);
        let next = suite.derive_secret(&current, "path")?;
        nodes.push((*node, std::mem::replace(&mut current, next)));
    }

    let parent_hash = tree.set_parent_hashes(suite, leaf, &filtered)?;
    let leaf_keys = node_key_pair(suite, &leaf_secret)?;
    let leaf_node = LeafNode::sign(
        suite,
        template.to_params(leaf_keys.public_key.clone(), LeafNodeSource::Commit { parent_hash }),
        signer,
        Some((group_id, leaf)),
    )?;
    tree.set_leaf(leaf, leaf_node)?;
    private_keys.insert(suite, &leaf_keys.public_key, leaf_keys.private_key);

    trace!(leaf = leaf.value(), nodes = nodes.len(), "update path generated");
    Ok(PathSecrets { nodes, commit_secret: current, private_keys })
}

/// Seal each path secret to its copath resolution.
///
/// `tree` is the tree after [`generate_path`]; `context` the encoded
/// provisional group context of the new epoch.
pub(crate) fn encrypt_path(
    suite: &dyn CipherSuite,
    env: &dyn Environment,
    tree: &RatchetTree,
    leaf: LeafIndex,
    secrets: &PathSecrets,
    exclude: &[LeafIndex],
    context: &[u8],
) -> Result<UpdatePath, GroupError> {
    let leaf_node = tree.leaf(leaf).cloned().ok_or(TreeError::BlankLeaf { leaf: leaf.value() })?;
    let mut nodes = Vec::with_capacity(secrets.nodes.len());
    for ((node, copath), (_, secret)) in
        tree.filtered_path_with_copath(leaf).into_iter().zip(&secrets.nodes)
    {
        let encryption_key = tree
            .parent(node)
            .map(|parent| parent.encryption_key.clone())
            .ok_or(TreeError::NodeKindMismatch { index: node.value() })?;
        let mut encrypted_path_secret = Vec::new();
        for target in recipients(tree, copath, exclude) {
            let Some(target_node) = tree.node(target) else {
                continue;
            };
            encrypted_path_secret.push(suite.encrypt_with_label(
                target_node.encryption_key(),
                UPDATE_PATH_LABEL,
                context,
                secret.as_bytes(),
                &env.random_vec(suite.hash_len()),
            )?);
        }
        nodes.push(UpdatePathNode { encryption_key, encrypted_path_secret });
    }
    Ok(UpdatePath { leaf_node, nodes })
}

/// Merge a received update path into `tree`.
///
/// Checks the path shape against the filtered direct path and the leaf's
/// declared parent hash against the recomputed chain. The leaf itself must
/// have been validated by the caller.
pub(crate) fn apply_path(
    suite: &dyn CipherSuite,
    tree: &mut RatchetTree,
    sender: LeafIndex,
    path: &UpdatePath,
    exclude: &[LeafIndex],
) -> Result<(), GroupError> {
    let filtered = tree.filtered_path_with_copath(sender);
    if path.nodes.len() != filtered.len() {
        return Err(CommitValidationError::WrongUpdatePathLength {
            expected: filtered.len(),
            actual: path.nodes.len(),
        }
        .into());
    }
    for ((node, copath), path_node) in filtered.iter().zip(&path.nodes) {
        let expected = recipients(tree, *copath, exclude).len();
        let actual = path_node.encrypted_path_secret.len();
        if actual != expected {
            return Err(CommitValidationError::WrongCiphertextCount {
                node: node.value(),
                expected,
                actual,
            }
            .into());
        }
    }

    tree.blank_direct_path(sender);
    for ((node, _), path_node) in filtered.iter().zip(&path.nodes) {
        tree.set_parent(*node, ParentNode::new(path_node.encryption_key.clone()));
    }
    let path_nodes: Vec<NodeIndex> = filtered.iter().map(|(node, _)| *node).collect();
    let parent_hash = tree.set_parent_hashes(suite, sender, &path_nodes)?;
    if path.leaf_node.parent_hash() != Some(parent_hash.as_slice()) {
        return Err(GroupError::WrongParentHash);
    }
    tree.set_leaf(sender, path.leaf_node.clone())?;
    check_unique_encryption_keys(tree)?;
    Ok(())
}

/// Recover the path secrets a received update path shares with `own`.
///
/// Returns the private keys learned along the way and the commit secret.
#[allow(clippy::too_many_arguments)]
pub(crate) fn decrypt_path(
    suite: &dyn CipherSuite,
    tree: &RatchetTree,
    sender: LeafIndex,
    own: LeafIndex,
    path: &UpdatePath,
    exclude: &[LeafIndex],
    keys: &TreePrivateKeyStore,
    context: &[u8],
) -> Result<(TreePrivateKeyStore, Secret), GroupError> {
    let filtered = tree.filtered_path_with_copath(sender);
    let own_node = own.node();
    let position = filtered
        .iter()
        .position(|(node, _)| own_node.is_in_subtree(*node))
        .ok_or(GroupError::NoDecryptionKey)?;
    let (_, copath) = filtered[position];

    let (slot, private_key) = recipients(tree, copath, exclude)
        .into_iter()
        .enumerate()
        .filter(|(_, node)| own_node.is_in_subtree(*node))
        .find_map(|(slot, node)| {
            tree.node(node).and_then(|n| keys.get(suite, n.encryption_key())).map(|k| (slot, k))
        })
        .ok_or(GroupError::NoDecryptionKey)?;
    let ciphertext = path
        .nodes
        .get(position)
        .and_then(|node| node.encrypted_path_secret.get(slot))
        .ok_or(GroupError::NoDecryptionKey)?;

    let secret = suite.decrypt_with_label(private_key, UPDATE_PATH_LABEL, context, ciphertext)?;
    let path_nodes: Vec<NodeIndex> = filtered[position..].iter().map(|(node, _)| *node).collect();
    derive_path_keys(suite, tree, &path_nodes, Secret::from(secret))
}

/// Walk `nodes` upward from `path_secret`, checking each derived public key
/// against the tree.
pub(crate) fn derive_path_keys(
    suite: &dyn CipherSuite,
    tree: &RatchetTree,
    nodes: &[NodeIndex],
    path_secret: Secret,
) -> Result<(TreePrivateKeyStore, Secret), GroupError> {
    let mut private_keys = TreePrivateKeyStore::new();
    let mut current = path_secret;
    for node in nodes {
        let key_pair = node_key_pair(suite, &current)?;
        if tree.parent(*node).map(|parent| &parent.encryption_key) != Some(&key_pair.public_key) {
            return Err(GroupError::PathKeyMismatch { node: node.value() });
        }
        private_keys.insert(suite, &key_pair.public_key, key_pair.private_key);
        current = suite.derive_secret(&current, "path")?;
    }
    Ok((private_keys, current))
}

#[cfg(test)]
mod tests {
    use arbor_crypto::{Curve25519ChaCha, SignatureKeyPair};

    use super::*;
    use crate::{
        env::test_utils::MockEnv,
        tree::{Capabilities, Credential, LeafNodeParams, Lifetime},
    };

    struct Member {
        signer: SignatureKeyPair,
        keys: TreePrivateKeyStore,
    }

    fn members(suite: &Curve25519ChaCha, count: u8) -> (RatchetTree, Vec<Member>) {
        let mut tree: Option<RatchetTree> = None;
        let mut out = Vec::new();
        for tag in 0..count {
            let signer = suite.derive_signature_key_pair(&[tag; 32]).unwrap();
            let hpke = suite.derive_hpke_key_pair(&[tag + 100; 32]).unwrap();
            let leaf = LeafNode::sign(
                suite,
                LeafNodeParams {
                    encryption_key: hpke.public_key.clone(),
                    signature_key: signer.public_key.clone(),
                    credential: Credential::basic(vec![b'a' + tag]),
                    capabilities: Capabilities::for_suite(3),
                    source: LeafNodeSource::KeyPackage { lifetime: Lifetime::starting_at(0, 10) },
                    extensions: vec![],
                },
                &signer.private_key,
                None,
            )
            .unwrap();
            let mut keys = TreePrivateKeyStore::new();
            keys.insert(suite, &hpke.public_key, hpke.private_key);
            tree = Some(match tree {
                None => RatchetTree::new(leaf),
                Some(tree) => tree.insert(leaf).unwrap().0,
            });
            out.push(Member { signer, keys });
        }
        (tree.unwrap(), out)
    }

    #[test]
    fn every_member_recovers_the_commit_secret() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(4);
        let (tree, members) = members(&suite, 5);
        let committer = LeafIndex::new(1);

        let mut sender_tree = tree.clone();
        let secrets = generate_path(
            &suite,
            &env,
            &mut sender_tree,
            committer,
            b"g",
            &members[1].signer.private_key,
        )
        .unwrap();
        let path = encrypt_path(&suite, &env, &sender_tree, committer, &secrets, &[], b"ctx").unwrap();

        for (index, member) in members.iter().enumerate() {
            if index == 1 {
                continue;
            }
            let mut receiver_tree = tree.clone();
            apply_path(&suite, &mut receiver_tree, committer, &path, &[]).unwrap();
            assert_eq!(receiver_tree, sender_tree);

            let own = LeafIndex::new(index as u32);
            let (_, commit_secret) = decrypt_path(
                &suite,
                &receiver_tree,
                committer,
                own,
                &path,
                &[],
                &member.keys,
                b"ctx",
            )
            .unwrap();
            assert_eq!(commit_secret, secrets.commit_secret);
        }
    }

    #[test]
    fn tampered_leaf_breaks_parent_hash() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(5);
        let (tree, members) = members(&suite, 3);
        let committer = LeafIndex::new(0);

        let mut sender_tree = tree.clone();
        let secrets =
            generate_path(&suite, &env, &mut sender_tree, committer, b"g", &members[0].signer.private_key)
                .unwrap();
        let mut path = encrypt_path(&suite, &env, &sender_tree, committer, &secrets, &[], b"ctx").unwrap();
        path.nodes[0].encryption_key = HpkePublicKey::from(vec![7; 32]);

        let mut receiver_tree = tree.clone();
        assert_eq!(
            apply_path(&suite, &mut receiver_tree, committer, &path, &[]),
            Err(GroupError::WrongParentHash)
        );
    }

    #[test]
    fn path_length_is_checked() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(6);
        let (tree, members) = members(&suite, 4);
        let committer = LeafIndex::new(3);

        let mut sender_tree = tree.clone();
        let secrets =
            generate_path(&suite, &env, &mut sender_tree, committer, b"g", &members[3].signer.private_key)
                .unwrap();
        let mut path = encrypt_path(&suite, &env, &sender_tree, committer, &secrets, &[], b"ctx").unwrap();
        path.nodes.pop();

        let mut receiver_tree = tree;
        assert_eq!(
            apply_path(&suite, &mut receiver_tree, committer, &path, &[]),
            Err(GroupError::Validation(CommitValidationError::WrongUpdatePathLength {
                expected: 2,
                actual: 1
            }))
        );
    }

    #[test]
    fn excluded_leaves_get_no_ciphertext() {
        let suite = Curve25519ChaCha::new();
        let env = MockEnv::seeded(7);
        let (tree, members) = members(&suite, 3);
        let committer = LeafIndex::new(0);

        let mut sender_tree = tree;
        let secrets =
            generate_path(&suite, &env, &mut sender_tree, committer, b"g", &members[0].signer.private_key)
                .unwrap();
        let excluded = [LeafIndex::new(2)];
        let path =
            encrypt_path(&suite, &env, &sender_tree, committer, &secrets, &excluded, b"ctx").unwrap();
        // Node 3's copath child is node 5, resolving to leaf 2 only.
        assert_eq!(path.nodes.len(), 2);
        assert_eq!(path.nodes[1].encrypted_path_secret.len(), 0);
        assert!(secrets.secret_for(NodeIndex::new(3)).is_some());
    }
}
